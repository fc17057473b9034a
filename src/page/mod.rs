//! Narrow capabilities the pipeline needs from a rendered page. The host
//! bridge implements them over its protocol; tests implement them in memory.

use async_trait::async_trait;
use image::DynamicImage;
use tokio::sync::broadcast;

use crate::{
    detection::{ModalView, PipelineError},
    domain::{ElementSnapshot, NodeId, PlaybackState},
};

const FEED_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomChange {
    /// An inserted node followed by its media descendants.
    Inserted(Vec<NodeId>),
    Removed(NodeId),
    /// `src` or `data-src` changed.
    SourceChanged(NodeId),
    Playback(NodeId, PlaybackState),
}

#[async_trait]
pub trait PageSurface: Send + Sync {
    fn location(&self) -> String;

    /// Media nodes currently in the document.
    fn media_elements(&self) -> Vec<NodeId>;

    /// `None` once the node has been detached.
    fn inspect(&self, node: NodeId) -> Option<ElementSnapshot>;

    async fn load_image(&self, node: NodeId) -> Result<DynamicImage, PipelineError>;

    async fn capture_frame(&self, node: NodeId) -> Result<DynamicImage, PipelineError>;
}

/// Structural DOM changes.
pub trait ChangeFeed: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<DomChange>;
}

/// Nodes entering the expanded viewport.
pub trait VisibilityFeed: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<NodeId>;
}

pub trait EnforcementUi: Send + Sync {
    fn present(&self, view: &ModalView);
    fn dismiss(&self);
    fn close_tab(&self);
}

#[derive(Debug, Clone)]
pub struct BroadcastFeed<T> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone> BroadcastFeed<T> {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(FEED_CAPACITY);
        Self { sender }
    }

    /// Returns the number of live subscribers; zero means nobody is observing.
    pub fn publish(&self, event: T) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: Clone> Default for BroadcastFeed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed for BroadcastFeed<DomChange> {
    fn subscribe(&self) -> broadcast::Receiver<DomChange> {
        self.sender.subscribe()
    }
}

impl VisibilityFeed for BroadcastFeed<NodeId> {
    fn subscribe(&self) -> broadcast::Receiver<NodeId> {
        self.sender.subscribe()
    }
}
