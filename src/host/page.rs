use std::collections::HashMap;

use async_trait::async_trait;
use image::DynamicImage;
use parking_lot::Mutex;
use reqwest::Client;
use url::Url;

use crate::{
    detection::{media, PipelineError},
    domain::{ElementSnapshot, NodeId, PlaybackState},
    page::PageSurface,
};

#[derive(Default)]
struct PageMirror {
    location: String,
    order: Vec<NodeId>,
    nodes: HashMap<NodeId, ElementSnapshot>,
    frames: HashMap<NodeId, String>,
}

/// The pipeline's view of the host page, kept current by the bridge.
pub struct HostPage {
    http: Client,
    mirror: Mutex<PageMirror>,
}

impl HostPage {
    pub fn new(http: Client) -> Self {
        Self {
            http,
            mirror: Mutex::new(PageMirror::default()),
        }
    }

    /// A new document: every mirrored node is gone.
    pub fn navigate(&self, url: &str) {
        let mut mirror = self.mirror.lock();
        *mirror = PageMirror {
            location: url.to_string(),
            ..PageMirror::default()
        };
    }

    pub fn upsert(&self, node: NodeId, snapshot: ElementSnapshot) {
        let mut mirror = self.mirror.lock();
        if mirror.nodes.insert(node, snapshot).is_none() {
            mirror.order.push(node);
        }
    }

    pub fn remove(&self, node: NodeId) {
        let mut mirror = self.mirror.lock();
        if mirror.nodes.remove(&node).is_some() {
            mirror.order.retain(|existing| *existing != node);
        }
        mirror.frames.remove(&node);
    }

    pub fn set_source(&self, node: NodeId, source: Option<String>) {
        if let Some(snapshot) = self.mirror.lock().nodes.get_mut(&node) {
            snapshot.source = source;
        }
    }

    pub fn set_playback(&self, node: NodeId, playback: PlaybackState) {
        if let Some(snapshot) = self.mirror.lock().nodes.get_mut(&node) {
            snapshot.playback = playback;
        }
    }

    /// Latest frame of a video, as pushed by the host.
    pub fn store_frame(&self, node: NodeId, data_url: String) {
        let mut mirror = self.mirror.lock();
        if mirror.nodes.contains_key(&node) {
            mirror.frames.insert(node, data_url);
        }
    }

    fn resolve(&self, source: &str) -> Result<Url, PipelineError> {
        let location = self.mirror.lock().location.clone();
        let resolved = match Url::parse(source) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&location)
                .and_then(|base| base.join(source))
                .map_err(|err| PipelineError::Prepare(err.to_string()))?,
            Err(err) => return Err(PipelineError::Prepare(err.to_string())),
        };
        Ok(resolved)
    }

    async fn fetch(&self, url: Url) -> Result<Vec<u8>, PipelineError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| PipelineError::Prepare(err.to_string()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| PipelineError::Prepare(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl PageSurface for HostPage {
    fn location(&self) -> String {
        self.mirror.lock().location.clone()
    }

    fn media_elements(&self) -> Vec<NodeId> {
        self.mirror.lock().order.clone()
    }

    fn inspect(&self, node: NodeId) -> Option<ElementSnapshot> {
        self.mirror.lock().nodes.get(&node).cloned()
    }

    async fn load_image(&self, node: NodeId) -> Result<DynamicImage, PipelineError> {
        let source = self
            .inspect(node)
            .ok_or(PipelineError::StaleElement(node))?
            .source()
            .map(str::to_string)
            .ok_or_else(|| PipelineError::Prepare(format!("{node} has no source")))?;

        let bytes = if source.starts_with("data:") {
            media::decode_data_url(&source)?
        } else {
            let url = self.resolve(&source)?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(PipelineError::Prepare(format!(
                    "cannot fetch {} sources",
                    url.scheme()
                )));
            }
            self.fetch(url).await?
        };
        media::decode_image(&bytes)
    }

    async fn capture_frame(&self, node: NodeId) -> Result<DynamicImage, PipelineError> {
        let frame = {
            let mirror = self.mirror.lock();
            if !mirror.nodes.contains_key(&node) {
                return Err(PipelineError::StaleElement(node));
            }
            mirror.frames.get(&node).cloned()
        };
        let frame = frame.ok_or_else(|| PipelineError::Prepare(format!("no frame for {node} yet")))?;
        media::decode_image(&media::decode_data_url(&frame)?)
    }
}
