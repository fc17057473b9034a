use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identity the host assigns to a physical DOM node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Image,
    Video,
}

impl ElementKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        if tag.eq_ignore_ascii_case("img") {
            Some(Self::Image)
        } else if tag.eq_ignore_ascii_case("video") {
            Some(Self::Video)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    #[default]
    Paused,
    Ended,
}

/// Point-in-time view of a DOM media node as reported by the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementSnapshot {
    pub tag: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    /// False when display is none, visibility hidden, or opacity zero.
    #[serde(default = "visible_by_default")]
    pub visible: bool,
    /// `src`, falling back to `data-src`.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub playback: PlaybackState,
}

fn visible_by_default() -> bool {
    true
}

impl ElementSnapshot {
    pub fn kind(&self) -> Option<ElementKind> {
        ElementKind::from_tag(&self.tag)
    }

    pub fn is_playing(&self) -> bool {
        self.playback == PlaybackState::Playing
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref().filter(|src| !src.trim().is_empty())
    }
}
