use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    detection::ModalView,
    domain::{EnforcementAction, ElementSnapshot, NodeId, PipelineStatus, PlaybackState, PolicySettings},
};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ElementDescriptor {
    pub node: NodeId,
    #[serde(flatten)]
    pub snapshot: ElementSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Start,
    Stop,
    Reset,
    Status,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    /// The inserted node first, then its media descendants.
    ElementsInserted { elements: Vec<ElementDescriptor> },
    /// Layout or style change that needs no re-evaluation on its own.
    ElementUpdated { element: ElementDescriptor },
    ElementRemoved { node: NodeId },
    SourceChanged {
        node: NodeId,
        #[serde(default)]
        source: Option<String>,
    },
    EnteredViewport { node: NodeId },
    Playback { node: NodeId, state: PlaybackState },
    Frame { node: NodeId, data_url: String },
    Navigate { url: String },
    PageVisibility { visible: bool },
    Auth { authenticated: bool },
    Settings { settings: PolicySettings },
    Command { command: Command },
    ModalAction { action: EnforcementAction },
    ModalOutsideClick,
    ModalEscape,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Ready { version: &'static str },
    Modal { view: ModalView },
    ModalClosed,
    CloseTab,
    Status { status: PipelineStatus },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty message")]
    Empty,
    #[error("unrecognised message: {0}")]
    Invalid(#[from] serde_json::Error),
}

pub fn parse_line(line: &str) -> Result<Inbound, ProtocolError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ProtocolError::Empty);
    }
    Ok(serde_json::from_str(line)?)
}

pub fn encode(message: &Outbound) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}
