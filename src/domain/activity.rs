use chrono::{DateTime, Utc};
use serde::Serialize;

use super::risk::{EnforcementAction, RiskLevel};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityKind {
    PageVisit {
        url: Option<String>,
    },
    ContentDetected {
        level: RiskLevel,
        confidence: f32,
        source_url: Option<String>,
    },
    ModalShown {
        level: RiskLevel,
    },
    ModalAction {
        action: EnforcementAction,
        level: RiskLevel,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityEvent {
    #[serde(flatten)]
    pub kind: ActivityKind,
    pub domain: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ActivityEvent {
    pub fn new(kind: ActivityKind, domain: Option<String>) -> Self {
        Self {
            kind,
            domain,
            timestamp: Utc::now(),
        }
    }
}
