pub mod activity;
pub mod element;
pub mod risk;
pub mod settings;
pub mod types;

pub use activity::{ActivityEvent, ActivityKind};
pub use element::{ElementKind, ElementSnapshot, NodeId, PlaybackState};
pub use risk::{EnforcementAction, RiskLevel, RiskThresholds};
pub use settings::PolicySettings;
pub use types::{ClassificationResult, PipelineStatus, Prediction};
