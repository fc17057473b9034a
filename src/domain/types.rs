use serde::{Deserialize, Serialize};

/// One raw class label reported by the classification service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    #[serde(alias = "className", alias = "class_name", alias = "class")]
    pub label: String,
    #[serde(default)]
    pub probability: f32,
}

impl Prediction {
    pub fn new(label: impl Into<String>, probability: f32) -> Self {
        Self {
            label: label.into(),
            probability,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    #[serde(default)]
    pub predictions: Vec<Prediction>,
    #[serde(default)]
    pub confidence: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStatus {
    pub queue_depth: usize,
    pub active_videos: usize,
    pub enabled: bool,
    pub observing: bool,
    pub tracked_elements: usize,
    pub modal_visible: bool,
    pub domain: Option<String>,
}
