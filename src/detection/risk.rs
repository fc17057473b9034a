//! The single risk rule set. Both the image queue and the video sampler go
//! through [`RiskClassifier`]; nothing else maps probabilities to levels.

use serde::Serialize;

use crate::domain::{ClassificationResult, Prediction, RiskLevel, RiskThresholds};

/// Highest probability seen per bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CategoryScores {
    pub safe: f32,
    pub suggestive: f32,
    pub nude: f32,
    pub explicit: f32,
}

impl CategoryScores {
    pub fn from_predictions(predictions: &[Prediction]) -> Self {
        let mut scores = Self::default();
        for prediction in predictions {
            let probability = if prediction.probability.is_finite() {
                prediction.probability.clamp(0.0, 1.0)
            } else {
                0.0
            };
            let label = prediction.label.to_lowercase();
            let bucket = if label.contains("safe") || label.contains("neutral") {
                &mut scores.safe
            } else if label.contains("suggestive") || label.contains("partial") {
                &mut scores.suggestive
            } else if label.contains("nude") || label.contains("naked") {
                &mut scores.nude
            } else if label.contains("explicit") || label.contains("porn") {
                &mut scores.explicit
            } else {
                continue;
            };
            *bucket = (*bucket).max(probability);
        }
        scores
    }

    pub fn named(&self) -> [(&'static str, f32); 4] {
        [
            ("safe", self.safe),
            ("suggestive", self.suggestive),
            ("nude", self.nude),
            ("explicit", self.explicit),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Assessment {
    pub level: RiskLevel,
    pub scores: CategoryScores,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RiskClassifier {
    thresholds: RiskThresholds,
}

impl RiskClassifier {
    pub fn new(thresholds: RiskThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &RiskThresholds {
        &self.thresholds
    }

    /// First matching rule wins.
    pub fn classify(&self, scores: &CategoryScores, confidence: f32) -> RiskLevel {
        let t = &self.thresholds;
        if scores.explicit > t.explicit {
            RiskLevel::High
        } else if scores.nude > t.nude && confidence > t.nude_high_confidence {
            RiskLevel::High
        } else if scores.nude > t.nude {
            RiskLevel::Medium
        } else if scores.suggestive > t.suggestive && confidence > t.suggestive_confidence {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn assess(&self, result: &ClassificationResult) -> Assessment {
        let scores = CategoryScores::from_predictions(&result.predictions);
        let confidence = if result.confidence.is_finite() {
            result.confidence
        } else {
            0.0
        };
        Assessment {
            level: self.classify(&scores, confidence),
            scores,
            confidence,
        }
    }

    pub fn should_enforce(&self, level: RiskLevel) -> bool {
        level >= self.thresholds.enforce_at
    }
}
