use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }

    /// Counts as a positive vote for video sampling.
    pub fn is_positive(&self) -> bool {
        *self >= RiskLevel::Medium
    }

    pub fn requires_mandatory_action(&self) -> bool {
        self.is_positive()
    }

    pub fn available_actions(&self) -> &'static [EnforcementAction] {
        match self {
            RiskLevel::Low => &[EnforcementAction::Dismiss, EnforcementAction::CloseTab],
            RiskLevel::Medium | RiskLevel::High => &[EnforcementAction::CloseTab],
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Potentially inappropriate content, relatively safe",
            RiskLevel::Medium => "Content with adult elements that needs attention",
            RiskLevel::High => "Explicit adult content",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            RiskLevel::Low => "#22c55e",
            RiskLevel::Medium => "#f59e0b",
            RiskLevel::High => "#ef4444",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementAction {
    Dismiss,
    CloseTab,
}

impl EnforcementAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnforcementAction::Dismiss => "dismiss",
            EnforcementAction::CloseTab => "close_tab",
        }
    }
}

impl fmt::Display for EnforcementAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cut-offs used by the risk rules. All comparisons are strict.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RiskThresholds {
    pub explicit: f32,
    pub nude: f32,
    pub nude_high_confidence: f32,
    pub suggestive: f32,
    pub suggestive_confidence: f32,
    /// Lowest level that opens the enforcement modal.
    pub enforce_at: RiskLevel,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            explicit: 0.3,
            nude: 0.4,
            nude_high_confidence: 0.7,
            suggestive: 0.6,
            suggestive_confidence: 0.8,
            enforce_at: RiskLevel::Medium,
        }
    }
}

impl RiskThresholds {
    pub fn is_valid(&self) -> bool {
        [
            self.explicit,
            self.nude,
            self.nude_high_confidence,
            self.suggestive,
            self.suggestive_confidence,
        ]
        .iter()
        .all(|value| value.is_finite() && (0.0..=1.0).contains(value))
    }
}
