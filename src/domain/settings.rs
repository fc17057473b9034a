use serde::{Deserialize, Serialize};

use super::risk::RiskThresholds;

/// User-controlled detection settings. Read-only to a running pipeline;
/// any change restarts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySettings {
    #[serde(default = "enabled_by_default")]
    pub detection_enabled: bool,
    #[serde(default, alias = "whitelistedDomains")]
    pub allowed_domains: Vec<String>,
    #[serde(default, alias = "blacklistedDomains")]
    pub denied_domains: Vec<String>,
    /// Omit source URLs from activity events.
    #[serde(default)]
    pub privacy_mode: bool,
    #[serde(default)]
    pub thresholds: RiskThresholds,
}

fn enabled_by_default() -> bool {
    true
}

/// Safe defaults: detection off, no domain lists.
impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            detection_enabled: false,
            allowed_domains: Vec::new(),
            denied_domains: Vec::new(),
            privacy_mode: false,
            thresholds: RiskThresholds::default(),
        }
    }
}

impl PolicySettings {
    /// Settings used before the user ever saved anything.
    pub fn first_run() -> Self {
        Self {
            detection_enabled: true,
            ..Self::default()
        }
    }

    pub fn is_valid(&self) -> bool {
        self.thresholds.is_valid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_first_run_values() {
        let settings: PolicySettings = serde_json::from_str("{}").unwrap();
        assert!(settings.detection_enabled);
        assert!(settings.allowed_domains.is_empty());
        assert_eq!(settings.thresholds, RiskThresholds::default());
    }

    #[test]
    fn accepts_legacy_list_names() {
        let settings: PolicySettings = serde_json::from_str(
            r#"{"detectionEnabled": false, "whitelistedDomains": ["good.com"], "blacklistedDomains": ["bad.com"]}"#,
        )
        .unwrap();
        assert!(!settings.detection_enabled);
        assert_eq!(settings.allowed_domains, vec!["good.com".to_string()]);
        assert_eq!(settings.denied_domains, vec!["bad.com".to_string()]);
    }

    #[test]
    fn out_of_range_thresholds_are_invalid() {
        let mut settings = PolicySettings::first_run();
        assert!(settings.is_valid());
        settings.thresholds.nude = 4.0;
        assert!(!settings.is_valid());
        settings.thresholds.nude = f32::NAN;
        assert!(!settings.is_valid());
    }
}
