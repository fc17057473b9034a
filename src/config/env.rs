use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub classifier: ClassifierConfig,
    pub pipeline: PipelineConfig,
    pub directories: DirectoryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    pub timeout: Duration,
}

/// Tuning for the detection pipeline. Defaults match the browser client.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_image_side: u32,
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub restart_cooldown: Duration,
    pub watcher: WatcherConfig,
    pub sampler: SamplerConfig,
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub min_element_size: u32,
    pub lazy_source_timeout: Duration,
    pub restart_cooldown: Duration,
}

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub tick: Duration,
    pub sample_every_ticks: u32,
    pub decision_window: u32,
    pub reset_window: u32,
    pub positive_ratio: f32,
    pub max_image_side: u32,
}

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub logs_dir: String,
    pub data_dir: String,
    pub settings_filename: String,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            min_element_size: 100,
            lazy_source_timeout: Duration::from_millis(5_000),
            restart_cooldown: Duration::from_millis(1_000),
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(33),
            sample_every_ticks: 25,
            decision_window: 5,
            reset_window: 10,
            positive_ratio: 0.6,
            max_image_side: 224,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_image_side: 224,
            batch_size: 3,
            batch_delay: Duration::from_millis(1_000),
            restart_cooldown: Duration::from_millis(1_000),
            watcher: WatcherConfig::default(),
            sampler: SamplerConfig::default(),
        }
    }
}
