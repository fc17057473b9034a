use std::{env, str::FromStr, time::Duration};

use super::env::{
    AppConfig, ClassifierConfig, ConfigError, DirectoryConfig, LoggingConfig, PipelineConfig,
    SamplerConfig, WatcherConfig,
};

pub fn load_config() -> Result<AppConfig, ConfigError> {
    AppConfig::from_env()
}

impl AppConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let classifier = ClassifierConfig {
            base_url: env::var("CLASSIFIER_URL")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "http://localhost:3000/api".to_string())
                .trim_end_matches('/')
                .to_string(),
            api_token: env::var("CLASSIFIER_TOKEN").ok().filter(|v| !v.is_empty()),
            timeout: millis("CLASSIFIER_TIMEOUT_MS", 30_000),
        };
        url::Url::parse(&classifier.base_url).map_err(|err| ConfigError::Invalid {
            key: "CLASSIFIER_URL",
            reason: err.to_string(),
        })?;

        let max_image_side = parse_or("MAX_IMAGE_SIDE", 224u32).max(1);
        let restart_cooldown = millis("RESTART_COOLDOWN_MS", 1_000);

        let decision_window = parse_or("VOTE_DECISION_WINDOW", 5u32).max(1);
        let reset_window = parse_or("VOTE_RESET_WINDOW", 10u32);
        if reset_window < decision_window {
            return Err(ConfigError::Invalid {
                key: "VOTE_RESET_WINDOW",
                reason: format!("must be at least VOTE_DECISION_WINDOW ({decision_window})"),
            });
        }

        let pipeline = PipelineConfig {
            max_image_side,
            batch_size: parse_or("BATCH_SIZE", 3usize).max(1),
            batch_delay: millis("BATCH_DELAY_MS", 1_000),
            restart_cooldown,
            watcher: WatcherConfig {
                min_element_size: parse_or("MIN_ELEMENT_SIZE", 100u32),
                lazy_source_timeout: millis("LAZY_SOURCE_TIMEOUT_MS", 5_000),
                restart_cooldown,
            },
            sampler: SamplerConfig {
                tick: millis("SAMPLE_TICK_MS", 33),
                sample_every_ticks: parse_or("SAMPLE_EVERY_TICKS", 25u32).max(1),
                decision_window,
                reset_window,
                positive_ratio: parse_or("VOTE_POSITIVE_RATIO", 0.6f32).clamp(0.0, 1.0),
                max_image_side,
            },
        };

        let directories = DirectoryConfig {
            logs_dir: env::var("LOGS_DIR").unwrap_or_else(|_| "logs".to_string()),
            data_dir: env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            settings_filename: env::var("SETTINGS_FILENAME")
                .unwrap_or_else(|_| "settings.json".to_string()),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        };

        Ok(Self {
            classifier,
            pipeline,
            directories,
            logging,
        })
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn millis(key: &str, default: u64) -> Duration {
    Duration::from_millis(parse_or(key, default))
}
