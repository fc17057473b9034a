pub mod env;
mod loader;

pub use env::{
    AppConfig, ClassifierConfig, DirectoryConfig, PipelineConfig, SamplerConfig, WatcherConfig,
};
pub use loader::load_config;
