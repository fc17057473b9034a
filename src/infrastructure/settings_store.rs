use std::{io, path::PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::PolicySettings;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings storage failed: {0}")]
    Io(#[from] io::Error),
    #[error("settings are malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self) -> Result<PolicySettings, SettingsError>;
    async fn save(&self, settings: &PolicySettings) -> Result<(), SettingsError>;
}

/// JSON file under the data directory.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn load(&self) -> Result<PolicySettings, SettingsError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(PolicySettings::first_run())
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn save(&self, settings: &PolicySettings) -> Result<(), SettingsError> {
        let body = serde_json::to_vec_pretty(settings)?;
        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, body).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        tracing::info!(target: "settings", path = %self.path.display(), "settings saved");
        Ok(())
    }
}
