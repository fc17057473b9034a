mod client;
mod inference;

use async_trait::async_trait;
use thiserror::Error;

use crate::{detection::media::PreparedImage, domain::ClassificationResult};

pub use client::HttpClassifier;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("classification service unavailable: {0}")]
    Unavailable(String),
    #[error("classification service rate limited")]
    RateLimited,
    #[error("classification service returned status {0}")]
    Status(u16),
    #[error("malformed classification response: {0}")]
    Malformed(String),
}

/// Remote content classifier.
#[async_trait]
pub trait ClassificationService: Send + Sync {
    async fn classify(&self, image: &PreparedImage) -> Result<ClassificationResult, ServiceError>;
}
