use thiserror::Error;

use crate::{ai::ServiceError, domain::NodeId};

/// Failures scoped to a single element, batch or video. None of them are fatal.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("classification failed: {0}")]
    TransientService(#[from] ServiceError),
    #[error("not authenticated; submission suspended")]
    AuthExpired,
    #[error("element {0} is no longer attached")]
    StaleElement(NodeId),
    #[error("invalid settings: {0}")]
    InvalidConfig(String),
    #[error("failed to prepare media: {0}")]
    Prepare(String),
}

impl From<image::ImageError> for PipelineError {
    fn from(err: image::ImageError) -> Self {
        PipelineError::Prepare(err.to_string())
    }
}
