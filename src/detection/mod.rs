pub mod enforcement;
pub mod error;
pub mod media;
pub mod orchestrator;
pub mod policy;
pub mod processor;
pub mod queue;
pub mod registry;
pub mod reporter;
pub mod risk;
pub mod sampler;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testing;

pub use enforcement::{EnforcementController, ModalView};
pub use error::PipelineError;
pub use orchestrator::{Collaborators, InitOutcome, Orchestrator};
pub use policy::DomainPolicy;
pub use risk::{Assessment, CategoryScores, RiskClassifier};
