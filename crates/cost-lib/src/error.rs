//! Error taxonomy for the cost pipeline

use crate::models::Provider;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    /// Invalid or incomplete configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Metric source could not be polled this cycle
    #[error("metric source unavailable: {0}")]
    SourceUnavailable(String),

    /// An observation whose cost is not a finite, non-negative amount
    #[error("invalid observation: {0}")]
    InvalidObservation(String),

    #[error("credential error for {provider}: {reason}")]
    Credential { provider: Provider, reason: String },

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    /// Cooperative shutdown was requested while waiting
    #[error("operation cancelled")]
    Cancelled,

    #[error("event bus closed")]
    BusClosed,
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Per-event failures never stop the pipeline
    pub fn is_per_event(&self) -> bool {
        matches!(
            self,
            PipelineError::Credential { .. }
                | PipelineError::PolicyDenied(_)
                | PipelineError::Configuration(_)
                | PipelineError::InvalidObservation(_)
        )
    }

    /// Errors that end a task loop
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineError::Cancelled | PipelineError::BusClosed)
    }
}
