//! Cost reduction strategies per workflow

use std::collections::HashMap;

use chrono::Utc;

use super::Credential;
use crate::config::{PipelineConfig, DEFAULT_REDUCTION_FRACTION};
use crate::error::{PipelineError, Result};
use crate::models::{AnomalyEvent, RemediationResult};

/// Computes the outcome of an automated rightsizing action
///
/// The reduction fraction is looked up by workflow identifier; unknown
/// workflows fall back to the default fraction.
#[derive(Debug, Clone)]
pub struct Remediator {
    default_fraction: f64,
    fractions: HashMap<String, f64>,
}

impl Default for Remediator {
    fn default() -> Self {
        Self::new(DEFAULT_REDUCTION_FRACTION)
    }
}

impl Remediator {
    pub fn new(default_fraction: f64) -> Self {
        Self {
            default_fraction,
            fractions: HashMap::new(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            default_fraction: config.default_fraction,
            fractions: config.workflow_fractions.clone(),
        }
    }

    /// Use a specific fraction for one workflow
    pub fn with_workflow_fraction(mut self, workflow: impl Into<String>, fraction: f64) -> Self {
        self.fractions.insert(workflow.into(), fraction);
        self
    }

    pub fn fraction_for(&self, workflow: &str) -> f64 {
        self.fractions
            .get(workflow)
            .copied()
            .unwrap_or(self.default_fraction)
    }

    /// Compute the remediation result for an approved event
    ///
    /// The credential must belong to the event's provider and still be valid.
    pub fn apply(
        &self,
        event: &AnomalyEvent,
        workflow: &str,
        credential: &Credential,
    ) -> Result<RemediationResult> {
        if credential.provider != event.provider {
            return Err(PipelineError::Credential {
                provider: event.provider,
                reason: format!("credential issued for {}", credential.provider),
            });
        }
        if credential.is_expired() {
            return Err(PipelineError::Credential {
                provider: event.provider,
                reason: "credential expired".to_string(),
            });
        }

        let before = event.observed_cost;
        let fraction = self.fraction_for(workflow);
        let after = (before * (1.0 - fraction)).clamp(0.0, before.max(0.0));

        Ok(RemediationResult {
            provider: event.provider,
            service: event.service.clone(),
            workflow: workflow.to_string(),
            before_cost: before,
            after_cost: after,
            savings: before - after,
            timestamp: Utc::now(),
        })
    }
}
