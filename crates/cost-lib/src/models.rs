//! Core data models for the cost pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;

/// Cloud vendor an observation was billed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Aws,
    Azure,
    Gcp,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Aws, Provider::Azure, Provider::Gcp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Aws => "aws",
            Provider::Azure => "azure",
            Provider::Gcp => "gcp",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Aws => write!(f, "AWS"),
            Provider::Azure => write!(f, "AZURE"),
            Provider::Gcp => write!(f, "GCP"),
        }
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aws" => Ok(Provider::Aws),
            "azure" => Ok(Provider::Azure),
            "gcp" => Ok(Provider::Gcp),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// A single cost sample for a provider-scoped service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostObservation {
    pub timestamp: DateTime<Utc>,
    pub provider: Provider,
    pub service: String,
    pub cost: f64,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl CostObservation {
    /// Observation stamped with the current time and no tags
    pub fn new(provider: Provider, service: impl Into<String>, cost: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            provider,
            service: service.into(),
            cost,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Reject costs that are negative, NaN or infinite
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.cost.is_finite() && self.cost >= 0.0 {
            return Ok(());
        }
        Err(PipelineError::InvalidObservation(format!(
            "cost for {}/{} must be a finite, non-negative amount, got {}",
            self.provider, self.service, self.cost
        )))
    }
}

/// Emitted once per observation that breaches its threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub provider: Provider,
    pub service: String,
    pub observed_cost: f64,
    pub baseline_cost: f64,
    pub deviation_pct: f64,
    pub threshold_pct: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Outcome of a policy check. Never persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub approved: bool,
    pub reason: String,
}

impl PolicyDecision {
    pub fn approve(reason: impl Into<String>) -> Self {
        Self {
            approved: true,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: reason.into(),
        }
    }
}

/// Before/after cost of one applied remediation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationResult {
    pub provider: Provider,
    pub service: String,
    pub workflow: String,
    pub before_cost: f64,
    pub after_cost: f64,
    pub savings: f64,
    pub timestamp: DateTime<Utc>,
}

/// Savings aggregated for one (provider, service) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSavings {
    pub provider: Provider,
    pub service: String,
    pub count: usize,
    pub savings: f64,
}

/// Report computed from the full remediation history
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SavingsSummary {
    pub count: usize,
    pub total_savings: f64,
    pub per_service: Vec<ServiceSavings>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parse_and_display() {
        assert_eq!("AWS".parse::<Provider>().unwrap(), Provider::Aws);
        assert_eq!("gcp".parse::<Provider>().unwrap(), Provider::Gcp);
        assert!("oracle".parse::<Provider>().is_err());
        assert_eq!(Provider::Azure.to_string(), "AZURE");
        assert_eq!(Provider::Azure.as_str(), "azure");
    }

    #[test]
    fn test_provider_serializes_lowercase() {
        let json = serde_json::to_string(&Provider::Aws).unwrap();
        assert_eq!(json, "\"aws\"");
    }

    #[test]
    fn test_observation_builder() {
        let obs = CostObservation::new(Provider::Aws, "compute", 135.0)
            .with_tag("team", "team-a")
            .with_tag("environment", "prod");

        assert_eq!(obs.service, "compute");
        assert_eq!(obs.tags.len(), 2);
        assert_eq!(obs.tags["team"], "team-a");
    }

    #[test]
    fn test_observation_cost_validation() {
        assert!(CostObservation::new(Provider::Aws, "compute", 0.0).validate().is_ok());
        assert!(CostObservation::new(Provider::Aws, "compute", 135.0).validate().is_ok());

        for cost in [-50.0, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = CostObservation::new(Provider::Gcp, "storage", cost)
                .validate()
                .unwrap_err();
            assert!(matches!(err, PipelineError::InvalidObservation(_)));
        }
    }
}
