//! Metric sources that need no cloud account

use std::collections::VecDeque;
use std::ops::Range;
use std::sync::Mutex;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;

use super::MetricSource;
use crate::error::{PipelineError, Result};
use crate::models::{CostObservation, Provider};

/// Services the simulated fleet reports on
pub const DEFAULT_SERVICES: &[&str] = &["compute", "storage", "database"];

const TEAMS: &[&str] = &["team-a", "team-b"];

/// Generates one random observation per provider on every poll
pub struct SimulatedSource {
    cost_range: Range<f64>,
    services: Vec<String>,
    environment: String,
}

impl SimulatedSource {
    pub fn new() -> Self {
        Self {
            cost_range: 300.0..600.0,
            services: DEFAULT_SERVICES.iter().map(|s| s.to_string()).collect(),
            environment: "prod".to_string(),
        }
    }

    /// Draw costs uniformly from `range`; an empty range is rejected
    pub fn with_cost_range(mut self, range: Range<f64>) -> Result<Self> {
        if range.is_empty() || range.start < 0.0 {
            return Err(PipelineError::config(format!(
                "invalid simulated cost range {:?}",
                range
            )));
        }
        self.cost_range = range;
        Ok(self)
    }

    pub fn with_services(mut self, services: Vec<String>) -> Result<Self> {
        if services.is_empty() {
            return Err(PipelineError::config("simulated source needs at least one service"));
        }
        self.services = services;
        Ok(self)
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    fn generate(&self) -> Vec<CostObservation> {
        let mut rng = rand::thread_rng();
        Provider::ALL
            .iter()
            .map(|provider| {
                let service = self
                    .services
                    .choose(&mut rng)
                    .cloned()
                    .unwrap_or_else(|| "compute".to_string());
                let team = TEAMS.choose(&mut rng).copied().unwrap_or("team-a");
                CostObservation::new(*provider, service, rng.gen_range(self.cost_range.clone()))
                    .with_tag("environment", self.environment.clone())
                    .with_tag("team", team)
            })
            .collect()
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricSource for SimulatedSource {
    async fn poll(&self) -> Result<Vec<CostObservation>> {
        Ok(self.generate())
    }
}

/// Replays a fixed script of batches, one per poll
///
/// Once the script is exhausted every poll fails with `SourceUnavailable`.
pub struct StaticSource {
    batches: Mutex<VecDeque<Vec<CostObservation>>>,
}

impl StaticSource {
    pub fn new(batches: Vec<Vec<CostObservation>>) -> Self {
        Self {
            batches: Mutex::new(batches.into()),
        }
    }

    pub fn remaining(&self) -> usize {
        self.batches.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl MetricSource for StaticSource {
    async fn poll(&self) -> Result<Vec<CostObservation>> {
        self.batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| PipelineError::SourceUnavailable("script exhausted".to_string()))
    }
}
