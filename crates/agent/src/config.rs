//! Agent configuration

use anyhow::{bail, Result};
use cost_lib::PipelineConfig;
use serde::Deserialize;
use std::time::Duration;

/// Config file read when `COST_AGENT_CONFIG` is not set
pub const DEFAULT_CONFIG_PATH: &str = "config/cost-agent.toml";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Instance name attached to every structured log line
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// API server port for health/metrics/report endpoints
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Cost collection interval in seconds
    #[serde(default = "default_collection_interval")]
    pub collection_interval_secs: u64,

    /// Maximum random delay added to each interval
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    /// Lower bound of simulated costs
    #[serde(default = "default_simulated_min_cost")]
    pub simulated_min_cost: f64,

    /// Upper bound (exclusive) of simulated costs
    #[serde(default = "default_simulated_max_cost")]
    pub simulated_max_cost: f64,

    /// Window in which repeat notifications for one service are suppressed
    #[serde(default = "default_notification_dedup")]
    pub notification_dedup_secs: u64,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "cost-agent".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_collection_interval() -> u64 {
    10
}

fn default_jitter_ms() -> u64 {
    1000
}

fn default_simulated_min_cost() -> f64 {
    300.0
}

fn default_simulated_max_cost() -> f64 {
    600.0
}

fn default_notification_dedup() -> u64 {
    15 * 60
}

impl AgentConfig {
    /// Load configuration from the config file and environment
    ///
    /// The file path comes from `COST_AGENT_CONFIG`; a missing file is not an
    /// error. `COST_AGENT__*` variables override file values, with `__`
    /// separating nested keys (`COST_AGENT__PIPELINE__DEFAULT_THRESHOLD_PCT`).
    pub fn load() -> Result<Self> {
        let path =
            std::env::var("COST_AGENT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::new(path, config::FileFormat::Toml).required(false))
            .add_source(
                config::Environment::with_prefix("COST_AGENT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let agent: AgentConfig = config.try_deserialize()?;
        agent.validate()?;
        Ok(agent)
    }

    /// Reject settings the agent cannot start with
    pub fn validate(&self) -> Result<()> {
        if self.collection_interval_secs == 0 {
            bail!("collection_interval_secs must be positive");
        }
        if !(self.simulated_min_cost >= 0.0 && self.simulated_min_cost < self.simulated_max_cost) {
            bail!(
                "invalid simulated cost range {}..{}",
                self.simulated_min_cost,
                self.simulated_max_cost
            );
        }
        self.pipeline.validate()?;
        Ok(())
    }

    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval_secs)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }

    pub fn notification_dedup(&self) -> Duration {
        Duration::from_secs(self.notification_dedup_secs)
    }
}
