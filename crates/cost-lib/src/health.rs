//! Pipeline health
//!
//! The collector, the remediator and the event bus each report outcomes to a
//! shared [`HealthRegistry`]. One failure degrades a component; a streak of
//! `unhealthy_after` consecutive failures marks it unhealthy, which also takes
//! the pipeline out of readiness. Any success resets the streak.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

/// Consecutive failures before a component is reported unhealthy
pub const DEFAULT_UNHEALTHY_AFTER: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    /// Polls the source and runs detection
    Collector,
    /// Drains the bus and applies remediations
    Remediator,
    EventBus,
}

impl Component {
    pub const ALL: [Component; 3] = [
        Component::Collector,
        Component::Remediator,
        Component::EventBus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Collector => "collector",
            Component::Remediator => "remediator",
            Component::EventBus => "event_bus",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Failing, but still doing useful work
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub consecutive_failures: u32,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            consecutive_failures: 0,
            last_check_timestamp: Utc::now().timestamp(),
        }
    }

    fn with_status(status: ComponentStatus, message: String, consecutive_failures: u32) -> Self {
        Self {
            status,
            message: Some(message),
            consecutive_failures,
            last_check_timestamp: Utc::now().timestamp(),
        }
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<Component, ComponentHealth>,
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    components: BTreeMap<Component, ComponentHealth>,
    running: bool,
}

impl State {
    /// Worst status across components; an empty registry is healthy
    fn overall(&self) -> ComponentStatus {
        self.components
            .values()
            .map(|c| c.status)
            .fold(ComponentStatus::Healthy, |worst, status| match (worst, status) {
                (ComponentStatus::Unhealthy, _) | (_, ComponentStatus::Unhealthy) => {
                    ComponentStatus::Unhealthy
                }
                (ComponentStatus::Degraded, _) | (_, ComponentStatus::Degraded) => {
                    ComponentStatus::Degraded
                }
                _ => ComponentStatus::Healthy,
            })
    }
}

/// Shared handle; clones report into the same registry
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    state: Arc<RwLock<State>>,
    unhealthy_after: u32,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            unhealthy_after: DEFAULT_UNHEALTHY_AFTER,
        }
    }

    /// Failure streak that escalates a component to unhealthy (minimum 1)
    pub fn with_unhealthy_after(mut self, failures: u32) -> Self {
        self.unhealthy_after = failures.max(1);
        self
    }

    /// Register every pipeline component as healthy
    pub async fn register_all(&self) {
        let mut state = self.state.write().await;
        for component in Component::ALL {
            state.components.insert(component, ComponentHealth::healthy());
        }
    }

    /// A unit of work succeeded; clears any failure streak
    pub async fn record_success(&self, component: Component) {
        let mut state = self.state.write().await;
        state.components.insert(component, ComponentHealth::healthy());
    }

    /// A unit of work failed; returns the component's new status
    pub async fn record_failure(
        &self,
        component: Component,
        message: impl Into<String>,
    ) -> ComponentStatus {
        let mut state = self.state.write().await;
        let failures = state
            .components
            .get(&component)
            .map_or(0, |c| c.consecutive_failures)
            .saturating_add(1);

        let status = if failures >= self.unhealthy_after {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Degraded
        };
        if status == ComponentStatus::Unhealthy && failures == self.unhealthy_after {
            warn!(
                component = %component,
                failures,
                "Component unhealthy after consecutive failures"
            );
        }

        state.components.insert(
            component,
            ComponentHealth::with_status(status, message.into(), failures),
        );
        status
    }

    /// Degraded without counting a failure, e.g. a saturated bus
    pub async fn set_degraded(&self, component: Component, message: impl Into<String>) {
        let mut state = self.state.write().await;
        let failures = state
            .components
            .get(&component)
            .map_or(0, |c| c.consecutive_failures);
        state.components.insert(
            component,
            ComponentHealth::with_status(ComponentStatus::Degraded, message.into(), failures),
        );
    }

    /// Unhealthy regardless of streak, for a crashed task or a closed bus
    pub async fn set_unhealthy(&self, component: Component, message: impl Into<String>) {
        let mut state = self.state.write().await;
        let failures = state
            .components
            .get(&component)
            .map_or(0, |c| c.consecutive_failures);
        state.components.insert(
            component,
            ComponentHealth::with_status(ComponentStatus::Unhealthy, message.into(), failures),
        );
    }

    /// Whether the pipeline tasks are running
    pub async fn set_running(&self, running: bool) {
        self.state.write().await.running = running;
    }

    pub async fn component(&self, component: Component) -> Option<ComponentHealth> {
        self.state.read().await.components.get(&component).cloned()
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        HealthResponse {
            status: state.overall(),
            components: state.components.clone(),
        }
    }

    /// Ready while running and no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        let reason = if !state.running {
            Some("Pipeline not running".to_string())
        } else {
            state
                .components
                .iter()
                .find(|(_, c)| c.status == ComponentStatus::Unhealthy)
                .map(|(component, _)| format!("{} unhealthy", component))
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}
