//! Policy gate for automated remediation
//!
//! Rules are data: an ordered list of predicate → decision pairs evaluated
//! first-match. Swapping the rule set never touches the orchestrator.

use crate::error::{PipelineError, Result};
use crate::models::{AnomalyEvent, PolicyDecision, Provider};
use serde::{Deserialize, Serialize};

/// Deviation at or above which the default rules refuse to act
pub const DEFAULT_MAX_DEVIATION_PCT: f64 = 100.0;

/// Condition a rule matches on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RulePredicate {
    Always,
    DeviationAtLeast { pct: f64 },
    DeviationBelow { pct: f64 },
    ObservedCostAbove { amount: f64 },
    Provider { provider: Provider },
    Service { service: String },
    Tag { key: String, value: String },
}

impl RulePredicate {
    pub fn matches(&self, event: &AnomalyEvent) -> bool {
        match self {
            RulePredicate::Always => true,
            RulePredicate::DeviationAtLeast { pct } => event.deviation_pct >= *pct,
            RulePredicate::DeviationBelow { pct } => event.deviation_pct < *pct,
            RulePredicate::ObservedCostAbove { amount } => event.observed_cost > *amount,
            RulePredicate::Provider { provider } => event.provider == *provider,
            RulePredicate::Service { service } => event.service == *service,
            RulePredicate::Tag { key, value } => event.tags.get(key) == Some(value),
        }
    }
}

/// One entry in the ordered rule list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub when: RulePredicate,
    pub approve: bool,
    pub reason: String,
}

impl PolicyRule {
    pub fn approve(when: RulePredicate, reason: impl Into<String>) -> Self {
        Self {
            when,
            approve: true,
            reason: reason.into(),
        }
    }

    pub fn deny(when: RulePredicate, reason: impl Into<String>) -> Self {
        Self {
            when,
            approve: false,
            reason: reason.into(),
        }
    }

    /// Deny pathological readings, approve everything else
    pub fn default_rules() -> Vec<PolicyRule> {
        vec![
            PolicyRule::deny(
                RulePredicate::DeviationAtLeast {
                    pct: DEFAULT_MAX_DEVIATION_PCT,
                },
                "deviation too large, likely a bad reading",
            ),
            PolicyRule::approve(RulePredicate::Always, "within automated remediation limits"),
        ]
    }

    pub fn validate(&self) -> Result<()> {
        let numeric = match &self.when {
            RulePredicate::DeviationAtLeast { pct } | RulePredicate::DeviationBelow { pct } => {
                Some(*pct)
            }
            RulePredicate::ObservedCostAbove { amount } => Some(*amount),
            _ => None,
        };

        if numeric.map(|v| !v.is_finite()).unwrap_or(false) {
            return Err(PipelineError::config(format!(
                "policy rule {:?} has a non-finite bound",
                self.when
            )));
        }

        if self.reason.trim().is_empty() {
            return Err(PipelineError::config("policy rule reason must not be empty"));
        }

        Ok(())
    }
}

/// First-match evaluator over an ordered rule list
#[derive(Debug, Clone)]
pub struct PolicyGate {
    rules: Vec<PolicyRule>,
}

impl PolicyGate {
    pub fn new(rules: Vec<PolicyRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    /// Decide whether the event may be remediated automatically
    pub fn decide(&self, event: &AnomalyEvent) -> PolicyDecision {
        self.rules
            .iter()
            .find(|rule| rule.when.matches(event))
            .map(|rule| PolicyDecision {
                approved: rule.approve,
                reason: rule.reason.clone(),
            })
            .unwrap_or_else(|| PolicyDecision::deny("no policy rule matched"))
    }
}

impl Default for PolicyGate {
    fn default() -> Self {
        Self::new(PolicyRule::default_rules())
    }
}
