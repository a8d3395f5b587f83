//! Audit trail for events that ended without a remediation
//!
//! Bounded like the observation store: once `max_entries` is reached the
//! oldest entry is evicted for each new one.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_MAX_AUDIT_ENTRIES;
use crate::models::{AnomalyEvent, Provider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// The policy gate refused the event
    PolicyDenied,
    /// The computed remediation would have raised cost
    GuardRejected,
    CredentialError,
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditKind::PolicyDenied => write!(f, "policy_denied"),
            AuditKind::GuardRejected => write!(f, "guard_rejected"),
            AuditKind::CredentialError => write!(f, "credential_error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub provider: Provider,
    pub service: String,
    pub workflow: String,
    pub deviation_pct: f64,
    pub kind: AuditKind,
    pub reason: String,
}

impl AuditEntry {
    pub fn for_event(
        event: &AnomalyEvent,
        workflow: &str,
        kind: AuditKind,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            provider: event.provider,
            service: event.service.clone(),
            workflow: workflow.to_string(),
            deviation_pct: event.deviation_pct,
            kind,
            reason: reason.into(),
        }
    }
}

#[derive(Debug)]
struct Inner {
    entries: VecDeque<AuditEntry>,
    max_entries: usize,
    evicted: u64,
}

/// Append-only audit log shared between the orchestrator and the API
#[derive(Debug, Clone)]
pub struct AuditLog {
    inner: Arc<RwLock<Inner>>,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_MAX_AUDIT_ENTRIES)
    }

    /// Log that keeps at most `max_entries` entries (minimum 1)
    pub fn with_retention(max_entries: usize) -> Self {
        let max_entries = max_entries.max(1);
        Self {
            inner: Arc::new(RwLock::new(Inner {
                entries: VecDeque::with_capacity(max_entries.min(1_000)),
                max_entries,
                evicted: 0,
            })),
        }
    }

    pub fn record(&self, entry: AuditEntry) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        while inner.entries.len() >= inner.max_entries {
            inner.entries.pop_front();
            inner.evicted += 1;
        }
        inner.entries.push_back(entry);
    }

    /// Retained entries, oldest first
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .iter()
            .cloned()
            .collect()
    }

    pub fn count(&self, kind: AuditKind) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    /// Entries dropped to stay within retention
    pub fn evicted(&self) -> u64 {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).evicted
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
