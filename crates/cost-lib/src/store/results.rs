//! Remediation result history and savings reporting

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::models::{Provider, RemediationResult, SavingsSummary, ServiceSavings};

/// Append-only record of applied remediations
///
/// Summaries are always recomputed from the full history; there is no
/// incremental aggregate to drift out of sync.
#[derive(Debug, Clone, Default)]
pub struct ResultStore {
    results: Arc<RwLock<Vec<RemediationResult>>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, result: RemediationResult) {
        self.results
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(result);
    }

    /// Count, total savings and per-service breakdown ordered by provider then service
    pub fn summary(&self) -> SavingsSummary {
        let results = self.results.read().unwrap_or_else(|e| e.into_inner());

        let mut per_key: BTreeMap<(Provider, &str), (usize, f64)> = BTreeMap::new();
        for result in results.iter() {
            let entry = per_key
                .entry((result.provider, result.service.as_str()))
                .or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += result.savings;
        }

        SavingsSummary {
            count: results.len(),
            total_savings: results.iter().map(|r| r.savings).sum(),
            per_service: per_key
                .into_iter()
                .map(|((provider, service), (count, savings))| ServiceSavings {
                    provider,
                    service: service.to_string(),
                    count,
                    savings,
                })
                .collect(),
        }
    }

    /// Snapshot of every result in append order
    pub fn results(&self) -> Vec<RemediationResult> {
        self.results
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn for_service(&self, service: &str) -> Vec<RemediationResult> {
        self.results
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.service == service)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.results.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
