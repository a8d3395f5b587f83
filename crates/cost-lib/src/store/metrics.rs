//! Append-only observation store
//!
//! Keeps every recorded [`CostObservation`] in insertion order with FIFO
//! eviction once the retention bound is reached, plus a per-key index for
//! "latest for (provider, service)" lookups.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use crate::config::DEFAULT_MAX_OBSERVATIONS;
use crate::models::{CostObservation, Provider};

#[derive(Debug)]
struct Inner {
    /// Observations in insertion order, paired with their sequence number
    observations: VecDeque<(u64, CostObservation)>,
    /// Latest sequence number per provider, then service
    latest: HashMap<Provider, HashMap<String, u64>>,
    next_seq: u64,
    max_observations: usize,
}

impl Inner {
    fn get(&self, seq: u64) -> Option<&CostObservation> {
        // Sequence numbers are contiguous, so the offset from the oldest entry is the index
        let (first_seq, _) = self.observations.front()?;
        let index = seq.checked_sub(*first_seq)? as usize;
        self.observations.get(index).map(|(_, obs)| obs)
    }
}

/// Shared handle to the observation store; clones share the same data
#[derive(Debug, Clone)]
pub struct MetricStore {
    inner: Arc<RwLock<Inner>>,
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricStore {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_MAX_OBSERVATIONS)
    }

    /// Store that keeps at most `max_observations` entries (minimum 1)
    pub fn with_retention(max_observations: usize) -> Self {
        let max_observations = max_observations.max(1);
        Self {
            inner: Arc::new(RwLock::new(Inner {
                observations: VecDeque::with_capacity(max_observations.min(10_000)),
                latest: HashMap::new(),
                next_seq: 0,
                max_observations,
            })),
        }
    }

    /// Append an observation, evicting the oldest entry when full
    pub fn record(&self, obs: CostObservation) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        while inner.observations.len() >= inner.max_observations {
            if let Some((seq, evicted)) = inner.observations.pop_front() {
                if let Some(by_service) = inner.latest.get_mut(&evicted.provider) {
                    if by_service.get(&evicted.service) == Some(&seq) {
                        by_service.remove(&evicted.service);
                    }
                }
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner
            .latest
            .entry(obs.provider)
            .or_default()
            .insert(obs.service.clone(), seq);
        inner.observations.push_back((seq, obs));
    }

    /// Most recently recorded observation for a key
    pub fn latest(&self, provider: Provider, service: &str) -> Option<CostObservation> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let seq = *inner.latest.get(&provider)?.get(service)?;
        inner.get(seq).cloned()
    }

    /// The `n` most recently recorded observations across all keys, oldest first
    pub fn recent_window(&self, n: usize) -> Vec<CostObservation> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let skip = inner.observations.len().saturating_sub(n);
        inner
            .observations
            .iter()
            .skip(skip)
            .map(|(_, obs)| obs.clone())
            .collect()
    }

    /// Retained history for one key, oldest first
    pub fn for_key(&self, provider: Provider, service: &str) -> Vec<CostObservation> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .observations
            .iter()
            .filter(|(_, obs)| obs.provider == provider && obs.service == service)
            .map(|(_, obs)| obs.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .observations
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total observations ever recorded, including evicted ones
    pub fn total_recorded(&self) -> u64 {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).next_seq
    }
}
