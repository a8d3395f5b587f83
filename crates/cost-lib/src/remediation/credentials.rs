//! Short-lived provider credentials

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;

use crate::error::{PipelineError, Result};
use crate::models::Provider;

/// Default credential lifetime (15 minutes)
const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

/// Proof of authorization to change resources at one provider
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub provider: Provider,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

// Tokens never end up in logs
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("provider", &self.provider)
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of credentials, consulted before every remediation
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential(&self, provider: Provider) -> Result<Credential>;
}

/// Issues random tokens for an allow-list of providers
pub struct StaticCredentialProvider {
    allowed: HashSet<Provider>,
    ttl: Duration,
}

impl StaticCredentialProvider {
    pub fn new(allowed: impl IntoIterator<Item = Provider>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
            ttl: DEFAULT_TTL,
        }
    }

    /// Provider that issues credentials for every known vendor
    pub fn all() -> Self {
        Self::new(Provider::ALL)
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn credential(&self, provider: Provider) -> Result<Credential> {
        if !self.allowed.contains(&provider) {
            return Err(PipelineError::Credential {
                provider,
                reason: "no credentials configured".to_string(),
            });
        }

        let ttl = chrono::Duration::from_std(self.ttl).map_err(|e| PipelineError::Credential {
            provider,
            reason: format!("invalid credential ttl: {}", e),
        })?;
        let token: String = rand::thread_rng()
            .sample_iter(&rand::distributions::Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();

        Ok(Credential {
            provider,
            token,
            expires_at: Utc::now() + ttl,
        })
    }
}
