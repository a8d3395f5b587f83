//! Automated remediation of cost anomalies
//!
//! This module provides:
//! - Credential lookup before any change is applied
//! - Per-workflow cost reduction strategies
//! - The orchestrator that drains the event bus and records outcomes

mod credentials;
mod orchestrator;
mod remediator;

pub use credentials::{Credential, CredentialProvider, StaticCredentialProvider};
pub use orchestrator::{HandleOutcome, RemediationOrchestrator, RemediationStats};
pub use remediator::Remediator;
