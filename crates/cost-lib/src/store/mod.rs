//! In-process stores
//!
//! Each store is a cloneable handle around a single lock, so every read and
//! write is serialized through one owner:
//! - Cost observations with bounded retention
//! - Applied remediation results
//! - Audit entries for events that produced no result

mod audit;
mod metrics;
mod results;

pub use audit::{AuditEntry, AuditKind, AuditLog};
pub use metrics::MetricStore;
pub use results::ResultStore;
