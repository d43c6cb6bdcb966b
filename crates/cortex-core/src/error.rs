//! Error kinds a Cortex caller can observe.

use thiserror::Error;

/// Categorized error returned by Cortex operations.
///
/// Write-path errors roll back their enclosing transaction before reaching
/// the caller. Maintenance-loop errors are caught at the ritual boundary and
/// never propagate as a panic.
#[derive(Error, Debug)]
pub enum CortexError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("denied by rule {rule_id}: {reason}")]
    RuleDeny { rule_id: i64, reason: String },

    #[error("external dependency unavailable: {0}")]
    ExternalUnavailable(String),

    #[error("inconsistent state: {0}")]
    Inconsistent(String),

    #[error("store error: {0}")]
    Store(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type CortexResult<T> = Result<T, CortexError>;

impl CortexError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    /// True for errors the caller should retry (transient lock/write conflicts).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
