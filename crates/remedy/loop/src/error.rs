//! Error types for remedy-loop.
//!
//! Probe and effector errors are ordinary diagnostic outcomes folded into
//! signals and attempts. Only [`LoopError`] stops construction of a loop.

use remedy_types::{ActionId, ProbeErrorKind};
use thiserror::Error;

/// Errors raised by a probe that could not execute.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Probe exceeded its time budget.
    #[error("probe timed out after {0}ms")]
    Timeout(u64),

    /// Target refused or dropped the connection.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Target answered with something unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Probe implementation error.
    #[error("probe error: {0}")]
    Internal(String),
}

impl ProbeError {
    /// Signal-level classification of this error.
    pub fn kind(&self) -> ProbeErrorKind {
        match self {
            ProbeError::Timeout(_) => ProbeErrorKind::Timeout,
            ProbeError::Connection(_) => ProbeErrorKind::Connection,
            ProbeError::Protocol(_) => ProbeErrorKind::Protocol,
            ProbeError::Internal(_) => ProbeErrorKind::Internal,
        }
    }
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProbeError::Timeout(0)
        } else if err.is_connect() {
            ProbeError::Connection(err.to_string())
        } else {
            ProbeError::Protocol(err.to_string())
        }
    }
}

/// Errors raised by an effector.
#[derive(Debug, Error)]
pub enum EffectorError {
    /// The effector process could not be started.
    #[error("failed to spawn effector: {0}")]
    Spawn(String),

    /// The effector ran and reported an error.
    #[error("effector failed: {0}")]
    Failed(String),

    /// Effector implementation error.
    #[error("internal effector error: {0}")]
    Internal(String),
}

/// Errors found while loading the repair action catalog.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    /// Two actions share an id.
    #[error("duplicate repair action id: {0}")]
    DuplicateAction(ActionId),

    /// An action depends on an id that is not in the catalog.
    #[error("repair action {action} depends on unknown action {dependency}")]
    UnknownDependency {
        action: ActionId,
        dependency: ActionId,
    },

    /// An action has a zero per-attempt timeout.
    #[error("repair action {0} has a zero timeout")]
    ZeroTimeout(ActionId),

    /// Dependencies form a cycle.
    #[error("dependency cycle among repair actions: {}", format_ids(.0))]
    Cycle(Vec<ActionId>),

    /// An action names an effector that is not registered.
    #[error("repair action {action} uses unregistered effector '{effector}'")]
    UnknownEffector { action: ActionId, effector: String },
}

fn format_ids(ids: &[ActionId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Invalid loop configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A value is out of its allowed range.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors from the state store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend-specific error.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Errors that prevent a loop from being built.
#[derive(Debug, Error)]
pub enum LoopError {
    /// Invalid loop configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Invalid repair action catalog.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// State store error.
    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    /// A required component was not supplied to the builder.
    #[error("missing component: {0}")]
    MissingComponent(&'static str),
}

/// Result type for probe operations.
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Result type for effector operations.
pub type EffectorResult<T> = Result<T, EffectorError>;

/// Result type for state store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for loop construction.
pub type LoopResult<T> = Result<T, LoopError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_error_kind() {
        assert_eq!(ProbeError::Timeout(10).kind(), ProbeErrorKind::Timeout);
        assert_eq!(
            ProbeError::Connection("refused".into()).kind(),
            ProbeErrorKind::Connection
        );
    }

    #[test]
    fn test_cycle_error_message() {
        let err = CatalogError::Cycle(vec![ActionId::new("a"), ActionId::new("b")]);
        assert_eq!(err.to_string(), "dependency cycle among repair actions: a, b");
    }
}
