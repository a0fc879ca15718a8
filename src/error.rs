use thiserror::Error;

use crate::runner::ScopeId;

/// Main error type for the observer
#[derive(Error, Debug)]
pub enum WatchError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Ledger collaborator errors
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    // Event stream / local model errors
    #[error("Unknown setting name: {0}")]
    UnknownSetting(String),

    #[error("Invalid event {event}: {reason}")]
    InvalidEvent { event: String, reason: String },

    #[error("Agent already tracked: {0}")]
    DuplicateAgent(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    // Structured concurrency
    #[error("Scope exit ({})", .scope.map(|s| s.to_string()).unwrap_or_else(|| "untargeted".to_string()))]
    ScopeExit { scope: Option<ScopeId> },

    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl WatchError {
    /// Errors that mean the event stream and the local model have diverged
    pub fn is_fatal(&self) -> bool {
        matches!(self, WatchError::UnknownSetting(_))
    }

    /// Revert reason if this is a ledger revert
    pub fn revert_reason(&self) -> Option<&str> {
        match self {
            WatchError::Ledger(LedgerError::Reverted { reason, .. }) => Some(reason.as_str()),
            _ => None,
        }
    }
}

/// Result type alias for WatchError
pub type Result<T> = std::result::Result<T, WatchError>;

/// Structured failures reported by the ledger collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("{method} reverted: {reason}")]
    Reverted { method: String, reason: String },

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl LedgerError {
    pub fn reverted(method: &str, reason: &str) -> Self {
        LedgerError::Reverted {
            method: method.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unknown_setting_is_fatal() {
        assert!(WatchError::UnknownSetting("lotSizeXYZ".into()).is_fatal());
        assert!(!WatchError::Internal("x".into()).is_fatal());
        assert!(!WatchError::ScopeExit { scope: None }.is_fatal());
    }

    #[test]
    fn test_revert_reason() {
        let err: WatchError = LedgerError::reverted("startLiquidation", "liquidation not started").into();
        assert_eq!(err.revert_reason(), Some("liquidation not started"));
        assert_eq!(
            err.to_string(),
            "Ledger error: startLiquidation reverted: liquidation not started"
        );

        let err: WatchError = LedgerError::Transport("timeout".into()).into();
        assert_eq!(err.revert_reason(), None);
    }

    #[test]
    fn test_scope_exit_display() {
        assert_eq!(
            WatchError::ScopeExit { scope: None }.to_string(),
            "Scope exit (untargeted)"
        );
        assert_eq!(
            WatchError::ScopeExit { scope: Some(ScopeId(7)) }.to_string(),
            "Scope exit (scope#7)"
        );
    }
}
