//! Call session error types.

use thiserror::Error;

use callcore::InvalidUpgradeTransition;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("call session is closed")]
    SessionClosed,

    #[error("call not found: {0}")]
    NotFound(String),

    #[error("call already exists: {0}")]
    AlreadyExists(String),

    #[error("media engine error: {0}")]
    MediaEngine(anyhow::Error),

    #[error("signaling error: {0}")]
    Signaling(anyhow::Error),

    #[error("conference upgrade failed: {0}")]
    Conference(String),

    #[error("conference upgrade cancelled")]
    UpgradeCancelled,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<InvalidUpgradeTransition> for CallError {
    fn from(err: InvalidUpgradeTransition) -> Self {
        CallError::Conference(err.to_string())
    }
}
