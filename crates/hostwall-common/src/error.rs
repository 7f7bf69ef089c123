//! Error types for hostwall

use thiserror::Error;

/// hostwall error type
#[derive(Error, Debug)]
pub enum HostwallError {
    /// A rule failed to parse or one of its validators is not valid
    #[error("invalid rule #{index}: {reason}")]
    InvalidRule {
        /// Position of the rule in the loaded sequence
        index: usize,
        /// What was wrong with it
        reason: String,
    },

    /// Default policy record could not be interpreted
    #[error("invalid default policy: {0}")]
    InvalidPolicy(String),

    /// Allow/deny list backing store failed
    #[error("list store error: {0}")]
    ListStore(String),

    /// Worker thread could not be spawned
    #[error("failed to spawn worker: {0}")]
    SpawnFailed(String),

    /// Kernel packet queue failure
    #[error("queue {queue}: {reason}")]
    Queue {
        /// Numeric queue id
        queue: u16,
        /// Failure description
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),
}

/// Result type for hostwall
pub type HostwallResult<T> = Result<T, HostwallError>;
