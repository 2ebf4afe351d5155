//! # Lattice Controller Errors
//!
//! Defines error types reported by service start behaviors and the
//! per-node state machine.
use thiserror::Error;

use crate::controller::state::ServiceName;

/// Reason a service failed to reach `UP`.
#[derive(Debug, Clone, Error)]
pub enum StartError {
    #[error("start behavior failed: {0}")]
    Failed(String),

    #[error("asynchronous start completion timed out")]
    Timeout,

    #[error("completion handle dropped before the start was signalled")]
    Abandoned,

    #[error("required dependency '{0}' failed to start")]
    DependencyFailed(ServiceName),
}

impl StartError {
    /// Shorthand for a behavior-reported failure message.
    pub fn failed(msg: impl Into<String>) -> Self {
        StartError::Failed(msg.into())
    }
}
