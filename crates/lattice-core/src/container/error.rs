//! # Lattice Container Errors
//!
//! The top-level error type of the kernel, aggregating the structural graph
//! errors, runtime start failures and the timeout/readiness conditions of
//! the embedding API.
use std::result::Result as StdResult;

use thiserror::Error;

use crate::controller::error::StartError;
use crate::controller::state::{ServiceName, ServiceState};
use crate::event::error::EventSystemError;
use crate::graph::error::GraphError;

#[derive(Debug, Error)]
pub enum Error {
    /// Structural registration/link-time error.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// A start behavior (or its async completion) reported failure.
    #[error("service '{name}' failed to start: {source}")]
    Start {
        name: ServiceName,
        #[source]
        source: StartError,
    },

    /// The service exists but is not `UP`.
    #[error("service '{name}' is not ready (state {state})")]
    NotReady {
        name: ServiceName,
        state: ServiceState,
    },

    /// The service value could not be downcast to the requested type.
    #[error("service '{name}' value is not of the requested type")]
    WrongValueType { name: ServiceName },

    /// A blocking wait expired before any target state was reached.
    #[error("timed out waiting for service '{name}' (last observed state {last})")]
    WaitTimeout {
        name: ServiceName,
        last: ServiceState,
    },

    #[error("event system error: {0}")]
    EventSystem(#[from] EventSystemError),

    /// The container is shutting down and no longer accepts registrations.
    #[error("the service container is shutting down")]
    ShuttingDown,
}

impl Error {
    /// Convenience constructor mirroring `GraphError::NotFound`.
    pub fn not_found(name: &ServiceName) -> Self {
        Error::Graph(GraphError::NotFound { name: name.clone() })
    }
}

/// Shorthand for Result with the container error type.
pub type Result<T> = StdResult<T, Error>;
