//! # Lattice Graph Errors
//!
//! Structural errors raised while linking nodes and edges into the
//! dependency graph. These are rejected synchronously at registration time
//! and never reach the transition scheduler.
use thiserror::Error;

use crate::controller::state::ServiceName;

#[derive(Debug, Clone, Error)]
pub enum GraphError {
    #[error("a service named '{name}' is already registered")]
    DuplicateName { name: ServiceName },

    #[error("dependency cycle detected: {}", path.iter().map(|n| n.as_str()).collect::<Vec<_>>().join(" -> "))]
    CycleDetected { path: Vec<ServiceName> },

    #[error("service '{dependent}' requires '{dependency}', which is not registered")]
    MissingDependency {
        dependent: ServiceName,
        dependency: ServiceName,
    },

    #[error("no service named '{name}' is registered")]
    NotFound { name: ServiceName },
}
