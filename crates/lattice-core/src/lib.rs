//! # lattice-core
//!
//! An in-process service lifecycle and dependency orchestration kernel:
//! subsystems register named service nodes with dependency references and a
//! start/stop behavior, and the container computes activation order over the
//! graph, runs independent subtrees in parallel, rolls a failing subtree
//! back, and lets callers wait (with a deadline) for a node to reach a
//! target state.

pub mod container;
pub mod controller;
pub mod demand;
pub mod event;
pub mod graph;
pub mod scheduler;

// Re-export the embedding surface.
pub use container::{ContainerConfig, ServiceBatch, ServiceContainer, ServiceSpec};
pub use container::error::{Error, Result};
pub use controller::error::StartError;
pub use controller::service::{
    CompletionHandle, Service, ServiceValue, StartContext, StartOutcome,
};
pub use controller::state::{Mode, ServiceName, ServiceState};
pub use event::{ServiceListener, SubscriptionId, Transition, sync_listener};
pub use graph::DependencySpec;
