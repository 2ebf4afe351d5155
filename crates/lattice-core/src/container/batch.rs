//! Service specs and atomic batch registration.

use std::sync::Arc;

use crate::controller::service::Service;
use crate::controller::state::{Mode, ServiceName};
use crate::graph::DependencySpec;

/// Everything needed to register one service node: name, mode, dependency
/// references and the lifecycle behavior.
pub struct ServiceSpec {
    pub(crate) name: ServiceName,
    pub(crate) mode: Mode,
    pub(crate) dependencies: Vec<DependencySpec>,
    pub(crate) behavior: Arc<dyn Service>,
}

impl ServiceSpec {
    /// Start a spec with mode [`Mode::Active`] and no dependencies.
    pub fn new(name: impl Into<ServiceName>, behavior: impl Service + 'static) -> Self {
        ServiceSpec {
            name: name.into(),
            mode: Mode::Active,
            dependencies: Vec::new(),
            behavior: Arc::new(behavior),
        }
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Add a required dependency: the node cannot reach `UP` until it is up,
    /// and stops when it goes away.
    pub fn requires(mut self, dependency: impl Into<ServiceName>) -> Self {
        self.dependencies.push(DependencySpec::required(dependency));
        self
    }

    /// Add an optional dependency: injected if up at start time, but never
    /// blocking.
    pub fn optionally(mut self, dependency: impl Into<ServiceName>) -> Self {
        self.dependencies.push(DependencySpec::optional(dependency));
        self
    }

    pub fn name(&self) -> &ServiceName {
        &self.name
    }
}

impl std::fmt::Debug for ServiceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceSpec")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

/// A set of specs linked atomically: either every node is accepted (no
/// duplicate names, no required-edge cycles, no missing required
/// dependencies) or none of them is.
#[derive(Default)]
pub struct ServiceBatch {
    pub(crate) specs: Vec<ServiceSpec>,
}

impl ServiceBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, spec: ServiceSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl std::fmt::Debug for ServiceBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.specs.iter().map(|s| &s.name))
            .finish()
    }
}
