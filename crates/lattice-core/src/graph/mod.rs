//! Mutable dependency graph: the node table plus directed edges
//! (dependent -> dependency) and the reverse dependents index.
//!
//! The graph is mutated under a short-held exclusive lock during batch
//! install and node removal only; steady-state transition evaluation takes
//! the read side. Cycle checks run over *required* edges and follow a
//! validate-then-commit discipline: a batch that would introduce a cycle or
//! reference an unregistered required dependency is rejected before any node
//! is linked.

pub mod error;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::controller::ServiceController;
use crate::controller::state::ServiceName;
use crate::graph::error::GraphError;

/// One dependency reference of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySpec {
    pub name: ServiceName,
    /// Required edges gate activation and stop ordering; optional edges are
    /// injected if the dependency happens to be up but never block.
    pub required: bool,
}

impl DependencySpec {
    pub fn required(name: impl Into<ServiceName>) -> Self {
        DependencySpec {
            name: name.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<ServiceName>) -> Self {
        DependencySpec {
            name: name.into(),
            required: false,
        }
    }
}

/// The node table and edge indexes.
///
/// Dependents are tracked by name only (bookkeeping, never ownership) and an
/// entry survives the removal of the dependency node itself, so a dependent
/// registered before its dependency re-appears is found again on re-install.
#[derive(Default)]
pub struct DependencyGraph {
    nodes: HashMap<ServiceName, Arc<ServiceController>>,
    /// dependency name -> names of nodes that declare an edge to it.
    dependents: HashMap<ServiceName, HashSet<ServiceName>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &ServiceName) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn get(&self, name: &ServiceName) -> Option<Arc<ServiceController>> {
        self.nodes.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn names(&self) -> Vec<ServiceName> {
        self.nodes.keys().cloned().collect()
    }

    /// Controllers of nodes that declare an edge to `name`.
    pub fn dependents_of(&self, name: &ServiceName) -> Vec<Arc<ServiceController>> {
        self.dependents
            .get(name)
            .map(|names| names.iter().filter_map(|n| self.get(n)).collect())
            .unwrap_or_default()
    }

    /// Controllers of nodes with a *required* edge to `name`.
    pub fn required_dependents_of(&self, name: &ServiceName) -> Vec<Arc<ServiceController>> {
        self.dependents_of(name)
            .into_iter()
            .filter(|ctrl| {
                ctrl.dependencies()
                    .iter()
                    .any(|dep| dep.required && dep.name == *name)
            })
            .collect()
    }

    /// Required-edge adjacency of every registered node.
    fn required_edges(&self) -> HashMap<ServiceName, Vec<ServiceName>> {
        self.nodes
            .iter()
            .map(|(name, ctrl)| {
                (
                    name.clone(),
                    ctrl.dependencies()
                        .iter()
                        .filter(|d| d.required)
                        .map(|d| d.name.clone())
                        .collect(),
                )
            })
            .collect()
    }

    /// Add an edge from an existing node. A required edge must point at a
    /// registered node and may not close a cycle; on rejection the graph
    /// and the dependent are left unchanged.
    pub fn add_dependency(
        &mut self,
        dependent: &ServiceName,
        spec: DependencySpec,
    ) -> Result<(), GraphError> {
        let ctrl = self
            .get(dependent)
            .ok_or_else(|| GraphError::NotFound {
                name: dependent.clone(),
            })?;
        if spec.required {
            if !self.contains(&spec.name) {
                return Err(GraphError::MissingDependency {
                    dependent: dependent.clone(),
                    dependency: spec.name.clone(),
                });
            }
            let mut edges = self.required_edges();
            edges
                .entry(dependent.clone())
                .or_default()
                .push(spec.name.clone());
            let mut visited = HashSet::new();
            let mut stack = Vec::new();
            Self::find_cycle(&edges, dependent, &mut visited, &mut stack)?;
        }
        self.dependents
            .entry(spec.name.clone())
            .or_default()
            .insert(dependent.clone());
        ctrl.push_dependency(spec);
        Ok(())
    }

    /// Validate a batch of new nodes against the current graph: duplicate
    /// names, missing required dependencies and required-edge cycles all
    /// reject the whole batch, leaving the graph unchanged.
    pub fn validate_batch(
        &self,
        specs: &[(ServiceName, Vec<DependencySpec>)],
    ) -> Result<(), GraphError> {
        let mut batch_names = HashSet::new();
        for (name, _) in specs {
            if self.contains(name) || !batch_names.insert(name.clone()) {
                return Err(GraphError::DuplicateName { name: name.clone() });
            }
        }

        // Required edges of the combined graph, so a batch edge onto an
        // existing chain is checked end to end.
        let mut edges = self.required_edges();
        for (name, deps) in specs {
            for dep in deps.iter().filter(|d| d.required) {
                if !self.contains(&dep.name) && !batch_names.contains(&dep.name) {
                    return Err(GraphError::MissingDependency {
                        dependent: name.clone(),
                        dependency: dep.name.clone(),
                    });
                }
            }
            edges.insert(
                name.clone(),
                deps.iter()
                    .filter(|d| d.required)
                    .map(|d| d.name.clone())
                    .collect(),
            );
        }

        // DFS cycle check rooted at the batch nodes; a cycle introduced by
        // the batch necessarily passes through one of them.
        let mut visited = HashSet::new();
        let mut stack = Vec::new();
        for (name, _) in specs {
            if !visited.contains(name) {
                Self::find_cycle(&edges, name, &mut visited, &mut stack)?;
            }
        }
        Ok(())
    }

    fn find_cycle(
        edges: &HashMap<ServiceName, Vec<ServiceName>>,
        node: &ServiceName,
        visited: &mut HashSet<ServiceName>,
        stack: &mut Vec<ServiceName>,
    ) -> Result<(), GraphError> {
        visited.insert(node.clone());
        stack.push(node.clone());

        if let Some(deps) = edges.get(node) {
            for dep in deps {
                if stack.contains(dep) {
                    let mut path: Vec<ServiceName> = stack
                        .iter()
                        .skip_while(|n| *n != dep)
                        .cloned()
                        .collect();
                    path.push(dep.clone());
                    return Err(GraphError::CycleDetected { path });
                }
                if !visited.contains(dep) {
                    Self::find_cycle(edges, dep, visited, stack)?;
                }
            }
        }

        stack.pop();
        Ok(())
    }

    /// Link an already-validated node into the graph.
    pub fn insert(&mut self, controller: Arc<ServiceController>) {
        for dep in controller.dependencies() {
            self.dependents
                .entry(dep.name.clone())
                .or_default()
                .insert(controller.name().clone());
        }
        self.nodes
            .insert(controller.name().clone(), controller);
    }

    /// Unlink a node. Edges *to* the node owned by other dependents stay in
    /// the index; edges *from* the node are dropped.
    pub fn remove(&mut self, name: &ServiceName) -> Result<Arc<ServiceController>, GraphError> {
        let controller = self
            .nodes
            .remove(name)
            .ok_or_else(|| GraphError::NotFound { name: name.clone() })?;
        for dep in controller.dependencies() {
            if let Some(set) = self.dependents.get_mut(&dep.name) {
                set.remove(name);
                if set.is_empty() {
                    self.dependents.remove(&dep.name);
                }
            }
        }
        Ok(controller)
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("nodes", &self.nodes.len())
            .field("dependents_entries", &self.dependents.len())
            .finish()
    }
}
