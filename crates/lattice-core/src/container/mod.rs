//! The service container: the public embedding API every subsystem
//! registers into instead of managing its own startup/shutdown logic.
//!
//! A [`ServiceContainer`] owns one dependency graph, one demand tracker, one
//! transition scheduler and one listener hub. Registration and the query
//! surface are synchronous; anything that waits for a lifecycle outcome
//! (`remove_service`, `await_state`, `shutdown`) is async.

pub mod batch;
pub mod config;
pub mod error;
pub(crate) mod runtime;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use crate::container::runtime::{ContainerInner, EvalTrigger};
use crate::controller::ServiceController;
use crate::controller::error::StartError;
use crate::controller::service::ServiceValue;
use crate::controller::state::{Mode, ServiceName, ServiceState};
use crate::demand::DemandTracker;
use crate::event::{EventHub, ServiceListener, SubscriptionId};
use crate::graph::{DependencyGraph, DependencySpec};
use crate::scheduler::{Scheduler, TaskHandler};

pub use batch::{ServiceBatch, ServiceSpec};
pub use config::ContainerConfig;
pub use error::{Error, Result};

/// One independent service container instance.
///
/// Cheap to clone; clones share the same graph. Must be created inside a
/// Tokio runtime (the scheduler workers and the event notifier are spawned
/// at construction).
#[derive(Clone)]
pub struct ServiceContainer {
    inner: Arc<ContainerInner>,
}

impl ServiceContainer {
    pub fn new() -> Self {
        Self::with_config(ContainerConfig::default())
    }

    pub fn with_config(config: ContainerConfig) -> Self {
        let worker_count = config.worker_count;
        let inner = Arc::new_cyclic(|weak: &Weak<ContainerInner>| {
            let weak = weak.clone();
            // Workers hold the container weakly so dropping the last
            // external handle tears everything down.
            let handler: TaskHandler = Arc::new(move |task| {
                let weak = weak.clone();
                Box::pin(async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.run_task(task).await;
                    }
                })
            });
            ContainerInner {
                graph: RwLock::new(DependencyGraph::new()),
                demand: DemandTracker::new(),
                events: EventHub::new(),
                scheduler: Scheduler::new(worker_count, handler),
                config,
                shutting_down: AtomicBool::new(false),
            }
        });
        log::info!(
            "service container created ({} workers)",
            inner.scheduler.worker_count()
        );
        ServiceContainer { inner }
    }

    /// Register a single service. Equivalent to a one-element batch.
    pub fn register_service(&self, spec: ServiceSpec) -> Result<()> {
        self.install_batch(ServiceBatch::new().add(spec))
    }

    /// Atomically link a batch of service nodes: either the whole batch is
    /// accepted (no duplicate names, no required-edge cycles, no missing
    /// required dependencies) or the graph is left untouched.
    pub fn install_batch(&self, batch: ServiceBatch) -> Result<()> {
        if self.inner.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }
        let mut installed = Vec::with_capacity(batch.specs.len());
        {
            let mut graph = self.inner.graph_write();
            let shapes: Vec<(ServiceName, Vec<DependencySpec>)> = batch
                .specs
                .iter()
                .map(|spec| (spec.name.clone(), spec.dependencies.clone()))
                .collect();
            graph.validate_batch(&shapes)?;
            for spec in batch.specs {
                log::info!("service '{}' registered ({})", spec.name, spec.mode);
                let controller = Arc::new(ServiceController::new(
                    spec.name,
                    spec.mode,
                    spec.dependencies,
                    spec.behavior,
                    self.inner.events.sink(),
                ));
                installed.push(Arc::clone(&controller));
                graph.insert(controller);
            }
        }
        // Kick the new nodes outside the graph lock; evaluation may cascade.
        for controller in &installed {
            self.inner
                .evaluate(controller.name(), EvalTrigger::Registered);
        }
        Ok(())
    }

    /// Add a dependency edge to an already-registered node. A required edge
    /// that would close a cycle, or that points at an unregistered name, is
    /// rejected and nothing changes. If the dependent is currently up and
    /// the new required dependency is not, the dependent is stopped.
    pub fn add_dependency(
        &self,
        dependent: &ServiceName,
        dependency: &ServiceName,
        required: bool,
    ) -> Result<()> {
        if self.inner.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }
        let spec = DependencySpec {
            name: dependency.clone(),
            required,
        };
        // The edge push and the `demanding` read happen under the dependent's
        // state lock so the demand unit for the new edge is counted exactly
        // once, whichever side of a concurrent evaluation we land on.
        let demands_new_edge = {
            let mut graph = self.inner.graph_write();
            let controller = graph
                .get(dependent)
                .ok_or_else(|| Error::not_found(dependent))?;
            let st = controller.lock();
            graph.add_dependency(dependent, spec)?;
            required && st.demanding
        };
        if demands_new_edge {
            self.inner.demand.add(dependency);
            self.inner.evaluate(dependency, EvalTrigger::DemandChanged);
        }
        self.inner.evaluate(dependent, EvalTrigger::DependencyChanged);
        Ok(())
    }

    /// Request removal and wait until the node reaches `REMOVED`. A node
    /// that is up (or starting) stops first; the name becomes free for
    /// re-registration once this resolves.
    pub async fn remove_service(&self, name: &ServiceName) -> Result<()> {
        let controller = self.inner.require_controller(name)?;
        {
            let mut st = controller.lock();
            st.remove_requested = true;
        }
        self.inner.evaluate(name, EvalTrigger::Removal);

        let mut rx = controller.watch();
        loop {
            if *rx.borrow_and_update() == ServiceState::Removed {
                return Ok(());
            }
            if rx.changed().await.is_err() {
                // Unreachable while we hold the controller, but do not spin.
                return Err(Error::not_found(name));
            }
        }
    }

    /// Change a node's activation policy. Setting the current mode again is
    /// a no-op and produces no transitions.
    pub fn set_mode(&self, name: &ServiceName, mode: Mode) -> Result<()> {
        let controller = self.inner.require_controller(name)?;
        let changed = {
            let mut st = controller.lock();
            if st.mode == mode {
                false
            } else {
                st.mode = mode;
                true
            }
        };
        if changed {
            log::debug!("service '{}' mode set to {}", name, mode);
            self.inner.evaluate(name, EvalTrigger::ModeChanged);
        }
        Ok(())
    }

    /// Bring a `START_FAILED` node back to `DOWN` (and let it start again if
    /// its mode and demand call for it). No-op in any other state.
    pub fn reset(&self, name: &ServiceName) -> Result<()> {
        self.inner.require_controller(name)?;
        self.inner.evaluate(name, EvalTrigger::Reset);
        Ok(())
    }

    /// Hold one unit of external demand on a node, driving `ON_DEMAND` and
    /// `PASSIVE` nodes up without registering a dependent.
    pub fn demand(&self, name: &ServiceName) -> Result<()> {
        self.inner.require_controller(name)?;
        self.inner.demand.add(name);
        self.inner.evaluate(name, EvalTrigger::DemandChanged);
        Ok(())
    }

    /// Release one unit of external demand taken with [`demand`](Self::demand).
    pub fn undemand(&self, name: &ServiceName) -> Result<()> {
        self.inner.require_controller(name)?;
        self.inner.demand.release(name);
        self.inner.evaluate(name, EvalTrigger::DemandChanged);
        Ok(())
    }

    /// Current lifecycle state of a node.
    pub fn state(&self, name: &ServiceName) -> Result<ServiceState> {
        Ok(self.inner.require_controller(name)?.state())
    }

    /// The service value; only defined while the node is `UP`.
    pub fn get_value(&self, name: &ServiceName) -> Result<ServiceValue> {
        let controller = self.inner.require_controller(name)?;
        controller.value().ok_or_else(|| Error::NotReady {
            name: name.clone(),
            state: controller.state(),
        })
    }

    /// Typed variant of [`get_value`](Self::get_value).
    pub fn get_value_as<T: Send + Sync + 'static>(&self, name: &ServiceName) -> Result<Arc<T>> {
        let value = self.get_value(name)?;
        Arc::downcast::<T>(value).map_err(|_| Error::WrongValueType { name: name.clone() })
    }

    /// Wait until the node reaches one of `targets`, or `deadline` elapses.
    /// The current state is checked first, so a state reached before the
    /// call still resolves immediately. A timeout never mutates node state.
    pub async fn await_state(
        &self,
        name: &ServiceName,
        targets: &[ServiceState],
        deadline: Duration,
    ) -> Result<ServiceState> {
        let controller = self.inner.require_controller(name)?;
        let mut rx = controller.watch();
        let wait = async {
            loop {
                let current = *rx.borrow_and_update();
                if targets.contains(&current) {
                    return current;
                }
                if rx.changed().await.is_err() {
                    // No further transitions will ever arrive; park until
                    // the deadline fires.
                    std::future::pending::<()>().await;
                }
            }
        };
        match tokio::time::timeout(deadline, wait).await {
            Ok(state) => Ok(state),
            Err(_) => Err(Error::WaitTimeout {
                name: name.clone(),
                last: controller.state(),
            }),
        }
    }

    /// Wait for the node to come up, surfacing a start failure as an error.
    pub async fn await_up(&self, name: &ServiceName, deadline: Duration) -> Result<()> {
        let reached = self
            .await_state(
                name,
                &[ServiceState::Up, ServiceState::StartFailed],
                deadline,
            )
            .await?;
        match reached {
            ServiceState::Up => Ok(()),
            _ => Err(Error::Start {
                name: name.clone(),
                source: self
                    .start_failure(name)?
                    .unwrap_or_else(|| StartError::failed("start failed")),
            }),
        }
    }

    /// Why the last start attempt failed, while the node is `START_FAILED`.
    pub fn start_failure(&self, name: &ServiceName) -> Result<Option<StartError>> {
        Ok(self.inner.require_controller(name)?.failure())
    }

    /// Subscribe to transitions of one node.
    pub async fn subscribe(
        &self,
        name: &ServiceName,
        listener: Box<dyn ServiceListener>,
    ) -> SubscriptionId {
        self.inner.events.subscribe(name.clone(), listener).await
    }

    /// Subscribe to transitions of every node.
    pub async fn subscribe_all(&self, listener: Box<dyn ServiceListener>) -> SubscriptionId {
        self.inner.events.subscribe_all(listener).await
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.inner.events.unsubscribe(id).await?;
        Ok(())
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        self.inner.graph_read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.graph_read().is_empty()
    }

    /// Stop every service (dependents before dependencies) and refuse new
    /// registrations. Resolves once nothing is starting, up or stopping;
    /// nodes parked in `START_FAILED` are left as they are.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("service container shutting down");
        let names = self.inner.graph_read().names();
        for name in &names {
            self.inner.evaluate(name, EvalTrigger::Shutdown);
        }
        for name in &names {
            let Some(controller) = self.inner.controller(name) else {
                continue;
            };
            let mut rx = controller.watch();
            loop {
                if !rx.borrow_and_update().is_active() {
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
        log::info!("service container shut down");
    }
}

impl Default for ServiceContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContainer")
            .field("services", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests;
