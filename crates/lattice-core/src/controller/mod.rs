//! Per-node lifecycle state machine.
//!
//! A [`ServiceController`] owns the current state, the mode, the produced
//! value and the pending-transition slot of one service node. All transitions
//! for a node are committed under its own lock, so they are linearized per
//! node while independent nodes move concurrently.

pub mod error;
pub mod service;
pub mod state;

use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tokio::sync::watch;

use crate::controller::error::StartError;
use crate::controller::service::{Service, ServiceValue};
use crate::controller::state::{Mode, ServiceName, ServiceState};
use crate::event::{Transition, TransitionSink};
use crate::graph::DependencySpec;
use crate::scheduler::TransitionKind;

/// Mutable per-node bookkeeping, guarded by the controller lock.
#[derive(Debug)]
pub struct ControllerState {
    pub state: ServiceState,
    pub mode: Mode,
    /// Defined iff `state == Up`.
    pub value: Option<ServiceValue>,
    /// Set while this node holds one unit of demand on each required
    /// dependency. At most one unit per edge, however often we re-evaluate.
    pub demanding: bool,
    /// Queued transition task that has not been claimed by a worker yet.
    pub pending: Option<TransitionKind>,
    /// A removal was requested while the node was not removable; the node
    /// stops first and is unlinked once it reaches `Down`.
    pub remove_requested: bool,
    /// Why the last start attempt failed, while `state == StartFailed`.
    pub failure: Option<StartError>,
}

/// State machine instance for a single service node.
pub struct ServiceController {
    name: ServiceName,
    /// Dependency references; may grow through edge additions after
    /// registration, never shrinks.
    dependencies: RwLock<Vec<DependencySpec>>,
    behavior: Arc<dyn Service>,
    inner: Mutex<ControllerState>,
    /// Last committed state, for the blocking-wait API.
    state_tx: watch::Sender<ServiceState>,
    events: TransitionSink,
}

impl ServiceController {
    pub fn new(
        name: ServiceName,
        mode: Mode,
        dependencies: Vec<DependencySpec>,
        behavior: Arc<dyn Service>,
        events: TransitionSink,
    ) -> Self {
        let (state_tx, _) = watch::channel(ServiceState::Down);
        ServiceController {
            name,
            dependencies: RwLock::new(dependencies),
            behavior,
            inner: Mutex::new(ControllerState {
                state: ServiceState::Down,
                mode,
                value: None,
                demanding: false,
                pending: None,
                remove_requested: false,
                failure: None,
            }),
            state_tx,
            events,
        }
    }

    pub fn name(&self) -> &ServiceName {
        &self.name
    }

    /// Snapshot of the dependency references, in the order they were added.
    pub fn dependencies(&self) -> Vec<DependencySpec> {
        self.dependencies
            .read()
            .expect("dependency list lock poisoned")
            .clone()
    }

    /// Append an edge. Validation (existence, cycles) is the graph's job.
    pub(crate) fn push_dependency(&self, spec: DependencySpec) {
        self.dependencies
            .write()
            .expect("dependency list lock poisoned")
            .push(spec);
    }

    pub fn behavior(&self) -> Arc<dyn Service> {
        Arc::clone(&self.behavior)
    }

    /// Lock the per-node state. Never held across an `.await`.
    pub fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.inner.lock().expect("controller lock poisoned")
    }

    /// Snapshot of the current state without the caller holding the lock.
    pub fn state(&self) -> ServiceState {
        self.lock().state
    }

    pub fn mode(&self) -> Mode {
        self.lock().mode
    }

    /// Subscribe to committed state changes (used by `await_state`).
    pub fn watch(&self) -> watch::Receiver<ServiceState> {
        self.state_tx.subscribe()
    }

    /// Commit a transition under the given guard: update the state, publish
    /// it to waiters and emit the transition event.
    pub fn commit(&self, st: &mut ControllerState, to: ServiceState) {
        let from = st.state;
        debug_assert_ne!(from, to, "no-op transition for '{}'", self.name);
        st.state = to;
        self.state_tx.send_replace(to);
        log::debug!("service '{}' transition {} -> {}", self.name, from, to);
        self.events.publish(Transition::new(self.name.clone(), from, to));
    }

    /// Why the last start attempt failed, while in `StartFailed`.
    pub fn failure(&self) -> Option<StartError> {
        self.lock().failure.clone()
    }

    /// Clone of the value, only while up.
    pub fn value(&self) -> Option<ServiceValue> {
        let st = self.lock();
        if st.state == ServiceState::Up {
            st.value.clone()
        } else {
            None
        }
    }
}

impl std::fmt::Debug for ServiceController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.lock();
        f.debug_struct("ServiceController")
            .field("name", &self.name)
            .field("state", &st.state)
            .field("mode", &st.mode)
            .field("pending", &st.pending)
            .finish()
    }
}
