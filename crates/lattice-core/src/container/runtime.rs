//! The runtime engine behind [`super::ServiceContainer`]: transition
//! evaluation, demand propagation and the start/stop task bodies executed on
//! the scheduler workers.
//!
//! Locking discipline: the graph lock is never held while a controller lock
//! is taken by this module's callers of `evaluate`, controller locks are
//! taken one at a time, and no lock of either kind is held across an
//! `.await`. User behaviors therefore run without any graph-wide lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::container::config::ContainerConfig;
use crate::container::error::{Error, Result};
use crate::controller::ServiceController;
use crate::controller::error::StartError;
use crate::controller::service::{ServiceValue, StartContext, StartOutcome};
use crate::controller::state::{Mode, ServiceName, ServiceState};
use crate::demand::DemandTracker;
use crate::event::EventHub;
use crate::graph::DependencyGraph;
use crate::scheduler::{Scheduler, TransitionKind, TransitionTask};

/// What caused a node to be re-evaluated. `StartFailed` is only left on the
/// triggers the failure-recovery policy allows; everything else leaves a
/// failed node parked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EvalTrigger {
    Registered,
    DependencyChanged,
    DependentChanged,
    DemandChanged,
    ModeChanged,
    Reset,
    Removal,
    Shutdown,
}

impl EvalTrigger {
    fn recovers_failed(self) -> bool {
        matches!(
            self,
            EvalTrigger::Reset
                | EvalTrigger::ModeChanged
                | EvalTrigger::DependencyChanged
                | EvalTrigger::Removal
        )
    }
}

/// Resolved dependency references of one node at one instant.
struct DependencyView {
    /// Every required dependency is registered and `Up`.
    all_up: bool,
    /// Resolved controllers, required and optional alike.
    resolved: Vec<(ServiceName, Arc<ServiceController>)>,
}

/// Deferred work decided under a controller lock and performed after it is
/// released, so evaluation never nests controller locks.
#[derive(Default)]
struct EvalActions {
    /// Required deps to demand, snapshotted under the state lock so a
    /// concurrently added edge is counted exactly once.
    demand_deps: Option<Vec<ServiceName>>,
    release_deps: Option<Vec<ServiceName>>,
    task: Option<TransitionTask>,
    eval_dependents: bool,
    finish_removal: bool,
    reevaluate: bool,
}

/// Shared state of one container instance. Public API lives on
/// [`super::ServiceContainer`]; everything here is crate-internal.
pub(crate) struct ContainerInner {
    pub(crate) graph: RwLock<DependencyGraph>,
    pub(crate) demand: DemandTracker,
    pub(crate) events: EventHub,
    pub(crate) scheduler: Scheduler,
    pub(crate) config: ContainerConfig,
    pub(crate) shutting_down: AtomicBool,
}

impl ContainerInner {
    pub(crate) fn graph_read(&self) -> RwLockReadGuard<'_, DependencyGraph> {
        self.graph.read().expect("graph lock poisoned")
    }

    pub(crate) fn graph_write(&self) -> RwLockWriteGuard<'_, DependencyGraph> {
        self.graph.write().expect("graph lock poisoned")
    }

    pub(crate) fn controller(&self, name: &ServiceName) -> Option<Arc<ServiceController>> {
        self.graph_read().get(name)
    }

    pub(crate) fn require_controller(
        &self,
        name: &ServiceName,
    ) -> Result<Arc<ServiceController>> {
        self.controller(name).ok_or_else(|| Error::not_found(name))
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn dependency_view(&self, ctrl: &ServiceController) -> DependencyView {
        let graph = self.graph_read();
        let mut all_up = true;
        let mut resolved = Vec::new();
        for dep in ctrl.dependencies() {
            match graph.get(&dep.name) {
                Some(dep_ctrl) => {
                    if dep.required && dep_ctrl.state() != ServiceState::Up {
                        all_up = false;
                    }
                    resolved.push((dep.name.clone(), dep_ctrl));
                }
                None => {
                    if dep.required {
                        all_up = false;
                    }
                }
            }
        }
        DependencyView { all_up, resolved }
    }

    fn should_start(st: &crate::controller::ControllerState, demand: usize) -> bool {
        if st.remove_requested {
            return false;
        }
        match st.mode {
            Mode::Active => true,
            Mode::Passive | Mode::OnDemand => demand > 0,
            Mode::Never => false,
        }
    }

    /// Re-evaluate one node against its mode, demand and dependency states,
    /// committing bookkeeping transitions and queueing start/stop work.
    /// Synchronous and cheap; user behaviors only ever run on workers.
    pub(crate) fn evaluate(&self, name: &ServiceName, trigger: EvalTrigger) {
        if let Some(ctrl) = self.controller(name) {
            self.evaluate_controller(&ctrl, trigger);
        }
    }

    fn evaluate_controller(&self, ctrl: &Arc<ServiceController>, trigger: EvalTrigger) {
        let deps = self.dependency_view(ctrl);
        let demand = self.demand.get(ctrl.name());
        let mut actions = EvalActions::default();

        {
            let mut st = ctrl.lock();
            let wants = !self.is_shutting_down() && Self::should_start(&st, demand);

            let required_deps = || {
                ctrl.dependencies()
                    .iter()
                    .filter(|d| d.required)
                    .map(|d| d.name.clone())
                    .collect::<Vec<_>>()
            };
            if wants && !st.demanding {
                st.demanding = true;
                actions.demand_deps = Some(required_deps());
            } else if !wants && st.demanding {
                st.demanding = false;
                actions.release_deps = Some(required_deps());
            }

            match st.state {
                ServiceState::Down | ServiceState::Waiting => {
                    if st.remove_requested {
                        // Cancel any start queued before the removal request.
                        if st.pending == Some(TransitionKind::Start) {
                            st.pending = None;
                        }
                        ctrl.commit(&mut st, ServiceState::Removing);
                        actions.finish_removal = true;
                    } else if wants {
                        if deps.all_up {
                            if st.pending.is_none() {
                                st.pending = Some(TransitionKind::Start);
                                actions.task = Some(TransitionTask {
                                    name: ctrl.name().clone(),
                                    kind: TransitionKind::Start,
                                    expected: st.state,
                                });
                            }
                        } else {
                            // Park until the missing/not-up dependency is
                            // satisfied; cancel a start queued before the
                            // dependency went away.
                            if st.pending == Some(TransitionKind::Start) {
                                st.pending = None;
                            }
                            if st.state == ServiceState::Down {
                                ctrl.commit(&mut st, ServiceState::Waiting);
                            }
                        }
                    } else {
                        if st.pending == Some(TransitionKind::Start) {
                            st.pending = None;
                        }
                        if st.state == ServiceState::Waiting {
                            ctrl.commit(&mut st, ServiceState::Down);
                        }
                    }
                }
                ServiceState::Up => {
                    if !wants || !deps.all_up {
                        ctrl.commit(&mut st, ServiceState::StopRequested);
                        st.pending = Some(TransitionKind::Stop);
                        actions.task = Some(TransitionTask {
                            name: ctrl.name().clone(),
                            kind: TransitionKind::Stop,
                            expected: ServiceState::StopRequested,
                        });
                        // Required dependents must wind down before the stop
                        // behavior may run.
                        actions.eval_dependents = true;
                    }
                }
                ServiceState::StopRequested => {
                    if st.pending.is_none() {
                        st.pending = Some(TransitionKind::Stop);
                        actions.task = Some(TransitionTask {
                            name: ctrl.name().clone(),
                            kind: TransitionKind::Stop,
                            expected: ServiceState::StopRequested,
                        });
                    }
                }
                ServiceState::StartFailed => {
                    // No automatic retry: only an explicit reset, a mode
                    // change, a removal or a state change of a dependency
                    // brings a failed node back to DOWN.
                    if trigger.recovers_failed() {
                        st.failure = None;
                        ctrl.commit(&mut st, ServiceState::Down);
                        actions.reevaluate = true;
                    }
                }
                ServiceState::Starting
                | ServiceState::Stopping
                | ServiceState::Removing
                | ServiceState::Removed => {}
            }
        }

        if let Some(deps) = actions.demand_deps {
            for dep in deps {
                let count = self.demand.add(&dep);
                log::trace!("demand for '{}' now {}", dep, count);
                self.evaluate(&dep, EvalTrigger::DemandChanged);
            }
        }
        if let Some(deps) = actions.release_deps {
            for dep in deps {
                let count = self.demand.release(&dep);
                log::trace!("demand for '{}' now {}", dep, count);
                self.evaluate(&dep, EvalTrigger::DemandChanged);
            }
        }
        if let Some(task) = actions.task {
            self.scheduler.submit(task);
        }
        if actions.eval_dependents {
            self.evaluate_required_dependents(ctrl.name(), EvalTrigger::DependencyChanged);
        }
        if actions.finish_removal {
            self.finish_removal(ctrl);
        }
        if actions.reevaluate {
            self.evaluate_controller(ctrl, trigger);
        }
    }

    fn evaluate_required_dependents(&self, name: &ServiceName, trigger: EvalTrigger) {
        let dependents = { self.graph_read().required_dependents_of(name) };
        for dependent in dependents {
            self.evaluate_controller(&dependent, trigger);
        }
    }

    /// Unlink a node that has committed `Removing` and announce `Removed`.
    fn finish_removal(&self, ctrl: &Arc<ServiceController>) {
        {
            let mut graph = self.graph_write();
            if let Err(err) = graph.remove(ctrl.name()) {
                log::error!("removal of '{}' found no node: {}", ctrl.name(), err);
            }
        }
        {
            let mut st = ctrl.lock();
            ctrl.commit(&mut st, ServiceState::Removed);
        }
        log::info!("service '{}' removed", ctrl.name());
        // Dependents now see a missing required dependency and park.
        self.evaluate_required_dependents(ctrl.name(), EvalTrigger::DependencyChanged);
    }

    /// Entry point for scheduler workers.
    pub(crate) async fn run_task(&self, task: TransitionTask) {
        match task.kind {
            TransitionKind::Start => self.execute_start(task).await,
            TransitionKind::Stop => self.execute_stop(task).await,
        }
    }

    async fn execute_start(&self, task: TransitionTask) {
        let Some(ctrl) = self.controller(&task.name) else {
            return;
        };
        let demand = self.demand.get(&task.name);

        {
            let mut st = ctrl.lock();
            // Claim the queued task; a re-evaluation may have cancelled it
            // or another worker may have claimed it already.
            if st.pending != Some(TransitionKind::Start) {
                return;
            }
            st.pending = None;
            if !st.state.is_restartable() {
                log::trace!(
                    "stale start task for '{}' (queued in {}, now {})",
                    task.name,
                    task.expected,
                    st.state
                );
                return;
            }
            if !Self::should_start(&st, demand) || self.is_shutting_down() {
                return;
            }
            ctrl.commit(&mut st, ServiceState::Starting);
        }

        // The dependency check and value snapshot happen only now, with the
        // node already STARTING: from this point on a required dependency
        // cannot complete a stop behind our back, so a view that reads all
        // required dependencies as UP stays valid while the behavior runs.
        let deps = self.dependency_view(&ctrl);
        if !deps.all_up {
            {
                let mut st = ctrl.lock();
                if st.state == ServiceState::Starting {
                    ctrl.commit(&mut st, ServiceState::Waiting);
                }
            }
            // A dependency's stop may have been deferred on our account,
            // and a dependency that came back up while we held STARTING
            // could not re-trigger us.
            self.evaluate_required_dependencies(&ctrl);
            self.evaluate(&task.name, EvalTrigger::DependencyChanged);
            return;
        }

        // Inject values of dependencies that are up right now. Required
        // ones are guaranteed present by the check above; optional ones
        // only if they happen to be up.
        let mut values: HashMap<ServiceName, ServiceValue> = HashMap::new();
        for (name, dep_ctrl) in &deps.resolved {
            if let Some(value) = dep_ctrl.value() {
                values.insert(name.clone(), value);
            }
        }

        log::debug!("starting service '{}'", task.name);
        let (ctx, completion_rx, async_flag) = StartContext::new(task.name.clone(), values);
        let result = match ctrl.behavior().start(ctx).await {
            Ok(StartOutcome::Ready(value)) => {
                if async_flag.load(Ordering::SeqCst) {
                    log::warn!(
                        "service '{}' took a completion handle but completed synchronously",
                        task.name
                    );
                }
                Ok(value)
            }
            Ok(StartOutcome::Asynchronous) => {
                match tokio::time::timeout(self.config.start_timeout, completion_rx).await {
                    Ok(Ok(signalled)) => signalled,
                    Ok(Err(_)) => Err(StartError::Abandoned),
                    Err(_) => Err(StartError::Timeout),
                }
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(value) => {
                {
                    let mut st = ctrl.lock();
                    if st.state != ServiceState::Starting {
                        // Forced failure or shutdown raced the completion;
                        // the produced value is discarded.
                        log::debug!(
                            "start result for '{}' discarded (state {})",
                            task.name,
                            st.state
                        );
                        return;
                    }
                    st.value = Some(value);
                    ctrl.commit(&mut st, ServiceState::Up);
                }
                log::info!("service '{}' is up", task.name);
                self.evaluate_required_dependents(&task.name, EvalTrigger::DependencyChanged);
                // A stop/removal may have been requested while starting.
                self.evaluate(&task.name, EvalTrigger::DependencyChanged);
            }
            Err(err) => {
                let remove_requested = {
                    let mut st = ctrl.lock();
                    if st.state != ServiceState::Starting {
                        return;
                    }
                    st.failure = Some(err.clone());
                    ctrl.commit(&mut st, ServiceState::StartFailed);
                    st.remove_requested
                };
                log::warn!("service '{}' failed to start: {}", task.name, err);
                self.propagate_failure(&task.name);
                // A dependency's stop may have been deferred while this
                // node was starting; it is unblocked now.
                self.evaluate_required_dependencies(&ctrl);
                if remove_requested {
                    self.evaluate(&task.name, EvalTrigger::Removal);
                }
            }
        }
    }

    /// Transactional rollback: force every transitive required dependent
    /// that is trying to start into `StartFailed` without running its
    /// behavior. Sibling subtrees are untouched.
    fn propagate_failure(&self, name: &ServiceName) {
        let dependents = { self.graph_read().required_dependents_of(name) };
        for dependent in dependents {
            let forced = {
                let mut st = dependent.lock();
                if matches!(st.state, ServiceState::Waiting | ServiceState::Starting) {
                    if st.pending == Some(TransitionKind::Start) {
                        st.pending = None;
                    }
                    st.failure = Some(StartError::DependencyFailed(name.clone()));
                    dependent.commit(&mut st, ServiceState::StartFailed);
                    true
                } else {
                    false
                }
            };
            if forced {
                log::warn!(
                    "service '{}' marked START_FAILED: required dependency '{}' failed",
                    dependent.name(),
                    name
                );
                // The forced node just went inactive; its other
                // dependencies may have a stop deferred on its account.
                self.evaluate_required_dependencies(&dependent);
                self.propagate_failure(dependent.name());
            }
        }
    }

    async fn execute_stop(&self, task: TransitionTask) {
        let Some(ctrl) = self.controller(&task.name) else {
            return;
        };
        // Stop order is the reverse of start order: required dependents must
        // already be inactive. When one is still winding down, this task is
        // dropped and re-queued once that dependent goes inactive (its stop
        // completes or its start fails).
        let blocked = {
            self.graph_read()
                .required_dependents_of(&task.name)
                .iter()
                .any(|d| d.state().is_active())
        };

        {
            let mut st = ctrl.lock();
            if st.pending != Some(TransitionKind::Stop) {
                return;
            }
            st.pending = None;
            if st.state != ServiceState::StopRequested {
                log::trace!("stale stop task for '{}' (now {})", task.name, st.state);
                return;
            }
            if blocked {
                log::trace!("stop of '{}' deferred; dependents still active", task.name);
                return;
            }
            st.value = None;
            ctrl.commit(&mut st, ServiceState::Stopping);
        }

        log::debug!("stopping service '{}'", task.name);
        ctrl.behavior().stop().await;

        {
            let mut st = ctrl.lock();
            if st.state == ServiceState::Stopping {
                ctrl.commit(&mut st, ServiceState::Down);
            }
        }
        log::info!("service '{}' stopped", task.name);

        // The node may park, restart or proceed to removal.
        self.evaluate(&task.name, EvalTrigger::DependencyChanged);
        // Our dependencies may have been waiting for us before stopping.
        self.evaluate_required_dependencies(&ctrl);
    }

    /// Re-evaluate every required dependency of a node that just went
    /// inactive. A dependency in `StopRequested` defers its stop while any
    /// required dependent is active, and relies on this to be re-queued.
    fn evaluate_required_dependencies(&self, ctrl: &Arc<ServiceController>) {
        for dep in ctrl.dependencies().iter().filter(|d| d.required) {
            self.evaluate(&dep.name, EvalTrigger::DependentChanged);
        }
    }
}

impl std::fmt::Debug for ContainerInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerInner")
            .field("graph", &self.graph_read().len())
            .field("scheduler", &self.scheduler)
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}
