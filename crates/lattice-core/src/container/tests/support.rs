//! Shared fixtures for the container test suites.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::container::ServiceContainer;
use crate::controller::error::StartError;
use crate::controller::service::{Service, StartContext, StartOutcome};
use crate::controller::state::{ServiceName, ServiceState};
use crate::event::{ServiceListener, sync_listener};

pub(super) const DEADLINE: Duration = Duration::from_secs(5);

pub(super) fn name(s: &str) -> ServiceName {
    ServiceName::new(s)
}

/// Invocation counters shared with a [`Probe`] behavior.
pub(super) struct Counters {
    pub(super) starts: Arc<AtomicUsize>,
    pub(super) stops: Arc<AtomicUsize>,
}

impl Counters {
    pub(super) fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub(super) fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

/// Simple lifecycle behavior: counts start/stop calls, exposes a `u32`
/// value, and can be told to fail its first N start attempts.
pub(super) struct Probe {
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
    fail_first: usize,
    value: u32,
}

#[async_trait]
impl Service for Probe {
    async fn start(&self, _ctx: StartContext) -> Result<StartOutcome, StartError> {
        let attempt = self.starts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fail_first {
            return Err(StartError::failed("induced failure"));
        }
        Ok(StartOutcome::Ready(Arc::new(self.value)))
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

pub(super) fn probe(value: u32) -> (Counters, Probe) {
    probe_failing_first(value, 0)
}

pub(super) fn probe_failing_first(value: u32, fail_first: usize) -> (Counters, Probe) {
    let starts = Arc::new(AtomicUsize::new(0));
    let stops = Arc::new(AtomicUsize::new(0));
    let counters = Counters {
        starts: Arc::clone(&starts),
        stops: Arc::clone(&stops),
    };
    let behavior = Probe {
        starts,
        stops,
        fail_first,
        value,
    };
    (counters, behavior)
}

/// Records `name:event` strings in invocation order across several nodes.
pub(super) type Trace = Arc<Mutex<Vec<String>>>;

pub(super) fn trace() -> Trace {
    Arc::new(Mutex::new(Vec::new()))
}

pub(super) fn snapshot(trace: &Trace) -> Vec<String> {
    trace.lock().expect("trace lock").clone()
}

/// Behavior that appends `<name>:start` / `<name>:stop` to a shared trace.
pub(super) struct Traced {
    pub(super) label: String,
    pub(super) trace: Trace,
}

#[async_trait]
impl Service for Traced {
    async fn start(&self, _ctx: StartContext) -> Result<StartOutcome, StartError> {
        self.trace
            .lock()
            .expect("trace lock")
            .push(format!("{}:start", self.label));
        Ok(StartOutcome::Ready(Arc::new(())))
    }

    async fn stop(&self) {
        self.trace
            .lock()
            .expect("trace lock")
            .push(format!("{}:stop", self.label));
    }
}

pub(super) fn traced(label: &str, trace: &Trace) -> Traced {
    Traced {
        label: label.to_string(),
        trace: Arc::clone(trace),
    }
}

/// Listener recording transitions as `<name>:<to>` strings.
pub(super) fn recording_listener() -> (Trace, Box<dyn ServiceListener>) {
    let seen = trace();
    let sink = Arc::clone(&seen);
    let listener = sync_listener(move |t| {
        sink.lock()
            .expect("trace lock")
            .push(format!("{}:{}", t.name, t.to));
    });
    (seen, listener)
}

/// Entries of a trace restricted to the given `<name>:<to>` values,
/// preserving order. Lets assertions ignore bookkeeping transitions such
/// as `WAITING`.
pub(super) fn filtered(trace: &Trace, keep: &[&str]) -> Vec<String> {
    snapshot(trace)
        .into_iter()
        .filter(|entry| keep.contains(&entry.as_str()))
        .collect()
}

pub(super) async fn await_up(container: &ServiceContainer, name: &ServiceName) {
    container
        .await_up(name, DEADLINE)
        .await
        .unwrap_or_else(|e| panic!("service '{}' did not come up: {}", name, e));
}

pub(super) async fn await_state(
    container: &ServiceContainer,
    name: &ServiceName,
    target: ServiceState,
) {
    container
        .await_state(name, &[target], DEADLINE)
        .await
        .unwrap_or_else(|e| panic!("service '{}' never reached {}: {}", name, target, e));
}

/// Give queued transition work and event delivery a moment to settle.
pub(super) async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
