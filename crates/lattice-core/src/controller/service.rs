use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::controller::error::StartError;
use crate::controller::state::ServiceName;

/// The object produced by a successful start, exposed to dependents.
///
/// Values are type-erased; use [`crate::container::ServiceContainer::get_value_as`]
/// or [`StartContext::require_as`] to downcast to the concrete type.
pub type ServiceValue = Arc<dyn Any + Send + Sync>;

/// Outcome of a start behavior invocation.
pub enum StartOutcome {
    /// The service is up and this is its value.
    Ready(ServiceValue),
    /// The behavior took a [`CompletionHandle`] from the context and will
    /// signal completion later. The node stays `STARTING` until the handle
    /// is signalled or the start timeout elapses.
    Asynchronous,
}

impl fmt::Debug for StartOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartOutcome::Ready(_) => write!(f, "StartOutcome::Ready(..)"),
            StartOutcome::Asynchronous => write!(f, "StartOutcome::Asynchronous"),
        }
    }
}

/// User-supplied lifecycle behavior of a service node.
#[async_trait]
pub trait Service: Send + Sync {
    /// Bring the service up and produce its value, or take a completion
    /// handle from the context and return [`StartOutcome::Asynchronous`].
    async fn start(&self, ctx: StartContext) -> Result<StartOutcome, StartError>;

    /// Release whatever `start` acquired. Must not fail.
    async fn stop(&self);
}

type CompletionSender = oneshot::Sender<Result<ServiceValue, StartError>>;

/// Handle used to signal asynchronous start completion.
///
/// Cloneable; the first call to [`complete`](Self::complete) or
/// [`fail`](Self::fail) wins, later calls are no-ops.
#[derive(Clone)]
pub struct CompletionHandle {
    slot: Arc<Mutex<Option<CompletionSender>>>,
}

impl CompletionHandle {
    fn signal(&self, result: Result<ServiceValue, StartError>) {
        let sender = self.slot.lock().expect("completion slot poisoned").take();
        if let Some(tx) = sender {
            // The receiver side may already have timed out; that is fine.
            let _ = tx.send(result);
        }
    }

    /// Mark the start as successful with the given service value.
    pub fn complete(&self, value: ServiceValue) {
        self.signal(Ok(value));
    }

    /// Mark the start as failed.
    pub fn fail(&self, error: StartError) {
        self.signal(Err(error));
    }
}

impl fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionHandle").finish_non_exhaustive()
    }
}

/// Context handed to a start behavior: injected dependency values plus the
/// async-completion plumbing.
pub struct StartContext {
    name: ServiceName,
    /// Values of dependencies that were up when the start began. Required
    /// dependencies are always present; optional ones only if they were up.
    values: HashMap<ServiceName, ServiceValue>,
    completion: CompletionHandle,
    async_requested: Arc<AtomicBool>,
}

impl StartContext {
    /// Build a context and the receiver the scheduler awaits if the behavior
    /// requests asynchronous completion.
    pub(crate) fn new(
        name: ServiceName,
        values: HashMap<ServiceName, ServiceValue>,
    ) -> (
        Self,
        oneshot::Receiver<Result<ServiceValue, StartError>>,
        Arc<AtomicBool>,
    ) {
        let (tx, rx) = oneshot::channel();
        let async_requested = Arc::new(AtomicBool::new(false));
        let ctx = StartContext {
            name,
            values,
            completion: CompletionHandle {
                slot: Arc::new(Mutex::new(Some(tx))),
            },
            async_requested: Arc::clone(&async_requested),
        };
        (ctx, rx, async_requested)
    }

    /// The name of the node being started.
    pub fn name(&self) -> &ServiceName {
        &self.name
    }

    /// Value of a dependency, if it was up when this start began.
    pub fn value_of(&self, dependency: &ServiceName) -> Option<ServiceValue> {
        self.values.get(dependency).cloned()
    }

    /// Value of a required dependency. Fails the start if the name was never
    /// declared as a dependency of this node.
    pub fn require(&self, dependency: &ServiceName) -> Result<ServiceValue, StartError> {
        self.value_of(dependency).ok_or_else(|| {
            StartError::failed(format!(
                "service '{}' has no injected value for dependency '{}'",
                self.name, dependency
            ))
        })
    }

    /// Typed variant of [`require`](Self::require).
    pub fn require_as<T: Send + Sync + 'static>(
        &self,
        dependency: &ServiceName,
    ) -> Result<Arc<T>, StartError> {
        let value = self.require(dependency)?;
        Arc::downcast::<T>(value).map_err(|_| {
            StartError::failed(format!(
                "dependency '{}' of '{}' has an unexpected value type",
                dependency, self.name
            ))
        })
    }

    /// Take the completion handle, marking this start as asynchronous.
    /// The behavior should then return [`StartOutcome::Asynchronous`].
    pub fn async_completion(&self) -> CompletionHandle {
        self.async_requested.store(true, Ordering::SeqCst);
        self.completion.clone()
    }
}

impl fmt::Debug for StartContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartContext")
            .field("name", &self.name)
            .field("injected", &self.values.len())
            .finish()
    }
}
