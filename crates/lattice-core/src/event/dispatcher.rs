use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex; // Use tokio's Mutex
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::controller::state::ServiceName;
use crate::event::error::EventSystemError;
use crate::event::{ServiceListener, SubscriptionId, Transition, TransitionSink};

/// Per-name and global listener tables (internal, wrapped by [`EventHub`]).
pub struct ListenerRegistry {
    global: Vec<(SubscriptionId, Arc<dyn ServiceListener>)>,
    by_name: HashMap<ServiceName, Vec<(SubscriptionId, Arc<dyn ServiceListener>)>>,
    next_id: SubscriptionId,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        ListenerRegistry {
            global: Vec::new(),
            by_name: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn subscribe_all(&mut self, listener: Box<dyn ServiceListener>) -> SubscriptionId {
        let id = self.next_id;
        self.next_id += 1;
        self.global.push((id, Arc::from(listener)));
        id
    }

    pub fn subscribe(
        &mut self,
        name: ServiceName,
        listener: Box<dyn ServiceListener>,
    ) -> SubscriptionId {
        let id = self.next_id;
        self.next_id += 1;
        self.by_name
            .entry(name)
            .or_default()
            .push((id, Arc::from(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> Result<(), EventSystemError> {
        let before = self.global.len();
        self.global.retain(|(sub_id, _)| *sub_id != id);
        let mut found = self.global.len() < before;

        self.by_name.retain(|_, listeners| {
            let before = listeners.len();
            listeners.retain(|(sub_id, _)| *sub_id != id);
            if listeners.len() < before {
                found = true;
            }
            !listeners.is_empty()
        });

        if found {
            Ok(())
        } else {
            Err(EventSystemError::SubscriptionNotFound(id))
        }
    }

    /// Listeners that should see a transition of `name`, in subscription
    /// order (per-name first, then global).
    fn matching(&self, name: &ServiceName) -> Vec<Arc<dyn ServiceListener>> {
        let mut out = Vec::new();
        if let Some(listeners) = self.by_name.get(name) {
            out.extend(listeners.iter().map(|(_, l)| Arc::clone(l)));
        }
        out.extend(self.global.iter().map(|(_, l)| Arc::clone(l)));
        out
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let by_name_count: usize = self.by_name.values().map(|v| v.len()).sum();
        f.debug_struct("ListenerRegistry")
            .field("global_count", &self.global.len())
            .field("by_name_count", &by_name_count)
            .field("next_id", &self.next_id)
            .finish()
    }
}

/// Owns the listener registry and the notifier task that drains the
/// transition queue in commit order.
pub struct EventHub {
    registry: Arc<Mutex<ListenerRegistry>>,
    sink: TransitionSink,
    /// Kept so the notifier can be aborted once the hub is dropped; letting
    /// it drain naturally would race container teardown in tests.
    notifier: JoinHandle<()>,
}

impl EventHub {
    /// Create the hub and spawn its notifier task. Must be called from
    /// within a Tokio runtime.
    pub fn new() -> Self {
        let registry = Arc::new(Mutex::new(ListenerRegistry::new()));
        let (tx, mut rx) = mpsc::unbounded_channel::<Transition>();

        let notify_registry = Arc::clone(&registry);
        let notifier = tokio::spawn(async move {
            while let Some(transition) = rx.recv().await {
                // Snapshot the matching listeners, then release the lock
                // before awaiting them: deregistration mid-notification is a
                // no-op for the in-flight event and effective afterwards.
                let listeners = {
                    let registry = notify_registry.lock().await;
                    registry.matching(&transition.name)
                };
                for listener in listeners {
                    listener.on_transition(&transition).await;
                }
            }
            log::trace!("event notifier task finished");
        });

        EventHub {
            registry,
            sink: TransitionSink::new(tx),
            notifier,
        }
    }

    /// Handle controllers use to publish transitions.
    pub fn sink(&self) -> TransitionSink {
        self.sink.clone()
    }

    pub async fn subscribe(
        &self,
        name: ServiceName,
        listener: Box<dyn ServiceListener>,
    ) -> SubscriptionId {
        self.registry.lock().await.subscribe(name, listener)
    }

    pub async fn subscribe_all(&self, listener: Box<dyn ServiceListener>) -> SubscriptionId {
        self.registry.lock().await.subscribe_all(listener)
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), EventSystemError> {
        self.registry.lock().await.unsubscribe(id)
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventHub {
    fn drop(&mut self) {
        // Sink clones held by controllers may outlive the hub briefly; once
        // the hub is gone there is nobody left to notify, so cut the task
        // rather than let it drain.
        self.notifier.abort();
    }
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub").finish_non_exhaustive()
    }
}
