//! Transition events and the listener registry.
//!
//! Every committed state change is published as a [`Transition`]. Listeners
//! subscribe to a specific node or to all nodes; callbacks run on a dedicated
//! notifier task, never on the thread that committed the transition.

pub mod dispatcher;
pub mod error;

use std::fmt;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::controller::state::{ServiceName, ServiceState};

pub use dispatcher::{EventHub, ListenerRegistry};

/// Identifier of a listener subscription.
pub type SubscriptionId = u64;

/// One committed state change of one node.
#[derive(Debug, Clone)]
pub struct Transition {
    pub name: ServiceName,
    pub from: ServiceState,
    pub to: ServiceState,
    pub at: Instant,
}

impl Transition {
    pub fn new(name: ServiceName, from: ServiceState, to: ServiceState) -> Self {
        Transition {
            name,
            from,
            to,
            at: Instant::now(),
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.name, self.from, self.to)
    }
}

/// Observer of service transitions.
#[async_trait]
pub trait ServiceListener: Send + Sync {
    async fn on_transition(&self, transition: &Transition);
}

/// Adapt a synchronous closure into a [`ServiceListener`].
pub fn sync_listener<F>(f: F) -> Box<dyn ServiceListener>
where
    F: Fn(&Transition) + Send + Sync + 'static,
{
    struct SyncListener<F>(F);

    #[async_trait]
    impl<F> ServiceListener for SyncListener<F>
    where
        F: Fn(&Transition) + Send + Sync + 'static,
    {
        async fn on_transition(&self, transition: &Transition) {
            (self.0)(transition);
        }
    }

    Box::new(SyncListener(f))
}

/// Cloneable handle controllers use to publish committed transitions into
/// the notifier queue.
#[derive(Clone)]
pub struct TransitionSink {
    tx: mpsc::UnboundedSender<Transition>,
}

impl TransitionSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Transition>) -> Self {
        TransitionSink { tx }
    }

    /// Enqueue a transition for delivery. Silently dropped once the hub has
    /// shut down; late events during teardown have nobody left to notify.
    pub fn publish(&self, transition: Transition) {
        let _ = self.tx.send(transition);
    }
}

impl fmt::Debug for TransitionSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionSink").finish_non_exhaustive()
    }
}
