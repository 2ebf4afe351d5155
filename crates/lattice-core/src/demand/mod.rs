//! Demand tracking: per-name counters of how many dependents (plus external
//! holders) currently require a node to be active.
//!
//! Counters are keyed by name rather than stored on the controller so that a
//! held demand survives removal and re-registration of the node it targets.
//! Changes are +1/-1 deltas; the runtime re-evaluates only the affected node.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::controller::state::ServiceName;

#[derive(Default)]
pub struct DemandTracker {
    counts: Mutex<HashMap<ServiceName, usize>>,
}

impl DemandTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one unit of demand; returns the new count.
    pub fn add(&self, name: &ServiceName) -> usize {
        let mut counts = self.counts.lock().expect("demand tracker lock poisoned");
        let count = counts.entry(name.clone()).or_insert(0);
        *count += 1;
        *count
    }

    /// Release one unit of demand; returns the new count. Releasing a name
    /// with no recorded demand is a bookkeeping error and is logged rather
    /// than underflowing.
    pub fn release(&self, name: &ServiceName) -> usize {
        let mut counts = self.counts.lock().expect("demand tracker lock poisoned");
        match counts.get_mut(name) {
            Some(count) if *count > 1 => {
                *count -= 1;
                *count
            }
            Some(_) => {
                counts.remove(name);
                0
            }
            None => {
                log::error!("demand released for '{}' which holds no demand", name);
                0
            }
        }
    }

    /// Current demand for a name (0 if none recorded).
    pub fn get(&self, name: &ServiceName) -> usize {
        self.counts
            .lock()
            .expect("demand tracker lock poisoned")
            .get(name)
            .copied()
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for DemandTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts = self.counts.lock().expect("demand tracker lock poisoned");
        f.debug_struct("DemandTracker")
            .field("entries", &counts.len())
            .finish()
    }
}
