//! Transition scheduler: a fixed-size worker pool draining a queue of
//! `(node, transition kind)` work items.
//!
//! The scheduler is deliberately dumb: it owns the queue and the workers and
//! hands every claimed task to the runtime handler, which re-verifies the
//! node's state before doing anything (a task can go stale while queued).
//! Independent subgraphs therefore progress in parallel, bounded only by the
//! worker count.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Mutex; // Workers share one receiver behind tokio's Mutex
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::controller::state::{ServiceName, ServiceState};

/// Kind of transition work queued for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Start,
    Stop,
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionKind::Start => write!(f, "start"),
            TransitionKind::Stop => write!(f, "stop"),
        }
    }
}

/// One queued unit of transition work.
///
/// `expected` is the source state the node was in when the task was queued;
/// a worker drops the task if the node has moved on since.
#[derive(Debug, Clone)]
pub struct TransitionTask {
    pub name: ServiceName,
    pub kind: TransitionKind,
    pub expected: ServiceState,
}

/// Handler the runtime installs to execute claimed tasks.
pub type TaskHandler =
    Arc<dyn Fn(TransitionTask) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// The worker pool and its task queue.
pub struct Scheduler {
    tx: mpsc::UnboundedSender<TransitionTask>,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn `worker_count` workers feeding `handler`. Must be called from
    /// within a Tokio runtime.
    pub fn new(worker_count: usize, handler: TaskHandler) -> Self {
        let worker_count = worker_count.max(1);
        let (tx, rx) = mpsc::unbounded_channel::<TransitionTask>();
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..worker_count)
            .map(|index| {
                let rx = Arc::clone(&rx);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    loop {
                        // Lock only to claim the next task, never while
                        // executing one, so the rest of the pool keeps
                        // draining the queue.
                        let task = { rx.lock().await.recv().await };
                        match task {
                            Some(task) => {
                                log::trace!(
                                    "worker {} claimed {} task for '{}'",
                                    index,
                                    task.kind,
                                    task.name
                                );
                                handler(task).await;
                            }
                            None => break,
                        }
                    }
                    log::trace!("scheduler worker {} finished", index);
                })
            })
            .collect();

        Scheduler { tx, workers }
    }

    /// Queue a transition task. Silently dropped after shutdown; the guard
    /// in the handler makes a lost stale task harmless.
    pub fn submit(&self, task: TransitionTask) {
        log::trace!("queueing {} task for '{}'", task.kind, task.name);
        let _ = self.tx.send(task);
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("workers", &self.workers.len())
            .finish()
    }
}
