use std::time::Duration;

/// Tunables of one container instance, passed explicitly to the constructor.
/// There is no global container; tests build as many independent instances
/// as they need.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Size of the transition worker pool.
    pub worker_count: usize,
    /// How long a `STARTING` node may wait for asynchronous completion
    /// before the start is failed with a timeout cause.
    pub start_timeout: Duration,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        ContainerConfig {
            worker_count: 4,
            start_timeout: Duration::from_secs(30),
        }
    }
}

impl ContainerConfig {
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    pub fn start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }
}
