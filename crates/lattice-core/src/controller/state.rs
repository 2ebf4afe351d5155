use std::fmt;
use std::sync::Arc;

/// Hierarchical identifier of a service node.
///
/// Names are cheap to clone and compare; segments are joined with `.` so a
/// subsystem can namespace its services (`jdbc.datasource.main`). A name is
/// immutable once a node has been registered under it.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceName(Arc<str>);

impl ServiceName {
    /// Create a name from a string.
    pub fn new(name: impl AsRef<str>) -> Self {
        ServiceName(Arc::from(name.as_ref()))
    }

    /// Create a child name by appending a segment.
    pub fn append(&self, segment: impl AsRef<str>) -> Self {
        ServiceName(Arc::from(format!("{}.{}", self.0, segment.as_ref())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceName({})", self.0)
    }
}

impl From<&str> for ServiceName {
    fn from(s: &str) -> Self {
        ServiceName::new(s)
    }
}

impl From<String> for ServiceName {
    fn from(s: String) -> Self {
        ServiceName(Arc::from(s))
    }
}

/// Activation policy of a service node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Start as soon as all required dependencies are up.
    Active,
    /// Start only while at least one dependent demands the node.
    Passive,
    /// Start only while at least one dependent demands the node.
    OnDemand,
    /// Never start; force a stop if currently up.
    Never,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::Active => "ACTIVE",
            Mode::Passive => "PASSIVE",
            Mode::OnDemand => "ON_DEMAND",
            Mode::Never => "NEVER",
        };
        write!(f, "{}", s)
    }
}

/// Lifecycle state of a service node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Idle; not running and not trying to run.
    Down,
    /// Start behavior is executing (or awaiting async completion).
    Starting,
    /// Running; the service value is available to dependents.
    Up,
    /// A stop has been decided but dependents are still winding down.
    StopRequested,
    /// Stop behavior is executing.
    Stopping,
    /// The last start attempt failed; parked until reset or re-trigger.
    StartFailed,
    /// Wants to start but a required dependency is missing or not up.
    Waiting,
    /// Being unlinked from the graph.
    Removing,
    /// Gone; the name may be registered again.
    Removed,
}

impl ServiceState {
    /// True while the node holds or is acquiring runtime resources.
    /// A dependency may not stop while any required dependent is active.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ServiceState::Starting
                | ServiceState::Up
                | ServiceState::StopRequested
                | ServiceState::Stopping
        )
    }

    /// True for states a node can leave toward `Starting`.
    pub fn is_restartable(&self) -> bool {
        matches!(self, ServiceState::Down | ServiceState::Waiting)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::Down => "DOWN",
            ServiceState::Starting => "STARTING",
            ServiceState::Up => "UP",
            ServiceState::StopRequested => "STOP_REQUESTED",
            ServiceState::Stopping => "STOPPING",
            ServiceState::StartFailed => "START_FAILED",
            ServiceState::Waiting => "WAITING",
            ServiceState::Removing => "REMOVING",
            ServiceState::Removed => "REMOVED",
        };
        write!(f, "{}", s)
    }
}
