//! # counters
//!
//! Event-set access to hardware counters. A [`Backend`] exposes counters by
//! name and groups them into event sets that are started, read and stopped
//! together, the same shape as the PAPI event-set API:
//!
//! - [`SystemBackend`] reads CPU cycles and instructions through
//!   `perf_event_open`, RAPL energy through powercap, and AMD GPU sensors
//!   through the amdgpu sysfs/hwmon interface.
//! - [`MockBackend`] is an in-memory backend with scripted readings.
//!
//! A backend has process-wide init/shutdown state, so it is always used
//! through a [`CounterLibrary`], which initializes it on first use and shuts
//! it down when the last [`LibraryGuard`] goes away.

mod event_name;
#[cfg(target_os = "linux")]
mod helpers;
mod library;
pub mod mock;
mod sysfs;
mod system;

pub use event_name::*;
#[cfg(target_os = "linux")]
pub use helpers::*;
pub use library::*;
pub use mock::MockBackend;
pub use system::*;

use std::io;
use thiserror::Error;

/// Errors reported by a counter backend
#[derive(Error, Debug)]
pub enum CounterError {
    /// The named event does not exist on this machine
    #[error("no such event: {0}")]
    NoSuchEvent(String),

    /// The event set handle is unknown or was destroyed
    #[error("invalid event set {0}")]
    InvalidEventSet(EventSetId),

    /// The event set is already counting
    #[error("event set {0} is already running")]
    AlreadyRunning(EventSetId),

    /// The event set is not counting
    #[error("event set {0} is not running")]
    NotRunning(EventSetId),

    /// The caller's value buffer cannot hold one value per event
    #[error("value buffer holds {got} values, event set has {needed}")]
    BufferTooSmall { needed: usize, got: usize },

    /// The backend was used before `init` or after `shutdown`
    #[error("counter library is not initialized")]
    NotInitialized,

    /// The kernel refused access to the counter
    #[error("permission denied for {0}")]
    PermissionDenied(String),

    /// An event name could not be parsed
    #[error("malformed event name {name:?}: {reason}")]
    Parse { name: String, reason: String },

    /// Any other OS-level failure
    #[error("{context}: {source}")]
    Os {
        context: String,
        source: io::Error,
    },
}

impl CounterError {
    /// Wraps an io error, mapping `EACCES`/`EPERM` to `PermissionDenied`
    pub fn from_io(context: impl Into<String>, source: io::Error) -> Self {
        let context = context.into();
        match source.kind() {
            io::ErrorKind::PermissionDenied => CounterError::PermissionDenied(context),
            io::ErrorKind::NotFound => CounterError::NoSuchEvent(context),
            _ => CounterError::Os { context, source },
        }
    }
}

/// Handle to an event set created by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventSetId(pub usize);

impl std::fmt::Display for EventSetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A counter subsystem organised around event sets.
///
/// Values are positional: `read` and `stop` fill `values[i]` with the i-th
/// event added to the set.
pub trait Backend {
    /// Initialize process-wide state. Called once per library lifetime.
    fn init(&mut self) -> Result<(), CounterError>;

    /// Release process-wide state and every remaining event set
    fn shutdown(&mut self);

    /// Create an empty event set
    fn create_event_set(&mut self) -> Result<EventSetId, CounterError>;

    /// Add a named event to a stopped event set
    fn add_named_event(&mut self, set: EventSetId, name: &str) -> Result<(), CounterError>;

    /// Number of events in the set
    fn num_events(&self, set: EventSetId) -> Result<usize, CounterError>;

    /// Start counting
    fn start(&mut self, set: EventSetId) -> Result<(), CounterError>;

    /// Read current values without stopping
    fn read(&mut self, set: EventSetId, values: &mut [i64]) -> Result<(), CounterError>;

    /// Stop counting and return the final values
    fn stop(&mut self, set: EventSetId, values: &mut [i64]) -> Result<(), CounterError>;

    /// Release the event set and all its events
    fn destroy_event_set(&mut self, set: EventSetId) -> Result<(), CounterError>;
}

pub(crate) fn check_buffer(needed: usize, values: &[i64]) -> Result<(), CounterError> {
    if values.len() < needed {
        return Err(CounterError::BufferTooSmall {
            needed,
            got: values.len(),
        });
    }
    Ok(())
}
