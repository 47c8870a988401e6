//! # telemetry
//!
//! Measures hardware counters around a region of code and reports power,
//! energy, frequency and IPC.
//!
//! Counters that a machine does not have are skipped, not treated as errors:
//! registration keeps whatever subset of the [`Catalog`] is available, the
//! session brackets only the groups that registered, and the report leaves
//! out every group that was never measured.
//!
//! ```
//! use counters::{CounterLibrary, MockBackend};
//! use telemetry::{report, Catalog, MonitoringSession};
//!
//! let backend = MockBackend::new()
//!     .with_event("PAPI_TOT_CYC", [0, 3_000_000])
//!     .with_event("PAPI_TOT_INS", [0, 6_000_000]);
//! let library = CounterLibrary::new(backend);
//! let mut session = MonitoringSession::open(&library, &Catalog::default()).unwrap();
//!
//! let (checksum, metrics) = session.measure(|| (1..=10u64).sum::<u64>());
//! assert_eq!(checksum, 55);
//!
//! let metrics = metrics.unwrap();
//! assert_eq!(metrics.perf.instructions_per_cycle, Some(2.0));
//! println!("{}", report::render(&metrics));
//! ```

pub mod catalog;
pub mod delta;
pub mod registry;
pub mod report;
pub mod session;
pub mod snapshot;

pub use catalog::{Catalog, CatalogConfig, CounterId, CounterSpec, GroupKind, Requirement, Unit};
pub use delta::{compute, DerivedMetrics, EnergyMetrics, PerfMetrics};
pub use registry::{register_all, CounterGroup, RegisteredCounter, RegistrationResult};
pub use report::ReportContext;
pub use session::{MonitoringSession, SessionError};
pub use snapshot::{BracketReadings, GroupReading, Snapshot};
