//! Measurement brackets over registered counter groups.
//!
//! A [`MonitoringSession`] owns the groups produced by registration and one
//! use of the counter library. `start()` and `stop()` bracket a workload;
//! `teardown()` (or dropping the session) releases the event sets and the
//! library use. Groups that fail to start are skipped for that bracket only.

use std::rc::Rc;
use std::time::Instant;

use counters::{Backend, CounterError, CounterLibrary, LibraryGuard};
use log::{error, info, warn};
use thiserror::Error;

use crate::catalog::Catalog;
use crate::delta::{self, DerivedMetrics};
use crate::registry::{self, CounterGroup, RegistrationResult};
use crate::snapshot::{BracketReadings, GroupReading, Snapshot};

/// Misuse of a session
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("stop() called without a matching start()")]
    NotStarted,

    #[error("start() called while a measurement is already running")]
    AlreadyStarted,

    #[error("monitoring session has been torn down")]
    TornDown,
}

struct Bracket {
    started_at: Instant,
    /// Index into the session's groups, with the group's "before" snapshot
    before: Vec<(usize, Snapshot)>,
}

/// Start/stop control over a set of counter groups
pub struct MonitoringSession<B: Backend> {
    guard: Option<LibraryGuard<B>>,
    groups: Vec<CounterGroup>,
    bracket: Option<Bracket>,
}

impl<B: Backend> MonitoringSession<B> {
    /// Acquires the library and registers the catalog
    ///
    /// # Errors
    ///
    /// Fails only when the library itself cannot be initialized. Missing
    /// counters are not errors; they leave their groups inactive.
    pub fn open(library: &Rc<CounterLibrary<B>>, catalog: &Catalog) -> Result<Self, CounterError> {
        let guard = library.acquire()?;
        let registration = registry::register_all(&guard, catalog);
        Ok(Self::new(guard, registration))
    }

    /// Builds a session from a registration made with the same guard
    pub fn new(guard: LibraryGuard<B>, registration: RegistrationResult) -> Self {
        Self {
            guard: Some(guard),
            groups: registration.into_groups(),
            bracket: None,
        }
    }

    /// Groups available to the next bracket. Empty after teardown.
    pub fn groups(&self) -> &[CounterGroup] {
        &self.groups
    }

    pub fn is_running(&self) -> bool {
        self.bracket.is_some()
    }

    pub fn is_torn_down(&self) -> bool {
        self.guard.is_none()
    }

    /// Starts every group and takes the "before" snapshots
    pub fn start(&mut self) -> Result<(), SessionError> {
        let Some(guard) = self.guard.as_ref() else {
            error!("Cannot start measurement: {}", SessionError::TornDown);
            return Err(SessionError::TornDown);
        };
        if self.bracket.is_some() {
            error!("Cannot start measurement: {}", SessionError::AlreadyStarted);
            return Err(SessionError::AlreadyStarted);
        }

        let mut backend = guard.backend_mut();
        let mut before = Vec::with_capacity(self.groups.len());
        for (index, group) in self.groups.iter().enumerate() {
            if let Err(e) = backend.start(group.event_set()) {
                warn!(
                    "Could not start {} counters, skipping them for this measurement: {}",
                    group.kind(),
                    e
                );
                continue;
            }
            match read_snapshot(&mut *backend, group) {
                Ok(snapshot) => before.push((index, snapshot)),
                Err(e) => {
                    warn!(
                        "Could not read {} counters, skipping them for this measurement: {}",
                        group.kind(),
                        e
                    );
                    halt(&mut *backend, group);
                }
            }
        }

        info!("Measurement started ({} groups)", before.len());
        self.bracket = Some(Bracket {
            started_at: Instant::now(),
            before,
        });
        Ok(())
    }

    /// Snapshots of the running groups, without stopping them
    pub fn read(&mut self) -> Result<Vec<Snapshot>, SessionError> {
        let Some(guard) = self.guard.as_ref() else {
            error!("Cannot read counters: {}", SessionError::TornDown);
            return Err(SessionError::TornDown);
        };
        let Some(bracket) = self.bracket.as_ref() else {
            error!("Cannot read counters: no measurement is running");
            return Err(SessionError::NotStarted);
        };

        let mut backend = guard.backend_mut();
        let mut snapshots = Vec::with_capacity(bracket.before.len());
        for (index, _) in &bracket.before {
            let group = &self.groups[*index];
            match read_snapshot(&mut *backend, group) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!("Could not read {} counters: {}", group.kind(), e),
            }
        }
        Ok(snapshots)
    }

    /// Takes the "after" snapshots, then halts the counters.
    /// Registrations stay in place for the next bracket.
    pub fn stop(&mut self) -> Result<BracketReadings, SessionError> {
        let Some(bracket) = self.bracket.take() else {
            error!("Cannot stop measurement: {}", SessionError::NotStarted);
            return Err(SessionError::NotStarted);
        };
        let guard = self.guard.as_ref().ok_or(SessionError::TornDown)?;

        let stopped_at = Instant::now();
        let mut backend = guard.backend_mut();
        let mut groups = Vec::with_capacity(bracket.before.len());
        for (index, before) in bracket.before {
            let group = &self.groups[index];
            let after = read_snapshot(&mut *backend, group);
            halt(&mut *backend, group);
            match after {
                Ok(after) => groups.push(GroupReading {
                    kind: group.kind(),
                    counters: group.counters().to_vec(),
                    before,
                    after,
                }),
                Err(e) => warn!("Could not read {} counters: {}", group.kind(), e),
            }
        }

        info!("Measurement stopped");
        Ok(BracketReadings {
            elapsed: stopped_at.saturating_duration_since(bracket.started_at),
            groups,
        })
    }

    /// Runs `workload` inside a bracket.
    ///
    /// The workload's value is returned untouched. Metrics are `None` when
    /// the bracket could not be opened; the workload runs regardless.
    pub fn measure<T, F>(&mut self, workload: F) -> (T, Option<DerivedMetrics>)
    where
        F: FnOnce() -> T,
    {
        let started = self.start().is_ok();
        let output = workload();
        let metrics = if started {
            self.stop().ok().map(|readings| delta::compute(&readings))
        } else {
            None
        };
        (output, metrics)
    }

    /// Halts a running bracket, destroys every event set and releases the
    /// library. Repeated calls only log a notice.
    pub fn teardown(&mut self) {
        let Some(guard) = self.guard.take() else {
            info!("Monitoring session already torn down");
            return;
        };

        {
            let mut backend = guard.backend_mut();
            if let Some(bracket) = self.bracket.take() {
                warn!("Tearing down with a measurement in progress");
                for (index, _) in bracket.before {
                    halt(&mut *backend, &self.groups[index]);
                }
            }
            for group in self.groups.drain(..) {
                if let Err(e) = backend.destroy_event_set(group.event_set()) {
                    warn!("Could not release {} counters: {}", group.kind(), e);
                }
            }
        }

        drop(guard);
        info!("Monitoring session torn down");
    }
}

impl<B: Backend> Drop for MonitoringSession<B> {
    fn drop(&mut self) {
        if !self.is_torn_down() {
            self.teardown();
        }
    }
}

fn read_snapshot<B: Backend + ?Sized>(
    backend: &mut B,
    group: &CounterGroup,
) -> Result<Snapshot, CounterError> {
    let mut values = vec![0i64; group.registered_count()];
    backend.read(group.event_set(), &mut values)?;
    Ok(Snapshot::new(group.kind(), values, Instant::now()))
}

fn halt<B: Backend + ?Sized>(backend: &mut B, group: &CounterGroup) {
    let mut scratch = vec![0i64; group.registered_count()];
    if let Err(e) = backend.stop(group.event_set(), &mut scratch) {
        warn!("Could not stop {} counters: {}", group.kind(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::GroupKind;
    use counters::MockBackend;

    const BUSY: &str = "rocm_smi:::busy_percent:device=0";
    const POWER: &str = "rocm_smi:::power_average:device=0:sensor=0";

    fn session(
        backend: MockBackend,
    ) -> (Rc<CounterLibrary<MockBackend>>, MonitoringSession<MockBackend>) {
        let library = CounterLibrary::new(backend);
        let session = MonitoringSession::open(&library, &Catalog::default()).unwrap();
        (library, session)
    }

    fn gpu_backend() -> MockBackend {
        MockBackend::new()
            .with_event(BUSY, [10, 97])
            .with_event(POWER, [5_000_000, 50_000_000])
    }

    #[test]
    fn test_bracket_captures_before_and_after() {
        let (_library, mut session) = session(gpu_backend());

        session.start().unwrap();
        assert!(session.is_running());
        let readings = session.stop().unwrap();

        assert_eq!(readings.groups.len(), 1);
        let gpu = &readings.groups[0];
        assert_eq!(gpu.kind, GroupKind::Gpu);
        assert_eq!(gpu.before.values, vec![10, 5_000_000]);
        assert_eq!(gpu.after.values, vec![97, 50_000_000]);
        assert!(!session.is_running());
    }

    #[test]
    fn test_stop_without_start_is_a_usage_error() {
        let (_library, mut session) = session(gpu_backend());

        assert_eq!(session.stop().unwrap_err(), SessionError::NotStarted);
    }

    #[test]
    fn test_nested_start_is_rejected() {
        let (library, mut session) = session(gpu_backend());

        session.start().unwrap();
        assert_eq!(session.start().unwrap_err(), SessionError::AlreadyStarted);
        assert_eq!(library.backend().start_calls(), 1);
    }

    #[test]
    fn test_group_start_failure_demotes_for_this_bracket_only() {
        let backend = gpu_backend()
            .with_event("PAPI_TOT_CYC", [0, 100])
            .with_event("PAPI_TOT_INS", [0, 50])
            .fail_start_of(BUSY);
        let (_library, mut session) = session(backend);

        session.start().unwrap();
        let readings = session.stop().unwrap();

        let kinds: Vec<GroupKind> = readings.groups.iter().map(|g| g.kind).collect();
        assert_eq!(kinds, vec![GroupKind::CpuPerf]);
        // Registration is untouched
        assert_eq!(session.groups().len(), 2);
    }

    #[test]
    fn test_first_read_failure_demotes_for_this_bracket_only() {
        let backend = gpu_backend()
            .with_event("PAPI_TOT_CYC", [0, 100])
            .with_event("PAPI_TOT_INS", [0, 50])
            .fail_read_of(BUSY);
        let (library, mut session) = session(backend);

        session.start().unwrap();
        // The GPU set started, so it is halted straight away
        assert_eq!(library.backend().start_calls(), 2);
        assert_eq!(library.backend().stop_calls(), 1);
        let readings = session.stop().unwrap();

        let kinds: Vec<GroupKind> = readings.groups.iter().map(|g| g.kind).collect();
        assert_eq!(kinds, vec![GroupKind::CpuPerf]);
        assert_eq!(library.backend().stop_calls(), 2);
        assert_eq!(session.groups().len(), 2);
    }

    #[test]
    fn test_final_read_failure_drops_group_from_bracket() {
        testing_logger::setup();
        let (library, mut session) = session(gpu_backend().fail_read_after(BUSY, 1));

        session.start().unwrap();
        let readings = session.stop().unwrap();

        assert!(readings.groups.is_empty());
        assert_eq!(library.backend().stop_calls(), 1);
        assert_eq!(session.groups().len(), 1);
        assert!(!session.is_running());

        testing_logger::validate(|captured_logs| {
            let warnings: Vec<_> = captured_logs
                .iter()
                .filter(|l| l.level == log::Level::Warn)
                .filter(|l| l.body.starts_with("Could not read GPU counters"))
                .collect();
            assert_eq!(warnings.len(), 1);
        });
    }

    #[test]
    fn test_no_active_groups_is_a_no_op() {
        let (library, mut session) = session(MockBackend::new());

        session.start().unwrap();
        let readings = session.stop().unwrap();

        assert!(readings.groups.is_empty());
        assert_eq!(library.backend().start_calls(), 0);
        assert_eq!(library.backend().stop_calls(), 0);
    }

    #[test]
    fn test_teardown_is_idempotent() {
        testing_logger::setup();
        let (library, mut session) = session(gpu_backend());
        // Registration already released the unusable energy and perf sets
        let destroyed = library.backend().destroy_calls();

        session.teardown();
        assert!(session.groups().is_empty());
        assert_eq!(library.backend().destroy_calls(), destroyed + 1);
        assert_eq!(library.backend().shutdown_calls(), 1);

        session.teardown();
        assert!(session.groups().is_empty());
        assert_eq!(library.backend().destroy_calls(), destroyed + 1);
        assert_eq!(library.backend().shutdown_calls(), 1);

        testing_logger::validate(|captured_logs| {
            let notices: Vec<_> = captured_logs
                .iter()
                .filter(|l| l.body == "Monitoring session already torn down")
                .collect();
            assert_eq!(notices.len(), 1);
            assert_eq!(notices[0].level, log::Level::Info);
        });
    }

    #[test]
    fn test_torn_down_session_rejects_brackets() {
        let (_library, mut session) = session(gpu_backend());
        session.teardown();

        assert_eq!(session.start().unwrap_err(), SessionError::TornDown);
        assert_eq!(session.stop().unwrap_err(), SessionError::NotStarted);
    }

    #[test]
    fn test_read_after_teardown_is_logged() {
        testing_logger::setup();
        let (_library, mut session) = session(gpu_backend());
        session.teardown();

        assert_eq!(session.read().unwrap_err(), SessionError::TornDown);
        testing_logger::validate(|captured_logs| {
            let errors: Vec<_> = captured_logs
                .iter()
                .filter(|l| l.level == log::Level::Error)
                .collect();
            assert_eq!(errors.len(), 1);
            assert_eq!(
                errors[0].body,
                "Cannot read counters: monitoring session has been torn down"
            );
        });
    }

    #[test]
    fn test_drop_halts_running_bracket_and_releases() {
        let (library, mut session) = session(gpu_backend());
        session.start().unwrap();

        drop(session);

        assert_eq!(library.backend().stop_calls(), 1);
        assert_eq!(library.users(), 0);
        assert_eq!(library.backend().shutdown_calls(), 1);
    }

    #[test]
    fn test_sessions_share_one_library_initialization() {
        let library = CounterLibrary::new(gpu_backend());
        let mut first = MonitoringSession::open(&library, &Catalog::default()).unwrap();
        let second = MonitoringSession::open(&library, &Catalog::default()).unwrap();

        assert_eq!(library.backend().init_calls(), 1);
        first.teardown();
        assert_eq!(library.backend().shutdown_calls(), 0);
        drop(second);
        assert_eq!(library.backend().shutdown_calls(), 1);
    }

    #[test]
    fn test_measure_passes_workload_value_through() {
        let (_library, mut session) = session(gpu_backend());

        let (value, metrics) = session.measure(|| Err::<u64, &str>("workload failed"));

        assert_eq!(value, Err("workload failed"));
        let metrics = metrics.unwrap();
        assert_eq!(metrics.groups[0].counters[0].raw_delta, 87);
        assert!(!session.is_running());
    }

    #[test]
    fn test_mid_bracket_read() {
        let backend = MockBackend::new().with_event(BUSY, [1, 2, 3]);
        let (_library, mut session) = session(backend);

        session.start().unwrap();
        let snapshots = session.read().unwrap();
        assert_eq!(snapshots[0].values, vec![2]);
        let readings = session.stop().unwrap();
        assert_eq!(readings.groups[0].after.values, vec![3]);
    }
}
