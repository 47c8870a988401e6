//! In-memory counter backend.
//!
//! `MockBackend` exposes a configurable set of named events whose readings
//! are scripted up front. Each `read`/`stop` of an event takes the next
//! scripted value; the last value repeats once the script is exhausted.
//! Failures can be injected for init, event-set creation, start and read.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;

use crate::{check_buffer, Backend, CounterError, EventSetId};

struct MockSet {
    events: Vec<String>,
    running: bool,
}

/// Scripted counter backend
#[derive(Default)]
pub struct MockBackend {
    readings: HashMap<String, VecDeque<i64>>,
    sets: Vec<Option<MockSet>>,
    initialized: bool,
    fail_init: bool,
    fail_create: bool,
    fail_start: HashSet<String>,
    /// Successful reads left before each listed event starts failing
    fail_read: HashMap<String, usize>,
    init_calls: usize,
    shutdown_calls: usize,
    start_calls: usize,
    stop_calls: usize,
    destroy_calls: usize,
}

impl MockBackend {
    /// Creates a backend with no available events
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `name` available with the given sequence of readings
    pub fn with_event<I>(mut self, name: &str, readings: I) -> Self
    where
        I: IntoIterator<Item = i64>,
    {
        let mut script: VecDeque<i64> = readings.into_iter().collect();
        if script.is_empty() {
            script.push_back(0);
        }
        self.readings.insert(name.to_string(), script);
        self
    }

    /// Makes `init` fail
    pub fn fail_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Makes every `create_event_set` fail
    pub fn fail_create_event_set(mut self) -> Self {
        self.fail_create = true;
        self
    }

    /// Makes `start` fail for any event set containing `name`
    pub fn fail_start_of(mut self, name: &str) -> Self {
        self.fail_start.insert(name.to_string());
        self
    }

    /// Makes `read` fail for any event set containing `name`
    pub fn fail_read_of(self, name: &str) -> Self {
        self.fail_read_after(name, 0)
    }

    /// Lets `reads` reads of sets containing `name` succeed, then fails the rest
    pub fn fail_read_after(mut self, name: &str, reads: usize) -> Self {
        self.fail_read.insert(name.to_string(), reads);
        self
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls
    }

    pub fn destroy_calls(&self) -> usize {
        self.destroy_calls
    }

    /// Number of event sets that have not been destroyed
    pub fn live_sets(&self) -> usize {
        self.sets.iter().filter(|s| s.is_some()).count()
    }

    /// Names of the events in a live set, in insertion order
    pub fn events_in(&self, set: EventSetId) -> Option<Vec<String>> {
        self.sets
            .get(set.0)
            .and_then(|s| s.as_ref())
            .map(|s| s.events.clone())
    }

    fn ensure_initialized(&self) -> Result<(), CounterError> {
        if self.initialized {
            Ok(())
        } else {
            Err(CounterError::NotInitialized)
        }
    }

    fn set_mut(&mut self, set: EventSetId) -> Result<&mut MockSet, CounterError> {
        self.ensure_initialized()?;
        self.sets
            .get_mut(set.0)
            .and_then(|s| s.as_mut())
            .ok_or(CounterError::InvalidEventSet(set))
    }

    fn next_reading(&mut self, name: &str) -> i64 {
        match self.readings.get_mut(name) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap_or_default(),
            Some(script) => script.front().copied().unwrap_or_default(),
            None => 0,
        }
    }

    fn check_read(&mut self, set: EventSetId) -> Result<(), CounterError> {
        let events = self.set_mut(set)?.events.clone();
        for name in &events {
            if let Some(remaining) = self.fail_read.get_mut(name) {
                if *remaining == 0 {
                    return Err(CounterError::from_io(
                        format!("reading {name}"),
                        io::Error::from(io::ErrorKind::Other),
                    ));
                }
                *remaining -= 1;
            }
        }
        Ok(())
    }

    fn fill(&mut self, set: EventSetId, values: &mut [i64]) -> Result<(), CounterError> {
        let events = self.set_mut(set)?.events.clone();
        check_buffer(events.len(), values)?;
        for (slot, name) in values.iter_mut().zip(&events) {
            *slot = self.next_reading(name);
        }
        Ok(())
    }
}

impl Backend for MockBackend {
    fn init(&mut self) -> Result<(), CounterError> {
        self.init_calls += 1;
        if self.fail_init {
            return Err(CounterError::NotInitialized);
        }
        self.initialized = true;
        Ok(())
    }

    fn shutdown(&mut self) {
        self.shutdown_calls += 1;
        self.initialized = false;
        self.sets.clear();
    }

    fn create_event_set(&mut self) -> Result<EventSetId, CounterError> {
        self.ensure_initialized()?;
        if self.fail_create {
            return Err(CounterError::PermissionDenied("event set".to_string()));
        }
        self.sets.push(Some(MockSet {
            events: Vec::new(),
            running: false,
        }));
        Ok(EventSetId(self.sets.len() - 1))
    }

    fn add_named_event(&mut self, set: EventSetId, name: &str) -> Result<(), CounterError> {
        let available = self.readings.contains_key(name);
        let entry = self.set_mut(set)?;
        if entry.running {
            return Err(CounterError::AlreadyRunning(set));
        }
        if !available {
            return Err(CounterError::NoSuchEvent(name.to_string()));
        }
        entry.events.push(name.to_string());
        Ok(())
    }

    fn num_events(&self, set: EventSetId) -> Result<usize, CounterError> {
        self.ensure_initialized()?;
        self.sets
            .get(set.0)
            .and_then(|s| s.as_ref())
            .map(|s| s.events.len())
            .ok_or(CounterError::InvalidEventSet(set))
    }

    fn start(&mut self, set: EventSetId) -> Result<(), CounterError> {
        self.start_calls += 1;
        let fail_start = self.fail_start.clone();
        let entry = self.set_mut(set)?;
        if entry.running {
            return Err(CounterError::AlreadyRunning(set));
        }
        if let Some(name) = entry.events.iter().find(|e| fail_start.contains(*e)) {
            return Err(CounterError::PermissionDenied(name.clone()));
        }
        entry.running = true;
        Ok(())
    }

    fn read(&mut self, set: EventSetId, values: &mut [i64]) -> Result<(), CounterError> {
        if !self.set_mut(set)?.running {
            return Err(CounterError::NotRunning(set));
        }
        self.check_read(set)?;
        self.fill(set, values)
    }

    fn stop(&mut self, set: EventSetId, values: &mut [i64]) -> Result<(), CounterError> {
        self.stop_calls += 1;
        if !self.set_mut(set)?.running {
            return Err(CounterError::NotRunning(set));
        }
        self.fill(set, values)?;
        self.set_mut(set)?.running = false;
        Ok(())
    }

    fn destroy_event_set(&mut self, set: EventSetId) -> Result<(), CounterError> {
        self.set_mut(set)?;
        self.destroy_calls += 1;
        self.sets[set.0] = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn initialized(backend: MockBackend) -> MockBackend {
        let mut backend = backend;
        backend.init().unwrap();
        backend
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let mut backend = initialized(MockBackend::new().with_event("a", [1]));
        let set = backend.create_event_set().unwrap();

        assert!(matches!(
            backend.add_named_event(set, "b"),
            Err(CounterError::NoSuchEvent(_))
        ));
        backend.add_named_event(set, "a").unwrap();
        assert_eq!(backend.num_events(set).unwrap(), 1);
    }

    #[test]
    fn test_scripted_readings_repeat_last_value() {
        let mut backend = initialized(MockBackend::new().with_event("a", [10, 97]));
        let set = backend.create_event_set().unwrap();
        backend.add_named_event(set, "a").unwrap();
        backend.start(set).unwrap();

        let mut values = [0i64; 1];
        backend.read(set, &mut values).unwrap();
        assert_eq!(values, [10]);
        backend.read(set, &mut values).unwrap();
        assert_eq!(values, [97]);
        backend.stop(set, &mut values).unwrap();
        assert_eq!(values, [97]);
    }

    #[test]
    fn test_operations_require_init() {
        let mut backend = MockBackend::new();
        assert!(matches!(
            backend.create_event_set(),
            Err(CounterError::NotInitialized)
        ));
    }

    #[test]
    fn test_read_requires_running_set() {
        let mut backend = initialized(MockBackend::new().with_event("a", [1]));
        let set = backend.create_event_set().unwrap();
        backend.add_named_event(set, "a").unwrap();

        let mut values = [0i64; 1];
        assert!(matches!(
            backend.read(set, &mut values),
            Err(CounterError::NotRunning(_))
        ));
    }

    #[test]
    fn test_injected_read_failure() {
        let mut backend = initialized(
            MockBackend::new()
                .with_event("a", [1, 2])
                .fail_read_after("a", 1),
        );
        let set = backend.create_event_set().unwrap();
        backend.add_named_event(set, "a").unwrap();
        backend.start(set).unwrap();

        let mut values = [0i64; 1];
        backend.read(set, &mut values).unwrap();
        assert_eq!(values, [1]);
        assert!(matches!(
            backend.read(set, &mut values),
            Err(CounterError::Os { .. })
        ));
        // Halting still works after a failed read
        backend.stop(set, &mut values).unwrap();
        assert_eq!(values, [2]);
    }

    #[test]
    fn test_destroyed_set_is_invalid() {
        let mut backend = initialized(MockBackend::new());
        let set = backend.create_event_set().unwrap();
        backend.destroy_event_set(set).unwrap();

        assert_eq!(backend.live_sets(), 0);
        assert!(matches!(
            backend.destroy_event_set(set),
            Err(CounterError::InvalidEventSet(_))
        ));
        assert_eq!(backend.destroy_calls(), 1);
    }
}
