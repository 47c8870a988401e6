//! Counter registration.
//!
//! [`register_all`] walks the catalog one group at a time: it creates an
//! event set for the group, tries each spec's primary identifier and then its
//! fallback, and keeps the group only if it meets its [`Requirement`]. A
//! failure never stops registration of the remaining specs or groups.

use counters::{Backend, CounterError, EventSetId, LibraryGuard};
use log::{info, warn};

use crate::catalog::{Catalog, CounterSpec, GroupKind, Requirement};

/// A spec and the identifier that registered it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredCounter {
    pub spec: CounterSpec,
    pub identifier: String,
}

/// A usable group of registered counters sharing one event set.
///
/// `counters` is in event-set order; snapshot values line up with it by
/// position.
#[derive(Debug)]
pub struct CounterGroup {
    kind: GroupKind,
    event_set: EventSetId,
    counters: Vec<RegisteredCounter>,
}

impl CounterGroup {
    pub fn kind(&self) -> GroupKind {
        self.kind
    }

    pub fn event_set(&self) -> EventSetId {
        self.event_set
    }

    pub fn counters(&self) -> &[RegisteredCounter] {
        &self.counters
    }

    pub fn registered_count(&self) -> usize {
        self.counters.len()
    }
}

/// Why a group is not usable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unavailable {
    /// The catalog has no spec for the group
    NotRequested,
    /// The backend could not create an event set
    EventSet(String),
    /// Too few counters registered
    Insufficient { registered: usize, required: usize },
}

impl std::fmt::Display for Unavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unavailable::NotRequested => write!(f, "no counters requested"),
            Unavailable::EventSet(reason) => write!(f, "event set creation failed: {reason}"),
            Unavailable::Insufficient {
                registered,
                required,
            } => write!(f, "insufficient counters: {registered}/{required}"),
        }
    }
}

/// Outcome of registering the whole catalog
#[derive(Debug, Default)]
pub struct RegistrationResult {
    groups: Vec<CounterGroup>,
    unavailable: Vec<(GroupKind, Unavailable)>,
}

impl RegistrationResult {
    /// Usable groups in registration order
    pub fn groups(&self) -> &[CounterGroup] {
        &self.groups
    }

    pub fn group(&self, kind: GroupKind) -> Option<&CounterGroup> {
        self.groups.iter().find(|g| g.kind == kind)
    }

    pub fn is_active(&self, kind: GroupKind) -> bool {
        self.group(kind).is_some()
    }

    pub fn any_active(&self) -> bool {
        !self.groups.is_empty()
    }

    /// Groups that could not be used, with the reason
    pub fn unavailable(&self) -> &[(GroupKind, Unavailable)] {
        &self.unavailable
    }

    pub(crate) fn into_groups(self) -> Vec<CounterGroup> {
        self.groups
    }

    /// One line per group describing what is available
    pub fn summary(&self) -> Vec<String> {
        GroupKind::ALL
            .iter()
            .map(|&kind| match self.group(kind) {
                Some(group) => {
                    let names: Vec<&str> = group
                        .counters
                        .iter()
                        .map(|c| c.spec.id.logical_name())
                        .collect();
                    format!("{kind}: {}", names.join(", "))
                }
                None => {
                    let reason = self
                        .unavailable
                        .iter()
                        .find(|(k, _)| *k == kind)
                        .map(|(_, reason)| reason.to_string())
                        .unwrap_or_else(|| "unavailable".to_string());
                    format!("{kind}: unavailable ({reason})")
                }
            })
            .collect()
    }
}

/// Registers every group of the catalog against the guarded backend
pub fn register_all<B: Backend>(guard: &LibraryGuard<B>, catalog: &Catalog) -> RegistrationResult {
    let mut backend = guard.backend_mut();
    let mut result = RegistrationResult::default();

    for kind in GroupKind::ALL {
        let specs: Vec<&CounterSpec> = catalog.group(kind).collect();
        match register_group(&mut *backend, kind, &specs) {
            Ok(group) => {
                info!(
                    "{} counters initialized ({} events)",
                    kind,
                    group.registered_count()
                );
                result.groups.push(group);
            }
            Err(reason) => {
                warn!("{} counters unavailable: {}", kind, reason);
                result.unavailable.push((kind, reason));
            }
        }
    }

    result
}

fn register_group<B: Backend + ?Sized>(
    backend: &mut B,
    kind: GroupKind,
    specs: &[&CounterSpec],
) -> Result<CounterGroup, Unavailable> {
    if specs.is_empty() {
        return Err(Unavailable::NotRequested);
    }

    let event_set = backend
        .create_event_set()
        .map_err(|e| Unavailable::EventSet(e.to_string()))?;

    let counters: Vec<RegisteredCounter> = specs
        .iter()
        .filter_map(|spec| register_spec(backend, event_set, spec))
        .collect();

    let required = match kind.requirement() {
        Requirement::AtLeastOne => 1,
        Requirement::All => specs.len(),
    };

    if counters.len() < required {
        if let Err(e) = backend.destroy_event_set(event_set) {
            warn!("Could not release {} event set: {}", kind, e);
        }
        return Err(Unavailable::Insufficient {
            registered: counters.len(),
            required,
        });
    }

    Ok(CounterGroup {
        kind,
        event_set,
        counters,
    })
}

/// Tries the primary identifier, then the fallback. At most one registers.
fn register_spec<B: Backend + ?Sized>(
    backend: &mut B,
    event_set: EventSetId,
    spec: &CounterSpec,
) -> Option<RegisteredCounter> {
    for identifier in spec.identifiers() {
        info!("Attempting to add {} ({})", spec.id.label(), identifier);
        match backend.add_named_event(event_set, identifier) {
            Ok(()) => {
                info!("Added {} event {}", spec.id.label(), identifier);
                return Some(RegisteredCounter {
                    spec: spec.clone(),
                    identifier: identifier.to_string(),
                });
            }
            Err(e) => log_add_failure(spec, identifier, &e),
        }
    }
    None
}

fn log_add_failure(spec: &CounterSpec, identifier: &str, err: &CounterError) {
    warn!(
        "Could not add {} event {}: {}",
        spec.id.label(),
        identifier,
        err
    );
}
