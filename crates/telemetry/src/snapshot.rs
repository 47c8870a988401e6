use std::time::{Duration, Instant};

use crate::catalog::GroupKind;
use crate::registry::RegisteredCounter;

/// Raw values of one group at one point in time.
///
/// `values[i]` belongs to the i-th registered counter of the group.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub kind: GroupKind,
    pub values: Vec<i64>,
    pub taken_at: Instant,
}

impl Snapshot {
    pub fn new(kind: GroupKind, values: Vec<i64>, taken_at: Instant) -> Self {
        Self {
            kind,
            values,
            taken_at,
        }
    }
}

/// Before/after snapshots of one group over a bracket
#[derive(Debug, Clone)]
pub struct GroupReading {
    pub kind: GroupKind,
    pub counters: Vec<RegisteredCounter>,
    pub before: Snapshot,
    pub after: Snapshot,
}

/// Everything a stopped bracket measured
#[derive(Debug, Clone)]
pub struct BracketReadings {
    /// Time between the last "before" and the first "after" snapshot
    pub elapsed: Duration,
    /// Groups that stayed active for the whole bracket
    pub groups: Vec<GroupReading>,
}
