//! Counter deltas and derived metrics.
//!
//! Every derived value is an `Option`: `None` means "not measured", which the
//! report keeps apart from a measured zero. Divisions are guarded, so no
//! metric is ever infinite or NaN.

use std::time::Duration;

use log::{error, warn};
use thiserror::Error;

use crate::catalog::{CounterId, GroupKind, Unit};
use crate::registry::RegisteredCounter;
use crate::snapshot::{BracketReadings, Snapshot};

/// A snapshot pair that cannot be matched against its counters
#[derive(Error, Debug, PartialEq)]
pub enum DeltaError {
    #[error("{kind} snapshots hold {before} and {after} values for {expected} counters")]
    LayoutMismatch {
        kind: GroupKind,
        expected: usize,
        before: usize,
        after: usize,
    },

    #[error("snapshot of {before} group paired with snapshot of {after} group")]
    GroupMismatch { before: GroupKind, after: GroupKind },
}

/// Change of one counter over the bracket
#[derive(Debug, Clone, PartialEq)]
pub struct CounterDelta {
    pub id: CounterId,
    pub identifier: String,
    pub raw_delta: i64,
}

impl CounterDelta {
    pub fn unit(&self) -> Unit {
        self.id.unit()
    }

    /// Delta in display units
    pub fn value(&self) -> f64 {
        self.unit().convert(self.raw_delta)
    }
}

/// Deltas of one group, in registration order
#[derive(Debug, Clone, PartialEq)]
pub struct GroupMetrics {
    pub kind: GroupKind,
    pub counters: Vec<CounterDelta>,
}

impl GroupMetrics {
    pub fn delta(&self, id: CounterId) -> Option<&CounterDelta> {
        self.counters.iter().find(|c| c.id == id)
    }
}

/// Energy totals and average power
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct EnergyMetrics {
    pub package_joules: Option<f64>,
    pub dram_joules: Option<f64>,
    pub total_joules: Option<f64>,
    pub package_watts: Option<f64>,
    pub dram_watts: Option<f64>,
    pub total_watts: Option<f64>,
}

/// Rates derived from cycles and instructions
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct PerfMetrics {
    pub frequency_ghz: Option<f64>,
    pub mips: Option<f64>,
    pub instructions_per_cycle: Option<f64>,
}

/// Result of a measurement bracket, ready for the report
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedMetrics {
    pub elapsed: Duration,
    pub groups: Vec<GroupMetrics>,
    pub energy: EnergyMetrics,
    pub perf: PerfMetrics,
}

impl DerivedMetrics {
    pub fn group(&self, kind: GroupKind) -> Option<&GroupMetrics> {
        self.groups.iter().find(|g| g.kind == kind)
    }

    /// True when no group produced any measurement
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    /// Recomputes the rates against a caller-measured duration, e.g. the
    /// workload's own timer
    pub fn with_elapsed(self, elapsed: Duration) -> Self {
        derive(self.groups, elapsed)
    }

    fn raw(&self, id: CounterId) -> Option<i64> {
        self.group(id.group())
            .and_then(|g| g.delta(id))
            .map(|d| d.raw_delta)
    }
}

/// Pairs before/after values with their counters.
///
/// `raw_delta[i] == after.values[i] - before.values[i]`, computed with
/// wrapping arithmetic. A negative delta is kept as is and logged.
pub fn group_deltas(
    counters: &[RegisteredCounter],
    before: &Snapshot,
    after: &Snapshot,
) -> Result<GroupMetrics, DeltaError> {
    if before.kind != after.kind {
        return Err(DeltaError::GroupMismatch {
            before: before.kind,
            after: after.kind,
        });
    }
    if before.values.len() != counters.len() || after.values.len() != counters.len() {
        return Err(DeltaError::LayoutMismatch {
            kind: before.kind,
            expected: counters.len(),
            before: before.values.len(),
            after: after.values.len(),
        });
    }

    let counters = counters
        .iter()
        .zip(before.values.iter().zip(&after.values))
        .map(|(counter, (&b, &a))| {
            let raw_delta = a.wrapping_sub(b);
            if raw_delta < 0 {
                warn!(
                    "{} went backwards ({} -> {}); the counter may have wrapped",
                    counter.spec.id.label(),
                    b,
                    a
                );
            }
            CounterDelta {
                id: counter.spec.id,
                identifier: counter.identifier.clone(),
                raw_delta,
            }
        })
        .collect();

    Ok(GroupMetrics {
        kind: before.kind,
        counters,
    })
}

/// Computes deltas for every group of a bracket and the derived metrics.
/// A group whose snapshots do not line up with its counters is dropped.
pub fn compute(readings: &BracketReadings) -> DerivedMetrics {
    let groups = readings
        .groups
        .iter()
        .filter_map(
            |reading| match group_deltas(&reading.counters, &reading.before, &reading.after) {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    error!("Discarding {} measurements: {}", reading.kind, e);
                    None
                }
            },
        )
        .collect();

    derive(groups, readings.elapsed)
}

fn per_second(amount: Option<f64>, seconds: f64) -> Option<f64> {
    if seconds > 0.0 {
        amount.map(|a| a / seconds)
    } else {
        None
    }
}

fn derive(groups: Vec<GroupMetrics>, elapsed: Duration) -> DerivedMetrics {
    let mut metrics = DerivedMetrics {
        elapsed,
        groups,
        energy: EnergyMetrics::default(),
        perf: PerfMetrics::default(),
    };
    let seconds = metrics.elapsed_seconds();

    let joules = |raw: Option<i64>| raw.map(|r| Unit::Nanojoules.convert(r));
    let package = joules(metrics.raw(CounterId::PackageEnergy));
    let dram = joules(metrics.raw(CounterId::DramEnergy));
    let total = package.zip(dram).map(|(p, d)| p + d);
    metrics.energy = EnergyMetrics {
        package_joules: package,
        dram_joules: dram,
        total_joules: total,
        package_watts: per_second(package, seconds),
        dram_watts: per_second(dram, seconds),
        total_watts: per_second(total, seconds),
    };

    // Rates need both halves of the pair
    if let (Some(cycles), Some(instructions)) = (
        metrics.raw(CounterId::Cycles),
        metrics.raw(CounterId::Instructions),
    ) {
        metrics.perf = PerfMetrics {
            frequency_ghz: per_second(Some(cycles as f64 / 1e9), seconds),
            mips: per_second(Some(instructions as f64 / 1e6), seconds),
            instructions_per_cycle: (cycles > 0).then(|| instructions as f64 / cycles as f64),
        };
    }

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CounterSpec;
    use crate::snapshot::GroupReading;
    use rstest::rstest;
    use std::time::Instant;

    fn registered(ids: &[CounterId]) -> Vec<RegisteredCounter> {
        ids.iter()
            .map(|&id| RegisteredCounter {
                spec: CounterSpec::new(id, id.logical_name()),
                identifier: id.logical_name().to_string(),
            })
            .collect()
    }

    fn reading(kind: GroupKind, ids: &[CounterId], before: &[i64], after: &[i64]) -> GroupReading {
        let start = Instant::now();
        GroupReading {
            kind,
            counters: registered(ids),
            before: Snapshot::new(kind, before.to_vec(), start),
            after: Snapshot::new(kind, after.to_vec(), start),
        }
    }

    fn perf_reading(before: [i64; 2], after: [i64; 2]) -> GroupReading {
        reading(
            GroupKind::CpuPerf,
            &[CounterId::Cycles, CounterId::Instructions],
            &before,
            &after,
        )
    }

    fn bracket(seconds: f64, groups: Vec<GroupReading>) -> BracketReadings {
        BracketReadings {
            elapsed: Duration::from_secs_f64(seconds),
            groups,
        }
    }

    #[test]
    fn test_raw_delta_is_after_minus_before() {
        let r = reading(
            GroupKind::Gpu,
            &[CounterId::GpuBusyPercent, CounterId::GpuPower, CounterId::GpuTemperature],
            &[10, 5_000_000, 40_000],
            &[97, 50_000_000, 38_000],
        );

        let metrics = group_deltas(&r.counters, &r.before, &r.after).unwrap();
        for (i, delta) in metrics.counters.iter().enumerate() {
            assert_eq!(delta.raw_delta, r.after.values[i] - r.before.values[i]);
        }
        assert_eq!(metrics.delta(CounterId::GpuPower).unwrap().value(), 45.0);
    }

    #[test]
    fn test_perf_rates() {
        let metrics = compute(&bracket(
            1.0,
            vec![perf_reading([0, 0], [2_000_000_000, 1_000_000_000])],
        ));

        assert_eq!(metrics.perf.frequency_ghz, Some(2.0));
        assert_eq!(metrics.perf.mips, Some(1000.0));
        assert_eq!(metrics.perf.instructions_per_cycle, Some(0.5));
    }

    #[rstest]
    #[case(0)]
    #[case(1_000)]
    #[case(5_000_000)]
    fn test_ipc_absent_without_cycles(#[case] instructions: i64) {
        let metrics = compute(&bracket(1.0, vec![perf_reading([7, 0], [7, instructions])]));

        assert_eq!(metrics.perf.instructions_per_cycle, None);
        assert_eq!(metrics.perf.frequency_ghz, Some(0.0));
    }

    #[test]
    fn test_zero_elapsed_suppresses_rates() {
        let metrics = compute(&bracket(
            0.0,
            vec![
                perf_reading([0, 0], [100, 50]),
                reading(
                    GroupKind::CpuEnergy,
                    &[CounterId::PackageEnergy, CounterId::DramEnergy],
                    &[0, 0],
                    &[2_000_000_000, 500_000_000],
                ),
            ],
        ));

        assert_eq!(metrics.perf.frequency_ghz, None);
        assert_eq!(metrics.perf.mips, None);
        assert_eq!(metrics.perf.instructions_per_cycle, Some(0.5));
        assert_eq!(metrics.energy.total_joules, Some(2.5));
        assert_eq!(metrics.energy.total_watts, None);
    }

    #[test]
    fn test_energy_power() {
        let metrics = compute(&bracket(
            2.0,
            vec![reading(
                GroupKind::CpuEnergy,
                &[CounterId::PackageEnergy, CounterId::DramEnergy],
                &[1_000_000_000, 0],
                &[41_000_000_000, 4_000_000_000],
            )],
        ));

        assert_eq!(metrics.energy.package_joules, Some(40.0));
        assert_eq!(metrics.energy.package_watts, Some(20.0));
        assert_eq!(metrics.energy.dram_watts, Some(2.0));
        assert_eq!(metrics.energy.total_watts, Some(22.0));
    }

    #[test]
    fn test_total_energy_needs_both_domains() {
        let metrics = compute(&bracket(
            1.0,
            vec![reading(
                GroupKind::CpuEnergy,
                &[CounterId::PackageEnergy],
                &[0],
                &[3_000_000_000],
            )],
        ));

        assert_eq!(metrics.energy.package_watts, Some(3.0));
        assert_eq!(metrics.energy.dram_joules, None);
        assert_eq!(metrics.energy.total_joules, None);
    }

    #[test]
    fn test_unmeasured_groups_stay_absent() {
        let metrics = compute(&bracket(1.0, Vec::new()));

        assert!(metrics.is_empty());
        assert_eq!(metrics.energy, EnergyMetrics::default());
        assert_eq!(metrics.perf, PerfMetrics::default());
    }

    #[test]
    fn test_layout_mismatch_drops_group() {
        let mut r = perf_reading([0, 0], [10, 10]);
        r.after.values.pop();

        assert!(matches!(
            group_deltas(&r.counters, &r.before, &r.after),
            Err(DeltaError::LayoutMismatch { expected: 2, before: 2, after: 1, .. })
        ));
        assert!(compute(&bracket(1.0, vec![r])).is_empty());
    }

    #[test]
    fn test_snapshots_of_different_groups_are_rejected() {
        let mut r = perf_reading([0, 0], [10, 10]);
        r.after.kind = GroupKind::CpuEnergy;

        assert_eq!(
            group_deltas(&r.counters, &r.before, &r.after).unwrap_err(),
            DeltaError::GroupMismatch {
                before: GroupKind::CpuPerf,
                after: GroupKind::CpuEnergy,
            }
        );
        assert!(compute(&bracket(1.0, vec![r])).group(GroupKind::CpuPerf).is_none());
    }

    #[test]
    fn test_wrapped_counter_keeps_negative_delta() {
        let r = perf_reading([i64::MAX, 0], [i64::MIN, 10]);
        let metrics = group_deltas(&r.counters, &r.before, &r.after).unwrap();
        assert_eq!(metrics.counters[0].raw_delta, 1);

        let r = perf_reading([500, 0], [100, 10]);
        let metrics = group_deltas(&r.counters, &r.before, &r.after).unwrap();
        assert_eq!(metrics.counters[0].raw_delta, -400);
    }

    #[test]
    fn test_with_elapsed_recomputes_rates() {
        let metrics = compute(&bracket(
            1.0,
            vec![perf_reading([0, 0], [4_000_000_000, 1_000_000_000])],
        ))
        .with_elapsed(Duration::from_secs(2));

        assert_eq!(metrics.perf.frequency_ghz, Some(2.0));
        assert_eq!(metrics.perf.mips, Some(500.0));
    }
}
