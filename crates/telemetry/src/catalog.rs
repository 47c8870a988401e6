//! The table of candidate counters.
//!
//! Each [`CounterSpec`] names one logical counter and the event identifiers
//! that can provide it. The [`Catalog`] lists them grouped and in priority
//! order; registration walks it front to back.

use std::fmt;

/// Group of counters started and stopped together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupKind {
    /// GPU utilization, power, temperature and instruction activity
    Gpu,
    /// CPU package and DRAM energy
    CpuEnergy,
    /// CPU cycles and instructions
    CpuPerf,
}

/// How many of a group's counters must register for the group to be usable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Any single counter makes the group useful
    AtLeastOne,
    /// Every counter in the catalog group must be present
    All,
}

impl GroupKind {
    /// All groups in registration and report order
    pub const ALL: [GroupKind; 3] = [GroupKind::Gpu, GroupKind::CpuEnergy, GroupKind::CpuPerf];

    /// Requirement for the group to be marked usable
    pub fn requirement(self) -> Requirement {
        match self {
            GroupKind::Gpu | GroupKind::CpuEnergy => Requirement::AtLeastOne,
            // Cycles without instructions (or the reverse) yields no derived metric
            GroupKind::CpuPerf => Requirement::All,
        }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GroupKind::Gpu => "GPU",
            GroupKind::CpuEnergy => "CPU energy",
            GroupKind::CpuPerf => "CPU performance",
        };
        f.write_str(name)
    }
}

/// Conversion from a raw counter value to its display unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    /// Percent, no conversion
    Percent,
    /// Microwatts, shown as watts
    Microwatts,
    /// Millidegrees Celsius, shown as degrees
    Millidegrees,
    /// Nanojoules, shown as joules
    Nanojoules,
    /// Plain event count
    Count,
}

impl Unit {
    /// Raw units per display unit
    pub fn divisor(self) -> i64 {
        match self {
            Unit::Percent | Unit::Count => 1,
            Unit::Microwatts => 1_000_000,
            Unit::Millidegrees => 1_000,
            Unit::Nanojoules => 1_000_000_000,
        }
    }

    /// Converts a raw value to the display unit
    pub fn convert(self, raw: i64) -> f64 {
        raw as f64 / self.divisor() as f64
    }

    /// Converts a raw value to whole display units, truncating
    pub fn whole(self, raw: i64) -> i64 {
        raw / self.divisor()
    }
}

/// Logical counters known to the monitoring layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterId {
    GpuBusyPercent,
    GpuPower,
    GpuTemperature,
    GpuValuInstructions,
    GpuValuBusy,
    PackageEnergy,
    DramEnergy,
    Cycles,
    Instructions,
}

impl CounterId {
    pub fn logical_name(self) -> &'static str {
        match self {
            CounterId::GpuBusyPercent => "gpu_busy_percent",
            CounterId::GpuPower => "gpu_power",
            CounterId::GpuTemperature => "gpu_temperature",
            CounterId::GpuValuInstructions => "gpu_valu_instructions",
            CounterId::GpuValuBusy => "gpu_valu_busy",
            CounterId::PackageEnergy => "package_energy",
            CounterId::DramEnergy => "dram_energy",
            CounterId::Cycles => "cycles",
            CounterId::Instructions => "instructions",
        }
    }

    /// Label used in logs and the report
    pub fn label(self) -> &'static str {
        match self {
            CounterId::GpuBusyPercent => "GPU Busy Percent",
            CounterId::GpuPower => "GPU Power Usage",
            CounterId::GpuTemperature => "GPU Temperature",
            CounterId::GpuValuInstructions => "GPU VALU/FP Instructions",
            CounterId::GpuValuBusy => "GPU VALU Busy Cycles/Waves",
            CounterId::PackageEnergy => "Package Energy",
            CounterId::DramEnergy => "DRAM Energy",
            CounterId::Cycles => "Total Cycles",
            CounterId::Instructions => "Total Instructions",
        }
    }

    pub fn group(self) -> GroupKind {
        match self {
            CounterId::GpuBusyPercent
            | CounterId::GpuPower
            | CounterId::GpuTemperature
            | CounterId::GpuValuInstructions
            | CounterId::GpuValuBusy => GroupKind::Gpu,
            CounterId::PackageEnergy | CounterId::DramEnergy => GroupKind::CpuEnergy,
            CounterId::Cycles | CounterId::Instructions => GroupKind::CpuPerf,
        }
    }

    pub fn unit(self) -> Unit {
        match self {
            CounterId::GpuBusyPercent => Unit::Percent,
            CounterId::GpuPower => Unit::Microwatts,
            CounterId::GpuTemperature => Unit::Millidegrees,
            CounterId::PackageEnergy | CounterId::DramEnergy => Unit::Nanojoules,
            CounterId::GpuValuInstructions
            | CounterId::GpuValuBusy
            | CounterId::Cycles
            | CounterId::Instructions => Unit::Count,
        }
    }
}

/// One logical counter and the event identifiers that can provide it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSpec {
    pub id: CounterId,
    pub primary: String,
    pub fallback: Option<String>,
}

impl CounterSpec {
    pub fn new(id: CounterId, primary: impl Into<String>) -> Self {
        Self {
            id,
            primary: primary.into(),
            fallback: None,
        }
    }

    /// Adds an identifier to try when the primary cannot be registered
    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    pub fn group(&self) -> GroupKind {
        self.id.group()
    }

    pub fn unit(&self) -> Unit {
        self.id.unit()
    }

    /// Primary identifier followed by the fallback, if any
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str()).chain(self.fallback.as_deref())
    }
}

/// Devices the default catalog points at
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogConfig {
    /// GPU device index
    pub gpu_device: u32,
    /// GPU power/temperature sensor index
    pub gpu_sensor: u32,
    /// CPU whose package energy is measured
    pub cpu: u32,
}

/// Ordered table of candidate counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    specs: Vec<CounterSpec>,
}

impl Catalog {
    /// Builds a catalog from an explicit list. Order within each group is the
    /// registration order.
    pub fn new(specs: Vec<CounterSpec>) -> Self {
        Self { specs }
    }

    /// The standard table: ROCm SMI GPU sensors, ROCm GPU activity counters
    /// with their alternates, RAPL package/DRAM energy and the cycle and
    /// instruction presets.
    pub fn from_config(config: &CatalogConfig) -> Self {
        let device = config.gpu_device;
        let sensor = config.gpu_sensor;
        let cpu = config.cpu;

        Self::new(vec![
            CounterSpec::new(
                CounterId::GpuBusyPercent,
                format!("rocm_smi:::busy_percent:device={device}"),
            ),
            CounterSpec::new(
                CounterId::GpuPower,
                format!("rocm_smi:::power_average:device={device}:sensor={sensor}"),
            ),
            CounterSpec::new(
                CounterId::GpuTemperature,
                format!("rocm_smi:::temp_current:device={device}:sensor={sensor}"),
            ),
            CounterSpec::new(CounterId::GpuValuInstructions, "rocm:::VALUInsts")
                .with_fallback("rocm:::SQ_INSTS_VALU"),
            CounterSpec::new(CounterId::GpuValuBusy, "rocm:::VALUBusy")
                .with_fallback("rocm:::SQ_WAVES"),
            CounterSpec::new(
                CounterId::PackageEnergy,
                format!("rapl::RAPL_ENERGY_PKG:cpu={cpu}"),
            ),
            CounterSpec::new(
                CounterId::DramEnergy,
                format!("rapl::RAPL_ENERGY_DRAM:cpu={cpu}"),
            ),
            CounterSpec::new(CounterId::Cycles, "PAPI_TOT_CYC"),
            CounterSpec::new(CounterId::Instructions, "PAPI_TOT_INS"),
        ])
    }

    pub fn specs(&self) -> &[CounterSpec] {
        &self.specs
    }

    /// Specs of one group, in registration order
    pub fn group(&self, kind: GroupKind) -> impl Iterator<Item = &CounterSpec> {
        self.specs.iter().filter(move |spec| spec.group() == kind)
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::from_config(&CatalogConfig::default())
    }
}
