//! Counter backend for a Linux host.
//!
//! Supported events:
//!
//! | Event name | Source | Unit |
//! | --- | --- | --- |
//! | `PAPI_TOT_CYC`, `perf::CYCLES` | perf_event_open, calling process | cycles |
//! | `PAPI_TOT_INS`, `perf::INSTRUCTIONS` | perf_event_open, calling process | instructions |
//! | `rapl::RAPL_ENERGY_PKG:cpu=N` | powercap `intel-rapl:<pkg>/energy_uj` | nanojoules |
//! | `rapl::RAPL_ENERGY_DRAM:cpu=N` | powercap sub-zone named `dram` | nanojoules |
//! | `rocm_smi:::busy_percent:device=N` | `drm/cardN/device/gpu_busy_percent` | percent |
//! | `rocm_smi:::power_average:device=N:sensor=S` | hwmon `power{S+1}_average` | microwatts |
//! | `rocm_smi:::temp_current:device=N:sensor=S` | hwmon `temp{S+1}_input` | millidegrees |
//!
//! perf counters are reset when their set starts. sysfs sources are free
//! running, so their readings are absolute; consumers work with deltas.

use std::path::{Path, PathBuf};

use log::debug;

#[cfg(target_os = "linux")]
use crate::{HardwareCounter, PerfCounter};
use crate::{check_buffer, sysfs, Backend, CounterError, EventName, EventSetId};

const DEFAULT_SYSFS_ROOT: &str = "/sys";

/// powercap reports microjoules
const UJ_TO_NJ: i64 = 1_000;

enum Source {
    #[cfg(target_os = "linux")]
    Perf(PerfCounter),
    Sysfs { path: PathBuf, scale: i64 },
}

impl Source {
    fn start(&mut self) -> Result<(), CounterError> {
        match self {
            #[cfg(target_os = "linux")]
            Source::Perf(counter) => {
                counter.reset().map_err(perf_error)?;
                counter.enable().map_err(perf_error)
            }
            Source::Sysfs { .. } => Ok(()),
        }
    }

    fn read(&mut self) -> Result<i64, CounterError> {
        match self {
            #[cfg(target_os = "linux")]
            Source::Perf(counter) => counter
                .read_value()
                .map(|v| v as i64)
                .map_err(perf_error),
            Source::Sysfs { path, scale } => Ok(sysfs::read_value(path)? * *scale),
        }
    }

    fn stop(&mut self) -> Result<(), CounterError> {
        match self {
            #[cfg(target_os = "linux")]
            Source::Perf(counter) => counter.disable().map_err(perf_error),
            Source::Sysfs { .. } => Ok(()),
        }
    }
}

#[cfg(target_os = "linux")]
fn perf_error(err: crate::PerfEventError) -> CounterError {
    let context = err.to_string();
    let kind = err.io_error().kind();
    CounterError::from_io(context, std::io::Error::from(kind))
}

struct EventSet {
    sources: Vec<Source>,
    running: bool,
}

/// Backend reading perf_event, powercap and amdgpu counters of the local host
pub struct SystemBackend {
    root: PathBuf,
    sets: Vec<Option<EventSet>>,
    initialized: bool,
}

impl SystemBackend {
    /// Creates a backend reading the live `/sys` tree
    pub fn new() -> Self {
        Self::with_sysfs_root(DEFAULT_SYSFS_ROOT)
    }

    /// Creates a backend reading a sysfs tree mounted at `root`
    pub fn with_sysfs_root<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            sets: Vec::new(),
            initialized: false,
        }
    }

    /// The sysfs root in use
    pub fn sysfs_root(&self) -> &Path {
        &self.root
    }

    fn set_mut(&mut self, set: EventSetId) -> Result<&mut EventSet, CounterError> {
        if !self.initialized {
            return Err(CounterError::NotInitialized);
        }
        self.sets
            .get_mut(set.0)
            .and_then(|s| s.as_mut())
            .ok_or(CounterError::InvalidEventSet(set))
    }

    fn resolve(&self, name: &str) -> Result<Source, CounterError> {
        let event = EventName::parse(name)?;
        let component = event.component.as_deref();

        match (component, event.event.as_str()) {
            (None, "PAPI_TOT_CYC") | (Some("perf"), "CYCLES" | "PERF_COUNT_HW_CPU_CYCLES") => {
                hardware_source(name, HardwareKind::Cycles)
            }
            (None, "PAPI_TOT_INS")
            | (Some("perf"), "INSTRUCTIONS" | "PERF_COUNT_HW_INSTRUCTIONS") => {
                hardware_source(name, HardwareKind::Instructions)
            }
            (Some("rapl"), "RAPL_ENERGY_PKG") => {
                let package = sysfs::cpu_package(&self.root, event.qualifier_or("cpu", 0)?);
                let zone = sysfs::rapl_package_zone(&self.root, package)?;
                self.sysfs_source(zone.join("energy_uj"), UJ_TO_NJ)
            }
            (Some("rapl"), "RAPL_ENERGY_DRAM") => {
                let package = sysfs::cpu_package(&self.root, event.qualifier_or("cpu", 0)?);
                let zone = sysfs::rapl_subzone(&self.root, package, "dram")?;
                self.sysfs_source(zone.join("energy_uj"), UJ_TO_NJ)
            }
            (Some("rocm_smi"), "busy_percent") => {
                let device = event.qualifier_or("device", 0u32)?;
                let path = sysfs::drm_device(&self.root, device).join("gpu_busy_percent");
                self.sysfs_source(path, 1)
            }
            (Some("rocm_smi"), "power_average") => {
                let device = event.qualifier_or("device", 0u32)?;
                let sensor = event.qualifier_or("sensor", 0u32)?;
                let hwmon = sysfs::drm_hwmon(&self.root, device)?;
                self.sysfs_source(hwmon.join(format!("power{}_average", sensor + 1)), 1)
            }
            (Some("rocm_smi"), "temp_current") => {
                let device = event.qualifier_or("device", 0u32)?;
                let sensor = event.qualifier_or("sensor", 0u32)?;
                let hwmon = sysfs::drm_hwmon(&self.root, device)?;
                self.sysfs_source(hwmon.join(format!("temp{}_input", sensor + 1)), 1)
            }
            _ => Err(CounterError::NoSuchEvent(name.to_string())),
        }
    }

    fn sysfs_source(&self, path: PathBuf, scale: i64) -> Result<Source, CounterError> {
        // An unreadable file now means an unreadable file during the bracket
        sysfs::read_value(&path)?;
        debug!("Resolved sysfs counter {}", path.display());
        Ok(Source::Sysfs { path, scale })
    }
}

impl Default for SystemBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy)]
enum HardwareKind {
    Cycles,
    Instructions,
}

#[cfg(target_os = "linux")]
fn hardware_source(_name: &str, kind: HardwareKind) -> Result<Source, CounterError> {
    let counter = match kind {
        HardwareKind::Cycles => HardwareCounter::Cycles,
        HardwareKind::Instructions => HardwareCounter::Instructions,
    };
    PerfCounter::open(counter).map(Source::Perf).map_err(perf_error)
}

#[cfg(not(target_os = "linux"))]
fn hardware_source(name: &str, _kind: HardwareKind) -> Result<Source, CounterError> {
    Err(CounterError::NoSuchEvent(name.to_string()))
}

impl Backend for SystemBackend {
    fn init(&mut self) -> Result<(), CounterError> {
        if !self.root.is_dir() {
            return Err(CounterError::from_io(
                format!("sysfs root {}", self.root.display()),
                std::io::Error::from(std::io::ErrorKind::NotFound),
            ));
        }
        self.initialized = true;
        Ok(())
    }

    fn shutdown(&mut self) {
        // Dropping the sources closes their file descriptors
        self.sets.clear();
        self.initialized = false;
    }

    fn create_event_set(&mut self) -> Result<EventSetId, CounterError> {
        if !self.initialized {
            return Err(CounterError::NotInitialized);
        }
        self.sets.push(Some(EventSet {
            sources: Vec::new(),
            running: false,
        }));
        Ok(EventSetId(self.sets.len() - 1))
    }

    fn add_named_event(&mut self, set: EventSetId, name: &str) -> Result<(), CounterError> {
        if self.set_mut(set)?.running {
            return Err(CounterError::AlreadyRunning(set));
        }
        let source = self.resolve(name)?;
        self.set_mut(set)?.sources.push(source);
        Ok(())
    }

    fn num_events(&self, set: EventSetId) -> Result<usize, CounterError> {
        if !self.initialized {
            return Err(CounterError::NotInitialized);
        }
        self.sets
            .get(set.0)
            .and_then(|s| s.as_ref())
            .map(|s| s.sources.len())
            .ok_or(CounterError::InvalidEventSet(set))
    }

    fn start(&mut self, set: EventSetId) -> Result<(), CounterError> {
        let entry = self.set_mut(set)?;
        if entry.running {
            return Err(CounterError::AlreadyRunning(set));
        }
        for started in 0..entry.sources.len() {
            if let Err(e) = entry.sources[started].start() {
                for source in &mut entry.sources[..started] {
                    let _ = source.stop();
                }
                return Err(e);
            }
        }
        entry.running = true;
        Ok(())
    }

    fn read(&mut self, set: EventSetId, values: &mut [i64]) -> Result<(), CounterError> {
        let entry = self.set_mut(set)?;
        if !entry.running {
            return Err(CounterError::NotRunning(set));
        }
        check_buffer(entry.sources.len(), values)?;
        for (slot, source) in values.iter_mut().zip(entry.sources.iter_mut()) {
            *slot = source.read()?;
        }
        Ok(())
    }

    fn stop(&mut self, set: EventSetId, values: &mut [i64]) -> Result<(), CounterError> {
        let entry = self.set_mut(set)?;
        if !entry.running {
            return Err(CounterError::NotRunning(set));
        }
        check_buffer(entry.sources.len(), values)?;
        let mut first_error = None;
        for source in entry.sources.iter_mut() {
            if let Err(e) = source.stop() {
                first_error.get_or_insert(e);
            }
        }
        entry.running = false;
        if let Some(e) = first_error {
            return Err(e);
        }
        for (slot, source) in values.iter_mut().zip(entry.sources.iter_mut()) {
            *slot = source.read()?;
        }
        Ok(())
    }

    fn destroy_event_set(&mut self, set: EventSetId) -> Result<(), CounterError> {
        self.set_mut(set)?;
        self.sets[set.0] = None;
        Ok(())
    }
}
