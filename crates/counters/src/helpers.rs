//! perf_event_open utilities.
//!
//! This module opens hardware counters that count the calling process and
//! its threads, and wraps the enable/disable/reset ioctls.

use perf_event_open_sys as sys;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

/// Error type for perf event operations
#[derive(Debug, thiserror::Error)]
pub enum PerfEventError {
    /// Error opening perf event
    #[error("failed to open {counter:?} counter: {source}")]
    OpenError {
        /// Counter that failed to open
        counter: HardwareCounter,
        /// Source error
        source: io::Error,
    },

    /// Error issuing an ioctl on the counter fd
    #[error("perf event ioctl {op} failed: {source}")]
    IoctlError {
        /// Name of the ioctl
        op: &'static str,
        /// Source error
        source: io::Error,
    },

    /// Error reading the counter value
    #[error("failed to read perf event: {0}")]
    ReadError(io::Error),
}

impl PerfEventError {
    /// The underlying OS error
    pub fn io_error(&self) -> &io::Error {
        match self {
            PerfEventError::OpenError { source, .. } => source,
            PerfEventError::IoctlError { source, .. } => source,
            PerfEventError::ReadError(source) => source,
        }
    }
}

/// Types of hardware performance counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareCounter {
    /// CPU cycles
    Cycles,
    /// CPU instructions
    Instructions,
}

impl HardwareCounter {
    fn config(self) -> u64 {
        match self {
            HardwareCounter::Cycles => sys::bindings::PERF_COUNT_HW_CPU_CYCLES as u64,
            HardwareCounter::Instructions => sys::bindings::PERF_COUNT_HW_INSTRUCTIONS as u64,
        }
    }
}

/// A disabled hardware counter for the calling process
pub struct PerfCounter {
    file: File,
}

impl PerfCounter {
    /// Opens a hardware counter for the calling process on any CPU.
    ///
    /// The counter starts disabled, counts user space only, and is inherited
    /// by threads spawned after it is opened.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use counters::{HardwareCounter, PerfCounter};
    ///
    /// fn example() -> Result<u64, counters::PerfEventError> {
    ///     let mut cycles = PerfCounter::open(HardwareCounter::Cycles)?;
    ///     cycles.reset()?;
    ///     cycles.enable()?;
    ///     // ... workload ...
    ///     cycles.disable()?;
    ///     cycles.read_value()
    /// }
    /// ```
    pub fn open(counter: HardwareCounter) -> Result<Self, PerfEventError> {
        let mut attr = sys::bindings::perf_event_attr::default();
        attr.size = std::mem::size_of::<sys::bindings::perf_event_attr>() as u32;
        attr.type_ = sys::bindings::PERF_TYPE_HARDWARE;
        attr.config = counter.config();
        attr.set_disabled(1);
        attr.set_inherit(1);
        attr.set_exclude_kernel(1);
        attr.set_exclude_hv(1);

        let fd = unsafe {
            sys::perf_event_open(
                &mut attr,
                0,  // pid (calling process)
                -1, // cpu (any)
                -1, // group_fd
                sys::bindings::PERF_FLAG_FD_CLOEXEC as u64,
            )
        };

        if fd < 0 {
            return Err(PerfEventError::OpenError {
                counter,
                source: io::Error::last_os_error(),
            });
        }

        // Safety: fd was just returned by perf_event_open and is owned by nobody else
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self {
            file: File::from(owned),
        })
    }

    /// Start counting
    pub fn enable(&self) -> Result<(), PerfEventError> {
        let ret = unsafe { sys::ioctls::ENABLE(self.file.as_raw_fd(), 0) };
        check_ioctl("ENABLE", ret)
    }

    /// Stop counting
    pub fn disable(&self) -> Result<(), PerfEventError> {
        let ret = unsafe { sys::ioctls::DISABLE(self.file.as_raw_fd(), 0) };
        check_ioctl("DISABLE", ret)
    }

    /// Zero the count
    pub fn reset(&self) -> Result<(), PerfEventError> {
        let ret = unsafe { sys::ioctls::RESET(self.file.as_raw_fd(), 0) };
        check_ioctl("RESET", ret)
    }

    /// Current count
    pub fn read_value(&mut self) -> Result<u64, PerfEventError> {
        let mut buf = [0u8; 8];
        self.file
            .read_exact(&mut buf)
            .map_err(PerfEventError::ReadError)?;
        Ok(u64::from_ne_bytes(buf))
    }
}

fn check_ioctl(op: &'static str, ret: libc::c_int) -> Result<(), PerfEventError> {
    if ret < 0 {
        return Err(PerfEventError::IoctlError {
            op,
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}
