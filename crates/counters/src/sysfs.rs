//! Locating counter files under sysfs.
//!
//! All lookups take the sysfs root as a parameter so they can run against a
//! copy of the tree.

use std::fs;
use std::path::{Path, PathBuf};

use crate::CounterError;

/// Reads a sysfs file holding a single integer
pub(crate) fn read_value(path: &Path) -> Result<i64, CounterError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| CounterError::from_io(path.display().to_string(), e))?;
    raw.trim().parse::<i64>().map_err(|_| CounterError::Parse {
        name: path.display().to_string(),
        reason: format!("{:?} is not an integer", raw.trim()),
    })
}

/// Physical package of a CPU. CPUs without topology information are
/// treated as package 0.
pub(crate) fn cpu_package(root: &Path, cpu: u32) -> u32 {
    let path = root
        .join("devices/system/cpu")
        .join(format!("cpu{cpu}"))
        .join("topology/physical_package_id");
    read_value(&path)
        .ok()
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(0)
}

/// Powercap zone of a package, e.g. `class/powercap/intel-rapl:0`
pub(crate) fn rapl_package_zone(root: &Path, package: u32) -> Result<PathBuf, CounterError> {
    let zone = root
        .join("class/powercap")
        .join(format!("intel-rapl:{package}"));
    if zone.join("energy_uj").is_file() {
        Ok(zone)
    } else {
        Err(CounterError::NoSuchEvent(format!(
            "RAPL package zone {}",
            zone.display()
        )))
    }
}

/// Sub-zone of a package zone whose `name` file matches `name`
pub(crate) fn rapl_subzone(root: &Path, package: u32, name: &str) -> Result<PathBuf, CounterError> {
    let powercap = root.join("class/powercap");
    let prefix = format!("intel-rapl:{package}:");
    let entries = fs::read_dir(&powercap)
        .map_err(|e| CounterError::from_io(powercap.display().to_string(), e))?;

    let mut candidates: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
        .map(|entry| entry.path())
        .collect();
    candidates.sort();

    candidates
        .into_iter()
        .find(|zone| {
            fs::read_to_string(zone.join("name"))
                .map(|zone_name| zone_name.trim() == name)
                .unwrap_or(false)
        })
        .ok_or_else(|| CounterError::NoSuchEvent(format!("RAPL {name} zone of package {package}")))
}

/// `device` directory of a DRM card
pub(crate) fn drm_device(root: &Path, card: u32) -> PathBuf {
    root.join("class/drm").join(format!("card{card}")).join("device")
}

/// First hwmon directory of a DRM card
pub(crate) fn drm_hwmon(root: &Path, card: u32) -> Result<PathBuf, CounterError> {
    let hwmon = drm_device(root, card).join("hwmon");
    let entries = fs::read_dir(&hwmon)
        .map_err(|e| CounterError::from_io(hwmon.display().to_string(), e))?;

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("hwmon"))
        .map(|entry| entry.path())
        .collect();
    dirs.sort();

    dirs.into_iter()
        .next()
        .ok_or_else(|| CounterError::NoSuchEvent(format!("hwmon for card{card}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_read_value_trims_newline() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "value", "12345\n");
        assert_eq!(read_value(&dir.path().join("value")).unwrap(), 12345);
    }

    #[test]
    fn test_missing_file_is_no_such_event() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            read_value(&dir.path().join("absent")),
            Err(CounterError::NoSuchEvent(_))
        ));
    }

    #[test]
    fn test_rapl_subzone_matches_by_name() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "class/powercap/intel-rapl:0/energy_uj", "1");
        write(dir.path(), "class/powercap/intel-rapl:0:0/name", "core\n");
        write(dir.path(), "class/powercap/intel-rapl:0:1/name", "dram\n");

        let zone = rapl_subzone(dir.path(), 0, "dram").unwrap();
        assert!(zone.ends_with("intel-rapl:0:1"));
        assert!(rapl_subzone(dir.path(), 0, "psys").is_err());
    }

    #[test]
    fn test_cpu_package_defaults_to_zero() {
        let dir = TempDir::new().unwrap();
        assert_eq!(cpu_package(dir.path(), 3), 0);

        write(dir.path(), "devices/system/cpu/cpu3/topology/physical_package_id", "1\n");
        assert_eq!(cpu_package(dir.path(), 3), 1);
    }
}
