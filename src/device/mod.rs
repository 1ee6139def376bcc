//! Enumerates accessible input devices, resolves their identity, and
//! locates the sibling raw-HID character device when one exists.
use std::path::{Path, PathBuf};

use evdev::Device;
use thiserror::Error;

use crate::mapping::Role;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no device matched {0:?}")]
    NoMatch(String),
}

/// A device discovered under `/dev/input`, not yet bound to a role.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: PathBuf,
    pub name: String,
    pub vendor: u16,
    pub product: u16,
    pub phys: Option<String>,
    pub uniq: Option<String>,
}

/// A physical device the supervisor owns for the lifetime of the run.
pub struct PhysicalDevice {
    pub path: PathBuf,
    pub role: Role,
    pub name: String,
    pub vendor: u16,
    pub product: u16,
    pub hidraw_path: Option<PathBuf>,
    pub device: Device,
}

impl std::fmt::Debug for PhysicalDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDevice")
            .field("path", &self.path)
            .field("role", &self.role)
            .field("name", &self.name)
            .field("vendor", &self.vendor)
            .field("product", &self.product)
            .field("hidraw_path", &self.hidraw_path)
            .finish()
    }
}

/// Lists every readable `/dev/input/event*` node, best-effort: devices that
/// fail to open (permissions, races with hot-unplug) are silently skipped
/// rather than aborting the whole scan.
pub fn enumerate() -> Vec<DeviceInfo> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir("/dev/input") else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with("event") {
            continue;
        }
        let Ok(device) = Device::open(&path) else {
            continue;
        };
        let id = device.input_id();
        found.push(DeviceInfo {
            path,
            name: device.name().unwrap_or("unknown").to_string(),
            vendor: id.vendor(),
            product: id.product(),
            phys: device.physical_path().map(str::to_string),
            uniq: device.unique_name().map(str::to_string),
        });
    }
    found
}

/// Guesses a role from a device's advertised name, mirroring the
/// exporter's name-substring heuristic used when no explicit path is given.
pub fn guess_role(name: &str) -> Option<Role> {
    let lower = name.to_lowercase();
    if lower.contains("wheel") || lower.contains("racing") || lower.contains("ffb") || lower.contains("steering")
    {
        Some(Role::Wheel)
    } else if lower.contains("shift") {
        Some(Role::Shift)
    } else {
        None
    }
}

/// Opens the device at `path` for the given role, exclusive-grabbing it
/// unless `grab` is false.
pub fn open_role(path: &Path, role: Role, grab: bool) -> Result<PhysicalDevice, DeviceError> {
    let mut device = Device::open(path).map_err(|source| DeviceError::Open {
        path: path.display().to_string(),
        source,
    })?;
    if grab {
        if let Err(e) = device.grab() {
            log::warn!("failed to grab {}: {e}", path.display());
        }
    }
    let id = device.input_id();
    let hidraw_path = find_hidraw_sibling(path);
    Ok(PhysicalDevice {
        path: path.to_path_buf(),
        role,
        name: device.name().unwrap_or("unknown").to_string(),
        vendor: id.vendor(),
        product: id.product(),
        hidraw_path,
        device,
    })
}

/// Finds the sibling `hidraw*` character device that shares this event
/// node's parent input device, following the same "diff the sysfs
/// neighborhood" approach the TSV exporter uses to find js* siblings.
pub fn find_hidraw_sibling(event_path: &Path) -> Option<PathBuf> {
    let mut enumerator = udev::Enumerator::new().ok()?;
    enumerator.match_subsystem("hidraw").ok()?;
    let target = std::fs::canonicalize(
        udev::Device::from_syspath(&sys_class_input_path(event_path)?)
            .ok()?
            .syspath(),
    )
    .ok()?;

    for hidraw in enumerator.scan_devices().ok()? {
        let Some(parent) = hidraw.parent() else {
            continue;
        };
        let Ok(parent_path) = std::fs::canonicalize(parent.syspath()) else {
            continue;
        };
        if parent_path == target {
            return hidraw.devnode().map(Path::to_path_buf);
        }
    }
    None
}

fn sys_class_input_path(event_path: &Path) -> Option<PathBuf> {
    let name = event_path.file_name()?.to_str()?;
    Some(PathBuf::from(format!("/sys/class/input/{name}/device")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guesses_wheel_from_name() {
        assert_eq!(guess_role("Logitech G923 Racing Wheel"), Some(Role::Wheel));
        assert_eq!(guess_role("Fanatec CSL Elite FFB Base"), Some(Role::Wheel));
    }

    #[test]
    fn guesses_shift_from_name() {
        assert_eq!(guess_role("Logitech Driving Force Shifter"), Some(Role::Shift));
    }

    #[test]
    fn unrelated_name_has_no_guess() {
        assert_eq!(guess_role("Generic USB Gamepad"), None);
    }
}
