//! Ties every component together: enumerates and selects physical devices,
//! loads the mapping, builds the virtual device, starts the FFB proxy
//! thread and the event-pump readers, and reverses the order on shutdown.
use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use evdev::{Device, KeyCode};
use thiserror::Error;

use crate::coalesce::HatMode;
use crate::config::{path::get_lock_path, Config};
use crate::device::{self, DeviceError, PhysicalDevice};
use crate::ecode::resolve_ff_code;
use crate::ffb::{self, FfbConfig, FfbHandle};
use crate::gear::GearMapper;
use crate::mapping::{self, Role};
use crate::pump::{self, PumpContext};
use crate::virtual_device::{self, FfMode, VirtualDeviceConfig, VirtualDeviceError};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("another instance appears to already be running (lock held on {0})")]
    AlreadyRunning(PathBuf),
    #[error("explicit device {path} not usable: {source}")]
    MissingExplicitDevice {
        path: PathBuf,
        #[source]
        source: DeviceError,
    },
    #[error("could not auto-select a wheel device among the enumerated inputs")]
    AutoSelectionFailed,
    #[error("failed to load mapping: {0}")]
    Mapping(#[from] mapping::MappingError),
    #[error("failed to build virtual device: {0}")]
    VirtualDevice(#[from] VirtualDeviceError),
    #[error("failed to load gear file: {0}")]
    Gear(#[from] crate::gear::GearError),
}

impl SupervisorError {
    /// Process exit code per the CLI contract: 0 success (not constructed
    /// for this error type), 2 missing explicit device, 3 auto-selection
    /// failure, 1 for anything else fatal.
    pub fn exit_code(&self) -> i32 {
        match self {
            SupervisorError::MissingExplicitDevice { .. } => 2,
            SupervisorError::AutoSelectionFailed => 3,
            _ => 1,
        }
    }
}

/// Holds every resource the run needs alive; dropping it (or calling
/// [`Supervisor::shutdown`]) tears everything down in reverse startup
/// order.
pub struct Supervisor {
    _lock: File,
    ffb_handle: Option<FfbHandle>,
    pump_tasks: Vec<tokio::task::JoinHandle<()>>,
    _virtual_device: Arc<Mutex<evdev::uinput::VirtualDevice>>,
}

/// Acquires the advisory single-instance lock. Held for the supervisor's
/// whole lifetime; released automatically when the `File` (and so its fd)
/// is dropped at process exit.
fn acquire_instance_lock() -> Result<File, SupervisorError> {
    let path = get_lock_path();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(&path)
        .map_err(|_| SupervisorError::AlreadyRunning(path.clone()))?;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        return Err(SupervisorError::AlreadyRunning(path));
    }
    Ok(file)
}

/// Picks the wheel or shifter device: an explicit path is opened directly
/// (a failure here is a hard "missing explicit device" error), otherwise
/// every enumerated device is scanned for a name-substring match.
fn select_device(
    explicit: Option<&Path>,
    role: Role,
    grab: bool,
) -> Result<Option<PhysicalDevice>, SupervisorError> {
    if let Some(path) = explicit {
        return device::open_role(path, role, grab)
            .map(Some)
            .map_err(|source| SupervisorError::MissingExplicitDevice {
                path: path.to_path_buf(),
                source,
            });
    }

    if role != Role::Wheel {
        // Only the wheel is auto-selected by name guess; a shifter with no
        // explicit path is simply not used this run.
        return Ok(None);
    }

    let candidate = device::enumerate()
        .into_iter()
        .find(|info| device::guess_role(&info.name) == Some(Role::Wheel));
    let Some(candidate) = candidate else {
        return Err(SupervisorError::AutoSelectionFailed);
    };

    device::open_role(&candidate.path, role, grab)
        .map(Some)
        .map_err(|_| SupervisorError::AutoSelectionFailed)
}

pub async fn start(config: &Config) -> Result<Supervisor, SupervisorError> {
    let lock = acquire_instance_lock()?;

    let wheel = select_device(config.wheel_path.as_deref(), Role::Wheel, config.grab)?
        .ok_or(SupervisorError::AutoSelectionFailed)?;
    let shift = select_device(config.shift_path.as_deref(), Role::Shift, config.grab)?;

    let routing = mapping::build_routing(config.axes_mapping.as_deref(), config.buttons_mapping.as_deref())?;

    let gear = match &config.gear_file {
        Some(path) => Some(GearMapper::from_file(path)?),
        None => None,
    };
    let forced_keys: Vec<KeyCode> = if gear.is_some() {
        (0..8).map(|n| KeyCode::new(KeyCode::BTN_0.0 + n)).chain(std::iter::once(crate::gear::GEAR_DEAD_KEY)).collect()
    } else {
        Vec::new()
    };

    // A second, independent fd onto the wheel's event node is opened for
    // the FFB thread's physical upload/erase/mirror traffic, since the
    // pump's reader task consumes the first fd into an event stream.
    let wheel_ffb_fd = Device::open(&wheel.path).ok();

    let ignore: std::collections::HashSet<u16> = config
        .ff_ignore
        .iter()
        .filter_map(|s| resolve_ff_code(s).map(|c| c.0))
        .collect();

    let vconfig = VirtualDeviceConfig {
        name: config.virtual_identity.name.clone().unwrap_or_else(|| "UnderSteer Wheel".to_string()),
        vendor: config.virtual_identity.vendor.unwrap_or(0x045e),
        product: config.virtual_identity.product.unwrap_or(0x028e),
        version: config.virtual_identity.version.unwrap_or(1),
        ff_mode: config.ff_mode,
        ff_ignore: ignore,
    };

    let physical: Vec<PhysicalDevice> = std::iter::once(wheel).chain(shift).collect();
    let built = virtual_device::build(&physical, &routing, &forced_keys, &vconfig)?;
    let virtual_device = Arc::new(Mutex::new(built.device));

    let ffb_handle = if vconfig.ff_mode != FfMode::None {
        wheel_ffb_fd.map(|dev| {
            let ffb_config = FfbConfig {
                min_gap: std::time::Duration::from_millis(config.ffb_min_gap_ms),
                initial_gain_percent: config.initial_gain_percent,
                initial_autocenter_percent: config.initial_autocenter_percent,
            };
            ffb::spawn(virtual_device.clone(), Arc::new(Mutex::new(dev)), ffb_config)
        })
    } else {
        None
    };

    let hat_mode: HatMode = config.hat_mode;
    let ctx = Arc::new(PumpContext::new(
        virtual_device.clone(),
        routing,
        built.axis_specs,
        built.source_ranges,
        hat_mode,
        gear,
    ));
    let pump_tasks = pump::spawn_readers(physical, ctx);

    Ok(Supervisor {
        _lock: lock,
        ffb_handle,
        pump_tasks,
        _virtual_device: virtual_device,
    })
}

impl Supervisor {
    /// Cancels the readers and the FFB thread, then lets the virtual
    /// device drop (closing its fd triggers the kernel's device-destroy).
    /// Physical devices are implicitly ungrabbed when their fds close as
    /// each aborted reader task's `Device` is dropped.
    pub fn shutdown(self) {
        if let Some(handle) = &self.ffb_handle {
            handle.stop();
        }
        for task in &self.pump_tasks {
            task.abort();
        }
    }
}
