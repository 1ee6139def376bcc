//! Synthesizes the kernel-backed virtual input device that merges the
//! capabilities of every selected physical device and is the target of
//! all translated events and force-feedback traffic.
use std::collections::{HashMap, HashSet};
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AbsInfo, AbsoluteAxisCode, AttributeSet, FFEffectCode, InputId, KeyCode, UinputAbsSetup};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::PhysicalDevice;
use crate::mapping::{RoutingTables, SourceKey};

const MAX_FF_EFFECTS: u32 = 16;
const NODE_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(2);
const NODE_DISCOVERY_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum VirtualDeviceError {
    #[error("failed to build virtual device: {0}")]
    Build(#[source] std::io::Error),
    #[error("failed to set non-blocking mode on virtual device: {0}")]
    NonBlocking(#[source] nix::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FfMode {
    /// Advertise only FF_GAIN and FF_AUTOCENTER.
    Easy,
    /// Advertise the physical wheel's full feature set, minus ignores.
    Full,
    /// Do not advertise any force-feedback capability at all.
    None,
}

#[derive(Debug, Clone)]
pub struct VirtualDeviceConfig {
    pub name: String,
    pub vendor: u16,
    pub product: u16,
    pub version: u16,
    pub ff_mode: FfMode,
    pub ff_ignore: HashSet<u16>,
}

impl Default for VirtualDeviceConfig {
    fn default() -> Self {
        Self {
            name: "UnderSteer Wheel".to_string(),
            vendor: 0x045e,
            product: 0x028e,
            version: 1,
            ff_mode: FfMode::Easy,
            ff_ignore: HashSet::new(),
        }
    }
}

/// Per-virtual-axis metadata recorded when the source's native range was
/// widened, so the pump can rescale raw readings consistently.
#[derive(Debug, Clone, Copy)]
pub struct AxisSpec {
    pub vmin: i32,
    pub vmax: i32,
    pub vcenter: i32,
    pub widened: bool,
}

pub struct BuiltVirtualDevice {
    pub device: VirtualDevice,
    pub event_path: Option<PathBuf>,
    pub axis_specs: HashMap<AbsoluteAxisCode, AxisSpec>,
    /// Native `(min, max)` range observed on the physical source itself,
    /// independent of any widening applied to the virtual axis it feeds —
    /// the pump seeds each source's [`crate::scaling::AxisTracker`] from
    /// this rather than from the (possibly widened) virtual range.
    pub source_ranges: HashMap<SourceKey, (i32, i32)>,
}

/// Builds the merged virtual device from the selected physical devices and
/// the routing tables that describe which virtual axes/keys are in use,
/// plus any keys the gear mapper needs that aren't already covered.
pub fn build(
    physical: &[PhysicalDevice],
    routing: &RoutingTables,
    forced_keys: &[KeyCode],
    config: &VirtualDeviceConfig,
) -> Result<BuiltVirtualDevice, VirtualDeviceError> {
    let mut keys = AttributeSet::<KeyCode>::new();
    for &code in routing.key_src_to_virt.values() {
        keys.insert(code);
    }
    for &code in forced_keys {
        keys.insert(code);
    }

    let mut axis_specs = HashMap::new();
    let mut abs_setups = Vec::new();
    let mut source_ranges = HashMap::new();

    for (&source, &vcode) in &routing.abs_src_to_virt {
        let native = physical
            .iter()
            .filter(|p| p.role == source.0)
            .find_map(|p| p.device.get_abs_state().ok().map(|states| states[source.1 as usize]));
        let (native_min, native_max, native_resolution) = match native {
            Some(info) => (info.minimum, info.maximum, info.resolution),
            None => (0, 1, 0),
        };
        source_ranges.insert(source, (native_min, native_max));

        if axis_specs.contains_key(&vcode) {
            continue;
        }

        let (vmin, vmax, vcenter, widened) = if native_min == 0 && native_max == 1 {
            (i16::MIN as i32, i16::MAX as i32, 0, true)
        } else {
            (native_min, native_max, (native_min + native_max) / 2, false)
        };

        axis_specs.insert(
            vcode,
            AxisSpec {
                vmin,
                vmax,
                vcenter,
                widened,
            },
        );
        let info = AbsInfo::new(vcenter, vmin, vmax, 0, 0, native_resolution);
        abs_setups.push(UinputAbsSetup::new(vcode, info));
    }

    let ff = build_ff_set(physical, config);

    let mut builder = VirtualDeviceBuilder::new()
        .map_err(VirtualDeviceError::Build)?
        .name(&config.name)
        .input_id(InputId::new(evdev::BusType::BUS_USB, config.vendor, config.product, config.version))
        .with_keys(&keys)
        .map_err(VirtualDeviceError::Build)?;

    for setup in &abs_setups {
        builder = builder.with_absolute_axis(setup).map_err(VirtualDeviceError::Build)?;
    }

    if ff.iter().next().is_some() {
        builder = builder.with_ff(&ff).map_err(VirtualDeviceError::Build)?;
        builder = builder.with_ff_effects_max(MAX_FF_EFFECTS);
    }

    let device = builder.build().map_err(VirtualDeviceError::Build)?;

    let raw_fd = device.as_raw_fd();
    fcntl(raw_fd, FcntlArg::F_SETFL(OFlag::O_NONBLOCK)).map_err(VirtualDeviceError::NonBlocking)?;

    let event_path = discover_event_node(&device);
    if event_path.is_none() {
        log::warn!("virtual device created but no event node was discovered within {NODE_DISCOVERY_TIMEOUT:?}");
    }

    Ok(BuiltVirtualDevice {
        device,
        event_path,
        axis_specs,
        source_ranges,
    })
}

fn build_ff_set(physical: &[PhysicalDevice], config: &VirtualDeviceConfig) -> AttributeSet<FFEffectCode> {
    let mut ff = AttributeSet::<FFEffectCode>::new();
    match config.ff_mode {
        FfMode::None => {}
        FfMode::Easy => {
            insert_if_allowed(&mut ff, FFEffectCode::FF_GAIN, config);
            insert_if_allowed(&mut ff, FFEffectCode::FF_AUTOCENTER, config);
        }
        FfMode::Full => {
            for phys in physical {
                if let Some(supported) = phys.device.supported_ff() {
                    for code in supported.iter() {
                        insert_if_allowed(&mut ff, code, config);
                    }
                }
            }
        }
    }
    ff
}

fn insert_if_allowed(ff: &mut AttributeSet<FFEffectCode>, code: FFEffectCode, config: &VirtualDeviceConfig) {
    if !config.ff_ignore.contains(&code.0) {
        ff.insert(code);
    }
}

/// Waits up to [`NODE_DISCOVERY_TIMEOUT`] for the kernel to materialize the
/// `/dev/input/eventN` node backing the freshly created control device.
fn discover_event_node(device: &VirtualDevice) -> Option<PathBuf> {
    let deadline = Instant::now() + NODE_DISCOVERY_TIMEOUT;
    loop {
        if let Ok(mut nodes) = device.enumerate_dev_nodes_blocking() {
            if let Some(Ok(path)) = nodes.next() {
                return Some(path);
            }
        }
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(NODE_DISCOVERY_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn easy_mode_drops_ignored_gain() {
        let mut config = VirtualDeviceConfig::default();
        config.ff_ignore.insert(FFEffectCode::FF_GAIN.0);
        let ff = build_ff_set(&[], &config);
        assert!(!ff.contains(FFEffectCode::FF_GAIN));
        assert!(ff.contains(FFEffectCode::FF_AUTOCENTER));
    }

    #[test]
    fn none_mode_advertises_nothing() {
        let config = VirtualDeviceConfig {
            ff_mode: FfMode::None,
            ..VirtualDeviceConfig::default()
        };
        let ff = build_ff_set(&[], &config);
        assert!(ff.iter().next().is_none());
    }
}
