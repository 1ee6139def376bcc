//! Reads events from each physical device on its own cooperative task, runs
//! them through mapping, rescaling, and coalescing, and writes the
//! synthesized result to the virtual device.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use evdev::uinput::VirtualDevice;
use evdev::{AbsoluteAxisCode, EventSummary, EventType, InputEvent, KeyCode};

use crate::coalesce::{ButtonCoalescer, HatCoalescer};
use crate::device::PhysicalDevice;
use crate::gear::GearMapper;
use crate::mapping::{Role, RoutingTables, SourceKey};
use crate::scaling::AxisTracker;
use crate::virtual_device::AxisSpec;

/// Shared state every per-device reader task consults; cheap to clone since
/// it is only ever held behind an `Arc`.
pub struct PumpContext {
    pub virtual_device: Arc<Mutex<VirtualDevice>>,
    pub routing: RoutingTables,
    pub axis_specs: HashMap<AbsoluteAxisCode, AxisSpec>,
    pub source_ranges: HashMap<SourceKey, (i32, i32)>,
    pub hat_mode_codes: Vec<AbsoluteAxisCode>,
    trackers: Mutex<HashMap<SourceKey, AxisTracker>>,
    buttons: Mutex<ButtonCoalescer>,
    hats: Mutex<HatCoalescer>,
    gear: Option<Mutex<GearMapper>>,
}

impl PumpContext {
    pub fn new(
        virtual_device: Arc<Mutex<VirtualDevice>>,
        routing: RoutingTables,
        axis_specs: HashMap<AbsoluteAxisCode, AxisSpec>,
        source_ranges: HashMap<SourceKey, (i32, i32)>,
        hat_mode: crate::coalesce::HatMode,
        gear: Option<GearMapper>,
    ) -> Self {
        let hat_mode_codes = vec![
            AbsoluteAxisCode::ABS_HAT0X,
            AbsoluteAxisCode::ABS_HAT0Y,
            AbsoluteAxisCode::ABS_HAT1X,
            AbsoluteAxisCode::ABS_HAT1Y,
            AbsoluteAxisCode::ABS_HAT2X,
            AbsoluteAxisCode::ABS_HAT2Y,
            AbsoluteAxisCode::ABS_HAT3X,
            AbsoluteAxisCode::ABS_HAT3Y,
        ];

        // Registered from `virt_to_sources` rather than the fast lookup map
        // so priority mode sees sources in the mapping file's declaration
        // order, not HashMap iteration order.
        let mut hats = HatCoalescer::new(hat_mode);
        for &vcode in &hat_mode_codes {
            let Some(sources) = routing.virt_to_sources.get(&vcode.0) else {
                continue;
            };
            for source in sources {
                hats.register_source(vcode.0, source.1);
            }
        }

        Self {
            virtual_device,
            routing,
            axis_specs,
            source_ranges,
            hat_mode_codes,
            trackers: Mutex::new(HashMap::new()),
            buttons: Mutex::new(ButtonCoalescer::new()),
            hats: Mutex::new(hats),
            gear: gear.map(Mutex::new),
        }
    }

    fn is_hat(&self, code: AbsoluteAxisCode) -> bool {
        self.hat_mode_codes.contains(&code)
    }

    fn emit(&self, event: InputEvent) {
        let mut dev = self.virtual_device.lock().unwrap();
        if let Err(e) = dev.emit(&[event]) {
            log::debug!("failed to write synthesized event: {e}");
        }
    }
}

/// Starts one cooperative task per physical device on the current tokio
/// runtime. Each task runs until the device reports it is gone; other
/// readers are unaffected.
pub fn spawn_readers(devices: Vec<PhysicalDevice>, ctx: Arc<PumpContext>) -> Vec<tokio::task::JoinHandle<()>> {
    devices
        .into_iter()
        .map(|physical| {
            let ctx = ctx.clone();
            tokio::spawn(run_reader(physical, ctx))
        })
        .collect()
}

async fn run_reader(physical: PhysicalDevice, ctx: Arc<PumpContext>) {
    let role = physical.role;
    let name = physical.name.clone();
    let mut stream = match physical.device.into_event_stream() {
        Ok(stream) => stream,
        Err(e) => {
            log::error!("failed to start event stream for {name}: {e}");
            return;
        }
    };

    loop {
        match stream.next_event().await {
            Ok(event) => handle_event(role, event, &ctx),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound || e.raw_os_error() == Some(libc::ENODEV) => {
                log::info!("device {name} is gone, stopping its reader");
                return;
            }
            Err(e) => {
                log::debug!("error reading from {name}: {e}");
            }
        }
    }
}

fn handle_event(role: Role, event: InputEvent, ctx: &PumpContext) {
    match event.destructure() {
        EventSummary::Key(_, code, value) => handle_key(role, code, value, ctx),
        EventSummary::AbsoluteAxis(_, code, value) => handle_abs(role, code, value, ctx),
        _ => {}
    }
}

fn handle_key(role: Role, code: KeyCode, value: i32, ctx: &PumpContext) {
    let source: SourceKey = (role, code.0);
    let pressed = value != 0;

    if let Some(gear) = &ctx.gear {
        let mut gear = gear.lock().unwrap();
        if gear.monitors(code.0) {
            let before = gear.normalized_key();
            gear.set_pressed(code.0, pressed);
            let after = gear.normalized_key();
            if before != after {
                ctx.emit(InputEvent::new(EventType::KEY.0, before.0, 0));
                ctx.emit(InputEvent::new(EventType::KEY.0, after.0, 1));
            }
            return;
        }
    }

    let Some(&vcode) = ctx.routing.key_src_to_virt.get(&source) else {
        ctx.emit(InputEvent::new(EventType::KEY.0, code.0, value));
        return;
    };

    let mut buttons = ctx.buttons.lock().unwrap();
    if let Some(edge) = buttons.update(vcode.0, pressed) {
        ctx.emit(InputEvent::new(EventType::KEY.0, vcode.0, edge as i32));
    }
}

fn handle_abs(role: Role, code: AbsoluteAxisCode, value: i32, ctx: &PumpContext) {
    let source: SourceKey = (role, code.0);
    let Some(&vcode) = ctx.routing.abs_src_to_virt.get(&source) else {
        return;
    };

    if ctx.is_hat(vcode) {
        let tri = value.signum() as i8;
        let mut hats = ctx.hats.lock().unwrap();
        if let Some(representative) = hats.update(vcode.0, source.1, tri, std::time::Instant::now()) {
            ctx.emit(InputEvent::new(EventType::ABSOLUTE.0, vcode.0, representative as i32));
        }
        return;
    }

    let Some(spec) = ctx.axis_specs.get(&vcode).copied() else {
        return;
    };
    let reverse = ctx.routing.is_reversed(source);
    let (native_min, native_max) = ctx.source_ranges.get(&source).copied().unwrap_or((spec.vmin, spec.vmax));

    let mut trackers = ctx.trackers.lock().unwrap();
    let tracker = trackers
        .entry(source)
        .or_insert_with(|| AxisTracker::new(native_min, native_max));

    let raw = if reverse { tracker.reverse_raw(value) } else { value };
    let out = tracker.rescale(raw, spec.vmin, spec.vmax, spec.vcenter);
    drop(trackers);

    ctx.emit(InputEvent::new(EventType::ABSOLUTE.0, vcode.0, out));
}
