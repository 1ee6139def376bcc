//! Services the virtual device's force-feedback callback queue and mirrors
//! effect upload/erase/play/stop/gain/autocenter traffic onto the physical
//! wheel, maintaining the bidirectional virtual<->physical effect-id map.
mod raw;

use std::collections::HashMap;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use evdev::uinput::VirtualDevice;
use evdev::{Device, EventSummary, EventType, FFEffectCode, FFEffectKind, InputEvent, UInputCode, UInputEvent};

const POLL_RATE: Duration = Duration::from_micros(1666);
const UPLOAD_TIMEOUT: Duration = Duration::from_millis(2500);
const ERASE_TIMEOUT: Duration = Duration::from_millis(500);
const LRU_EVICTION_BATCH: usize = 4;
const STARTUP_SLOTS: i16 = 64;

#[derive(Debug, Clone)]
pub struct FfbConfig {
    pub min_gap: Duration,
    pub initial_gain_percent: u8,
    pub initial_autocenter_percent: u8,
}

impl Default for FfbConfig {
    fn default() -> Self {
        Self {
            min_gap: Duration::from_millis(2),
            initial_gain_percent: 100,
            initial_autocenter_percent: 100,
        }
    }
}

/// The bidirectional virtual<->physical effect-id map. A `None` physical id
/// records a "virtual-only" effect (a zero-magnitude periodic upload that
/// was never issued against the wheel) so a later erase is a guaranteed hit.
#[derive(Debug, Default)]
struct EffectMap {
    v_to_p: HashMap<i16, Option<i16>>,
    p_to_v: HashMap<i16, i16>,
    last_used: HashMap<i16, Instant>,
}

impl EffectMap {
    fn insert(&mut self, vid: i16, pid: Option<i16>) {
        if let Some(Some(old_pid)) = self.v_to_p.insert(vid, pid) {
            if pid != Some(old_pid) {
                self.p_to_v.remove(&old_pid);
                self.last_used.remove(&old_pid);
            }
        }
        if let Some(pid) = pid {
            self.p_to_v.insert(pid, vid);
            self.last_used.insert(pid, Instant::now());
        }
    }

    fn physical_for(&self, vid: i16) -> Option<i16> {
        self.v_to_p.get(&vid).copied().flatten()
    }

    fn remove_virtual(&mut self, vid: i16) -> Option<i16> {
        let pid = self.v_to_p.remove(&vid).flatten();
        if let Some(pid) = pid {
            self.p_to_v.remove(&pid);
            self.last_used.remove(&pid);
        }
        pid
    }

    fn touch(&mut self, pid: i16) {
        self.last_used.insert(pid, Instant::now());
    }

    fn lru_candidates(&self, n: usize) -> Vec<i16> {
        let mut entries: Vec<_> = self.last_used.iter().collect();
        entries.sort_by_key(|(_, ts)| **ts);
        entries.into_iter().take(n).map(|(pid, _)| *pid).collect()
    }

    fn evict(&mut self, pid: i16) {
        self.last_used.remove(&pid);
        if let Some(vid) = self.p_to_v.remove(&pid) {
            self.v_to_p.remove(&vid);
        }
    }
}

pub struct FfbHandle {
    stop: Arc<AtomicBool>,
}

impl FfbHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Starts the dedicated polling thread that owns the virtual device's
/// control descriptor for FFB servicing for the remainder of the run.
pub fn spawn(virtual_device: Arc<Mutex<VirtualDevice>>, physical: Arc<Mutex<Device>>, config: FfbConfig) -> FfbHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_thread = stop.clone();
    tokio::task::spawn_blocking(move || run(virtual_device, physical, config, stop_thread));
    FfbHandle { stop }
}

fn run(virtual_device: Arc<Mutex<VirtualDevice>>, physical: Arc<Mutex<Device>>, config: FfbConfig, stop: Arc<AtomicBool>) {
    let raw_fd = physical.lock().unwrap().as_raw_fd();
    initial_cleanup(raw_fd, &physical, &config);

    let mut map = EffectMap::default();
    let mut last_drain = Instant::now() - config.min_gap;

    while !stop.load(Ordering::Relaxed) {
        if last_drain.elapsed() < config.min_gap {
            thread::sleep(POLL_RATE);
            continue;
        }

        let events: Vec<_> = {
            let mut dev = virtual_device.lock().unwrap();
            match dev.fetch_events() {
                Ok(events) => events.collect(),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Vec::new(),
                Err(e) => {
                    log::warn!("failed to poll virtual device for FFB requests: {e}");
                    Vec::new()
                }
            }
        };

        if !events.is_empty() {
            last_drain = Instant::now();
        }

        for event in events {
            match event.destructure() {
                EventSummary::UInput(raw, UInputCode::UI_FF_UPLOAD, _) => {
                    let mut dev = virtual_device.lock().unwrap();
                    handle_upload(&mut dev, raw, raw_fd, &mut map);
                }
                EventSummary::UInput(raw, UInputCode::UI_FF_ERASE, _) => {
                    let mut dev = virtual_device.lock().unwrap();
                    handle_erase(&mut dev, raw_fd, raw, &mut map);
                }
                EventSummary::ForceFeedback(_, code, value) if code == FFEffectCode::FF_GAIN => {
                    mirror_raw(&physical, FFEffectCode::FF_GAIN.0, value.clamp(0, u16::MAX as i32));
                }
                EventSummary::ForceFeedback(_, code, value) if code == FFEffectCode::FF_AUTOCENTER => {
                    mirror_raw(&physical, FFEffectCode::FF_AUTOCENTER.0, value.clamp(0, u16::MAX as i32));
                }
                EventSummary::ForceFeedback(_, code, value) => {
                    mirror_play_stop(&physical, &map, code.0 as i16, value);
                }
                _ => {}
            }
        }

        thread::sleep(POLL_RATE);
    }
}

fn handle_upload(device: &mut VirtualDevice, raw: UInputEvent, raw_fd: RawFd, map: &mut EffectMap) {
    let mut upload = match device.process_ff_upload(raw) {
        Ok(upload) => upload,
        Err(e) => {
            log::warn!("ff upload begin ioctl failed: {e}");
            return;
        }
    };

    let vid = upload.effect_id();
    let mut data = upload.effect();
    let virtual_only = prepare_effect(&mut data);
    let reuse = map.physical_for(vid);

    if virtual_only {
        map.insert(vid, None);
        upload.set_retval(0);
        return;
    }

    match upload_with_eviction(raw_fd, map, data, reuse) {
        Ok(pid) => {
            map.insert(vid, Some(pid));
            upload.set_effect_id(pid);
            upload.set_retval(0);
        }
        Err(e) => {
            log::warn!("physical ff upload failed: {e}");
            upload.set_retval(-1);
        }
    }
}

fn handle_erase(device: &mut VirtualDevice, raw_fd: RawFd, raw: UInputEvent, map: &mut EffectMap) {
    let mut erase = match device.process_ff_erase(raw) {
        Ok(erase) => erase,
        Err(e) => {
            log::warn!("ff erase begin ioctl failed: {e}");
            return;
        }
    };

    let vid = erase.effect_id() as i16;
    if let Some(pid) = map.remove_virtual(vid) {
        // Benign errors (invalid id, already gone) are treated as success
        // for map cleanup purposes.
        let _ = with_timeout(ERASE_TIMEOUT, move || raw::erase(raw_fd, pid));
    }
    erase.set_retval(0);
}

/// Clamps and normalizes an effect prior to a physical upload. Returns
/// `true` if the effect is a zero-magnitude periodic that should be
/// recorded virtual-only without issuing a physical ioctl.
fn prepare_effect(data: &mut evdev::FFEffectData) -> bool {
    if data.replay.length == 0 {
        data.replay.length = 1;
    }
    match &mut data.kind {
        FFEffectKind::Periodic {
            magnitude,
            period,
            offset,
            ..
        } => {
            if *magnitude == 0 {
                return true;
            }
            *period = (*period).max(1);
            *magnitude = (*magnitude).clamp(1, 32767);
            *offset = (*offset).clamp(-32767, 32767);
        }
        FFEffectKind::Spring { .. } | FFEffectKind::Friction { .. } => {
            // Both condition-array entries are always populated by the
            // decoded effect; a source providing only one axis leaves the
            // other at its zeroed (safe) default.
        }
        _ => {}
    }
    false
}

fn upload_with_eviction(
    raw_fd: RawFd,
    map: &mut EffectMap,
    data: evdev::FFEffectData,
    reuse: Option<i16>,
) -> std::io::Result<i16> {
    match with_timeout(UPLOAD_TIMEOUT, move || raw::upload(raw_fd, &data, reuse)) {
        Ok(id) => {
            map.touch(id);
            Ok(id)
        }
        Err(e) if e.raw_os_error() == Some(libc::ENOSPC) => {
            for pid in map.lru_candidates(LRU_EVICTION_BATCH) {
                if with_timeout(ERASE_TIMEOUT, move || raw::erase(raw_fd, pid)).is_ok() {
                    map.evict(pid);
                }
            }
            let id = with_timeout(UPLOAD_TIMEOUT, move || raw::upload(raw_fd, &data, reuse))?;
            map.touch(id);
            Ok(id)
        }
        Err(e) => Err(e),
    }
}

fn mirror_play_stop(physical: &Mutex<Device>, map: &EffectMap, vid: i16, value: i32) {
    let Some(pid) = map.physical_for(vid) else {
        return;
    };
    let event = InputEvent::new(EventType::FORCEFEEDBACK.0, pid as u16, value);
    if let Err(e) = physical.lock().unwrap().send_events(std::slice::from_ref(&event)) {
        log::debug!("failed to mirror play/stop for physical effect {pid}: {e}");
    }
}

fn mirror_raw(physical: &Mutex<Device>, code: u16, value: i32) {
    let event = InputEvent::new(EventType::FORCEFEEDBACK.0, code, value);
    if let Err(e) = physical.lock().unwrap().send_events(std::slice::from_ref(&event)) {
        log::debug!("failed to mirror ff control code {code}: {e}");
    }
}

/// Erases physical effect slots left over from a previous run, then sets
/// the configured initial gain and autocenter percentages.
fn initial_cleanup(raw_fd: RawFd, physical: &Mutex<Device>, config: &FfbConfig) {
    for slot in 0..STARTUP_SLOTS {
        let _ = with_timeout(ERASE_TIMEOUT, move || raw::erase(raw_fd, slot));
    }
    let gain = percent_to_u16(config.initial_gain_percent);
    let autocenter = percent_to_u16(config.initial_autocenter_percent);
    mirror_raw(physical, FFEffectCode::FF_GAIN.0, gain as i32);
    mirror_raw(physical, FFEffectCode::FF_AUTOCENTER.0, autocenter as i32);
}

fn percent_to_u16(percent: u8) -> u16 {
    ((percent.min(100) as u32 * u16::MAX as u32) / 100) as u16
}

/// Wraps a blocking ioctl-style call on a dedicated worker thread so a
/// hung driver can't stall the whole FFB poll loop; the map is cleaned up
/// optimistically by the caller regardless of whether the worker returns
/// in time.
fn with_timeout<T: Send + 'static>(
    timeout: Duration,
    f: impl FnOnce() -> std::io::Result<T> + Send + 'static,
) -> std::io::Result<T> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "ioctl worker did not return in time")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_round_trips_virtual_and_physical_ids() {
        let mut map = EffectMap::default();
        map.insert(3, Some(10));
        assert_eq!(map.physical_for(3), Some(10));
        assert_eq!(map.remove_virtual(3), Some(10));
        assert_eq!(map.physical_for(3), None);
    }

    #[test]
    fn virtual_only_sentinel_short_circuits_erase() {
        let mut map = EffectMap::default();
        map.insert(7, None);
        assert_eq!(map.remove_virtual(7), None);
    }

    #[test]
    fn lru_candidates_are_oldest_first() {
        let mut map = EffectMap::default();
        map.insert(1, Some(100));
        thread::sleep(Duration::from_millis(2));
        map.insert(2, Some(101));
        let candidates = map.lru_candidates(1);
        assert_eq!(candidates, vec![100]);
    }

    #[test]
    fn zero_magnitude_periodic_is_virtual_only() {
        let mut data = evdev::FFEffectData {
            direction: 0,
            trigger: evdev::FFTrigger::default(),
            replay: evdev::FFReplay::default(),
            kind: FFEffectKind::Periodic {
                waveform: evdev::FFWaveform::Sine,
                period: 0,
                magnitude: 0,
                offset: 0,
                phase: 0,
                envelope: evdev::FFEnvelope {
                    attack_length: 0,
                    attack_level: 0,
                    fade_length: 0,
                    fade_level: 0,
                },
            },
        };
        assert!(prepare_effect(&mut data));
    }

    #[test]
    fn nonzero_periodic_clamps_into_range() {
        let mut data = evdev::FFEffectData {
            direction: 0,
            trigger: evdev::FFTrigger::default(),
            replay: evdev::FFReplay::default(),
            kind: FFEffectKind::Periodic {
                waveform: evdev::FFWaveform::Sine,
                period: 0,
                magnitude: 40000,
                offset: -40000,
                phase: 0,
                envelope: evdev::FFEnvelope {
                    attack_length: 0,
                    attack_level: 0,
                    fade_length: 0,
                    fade_level: 0,
                },
            },
        };
        assert!(!prepare_effect(&mut data));
        match data.kind {
            FFEffectKind::Periodic { period, magnitude, offset, .. } => {
                assert_eq!(period, 1);
                assert_eq!(magnitude, 32767);
                assert_eq!(offset, -32767);
            }
            _ => unreachable!(),
        }
    }
}
