//! A minimal re-implementation of the `EVIOCSFF`/`EVIOCRMFF` ioctls that
//! preserves the one capability the safe `evdev` upload API gives up: the
//! ability to pass an existing physical effect id back to the kernel and
//! have it update that slot in place instead of always allocating a new
//! one.
use std::os::fd::RawFd;

use evdev::{FFEffectData, FFEffectKind};
use nix::{ioctl_write_int, ioctl_write_ptr};

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct FfReplay {
    length: u16,
    delay: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct FfTrigger {
    button: u16,
    interval: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct FfEnvelope {
    attack_length: u16,
    attack_level: u16,
    fade_length: u16,
    fade_level: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct FfConstantEffect {
    level: i16,
    envelope: FfEnvelope,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct FfRampEffect {
    start_level: i16,
    end_level: i16,
    envelope: FfEnvelope,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct FfConditionEffect {
    right_saturation: u16,
    left_saturation: u16,
    right_coeff: i16,
    left_coeff: i16,
    deadband: u16,
    center: i16,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct FfPeriodicEffect {
    waveform: u16,
    period: u16,
    magnitude: i16,
    offset: i16,
    phase: u16,
    envelope: FfEnvelope,
    custom_len: u32,
    custom_data: *mut i16,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct FfRumbleEffect {
    strong_magnitude: u16,
    weak_magnitude: u16,
}

#[repr(C)]
#[derive(Clone, Copy)]
union FfEffectUnion {
    constant: FfConstantEffect,
    ramp: FfRampEffect,
    periodic: FfPeriodicEffect,
    condition: [FfConditionEffect; 2],
    rumble: FfRumbleEffect,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct FfEffect {
    type_: u16,
    id: i16,
    direction: u16,
    trigger: FfTrigger,
    replay: FfReplay,
    u: FfEffectUnion,
}

ioctl_write_ptr!(eviocsff, b'E', 0x80, FfEffect);
ioctl_write_int!(eviocrmff, b'E', 0x81);

fn effect_type(kind: &FFEffectKind) -> u16 {
    use evdev::FFEffectCode;
    let code = match kind {
        FFEffectKind::Damper => FFEffectCode::FF_DAMPER,
        FFEffectKind::Inertia => FFEffectCode::FF_INERTIA,
        FFEffectKind::Constant { .. } => FFEffectCode::FF_CONSTANT,
        FFEffectKind::Ramp { .. } => FFEffectCode::FF_RAMP,
        FFEffectKind::Periodic { .. } => FFEffectCode::FF_PERIODIC,
        FFEffectKind::Spring { .. } => FFEffectCode::FF_SPRING,
        FFEffectKind::Friction { .. } => FFEffectCode::FF_FRICTION,
        FFEffectKind::Rumble { .. } => FFEffectCode::FF_RUMBLE,
    };
    code.0
}

fn waveform_type(waveform: evdev::FFWaveform) -> u16 {
    use evdev::FFWaveform;
    use evdev::FFEffectCode;
    let code = match waveform {
        FFWaveform::Square => FFEffectCode::FF_SQUARE,
        FFWaveform::Triangle => FFEffectCode::FF_TRIANGLE,
        FFWaveform::Sine => FFEffectCode::FF_SINE,
        FFWaveform::SawUp => FFEffectCode::FF_SAW_UP,
        FFWaveform::SawDown => FFEffectCode::FF_SAW_DOWN,
    };
    code.0
}

fn to_raw(data: &FFEffectData, id: i16) -> FfEffect {
    let mut effect = FfEffect {
        type_: effect_type(&data.kind),
        id,
        direction: data.direction,
        trigger: FfTrigger {
            button: data.trigger.button,
            interval: data.trigger.interval,
        },
        replay: FfReplay {
            length: data.replay.length,
            delay: data.replay.delay,
        },
        u: FfEffectUnion {
            rumble: FfRumbleEffect::default(),
        },
    };

    match data.kind {
        FFEffectKind::Constant { level, envelope } => {
            effect.u.constant = FfConstantEffect {
                level,
                envelope: envelope.into_raw(),
            };
        }
        FFEffectKind::Ramp {
            start_level,
            end_level,
            envelope,
        } => {
            effect.u.ramp = FfRampEffect {
                start_level,
                end_level,
                envelope: envelope.into_raw(),
            };
        }
        FFEffectKind::Periodic {
            waveform,
            period,
            magnitude,
            offset,
            phase,
            envelope,
        } => {
            effect.u.periodic = FfPeriodicEffect {
                waveform: waveform_type(waveform),
                period,
                magnitude,
                offset,
                phase,
                envelope: envelope.into_raw(),
                custom_len: 0,
                custom_data: std::ptr::null_mut(),
            };
        }
        FFEffectKind::Spring { condition } | FFEffectKind::Friction { condition } => {
            effect.u.condition = [condition[0].into_raw(), condition[1].into_raw()];
        }
        FFEffectKind::Rumble {
            strong_magnitude,
            weak_magnitude,
        } => {
            effect.u.rumble = FfRumbleEffect {
                strong_magnitude,
                weak_magnitude,
            };
        }
        FFEffectKind::Damper | FFEffectKind::Inertia => {}
    }

    effect
}

trait IntoRawEnvelope {
    fn into_raw(self) -> FfEnvelope;
}

impl IntoRawEnvelope for evdev::FFEnvelope {
    fn into_raw(self) -> FfEnvelope {
        FfEnvelope {
            attack_length: self.attack_length,
            attack_level: self.attack_level,
            fade_length: self.fade_length,
            fade_level: self.fade_level,
        }
    }
}

trait IntoRawCondition {
    fn into_raw(self) -> FfConditionEffect;
}

impl IntoRawCondition for evdev::FFCondition {
    fn into_raw(self) -> FfConditionEffect {
        FfConditionEffect {
            right_saturation: self.right_saturation,
            left_saturation: self.left_saturation,
            right_coeff: self.right_coefficient,
            left_coeff: self.left_coefficient,
            deadband: self.deadband,
            center: self.center,
        }
    }
}

/// Uploads `data` to the physical device behind `fd`. When `reuse_id` is
/// `Some`, the kernel updates that slot in place instead of allocating a
/// new one. Returns the (possibly newly assigned) physical effect id.
pub fn upload(fd: RawFd, data: &FFEffectData, reuse_id: Option<i16>) -> std::io::Result<i16> {
    let effect = to_raw(data, reuse_id.unwrap_or(-1));
    unsafe { eviocsff(fd, &effect)? };
    Ok(effect.id)
}

/// Erases the physical effect slot `id` on the device behind `fd`.
pub fn erase(fd: RawFd, id: i16) -> std::io::Result<()> {
    unsafe { eviocrmff(fd, id as i32) }?;
    Ok(())
}
