//! Bidirectional lookup between symbolic evdev code names and the
//! [`AbsoluteAxisCode`]/[`KeyCode`]/[`FFEffectCode`] newtypes evdev expects.
use evdev::{AbsoluteAxisCode, FFEffectCode, KeyCode};

/// Resolves an axis given either a bare number, an `ABS_*` name, or a
/// hex/decimal numeric string.
pub fn resolve_abs_code(code_or_name: &str) -> Option<AbsoluteAxisCode> {
    let s = code_or_name.trim();
    if let Ok(n) = s.parse::<u16>() {
        return Some(AbsoluteAxisCode(n));
    }
    let upper = normalize(s);
    if let Some(tail) = upper.strip_prefix("ABS_") {
        if let Ok(n) = tail.parse::<u16>() {
            return Some(AbsoluteAxisCode(n));
        }
    }
    abs_code_by_name(&upper)
}

/// Resolves a key given a bare number, a `0x`-prefixed hex string, or a
/// `KEY_*`/`BTN_*` name. Absorbs `BTN0` -> `BTN_0` style drift and
/// collapses repeated underscores, mirroring hand-edited mapping files.
pub fn resolve_key_code(code_or_name: &str) -> Option<KeyCode> {
    let s = code_or_name.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        if let Ok(n) = u16::from_str_radix(hex, 16) {
            return Some(KeyCode::new(n));
        }
    }
    if let Ok(n) = s.parse::<u16>() {
        return Some(KeyCode::new(n));
    }

    let mut normalized = normalize(s);
    if normalized.starts_with("BTN") && !normalized.starts_with("BTN_") {
        let tail = &normalized[3..];
        if tail.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            normalized = format!("BTN_{tail}");
        }
    }
    key_code_by_name(&normalized)
}

/// Resolves a force-feedback feature code given a bare number or an
/// `FF_*` name, used for the `--ff-ignore` CLI option.
pub fn resolve_ff_code(code_or_name: &str) -> Option<FFEffectCode> {
    let s = code_or_name.trim();
    if let Ok(n) = s.parse::<u16>() {
        return Some(FFEffectCode(n));
    }
    ff_code_by_name(&normalize(s))
}

fn normalize(s: &str) -> String {
    let mut out = s.to_uppercase().replace('-', "_");
    while out.contains("__") {
        out = out.replace("__", "_");
    }
    out
}

/// A hand-written slice rather than a generated table: the set of names a
/// mapping file realistically contains is small, and evdev's own code
/// tables aren't publicly enumerable in a `const`-friendly form.
macro_rules! abs_table {
    ($($name:ident),* $(,)?) => {
        fn abs_code_by_name(name: &str) -> Option<AbsoluteAxisCode> {
            match name {
                $(stringify!($name) => Some(AbsoluteAxisCode::$name),)*
                _ => None,
            }
        }
    };
}

abs_table!(
    ABS_X, ABS_Y, ABS_Z, ABS_RX, ABS_RY, ABS_RZ, ABS_THROTTLE, ABS_RUDDER, ABS_WHEEL, ABS_GAS,
    ABS_BRAKE, ABS_HAT0X, ABS_HAT0Y, ABS_HAT1X, ABS_HAT1Y, ABS_HAT2X, ABS_HAT2Y, ABS_HAT3X,
    ABS_HAT3Y, ABS_PRESSURE, ABS_DISTANCE, ABS_TILT_X, ABS_TILT_Y, ABS_MISC,
);

macro_rules! key_table {
    ($($name:ident),* $(,)?) => {
        fn key_code_by_name(name: &str) -> Option<KeyCode> {
            match name {
                $(stringify!($name) => Some(KeyCode::$name),)*
                _ => None,
            }
        }
    };
}

key_table!(
    BTN_0,
    BTN_1,
    BTN_2,
    BTN_3,
    BTN_4,
    BTN_5,
    BTN_6,
    BTN_7,
    BTN_8,
    BTN_9,
    BTN_SOUTH,
    BTN_EAST,
    BTN_NORTH,
    BTN_WEST,
    BTN_TL,
    BTN_TR,
    BTN_TL2,
    BTN_TR2,
    BTN_SELECT,
    BTN_START,
    BTN_MODE,
    BTN_THUMBL,
    BTN_THUMBR,
    BTN_TRIGGER,
    BTN_THUMB,
    BTN_THUMB2,
    BTN_TOP,
    BTN_TOP2,
    BTN_PINKIE,
    BTN_BASE,
    BTN_BASE2,
    BTN_BASE3,
    BTN_BASE4,
    BTN_BASE5,
    BTN_BASE6,
    BTN_DEAD,
    BTN_GEAR_DOWN,
    BTN_GEAR_UP,
    KEY_A,
    KEY_B,
    KEY_C,
    KEY_D,
    KEY_E,
    KEY_F,
    KEY_ESC,
    KEY_ENTER,
    KEY_SPACE,
);

macro_rules! ff_table {
    ($($name:ident),* $(,)?) => {
        fn ff_code_by_name(name: &str) -> Option<FFEffectCode> {
            match name {
                $(stringify!($name) => Some(FFEffectCode::$name),)*
                _ => None,
            }
        }
    };
}

ff_table!(
    FF_CONSTANT,
    FF_RAMP,
    FF_SPRING,
    FF_FRICTION,
    FF_DAMPER,
    FF_RUMBLE,
    FF_INERTIA,
    FF_PERIODIC,
    FF_SQUARE,
    FF_TRIANGLE,
    FF_SINE,
    FF_SAW_UP,
    FF_SAW_DOWN,
    FF_GAIN,
    FF_AUTOCENTER,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_numeric_abs() {
        assert_eq!(resolve_abs_code("0"), Some(AbsoluteAxisCode::ABS_X));
    }

    #[test]
    fn resolves_named_abs() {
        assert_eq!(resolve_abs_code("ABS_RZ"), Some(AbsoluteAxisCode::ABS_RZ));
    }

    #[test]
    fn resolves_abs_numeric_suffix() {
        assert_eq!(resolve_abs_code("ABS_2"), Some(AbsoluteAxisCode::ABS_Z));
    }

    #[test]
    fn absorbs_dash_and_repeated_underscore() {
        assert_eq!(
            resolve_key_code("BTN--SOUTH"),
            Some(KeyCode::BTN_SOUTH)
        );
    }

    #[test]
    fn absorbs_btn_digit_without_underscore() {
        assert_eq!(resolve_key_code("BTN0"), Some(KeyCode::BTN_0));
    }

    #[test]
    fn resolves_hex_key() {
        assert_eq!(resolve_key_code("0x130"), Some(KeyCode::new(0x130)));
    }

    #[test]
    fn unknown_name_resolves_to_none() {
        assert_eq!(resolve_key_code("NOT_A_REAL_CODE"), None);
    }

    #[test]
    fn resolves_named_ff_code() {
        assert_eq!(resolve_ff_code("FF_RUMBLE"), Some(FFEffectCode::FF_RUMBLE));
    }
}
