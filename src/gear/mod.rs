//! Normalizes a set of physical shifter buttons into a single gear
//! indication (`BTN_0..BTN_N`, or a neutral key) for games that expect a
//! sequential gearbox rather than raw H-pattern button combinations.
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use evdev::KeyCode;
use thiserror::Error;

use crate::ecode::resolve_key_code;

#[derive(Debug, Error)]
pub enum GearError {
    #[error("failed to read gear file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("gear file {path} line {line}: could not resolve code {code:?}")]
    UnresolvedCode {
        path: String,
        line: usize,
        code: String,
    },
}

/// The normalized key emitted when no gear's required set is satisfied
/// and no explicit neutral set is pressed either.
pub const GEAR_DEAD_KEY: KeyCode = KeyCode::BTN_DEAD;

#[derive(Debug, Clone)]
struct GearDef {
    required: Vec<u16>,
}

/// Parses and tracks the currently-held gear from a set of monitored
/// source key codes, per the `Gk: code [code ...]` / `Gk = code [...]`
/// gear definition file format.
#[derive(Debug)]
pub struct GearMapper {
    gears: Vec<GearDef>,
    neutral: Option<Vec<u16>>,
    pressed: HashMap<u16, bool>,
    monitored: HashSet<u16>,
    current: Option<usize>,
}

impl GearMapper {
    pub fn from_file(path: &Path) -> Result<Self, GearError> {
        let content = fs::read_to_string(path).map_err(|source| GearError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let mut gears: Vec<(usize, Vec<u16>)> = Vec::new();
        let mut neutral = None;
        let mut monitored = HashSet::new();

        for (lineno, raw_line) in content.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((label, rest)) = split_label(line) else {
                continue;
            };

            let codes: Result<Vec<u16>, GearError> = rest
                .split_whitespace()
                .map(|tok| {
                    resolve_key_code(tok).map(|c| c.0).ok_or_else(|| GearError::UnresolvedCode {
                        path: path.display().to_string(),
                        line: lineno + 1,
                        code: tok.to_string(),
                    })
                })
                .collect();
            let codes = codes?;
            monitored.extend(codes.iter().copied());

            let upper = label.to_uppercase();
            if upper == "NEUTRAL" {
                neutral = Some(codes);
            } else if let Some(index) = upper.strip_prefix('G').and_then(|n| n.parse::<usize>().ok()) {
                gears.push((index, codes));
            }
        }

        gears.sort_by_key(|(index, _)| *index);
        let gears = gears.into_iter().map(|(_, required)| GearDef { required }).collect();

        Ok(Self {
            gears,
            neutral,
            pressed: HashMap::new(),
            monitored,
            current: None,
        })
    }

    pub fn monitors(&self, code: u16) -> bool {
        self.monitored.contains(&code)
    }

    /// Records a key transition for a monitored source code and
    /// recomputes the current gear. Only the lowest-indexed gear whose
    /// full required set is pressed is selected; with none satisfied,
    /// an explicitly pressed neutral set is reported, otherwise neutral
    /// is implicit.
    pub fn set_pressed(&mut self, code: u16, pressed: bool) {
        if !self.monitored.contains(&code) {
            return;
        }
        self.pressed.insert(code, pressed);
        self.current = self.gears.iter().position(|g| self.all_pressed(&g.required));
    }

    fn all_pressed(&self, required: &[u16]) -> bool {
        !required.is_empty() && required.iter().all(|c| *self.pressed.get(c).unwrap_or(&false))
    }

    /// Returns the normalized key that should currently be held down:
    /// `BTN_0 + gear_index` for an engaged gear, or [`GEAR_DEAD_KEY`] for
    /// neutral (explicit or implicit).
    pub fn normalized_key(&self) -> KeyCode {
        match self.current {
            Some(index) => KeyCode::new(KeyCode::BTN_0.0 + index as u16),
            None => GEAR_DEAD_KEY,
        }
    }

    pub fn is_neutral_explicit(&self) -> bool {
        self.current.is_none()
            && self
                .neutral
                .as_ref()
                .is_some_and(|required| self.all_pressed(required))
    }
}

fn split_label(line: &str) -> Option<(&str, &str)> {
    if let Some(idx) = line.find(':') {
        return Some((line[..idx].trim(), line[idx + 1..].trim()));
    }
    if let Some(idx) = line.find('=') {
        return Some((line[..idx].trim(), line[idx + 1..].trim()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_tmp(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parses_colon_and_equals_forms() {
        let file = write_tmp("G1: BTN_SOUTH\nG2 = BTN_SOUTH BTN_EAST\nNEUTRAL: BTN_TOP\n");
        let mapper = GearMapper::from_file(file.path()).unwrap();
        assert_eq!(mapper.gears.len(), 2);
        assert_eq!(mapper.gears[1].required.len(), 2);
    }

    #[test]
    fn lowest_indexed_satisfied_gear_wins() {
        let file = write_tmp("G1: BTN_SOUTH\nG2: BTN_SOUTH BTN_EAST\n");
        let mut mapper = GearMapper::from_file(file.path()).unwrap();
        let a = resolve_key_code("BTN_SOUTH").unwrap().0;
        let b = resolve_key_code("BTN_EAST").unwrap().0;
        mapper.set_pressed(a, true);
        mapper.set_pressed(b, true);
        assert_eq!(mapper.normalized_key(), KeyCode::BTN_0);
    }

    #[test]
    fn no_match_is_neutral() {
        let file = write_tmp("G1: BTN_SOUTH BTN_EAST\n");
        let mut mapper = GearMapper::from_file(file.path()).unwrap();
        let a = resolve_key_code("BTN_SOUTH").unwrap().0;
        mapper.set_pressed(a, true);
        assert_eq!(mapper.normalized_key(), GEAR_DEAD_KEY);
    }

    #[test]
    fn explicit_neutral_is_reported_when_pressed() {
        let file = write_tmp("G1: BTN_SOUTH\nNEUTRAL: BTN_TOP\n");
        let mut mapper = GearMapper::from_file(file.path()).unwrap();
        let top = resolve_key_code("BTN_TOP").unwrap().0;
        mapper.set_pressed(top, true);
        assert!(mapper.is_neutral_explicit());
    }
}
