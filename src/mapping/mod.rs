//! Loads the tab-separated axis/button mapping files and derives the
//! routing tables the event pump consults on every input event.
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use evdev::{AbsoluteAxisCode, KeyCode};
use thiserror::Error;

use crate::ecode::{resolve_abs_code, resolve_key_code};

/// Fixed virtual axis ordering; group index `i` in the axes TSV binds to
/// `VIRTUAL_AXES_ORDER[i]`. Groups beyond this length are ignored.
pub const VIRTUAL_AXES_ORDER: &[AbsoluteAxisCode] = &[
    AbsoluteAxisCode::ABS_X,
    AbsoluteAxisCode::ABS_Y,
    AbsoluteAxisCode::ABS_Z,
    AbsoluteAxisCode::ABS_RX,
    AbsoluteAxisCode::ABS_RY,
    AbsoluteAxisCode::ABS_RZ,
    AbsoluteAxisCode::ABS_HAT0X,
    AbsoluteAxisCode::ABS_HAT0Y,
    AbsoluteAxisCode::ABS_THROTTLE,
    AbsoluteAxisCode::ABS_RUDDER,
];

/// Fixed virtual button ordering; group index `i` in the buttons TSV binds
/// to `VIRTUAL_BUTTONS_ORDER[i]`.
pub const VIRTUAL_BUTTONS_ORDER: &[KeyCode] = &[
    KeyCode::BTN_SOUTH,
    KeyCode::BTN_EAST,
    KeyCode::BTN_NORTH,
    KeyCode::BTN_WEST,
    KeyCode::BTN_TL,
    KeyCode::BTN_TR,
    KeyCode::BTN_SELECT,
    KeyCode::BTN_START,
    KeyCode::BTN_MODE,
    KeyCode::BTN_THUMBL,
    KeyCode::BTN_THUMBR,
    KeyCode::BTN_TRIGGER,
    KeyCode::BTN_THUMB,
    KeyCode::BTN_THUMB2,
    KeyCode::BTN_TOP,
    KeyCode::BTN_TOP2,
    KeyCode::BTN_PINKIE,
    KeyCode::BTN_BASE,
    KeyCode::BTN_BASE2,
    KeyCode::BTN_BASE3,
    KeyCode::BTN_BASE4,
    KeyCode::BTN_BASE5,
    KeyCode::BTN_BASE6,
    KeyCode::BTN_0,
    KeyCode::BTN_1,
    KeyCode::BTN_2,
    KeyCode::BTN_3,
    KeyCode::BTN_4,
    KeyCode::BTN_5,
    KeyCode::BTN_6,
    KeyCode::BTN_7,
    KeyCode::BTN_8,
    KeyCode::BTN_9,
    KeyCode::BTN_DEAD,
];

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("failed to read mapping file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// The three roles a physical device can be tagged with in a mapping row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Wheel,
    Shift,
    Pad,
}

impl Role {
    fn parse(s: &str) -> Option<Role> {
        match s.trim().to_lowercase().as_str() {
            "wheel" => Some(Role::Wheel),
            "shift" => Some(Role::Shift),
            "pad" => Some(Role::Pad),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Wheel => "wheel",
            Role::Shift => "shift",
            Role::Pad => "pad",
        };
        write!(f, "{s}")
    }
}

/// A source is identified by its role and its native event code, as a raw
/// `u16` so axis and key sources share one map key type.
pub type SourceKey = (Role, u16);

#[derive(Debug, Clone, Copy)]
pub struct RowOptions {
    pub reverse: bool,
}

fn parse_options(cell: &str) -> RowOptions {
    let mut reverse = false;
    for token in cell.split_whitespace() {
        match token.to_uppercase().as_str() {
            "REVERSE" | "INV" | "INVERT" | "INVERTED" => reverse = true,
            _ => {}
        }
    }
    RowOptions { reverse }
}

#[derive(Debug, Clone, Copy)]
struct ParsedRow {
    source: SourceKey,
    group_id: usize,
    options: RowOptions,
}

/// Parses one tab-separated mapping file into blank-line-delimited groups
/// of rows. Lines are padded to guarantee enough columns, `#`/`#?` lines
/// (comments and unchosen exporter suggestions) are skipped, and any row
/// whose role column doesn't parse is logged and skipped as a
/// column-misalignment rather than aborting the whole file.
fn parse_mapping_tsv(path: &Path) -> Result<Vec<Vec<ParsedRow>>, MappingError> {
    let content = fs::read_to_string(path).map_err(|source| MappingError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let mut groups = Vec::new();
    let mut current = Vec::new();
    let mut group_id = 0usize;

    for raw_line in content.lines() {
        let line = format!("{raw_line}\t\t\t\t\t");
        if line.trim().is_empty() {
            if !current.is_empty() {
                groups.push(std::mem::take(&mut current));
                group_id += 1;
            }
            continue;
        }
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') {
            // Covers both plain comments and `#?` exporter suggestion rows.
            continue;
        }

        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 8 {
            continue;
        }

        let src_type = cols[3].trim().to_uppercase();
        let role = match Role::parse(cols[2]) {
            Some(role) => role,
            None => {
                log::error!(
                    "column-misalignment in {}: unrecognized role {:?}",
                    path.display(),
                    cols[2]
                );
                continue;
            }
        };

        let code_name = if !cols[5].trim().is_empty() {
            cols[5]
        } else {
            cols[4]
        };
        let code = match src_type.as_str() {
            "ABS" => resolve_abs_code(code_name).map(|c| c.0),
            "KEY" => resolve_key_code(code_name).map(|c| c.0),
            other => {
                log::warn!("unknown source type {other:?} in {}", path.display());
                None
            }
        };
        let Some(code) = code else {
            log::warn!(
                "could not resolve source code {:?} in {}",
                code_name,
                path.display()
            );
            continue;
        };

        let options = parse_options(cols.get(8).copied().unwrap_or(""));
        current.push(ParsedRow {
            source: (role, code),
            group_id,
            options,
        });
    }
    if !current.is_empty() {
        groups.push(current);
    }
    Ok(groups)
}

#[derive(Debug, Default, Clone)]
pub struct RoutingTables {
    pub virt_to_sources: HashMap<u16, Vec<SourceKey>>,
    pub source_to_virts: HashMap<SourceKey, Vec<u16>>,
    pub abs_src_to_virt: HashMap<SourceKey, AbsoluteAxisCode>,
    pub key_src_to_virt: HashMap<SourceKey, KeyCode>,
    pub options: HashMap<SourceKey, RowOptions>,
}

impl RoutingTables {
    pub fn is_reversed(&self, source: SourceKey) -> bool {
        self.options.get(&source).is_some_and(|o| o.reverse)
    }
}

/// Builds the full set of routing tables from an optional axes file and an
/// optional buttons file.
pub fn build_routing(
    axes_path: Option<&Path>,
    buttons_path: Option<&Path>,
) -> Result<RoutingTables, MappingError> {
    let axes_groups = match axes_path {
        Some(p) => parse_mapping_tsv(p)?,
        None => Vec::new(),
    };
    let button_groups = match buttons_path {
        Some(p) => parse_mapping_tsv(p)?,
        None => Vec::new(),
    };

    let mut tables = RoutingTables::default();

    for (i, group) in axes_groups.iter().enumerate() {
        if i >= VIRTUAL_AXES_ORDER.len() {
            break;
        }
        let vcode = VIRTUAL_AXES_ORDER[i];
        let mut sources = Vec::new();
        for row in group {
            sources.push(row.source);
            tables
                .source_to_virts
                .entry(row.source)
                .or_default()
                .push(vcode.0);
            tables.abs_src_to_virt.insert(row.source, vcode);
            tables.options.insert(row.source, row.options);
        }
        tables.virt_to_sources.insert(vcode.0, sources);
    }

    for (i, group) in button_groups.iter().enumerate() {
        if i >= VIRTUAL_BUTTONS_ORDER.len() {
            break;
        }
        let vcode = VIRTUAL_BUTTONS_ORDER[i];
        let mut sources = Vec::new();
        for row in group {
            sources.push(row.source);
            tables
                .source_to_virts
                .entry(row.source)
                .or_default()
                .push(vcode.0);
            tables.key_src_to_virt.insert(row.source, vcode);
            tables.options.insert(row.source, row.options);
        }
        tables.virt_to_sources.insert(vcode.0, sources);
    }

    Ok(tables)
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
    fn groups_produce_sequential_virtual_indices() {
        let contents = "a\tb\twheel\tABS\tABS_X\t0\tABS_X\t-1\t\n\
                         a\tb\tshift\tABS\tABS_Y\t1\tABS_Y\t-1\t\n\
                         \n\
                         a\tb\twheel\tABS\tABS_RZ\t5\tABS_RZ\t-1\tREVERSE\n";
        let file = write_tmp(contents);
        let groups = parse_mapping_tsv(file.path()).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[1].len(), 1);
        assert!(groups[1][0].options.reverse);
    }

    #[test]
    fn unknown_role_is_skipped() {
        let contents = "a\tb\tbogus\tABS\tABS_X\t0\tABS_X\t-1\t\n";
        let file = write_tmp(contents);
        let groups = parse_mapping_tsv(file.path()).unwrap();
        assert!(groups.is_empty());
    }

    #[test]
    fn suggestion_rows_are_skipped_like_comments() {
        let contents = "#? a\tb\twheel\tABS\tABS_X\t0\tABS_X\t-1\t\n\
                         a\tb\twheel\tABS\tABS_Y\t1\tABS_Y\t-1\t\n";
        let file = write_tmp(contents);
        let groups = parse_mapping_tsv(file.path()).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 1);
        assert_eq!(groups[0][0].source.1, 1);
    }

    #[test]
    fn same_group_sources_share_virtual_code() {
        let contents = "a\tb\twheel\tABS\tABS_X\t0\tABS_X\t-1\t\n\
                         a\tb\tshift\tABS\tABS_X\t3\tABS_X\t-1\t\n";
        let file = write_tmp(contents);
        let tables = build_routing(Some(file.path()), None).unwrap();
        let wheel_virt = tables.abs_src_to_virt[&(Role::Wheel, 0)];
        let shift_virt = tables.abs_src_to_virt[&(Role::Shift, 3)];
        assert_eq!(wheel_virt, shift_virt);
    }
}
