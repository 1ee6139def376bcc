//! Runtime configuration: an optional YAML file in the teacher's
//! load-with-size-cap style, overridable by CLI flags.
pub mod path;

use std::io::Read;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coalesce::HatMode;
use crate::virtual_device::FfMode;

const MAX_CONFIG_SIZE: usize = 512 * 1024;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to deserialize {path}: {source}")]
    Deserialize {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("config file {0} exceeds maximum size of {1} bytes")]
    TooLarge(String, usize),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VirtualIdentity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u16>,
}

/// The full set of run-time tunables, loadable from YAML and overridable by
/// CLI flags in [`crate::cli::Args`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Explicit event-node path for the wheel; `None` triggers
    /// name-substring auto-selection.
    pub wheel_path: Option<PathBuf>,
    /// Explicit event-node path for the shifter; `None` disables shifter
    /// input entirely (a wheel alone is a valid configuration).
    pub shift_path: Option<PathBuf>,
    pub axes_mapping: Option<PathBuf>,
    pub buttons_mapping: Option<PathBuf>,
    pub gear_file: Option<PathBuf>,
    pub grab: bool,
    pub ff_mode: FfMode,
    pub ff_ignore: Vec<String>,
    pub hat_mode: HatMode,
    pub virtual_identity: VirtualIdentity,
    pub ffb_min_gap_ms: u64,
    pub initial_gain_percent: u8,
    pub initial_autocenter_percent: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wheel_path: None,
            shift_path: None,
            axes_mapping: None,
            buttons_mapping: None,
            gear_file: None,
            grab: true,
            ff_mode: FfMode::Easy,
            ff_ignore: Vec::new(),
            hat_mode: HatMode::Priority,
            virtual_identity: VirtualIdentity::default(),
            ffb_min_gap_ms: 2,
            initial_gain_percent: 100,
            initial_autocenter_percent: 100,
        }
    }
}

impl Config {
    /// Loads a config from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Config, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Loads a config from a YAML file, reading at most
    /// [`MAX_CONFIG_SIZE`] bytes to bound a malformed/huge file.
    pub fn from_yaml_file(path: &std::path::Path) -> Result<Config, LoadError> {
        let file = std::fs::File::open(path).map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut reader = file.take(MAX_CONFIG_SIZE as u64);
        let mut content = String::new();
        let bytes_read = reader.read_to_string(&mut content).map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if bytes_read == MAX_CONFIG_SIZE {
            return Err(LoadError::TooLarge(path.display().to_string(), MAX_CONFIG_SIZE));
        }
        Self::from_yaml(&content).map_err(|source| LoadError::Deserialize {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_ff_mode_easy() {
        let config = Config::default();
        assert_eq!(config.ff_mode, FfMode::Easy);
        assert!(config.grab);
    }

    #[test]
    fn parses_partial_yaml_with_defaults() {
        let config = Config::from_yaml("grab: false\nff_mode: full\n").unwrap();
        assert!(!config.grab);
        assert_eq!(config.ff_mode, FfMode::Full);
        assert_eq!(config.hat_mode, HatMode::Priority);
    }
}
