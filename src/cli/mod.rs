//! The command-line surface: a default `run` that starts the bridge, plus a
//! `list-devices` helper for picking `--wheel`/`--shift` paths.
pub mod device;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::coalesce::HatMode;
use crate::config::Config;
use crate::virtual_device::FfMode;

#[derive(Parser, Debug)]
#[command(author, version, about = "Force-feedback wheel and shifter bridge", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Commands>,

    /// Optional YAML config file; CLI flags override values it sets.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Explicit event-node path for the wheel (skips name-substring
    /// auto-selection).
    #[arg(long)]
    pub wheel: Option<PathBuf>,

    /// Explicit event-node path for the shifter.
    #[arg(long)]
    pub shift: Option<PathBuf>,

    /// Tab-separated axes mapping file.
    #[arg(long)]
    pub axes_mapping: Option<PathBuf>,

    /// Tab-separated buttons mapping file.
    #[arg(long)]
    pub buttons_mapping: Option<PathBuf>,

    /// Gear definition file for H-pattern shifters.
    #[arg(long)]
    pub gear_file: Option<PathBuf>,

    /// Don't exclusively grab the physical devices.
    #[arg(long)]
    pub no_grab: bool,

    /// Force-feedback advertisement policy on the virtual device.
    #[arg(long, value_enum)]
    pub ff_mode: Option<FfModeArg>,

    /// Disable force-feedback advertisement entirely (equivalent to
    /// `--ff-mode none`).
    #[arg(long)]
    pub no_ff: bool,

    /// FF feature codes (name or number) to drop from advertisement, may
    /// be given more than once.
    #[arg(long = "ff-ignore")]
    pub ff_ignore: Vec<String>,

    /// Hat coalescing policy for multi-source HAT axes.
    #[arg(long, value_enum)]
    pub mapping_mode: Option<HatModeArg>,

    /// Override the virtual device's advertised name.
    #[arg(long)]
    pub virtual_name: Option<String>,

    /// Override the virtual device's advertised vendor id (hex or decimal).
    #[arg(long)]
    pub virtual_vendor: Option<String>,

    /// Override the virtual device's advertised product id (hex or
    /// decimal).
    #[arg(long)]
    pub virtual_product: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the bridge (default when no subcommand is given).
    Run,
    /// List accessible input devices and their resolved identity.
    ListDevices,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum FfModeArg {
    Easy,
    Full,
    None,
}

impl From<FfModeArg> for FfMode {
    fn from(value: FfModeArg) -> Self {
        match value {
            FfModeArg::Easy => FfMode::Easy,
            FfModeArg::Full => FfMode::Full,
            FfModeArg::None => FfMode::None,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum HatModeArg {
    Priority,
    Last,
}

impl From<HatModeArg> for HatMode {
    fn from(value: HatModeArg) -> Self {
        match value {
            HatModeArg::Priority => HatMode::Priority,
            HatModeArg::Last => HatMode::Last,
        }
    }
}

/// Parses a vendor/product id given as `0x`-prefixed hex or plain decimal.
fn parse_u16(s: &str) -> Option<u16> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

/// Folds CLI flags on top of a loaded (or default) [`Config`]; flags always
/// win over the config file since they're the more specific override.
pub fn apply_overrides(mut config: Config, args: &Args) -> Config {
    if let Some(path) = &args.wheel {
        config.wheel_path = Some(path.clone());
    }
    if let Some(path) = &args.shift {
        config.shift_path = Some(path.clone());
    }
    if let Some(path) = &args.axes_mapping {
        config.axes_mapping = Some(path.clone());
    }
    if let Some(path) = &args.buttons_mapping {
        config.buttons_mapping = Some(path.clone());
    }
    if let Some(path) = &args.gear_file {
        config.gear_file = Some(path.clone());
    }
    if args.no_grab {
        config.grab = false;
    }
    if args.no_ff {
        config.ff_mode = FfMode::None;
    } else if let Some(mode) = args.ff_mode {
        config.ff_mode = mode.into();
    }
    if !args.ff_ignore.is_empty() {
        config.ff_ignore = args.ff_ignore.clone();
    }
    if let Some(mode) = args.mapping_mode {
        config.hat_mode = mode.into();
    }
    if let Some(name) = &args.virtual_name {
        config.virtual_identity.name = Some(name.clone());
    }
    if let Some(vendor) = &args.virtual_vendor {
        match parse_u16(vendor) {
            Some(v) => config.virtual_identity.vendor = Some(v),
            None => log::warn!("ignoring unparsable --virtual-vendor {vendor:?}"),
        }
    }
    if let Some(product) = &args.virtual_product {
        match parse_u16(product) {
            Some(v) => config.virtual_identity.product = Some(v),
            None => log::warn!("ignoring unparsable --virtual-product {product:?}"),
        }
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_ff_wins_over_explicit_ff_mode() {
        let args = Args {
            cmd: None,
            config: None,
            wheel: None,
            shift: None,
            axes_mapping: None,
            buttons_mapping: None,
            gear_file: None,
            no_grab: false,
            ff_mode: Some(FfModeArg::Full),
            no_ff: true,
            ff_ignore: Vec::new(),
            mapping_mode: None,
            virtual_name: None,
            virtual_vendor: None,
            virtual_product: None,
        };
        let config = apply_overrides(Config::default(), &args);
        assert_eq!(config.ff_mode, FfMode::None);
    }

    #[test]
    fn parses_hex_vendor_override() {
        assert_eq!(parse_u16("0x045e"), Some(0x045e));
        assert_eq!(parse_u16("1118"), Some(1118));
    }
}
