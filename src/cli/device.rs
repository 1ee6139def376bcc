//! `list-devices`: enumerates accessible input devices and renders their
//! resolved identity and hidraw sibling as a table.
use tabled::settings::{Panel, Style};
use tabled::{Table, Tabled};

use crate::device::{enumerate, find_hidraw_sibling, guess_role};

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Vendor")]
    vendor: String,
    #[tabled(rename = "Product")]
    product: String,
    #[tabled(rename = "Guessed Role")]
    role: String,
    #[tabled(rename = "HID Raw")]
    hidraw: String,
}

/// Prints a table of every accessible `/dev/input/event*` node, its
/// identity, a guessed role (for picking `--wheel`/`--shift`), and its
/// sibling hidraw node if one was found.
pub fn list_devices() {
    let mut rows: Vec<DeviceRow> = enumerate()
        .into_iter()
        .map(|info| DeviceRow {
            path: info.path.display().to_string(),
            name: info.name.clone(),
            vendor: format!("{:04x}", info.vendor),
            product: format!("{:04x}", info.product),
            role: guess_role(&info.name).map(|r| r.to_string()).unwrap_or_else(|| "-".to_string()),
            hidraw: find_hidraw_sibling(&info.path)
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    rows.sort_by(|a, b| a.path.cmp(&b.path));

    let mut table = Table::new(rows);
    table.with(Style::modern_rounded()).with(Panel::header("Input Devices"));
    println!("{table}");
}
