//! Human readable numbers for labels and legends.

use byte_unit::{Byte, UnitType};

use crate::{
    series::Sample,
    spec::{Format, Kind},
};

/// Format `value` for display.
#[must_use]
pub fn value(value: f64, format: Format) -> String {
    match format {
        Format::Plain => plain(value),
        Format::Bytes => bytes(value),
        Format::Percent => format!("{}%", plain(value)),
    }
}

/// Format the latest sample of a field for its legend entry. Counter rates are
/// suffixed `/s`, a gap is shown as `-`.
#[must_use]
pub fn legend(sample: Sample, kind: Kind, format: Format) -> String {
    let Some(sample) = sample else {
        return "-".to_string();
    };
    let text = value(sample, format);
    match kind {
        Kind::Gauge => text,
        Kind::Counter => format!("{text}/s"),
    }
}

fn plain(value: f64) -> String {
    let magnitude = value.abs();
    if magnitude >= 1e9 {
        format!("{:.1}G", value / 1e9)
    } else if magnitude >= 1e6 {
        format!("{:.1}M", value / 1e6)
    } else if magnitude >= 1e4 {
        format!("{:.1}k", value / 1e3)
    } else if value.fract().abs() < f64::EPSILON {
        format!("{value:.0}")
    } else if magnitude >= 10.0 {
        format!("{value:.1}")
    } else {
        format!("{value:.2}")
    }
}

fn bytes(value: f64) -> String {
    let sign = if value < 0.0 { "-" } else { "" };
    match Byte::from_f64(value.abs()) {
        Some(byte) => {
            let adjusted = byte.get_appropriate_unit(UnitType::Binary);
            format!("{sign}{adjusted:.1}")
        }
        None => plain(value),
    }
}
