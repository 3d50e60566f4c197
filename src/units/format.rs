//! Value magnitudes: byte, bit, bitrate, short-scale, time and percent
//!
//! Rule literals such as `30MB` are converted to base units with
//! [`from_format`]; notification messages render values back with
//! [`format_value`].

use std::fmt;

use serde::{Deserialize, Serialize};

const BYTES: &[(&str, f64)] = &[
    ("TB", 1_099_511_627_776.0),
    ("GB", 1_073_741_824.0),
    ("MB", 1_048_576.0),
    ("KB", 1_024.0),
];

const BITS: &[(&str, f64)] = &[
    ("Tb", 1_099_511_627_776.0),
    ("Gb", 1_073_741_824.0),
    ("Mb", 1_048_576.0),
    ("Kb", 1_024.0),
];

const BITRATE: &[(&str, f64)] = &[
    ("Gbps", 1_000_000_000.0),
    ("Mbps", 1_000_000.0),
    ("Kbps", 1_000.0),
];

const SHORT: &[(&str, f64)] = &[
    ("Tri", 1_000_000_000_000.0),
    ("Bil", 1_000_000_000.0),
    ("Mil", 1_000_000.0),
    ("K", 1_000.0),
];

const SECONDS: &[(&str, f64)] = &[
    ("y", 31_536_000.0),
    ("M", 2_592_000.0),
    ("w", 604_800.0),
    ("d", 86_400.0),
    ("h", 3_600.0),
    ("m", 60.0),
    ("s", 1.0),
    ("ms", 0.001),
];

const MILLISECONDS: &[(&str, f64)] = &[
    ("y", 31_536_000_000.0),
    ("M", 2_592_000_000.0),
    ("w", 604_800_000.0),
    ("d", 86_400_000.0),
    ("h", 3_600_000.0),
    ("m", 60_000.0),
    ("s", 1_000.0),
    ("ms", 1.0),
];

const PERCENT: &[(&str, f64)] = &[("%", 1.0)];

/// How values of an alert are rendered in messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Format {
    Bytes,
    Bits,
    Bitrate,
    Short,
    Seconds,
    Milliseconds,
    Percent,
    /// Print the number as is
    Raw,
}

impl Format {
    fn table(self) -> &'static [(&'static str, f64)] {
        match self {
            Format::Bytes => BYTES,
            Format::Bits => BITS,
            Format::Bitrate => BITRATE,
            Format::Short => SHORT,
            Format::Seconds => SECONDS,
            Format::Milliseconds => MILLISECONDS,
            Format::Percent => PERCENT,
            Format::Raw => &[],
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Format::Bytes => "bytes",
            Format::Bits => "bits",
            Format::Bitrate => "bps",
            Format::Short => "short",
            Format::Seconds => "s",
            Format::Milliseconds => "ms",
            Format::Percent => "percent",
            Format::Raw => "raw",
        }
    }
}

impl TryFrom<String> for Format {
    type Error = String;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        let format = match name.as_str() {
            "bytes" => Format::Bytes,
            "bits" => Format::Bits,
            "bps" => Format::Bitrate,
            "short" => Format::Short,
            "s" => Format::Seconds,
            "ms" => Format::Milliseconds,
            "percent" => Format::Percent,
            "raw" => Format::Raw,
            other => return Err(format!("unknown format {other:?}")),
        };
        Ok(format)
    }
}

impl From<Format> for String {
    fn from(format: Format) -> Self {
        format.as_str().to_string()
    }
}

impl Default for Format {
    fn default() -> Self {
        Format::Short
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Base-unit multiplier for a magnitude suffix used in rules.
///
/// Time suffixes are expressed in seconds.
pub fn unit_factor(unit: &str) -> Option<f64> {
    [BYTES, BITS, BITRATE, SHORT, SECONDS, PERCENT]
        .iter()
        .flat_map(|table| table.iter())
        .find(|(name, _)| *name == unit)
        .map(|(_, factor)| *factor)
}

/// Convert `value` given in `unit` to base units
pub fn from_format(value: f64, unit: &str) -> Option<f64> {
    unit_factor(unit).map(|factor| value * factor)
}

/// Render `value` with the largest unit strictly below it
pub fn format_value(value: f64, format: Format) -> String {
    let Some((name, size)) = format
        .table()
        .iter()
        .find(|(_, size)| *size < value)
    else {
        return plain_number(value);
    };

    if *size == 1.0 {
        return format!("{}{}", plain_number(value), name);
    }

    let scaled = format!("{:.1}", value / size);
    let scaled = scaled.trim_end_matches('0').trim_end_matches('.');
    format!("{scaled}{name}")
}

/// Integral values print without a fractional part
pub fn plain_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
