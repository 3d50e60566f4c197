//! Durations and value magnitudes

pub mod format;
pub mod interval;

pub use format::{format_value, from_format, plain_number, unit_factor, Format};
pub use interval::{Interval, InvalidDuration, TimeUnit};
