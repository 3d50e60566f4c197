//! Time magnitudes with a unit granularity
//!
//! Units are constant-width: a month is always 30 days and a year 365 days.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Add;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

/// Granularity of an [`Interval`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl TimeUnit {
    /// All units, coarsest first
    pub const DESCENDING: [TimeUnit; 8] = [
        TimeUnit::Year,
        TimeUnit::Month,
        TimeUnit::Week,
        TimeUnit::Day,
        TimeUnit::Hour,
        TimeUnit::Minute,
        TimeUnit::Second,
        TimeUnit::Millisecond,
    ];

    /// Milliseconds in one unit
    pub fn millis(self) -> f64 {
        match self {
            TimeUnit::Millisecond => 1.0,
            TimeUnit::Second => 1_000.0,
            TimeUnit::Minute => 60_000.0,
            TimeUnit::Hour => 3_600_000.0,
            TimeUnit::Day => 86_400_000.0,
            TimeUnit::Week => 604_800_000.0,
            TimeUnit::Month => 2_592_000_000.0,
            TimeUnit::Year => 31_536_000_000.0,
        }
    }

    /// Long name, as used in configuration and display
    pub fn name(self) -> &'static str {
        match self {
            TimeUnit::Millisecond => "millisecond",
            TimeUnit::Second => "second",
            TimeUnit::Minute => "minute",
            TimeUnit::Hour => "hour",
            TimeUnit::Day => "day",
            TimeUnit::Week => "week",
            TimeUnit::Month => "month",
            TimeUnit::Year => "year",
        }
    }

    /// Suffix understood by the Graphite render API. Graphite has no
    /// millisecond unit.
    fn wire_suffix(self) -> Option<&'static str> {
        match self {
            TimeUnit::Millisecond => None,
            TimeUnit::Second => Some("s"),
            TimeUnit::Minute => Some("min"),
            TimeUnit::Hour => Some("h"),
            TimeUnit::Day => Some("d"),
            TimeUnit::Week => Some("w"),
            TimeUnit::Month => Some("mon"),
            TimeUnit::Year => Some("y"),
        }
    }

    /// Resolve a long name or short alias
    pub fn from_token(token: &str) -> Option<TimeUnit> {
        let unit = match token {
            "ms" | "millisecond" => TimeUnit::Millisecond,
            "s" | "second" => TimeUnit::Second,
            "m" | "minute" => TimeUnit::Minute,
            "h" | "hour" => TimeUnit::Hour,
            "d" | "day" => TimeUnit::Day,
            "w" | "week" => TimeUnit::Week,
            "M" | "month" => TimeUnit::Month,
            "y" | "year" => TimeUnit::Year,
            _ => return None,
        };
        Some(unit)
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Malformed or negative duration text
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Invalid duration {input:?}: {reason}")]
pub struct InvalidDuration {
    pub input: String,
    pub reason: &'static str,
}

impl InvalidDuration {
    fn new(input: &str, reason: &'static str) -> Self {
        Self {
            input: input.to_string(),
            reason,
        }
    }
}

/// A non-negative amount of time in a given unit
#[derive(Debug, Clone, Copy)]
pub struct Interval {
    value: f64,
    unit: TimeUnit,
}

fn interval_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?P<value>-?\d*\.?\d*)(?P<unit>[A-Za-z]+)\s*$")
            .expect("interval pattern is valid")
    })
}

impl Interval {
    pub fn new(value: f64, unit: TimeUnit) -> Result<Self, InvalidDuration> {
        if !value.is_finite() {
            return Err(InvalidDuration::new(&format!("{value}{unit}"), "not a finite number"));
        }
        if value < 0.0 {
            return Err(InvalidDuration::new(
                &format!("{value}{unit}"),
                "negative durations are not supported",
            ));
        }
        Ok(Self { value, unit })
    }

    /// Parse text such as `10minute`, `1.5h` or `0s`
    pub fn parse(text: &str) -> Result<Self, InvalidDuration> {
        let caps = interval_regex()
            .captures(text)
            .ok_or_else(|| InvalidDuration::new(text, "expected a number followed by a unit"))?;

        let unit = TimeUnit::from_token(&caps["unit"])
            .ok_or_else(|| InvalidDuration::new(text, "unknown time unit"))?;
        let value: f64 = caps["value"]
            .parse()
            .map_err(|_| InvalidDuration::new(text, "magnitude is not a number"))?;

        if value < 0.0 {
            return Err(InvalidDuration::new(text, "negative durations are not supported"));
        }

        Ok(Self { value, unit })
    }

    /// Build from a plain number of seconds
    pub fn from_secs_f64(secs: f64) -> Result<Self, InvalidDuration> {
        Self::new(secs, TimeUnit::Second)
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    pub fn as_millis(&self) -> f64 {
        self.value * self.unit.millis()
    }

    /// Magnitude of this interval expressed in `unit`
    pub fn convert_to(&self, unit: TimeUnit) -> f64 {
        convert(self.value, self.unit, unit)
    }

    /// `std` duration for timers. Fails when the value does not fit.
    pub fn as_std(&self) -> Result<Duration, InvalidDuration> {
        Duration::try_from_secs_f64(self.as_millis() / 1000.0).map_err(|_| InvalidDuration {
            input: self.to_string(),
            reason: "too large for a timer",
        })
    }

    /// Subtract `other`, keeping this interval's unit. `None` if the result
    /// would be negative.
    pub fn checked_sub(&self, other: &Interval) -> Option<Interval> {
        let millis = self.as_millis() - other.as_millis();
        if millis < 0.0 {
            return None;
        }
        Some(Interval {
            value: millis / self.unit.millis(),
            unit: self.unit,
        })
    }

    /// Render for the Graphite `from`/`until` parameters.
    ///
    /// Sub-second precision is dropped and the coarsest unit that still
    /// yields an integer is chosen.
    pub fn to_wire_format(&self) -> String {
        let millis = (self.as_millis() / 1000.0).round_ties_even() * 1000.0;

        if millis == 0.0 {
            let unit = match self.unit {
                TimeUnit::Millisecond => TimeUnit::Second,
                unit => unit,
            };
            return format!("0{}", unit.wire_suffix().unwrap_or("s"));
        }

        for unit in TimeUnit::DESCENDING {
            let Some(suffix) = unit.wire_suffix() else {
                continue;
            };
            let value = millis / unit.millis();
            if value.fract() == 0.0 {
                return format!("{}{}", value as i64, suffix);
            }
        }

        // whole seconds always divide evenly
        format!("{}s", (millis / 1000.0) as i64)
    }

    fn display_value(&self) -> String {
        if self.value.fract() == 0.0 {
            format!("{}", self.value as i64)
        } else {
            format!("{}", self.value)
        }
    }
}

/// Convert a magnitude between units
pub fn convert(value: f64, from: TimeUnit, to: TimeUnit) -> f64 {
    value * from.millis() / to.millis()
}

impl From<Duration> for Interval {
    fn from(duration: Duration) -> Self {
        Interval {
            value: duration.as_secs_f64(),
            unit: TimeUnit::Second,
        }
    }
}

impl FromStr for Interval {
    type Err = InvalidDuration;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::parse(s)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.display_value(), self.unit)
    }
}

impl Add for Interval {
    type Output = Interval;

    fn add(self, other: Interval) -> Interval {
        let millis = self.as_millis() + other.as_millis();
        Interval {
            value: millis / self.unit.millis(),
            unit: self.unit,
        }
    }
}

impl PartialEq for Interval {
    fn eq(&self, other: &Self) -> bool {
        self.as_millis() == other.as_millis()
    }
}

impl PartialOrd for Interval {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.as_millis().partial_cmp(&other.as_millis())
    }
}
