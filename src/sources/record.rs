//! Graphite raw-format decoder
//!
//! One line per series:
//! `<target>,<start_epoch>,<end_epoch>,<step>|<v1>,<v2>,...`

use serde::{Deserialize, Serialize};

/// Longest slice of offending input quoted in a [`DecodeError`]
const PREVIEW_LEN: usize = 30;

/// Malformed wire-format response
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("Unable to parse graphite record: missing '|' in {0:?}")]
    MissingSeparator(String),

    #[error("Unable to parse graphite record: bad metadata in {0:?}")]
    Metadata(String),
}

fn preview(input: &str) -> String {
    if input.chars().count() <= PREVIEW_LEN {
        return input.to_string();
    }
    let head: String = input.chars().take(PREVIEW_LEN).collect();
    format!("{head}..")
}

/// Which reduction of a record is fed to the rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    #[default]
    Average,
    LastValue,
    Sum,
    Minimum,
    Maximum,
}

impl std::str::FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "average" => Ok(Method::Average),
            "last_value" => Ok(Method::LastValue),
            "sum" => Ok(Method::Sum),
            "minimum" => Ok(Method::Minimum),
            "maximum" => Ok(Method::Maximum),
            other => Err(format!("unknown method {other:?}")),
        }
    }
}

/// How missing-value sentinels are handled while decoding
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NanPolicy {
    /// Sentinel value Graphite reports for gaps
    pub default_nan_value: f64,
    /// Drop values equal to the sentinel
    pub ignore_nan: bool,
}

/// One decoded series
#[derive(Debug, Clone, PartialEq)]
pub struct GraphiteRecord {
    pub target: String,
    pub start_time: i64,
    pub end_time: i64,
    pub step: i64,
    pub values: Vec<f64>,
}

impl GraphiteRecord {
    pub fn parse(line: &str, policy: NanPolicy) -> Result<Self, DecodeError> {
        let (meta, data) = line
            .split_once('|')
            .ok_or_else(|| DecodeError::MissingSeparator(preview(line)))?;

        let mut parts = meta.rsplitn(4, ',');
        let step = parts.next();
        let end_time = parts.next();
        let start_time = parts.next();
        let target = parts.next();

        let (Some(target), Some(start_time), Some(end_time), Some(step)) =
            (target, start_time, end_time, step)
        else {
            return Err(DecodeError::Metadata(preview(line)));
        };

        let int = |s: &str| {
            s.trim()
                .parse::<i64>()
                .map_err(|_| DecodeError::Metadata(preview(line)))
        };

        let values = data
            .trim_end()
            .split(',')
            .filter_map(|token| token.trim().parse::<f64>().ok())
            .filter(|v| !(policy.ignore_nan && *v == policy.default_nan_value))
            .collect();

        Ok(Self {
            target: target.to_string(),
            start_time: int(start_time)?,
            end_time: int(end_time)?,
            step: int(step)?,
            values,
        })
    }

    /// Decode every non-blank line of a response body
    pub fn parse_all(body: &str, policy: NanPolicy) -> Result<Vec<Self>, DecodeError> {
        body.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| Self::parse(line, policy))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn sum(&self) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        Some(self.values.iter().sum())
    }

    pub fn average(&self) -> Option<f64> {
        self.sum().map(|sum| sum / self.values.len() as f64)
    }

    pub fn last_value(&self) -> Option<f64> {
        self.values.last().copied()
    }

    pub fn minimum(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::min)
    }

    pub fn maximum(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::max)
    }

    /// Reduce to a single value; `None` for an empty record
    pub fn reduce(&self, method: Method) -> Option<f64> {
        match method {
            Method::Average => self.average(),
            Method::LastValue => self.last_value(),
            Method::Sum => self.sum(),
            Method::Minimum => self.minimum(),
            Method::Maximum => self.maximum(),
        }
    }
}
