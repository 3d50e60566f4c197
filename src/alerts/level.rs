//! Alert severity levels

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Severity of a target or a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Critical,
    Warning,
    Normal,
    NoData,
}

impl Level {
    pub const ALL: [Level; 4] = [Level::Critical, Level::Warning, Level::Normal, Level::NoData];

    /// Sort key, most severe first
    pub fn rank(self) -> u8 {
        match self {
            Level::Critical => 0,
            Level::Warning => 10,
            Level::Normal => 20,
            Level::NoData => 30,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Level::Critical => "critical",
            Level::Warning => "warning",
            Level::Normal => "normal",
            Level::NoData => "no_data",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Level::Critical),
            "warning" => Ok(Level::Warning),
            "normal" => Ok(Level::Normal),
            "no_data" => Ok(Level::NoData),
            other => Err(format!("unknown level {other:?}")),
        }
    }
}
