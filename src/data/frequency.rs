//! Data frequency of the surrounding simulation

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Data frequency enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFrequency {
    /// Daily bars; pipeline output for a day includes that day's close
    #[default]
    Daily,
    /// Minute bars; pipeline output for a day covers the prior complete day
    Minute,
}

impl DataFrequency {
    /// Number of sessions between a simulated day and the pipeline row it reads
    pub fn session_offset(&self) -> usize {
        match self {
            DataFrequency::Daily => 1,
            DataFrequency::Minute => 0,
        }
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            DataFrequency::Daily => "daily",
            DataFrequency::Minute => "minute",
        }
    }
}

impl FromStr for DataFrequency {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "daily" | "d" | "1d" => Ok(DataFrequency::Daily),
            "minute" | "min" | "1min" | "1m" => Ok(DataFrequency::Minute),
            _ => Err(PipelineError::ParseError(format!("Invalid data frequency: {}", s))),
        }
    }
}

impl fmt::Display for DataFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
