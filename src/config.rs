//! Engine and scheduler configuration

use crate::data::frequency::DataFrequency;
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for pipeline scheduling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sessions in the first chunk of the default schedule
    pub default_first_chunk: usize,
    /// Sessions in every later chunk of the default schedule
    pub default_chunk: usize,
    /// Frequency of the surrounding simulation
    pub data_frequency: DataFrequency,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_first_chunk: 5,
            default_chunk: 126,
            data_frequency: DataFrequency::Daily,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_first_chunk == 0 || self.default_chunk == 0 {
            return Err(PipelineError::ConfigError(format!(
                "Chunk lengths must be positive (default_first_chunk={}, default_chunk={})",
                self.default_first_chunk, self.default_chunk
            )));
        }
        Ok(())
    }
}

/// How many sessions to compute per pipeline pass
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ChunkSpec {
    /// The configured default schedule
    #[default]
    Default,
    /// Every chunk has the same length
    Fixed(usize),
    /// Explicit lengths; the last one repeats once exhausted
    Custom(Vec<usize>),
}

impl ChunkSpec {
    /// Iterator over chunk lengths; zero-length entries are bumped to one
    pub fn lengths(&self, config: &EngineConfig) -> ChunkLengths {
        let (head, tail) = match self {
            ChunkSpec::Default => (vec![config.default_first_chunk], config.default_chunk),
            ChunkSpec::Fixed(n) => (Vec::new(), *n),
            ChunkSpec::Custom(v) => (v.clone(), v.last().copied().unwrap_or(config.default_chunk)),
        };
        ChunkLengths { head, pos: 0, tail }
    }
}

impl From<usize> for ChunkSpec {
    fn from(n: usize) -> Self {
        ChunkSpec::Fixed(n)
    }
}

impl From<Vec<usize>> for ChunkSpec {
    fn from(v: Vec<usize>) -> Self {
        ChunkSpec::Custom(v)
    }
}

/// Endless sequence of chunk lengths
#[derive(Debug, Clone)]
pub struct ChunkLengths {
    head: Vec<usize>,
    pos: usize,
    tail: usize,
}

impl Iterator for ChunkLengths {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let raw = if self.pos < self.head.len() {
            self.head[self.pos]
        } else {
            self.tail
        };
        self.pos += 1;
        if raw == 0 {
            log::warn!("Chunk length 0 treated as 1");
        }
        Some(raw.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_schedule() {
        let config = EngineConfig::default();
        let lengths: Vec<usize> = ChunkSpec::Default.lengths(&config).take(3).collect();
        assert_eq!(lengths, vec![5, 126, 126]);
    }

    #[test]
    fn test_custom_schedule_repeats_last_and_bumps_zero() {
        let config = EngineConfig::default();
        let lengths: Vec<usize> = ChunkSpec::Custom(vec![2, 0, 3]).lengths(&config).take(5).collect();
        assert_eq!(lengths, vec![2, 1, 3, 3, 3]);
        let fixed: Vec<usize> = ChunkSpec::from(1).lengths(&config).take(2).collect();
        assert_eq!(fixed, vec![1, 1]);
    }

    #[test]
    fn test_from_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            default_chunk = 21
            data_frequency = "minute"
            "#,
        )
        .unwrap();
        assert_eq!(config.default_first_chunk, 5);
        assert_eq!(config.default_chunk, 21);
        assert_eq!(config.data_frequency, DataFrequency::Minute);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            EngineConfig::from_toml_str("default_chunk = 0"),
            Err(PipelineError::ConfigError(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("data_frequency = \"hourly\""),
            Err(PipelineError::TomlError(_))
        ));
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "default_first_chunk = 3").unwrap();
        let config = EngineConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.default_first_chunk, 3);
    }
}
