//! Pipeline Domain - Asset universe definitions
//!
//! A domain lists the assets a pipeline may see and when each of them trades.
//! The engine turns those lifetimes into the root mask of a run.

use crate::error::Result;
use crate::types::{AssetId, Session};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Trading lifetime of one asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetLifetime {
    pub sid: AssetId,
    /// First date the asset traded; its first row of data is visible the session after
    pub start_date: Session,
    /// Last date the asset traded (inclusive)
    pub end_date: Session,
}

impl AssetLifetime {
    pub fn new(sid: AssetId, start_date: Session, end_date: Session) -> Self {
        Self {
            sid,
            start_date,
            end_date,
        }
    }

    /// Whether the asset belongs in the cross-section computed for `session`
    pub fn is_alive(&self, session: Session) -> bool {
        self.start_date < session && session <= self.end_date
    }
}

/// Trait for defining asset universes
pub trait Domain: Send + Sync + fmt::Debug {
    /// Human-readable name
    fn name(&self) -> &str;

    /// Country code for this domain (e.g., "US", "GB")
    fn country_code(&self) -> Option<&str> {
        None
    }

    fn lifetimes(&self) -> &[AssetLifetime];

    /// Assets alive on at least one of `sessions` (ascending sid order) and
    /// the `sessions x assets` mask of which are alive when
    fn lifetimes_mask(&self, sessions: &[Session]) -> (Vec<AssetId>, Array2<bool>) {
        let mut alive: Vec<&AssetLifetime> = self
            .lifetimes()
            .iter()
            .filter(|l| sessions.iter().any(|&s| l.is_alive(s)))
            .collect();
        alive.sort_by_key(|l| l.sid);
        alive.dedup_by_key(|l| l.sid);
        let sids: Vec<AssetId> = alive.iter().map(|l| l.sid).collect();
        let mask = Array2::from_shape_fn((sessions.len(), alive.len()), |(r, c)| alive[c].is_alive(sessions[r]));
        (sids, mask)
    }
}

/// Universe of equities with known lifetimes
#[derive(Debug, Clone)]
pub struct EquityUniverse {
    name: String,
    country_code: Option<String>,
    lifetimes: Vec<AssetLifetime>,
}

impl EquityUniverse {
    pub fn new(name: impl Into<String>, country_code: Option<String>, lifetimes: Vec<AssetLifetime>) -> Self {
        Self {
            name: name.into(),
            country_code,
            lifetimes,
        }
    }

    /// Create US equity universe
    pub fn us(lifetimes: Vec<AssetLifetime>) -> Self {
        Self::new("US_EQUITIES", Some("US".to_string()), lifetimes)
    }

    /// Load lifetimes from CSV with columns `sid,start_date,end_date`
    pub fn from_csv(name: impl Into<String>, path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let lifetimes = reader
            .deserialize::<AssetLifetime>()
            .collect::<std::result::Result<Vec<_>, _>>()?;
        log::debug!("loaded {} asset lifetimes from {}", lifetimes.len(), path.display());
        Ok(Self::new(name, None, lifetimes))
    }

    pub fn add(&mut self, lifetime: AssetLifetime) {
        self.lifetimes.push(lifetime);
    }

    pub fn len(&self) -> usize {
        self.lifetimes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lifetimes.is_empty()
    }
}

impl Domain for EquityUniverse {
    fn name(&self) -> &str {
        &self.name
    }

    fn country_code(&self) -> Option<&str> {
        self.country_code.as_deref()
    }

    fn lifetimes(&self) -> &[AssetLifetime] {
        &self.lifetimes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Write;

    fn d(day: u32) -> Session {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn test_start_date_excluded_end_date_included() {
        let life = AssetLifetime::new(1, d(3), d(5));
        assert!(!life.is_alive(d(3)));
        assert!(life.is_alive(d(4)));
        assert!(life.is_alive(d(5)));
        assert!(!life.is_alive(d(8)));
    }

    #[test]
    fn test_lifetimes_mask_drops_dead_assets() {
        let universe = EquityUniverse::us(vec![
            AssetLifetime::new(7, d(1), d(31)),
            AssetLifetime::new(3, d(3), d(4)),
            AssetLifetime::new(9, d(20), d(31)),
        ]);
        let sessions = vec![d(3), d(4), d(5)];
        let (sids, mask) = universe.lifetimes_mask(&sessions);
        assert_eq!(sids, vec![3, 7]);
        assert_eq!(mask.column(0).to_vec(), vec![false, true, false]);
        assert!(mask.column(1).iter().all(|&m| m));
        assert_eq!(universe.country_code(), Some("US"));
    }

    #[test]
    fn test_from_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "sid,start_date,end_date").unwrap();
        writeln!(file, "1,2024-01-02,2024-12-31").unwrap();
        writeln!(file, "2,2024-02-01,2024-06-28").unwrap();
        let universe = EquityUniverse::from_csv("TEST", file.path()).unwrap();
        assert_eq!(universe.len(), 2);
        assert_eq!(universe.lifetimes()[1].end_date, NaiveDate::from_ymd_opt(2024, 6, 28).unwrap());
    }
}
