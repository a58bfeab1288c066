//! Core types and constants

use chrono::{DateTime, NaiveDate, Utc};

/// Timestamp type used throughout the library
pub type Timestamp = DateTime<Utc>;

/// A trading session, identified by its calendar date
pub type Session = NaiveDate;

/// Unique identifier for assets
pub type AssetId = u64;

/// Nanoseconds since the Unix epoch, the storage unit for datetime cells
pub type Nanos = i64;

/// "Not a time": the missing value for datetime cells
pub const NAT: Nanos = i64::MIN;

/// Convert a session to nanoseconds at midnight UTC
pub fn session_to_nanos(session: Session) -> Nanos {
    session
        .and_hms_opt(0, 0, 0)
        .and_then(|dt| dt.and_utc().timestamp_nanos_opt())
        .unwrap_or(NAT)
}

/// Convert nanoseconds back to a timestamp, `None` for `NAT`
pub fn nanos_to_timestamp(nanos: Nanos) -> Option<Timestamp> {
    if nanos == NAT {
        None
    } else {
        Some(DateTime::from_timestamp_nanos(nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_nanos_roundtrip() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let nanos = session_to_nanos(day);
        assert_ne!(nanos, NAT);
        assert_eq!(nanos_to_timestamp(nanos).unwrap().date_naive(), day);
    }

    #[test]
    fn test_nat_has_no_timestamp() {
        assert!(nanos_to_timestamp(NAT).is_none());
    }
}
