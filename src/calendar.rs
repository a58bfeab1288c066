//! Trading calendar implementation

use crate::error::{PipelineError, Result};
use crate::types::{Session, Timestamp};
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use chrono_tz::Tz;

/// Trading calendar trait
pub trait TradingCalendar: Send + Sync {
    /// Get the timezone for this calendar
    fn timezone(&self) -> Tz;

    /// Check if a date is a trading day
    fn is_trading_day(&self, date: NaiveDate) -> bool;

    /// Get the next trading day after the given date
    fn next_trading_day(&self, date: NaiveDate) -> Result<NaiveDate> {
        let mut current = date + Duration::days(1);
        for _ in 0..365 {
            if self.is_trading_day(current) {
                return Ok(current);
            }
            current += Duration::days(1);
        }
        Err(PipelineError::CalendarError(format!(
            "No trading day found within 365 days after {}",
            date
        )))
    }

    /// Get the previous trading day before the given date
    fn previous_trading_day(&self, date: NaiveDate) -> Result<NaiveDate> {
        let mut current = date - Duration::days(1);
        for _ in 0..365 {
            if self.is_trading_day(current) {
                return Ok(current);
            }
            current -= Duration::days(1);
        }
        Err(PipelineError::CalendarError(format!(
            "No trading day found within 365 days before {}",
            date
        )))
    }

    /// Get all trading days between two dates (inclusive)
    fn trading_days_between(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        let mut days = Vec::new();
        let mut current = start;

        while current <= end {
            if self.is_trading_day(current) {
                days.push(current);
            }
            current += Duration::days(1);
        }

        days
    }

    /// The `count` sessions strictly before `date`, oldest first
    fn sessions_before(&self, date: NaiveDate, count: usize) -> Result<Vec<Session>> {
        let mut out = Vec::with_capacity(count);
        let mut current = date;
        for _ in 0..count {
            current = self.previous_trading_day(current)?;
            out.push(current);
        }
        out.reverse();
        Ok(out)
    }

    /// The session `n` sessions after `session` (n = 0 returns the next session on or after it)
    fn session_offset(&self, session: Session, n: usize) -> Result<Session> {
        let mut current = if self.is_trading_day(session) {
            session
        } else {
            self.next_trading_day(session)?
        };
        for _ in 0..n {
            current = self.next_trading_day(current)?;
        }
        Ok(current)
    }

    /// Session containing a UTC timestamp, using the calendar's local date
    fn session_of(&self, dt: Timestamp) -> Session {
        dt.with_timezone(&self.timezone()).date_naive()
    }
}

/// NYSE trading calendar
#[derive(Debug, Clone)]
pub struct NYSECalendar {
    /// Extra closures beyond the rule-based holidays
    extra_holidays: Vec<NaiveDate>,
}

impl NYSECalendar {
    /// Create a new NYSE calendar
    pub fn new() -> Self {
        Self {
            extra_holidays: Vec::new(),
        }
    }

    /// Add a custom holiday
    pub fn add_holiday(&mut self, date: NaiveDate) {
        if !self.extra_holidays.contains(&date) {
            self.extra_holidays.push(date);
            self.extra_holidays.sort();
        }
    }

    /// Check if date is a weekend
    fn is_weekend(date: NaiveDate) -> bool {
        matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// Rule-based NYSE holidays for a given year
    fn holidays(year: i32) -> Vec<NaiveDate> {
        let mut days = Vec::with_capacity(10);
        let mut push = |d: Option<NaiveDate>| {
            if let Some(d) = d {
                days.push(d);
            }
        };

        push(observed(NaiveDate::from_ymd_opt(year, 1, 1)));
        push(NaiveDate::from_weekday_of_month_opt(year, 1, Weekday::Mon, 3));
        push(NaiveDate::from_weekday_of_month_opt(year, 2, Weekday::Mon, 3));
        push(easter_sunday(year).map(|d| d - Duration::days(2)));
        push(last_weekday_of_month(year, 5, Weekday::Mon));
        if year >= 2022 {
            push(observed(NaiveDate::from_ymd_opt(year, 6, 19)));
        }
        push(observed(NaiveDate::from_ymd_opt(year, 7, 4)));
        push(NaiveDate::from_weekday_of_month_opt(year, 9, Weekday::Mon, 1));
        push(NaiveDate::from_weekday_of_month_opt(year, 11, Weekday::Thu, 4));
        push(observed(NaiveDate::from_ymd_opt(year, 12, 25)));
        days
    }
}

/// Saturday holidays are observed Friday, Sunday holidays Monday
fn observed(date: Option<NaiveDate>) -> Option<NaiveDate> {
    date.map(|d| match d.weekday() {
        Weekday::Sat => d - Duration::days(1),
        Weekday::Sun => d + Duration::days(1),
        _ => d,
    })
}

fn last_weekday_of_month(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    (1..=5)
        .rev()
        .find_map(|n| NaiveDate::from_weekday_of_month_opt(year, month, weekday, n))
}

/// Anonymous Gregorian computus
fn easter_sunday(year: i32) -> Option<NaiveDate> {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    NaiveDate::from_ymd_opt(year, month as u32, day as u32)
}

impl Default for NYSECalendar {
    fn default() -> Self {
        Self::new()
    }
}

impl TradingCalendar for NYSECalendar {
    fn timezone(&self) -> Tz {
        chrono_tz::America::New_York
    }

    fn is_trading_day(&self, date: NaiveDate) -> bool {
        !Self::is_weekend(date)
            && !self.extra_holidays.contains(&date)
            && !Self::holidays(date.year()).contains(&date)
    }
}

/// Monday-to-Friday calendar without holidays, handy for synthetic data
#[derive(Debug, Clone, Copy, Default)]
pub struct WeekdayCalendar;

impl TradingCalendar for WeekdayCalendar {
    fn timezone(&self) -> Tz {
        chrono_tz::UTC
    }

    fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_nyse_calendar() {
        let calendar = NYSECalendar::new();

        assert!(calendar.is_trading_day(d(2024, 1, 8)));
        assert!(!calendar.is_trading_day(d(2024, 1, 6)));
        assert!(!calendar.is_trading_day(d(2024, 1, 1)));
    }

    #[test]
    fn test_rule_based_holidays() {
        let calendar = NYSECalendar::new();
        // Good Friday 2024
        assert!(!calendar.is_trading_day(d(2024, 3, 29)));
        // Thanksgiving 2023
        assert!(!calendar.is_trading_day(d(2023, 11, 23)));
        // Independence Day 2026 falls on Saturday, observed Friday
        assert!(!calendar.is_trading_day(d(2026, 7, 3)));
        // Juneteenth before it became a market holiday
        assert!(calendar.is_trading_day(d(2020, 6, 19)));
    }

    #[test]
    fn test_next_trading_day() {
        let calendar = NYSECalendar::new();
        let next = calendar.next_trading_day(d(2024, 1, 5)).unwrap();
        assert_eq!(next, d(2024, 1, 8));
    }

    #[test]
    fn test_trading_days_between() {
        let calendar = NYSECalendar::new();
        let days = calendar.trading_days_between(d(2024, 1, 8), d(2024, 1, 12));
        assert_eq!(days.len(), 5);
    }

    #[test]
    fn test_sessions_before() {
        let calendar = WeekdayCalendar;
        let days = calendar.sessions_before(d(2024, 1, 8), 3).unwrap();
        assert_eq!(days, vec![d(2024, 1, 3), d(2024, 1, 4), d(2024, 1, 5)]);
        assert!(calendar.sessions_before(d(2024, 1, 8), 0).unwrap().is_empty());
    }

    #[test]
    fn test_session_offset() {
        let calendar = WeekdayCalendar;
        assert_eq!(calendar.session_offset(d(2024, 1, 6), 0).unwrap(), d(2024, 1, 8));
        assert_eq!(calendar.session_offset(d(2024, 1, 5), 1).unwrap(), d(2024, 1, 8));
    }

    #[test]
    fn test_session_of_uses_local_date() {
        let calendar = NYSECalendar::new();
        // 02:00 UTC is still the previous evening in New York
        let dt = chrono::Utc.with_ymd_and_hms(2024, 1, 9, 2, 0, 0).unwrap();
        assert_eq!(calendar.session_of(dt), d(2024, 1, 8));
    }
}
