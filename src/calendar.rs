//! Bi-weekly settlement calendar.
//!
//! Settlement dates are every second Friday counted from a fixed anchor Friday.
//! Everything here is pure date arithmetic so both the ledger and the processor can
//! compute the same dates without coordinating.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use thiserror::Error;

/// Anchor used when none is configured: Friday 2024-01-05.
pub fn default_anchor() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 5).expect("2024-01-05 is a valid date")
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CalendarError {
    #[error("settlement anchor {0} is not a Friday")]
    AnchorNotFriday(NaiveDate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementCalendar {
    anchor: NaiveDate,
}

impl Default for SettlementCalendar {
    fn default() -> Self {
        Self {
            anchor: default_anchor(),
        }
    }
}

impl SettlementCalendar {
    pub fn new(anchor: NaiveDate) -> Result<Self, CalendarError> {
        if anchor.weekday() != Weekday::Fri {
            return Err(CalendarError::AnchorNotFriday(anchor));
        }
        Ok(Self { anchor })
    }

    pub fn anchor(&self) -> NaiveDate {
        self.anchor
    }

    /// True when `date` is a Friday an even number of weeks away from the anchor.
    /// Works for dates before the anchor as well.
    pub fn is_settlement_date(&self, date: NaiveDate) -> bool {
        if date.weekday() != Weekday::Fri {
            return false;
        }
        let weeks = (date - self.anchor).num_days() / 7;
        weeks.rem_euclid(2) == 0
    }

    /// First settlement date on or after `from`.
    pub fn next_settlement_date(&self, from: NaiveDate) -> NaiveDate {
        let days_to_friday = (Weekday::Fri.num_days_from_monday() as i64
            - from.weekday().num_days_from_monday() as i64)
            .rem_euclid(7);
        let friday = from + Duration::days(days_to_friday);
        if self.is_settlement_date(friday) {
            friday
        } else {
            friday + Duration::days(7)
        }
    }
}
