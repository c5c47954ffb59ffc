use std::ops::RangeInclusive;

use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;

use crate::error::{SummaryError, SummaryResult};

/// Years accepted for reference dates and explicit months.
pub const YEARS: RangeInclusive<i32> = 1..=9999;

/// Inclusive date range covered by a summary row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Period {
    pub fn day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Monday-to-Sunday week containing `reference`. Reference dates come through
/// [`parse_date`], which keeps them inside [`YEARS`].
pub fn week_bounds(reference: NaiveDate) -> Period {
    let start = reference - Duration::days(i64::from(reference.weekday().num_days_from_monday()));
    let week = Period {
        start,
        end: start + Duration::days(6),
    };
    debug_assert!(week.contains(reference));
    week
}

/// Calendar month containing `reference`.
pub fn month_bounds(reference: NaiveDate) -> Period {
    let start = reference - Duration::days(i64::from(reference.day0()));
    // Last valid day among 31, 30, 29, 28. Nothing past the month is ever built,
    // so chrono's final month resolves too.
    let end = (28..=31)
        .rev()
        .find_map(|day| NaiveDate::from_ymd_opt(reference.year(), reference.month(), day))
        .unwrap_or(reference);
    let month = Period { start, end };
    debug_assert!(month.contains(reference));
    month
}

/// Calendar month given explicitly, for user-selected custom periods.
pub fn month_bounds_from_parts(month: u32, year: i32) -> SummaryResult<Period> {
    if !(1..=12).contains(&month) {
        return Err(SummaryError::InvalidPeriod(format!(
            "month {month} is outside 1-12"
        )));
    }
    check_year(year)?;
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| SummaryError::InvalidPeriod(format!("year {year} is out of range")))?;
    Ok(month_bounds(first))
}

/// Parses a `YYYY-MM-DD` reference date.
pub fn parse_date(value: &str) -> SummaryResult<NaiveDate> {
    let date = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        SummaryError::InvalidPeriod(format!("'{value}' is not a date, use YYYY-MM-DD"))
    })?;
    check_year(date.year())?;
    Ok(date)
}

/// Keeps reference dates far enough from chrono's limits that week and month
/// arithmetic cannot overflow.
fn check_year(year: i32) -> SummaryResult<()> {
    if YEARS.contains(&year) {
        Ok(())
    } else {
        Err(SummaryError::InvalidPeriod(format!(
            "year {year} is outside {}-{}",
            YEARS.start(),
            YEARS.end()
        )))
    }
}
