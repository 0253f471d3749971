//! Month arithmetic for the archival window.

use chrono::{DateTime, Datelike, NaiveDate, Utc};

use crate::{BillingError, Result};

/// `YYYY-MM` of a unix timestamp.
pub fn year_month_of(timestamp: i64) -> Result<String> {
    let dt = DateTime::<Utc>::from_timestamp(timestamp, 0)
        .ok_or_else(|| BillingError::InvalidYearMonth(format!("timestamp {timestamp}")))?;
    Ok(format!("{:04}-{:02}", dt.year(), dt.month()))
}

/// `[start, end)` unix window for a `YYYY-MM` month.
pub fn month_window(year_month: &str) -> Result<(i64, i64)> {
    let (year, month) = parse_year_month(year_month)?;
    let start = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| BillingError::InvalidYearMonth(year_month.to_string()))?;
    let end = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(|| BillingError::InvalidYearMonth(year_month.to_string()))?;

    let to_ts = |d: NaiveDate| {
        d.and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or(0)
    };
    Ok((to_ts(start), to_ts(end)))
}

/// The `YYYY-MM` that lies `months_back` whole months before `now`.
/// The monthly archival task runs with `months_back = 3`.
pub fn cutoff_year_month(now: i64, months_back: u32) -> Result<String> {
    let dt = DateTime::<Utc>::from_timestamp(now, 0)
        .ok_or_else(|| BillingError::InvalidYearMonth(format!("timestamp {now}")))?;
    let total = dt.year() * 12 + dt.month() as i32 - 1 - months_back as i32;
    let year = total.div_euclid(12);
    let month = total.rem_euclid(12) + 1;
    Ok(format!("{year:04}-{month:02}"))
}

fn parse_year_month(year_month: &str) -> Result<(i32, u32)> {
    let mut parts = year_month.splitn(2, '-');
    let year = parts
        .next()
        .and_then(|y| y.parse::<i32>().ok())
        .ok_or_else(|| BillingError::InvalidYearMonth(year_month.to_string()))?;
    let month = parts
        .next()
        .and_then(|m| m.parse::<u32>().ok())
        .filter(|m| (1..=12).contains(m))
        .ok_or_else(|| BillingError::InvalidYearMonth(year_month.to_string()))?;
    Ok((year, month))
}
