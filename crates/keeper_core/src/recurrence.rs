//! Annual recurrence arithmetic for origin dates.
//!
//! Every function takes `today` explicitly so results are deterministic;
//! callers that want the wall clock use [`today`]. Dates are calendar dates
//! with no time-of-day or timezone component.
//!
//! A Feb 29 origin falls on Mar 1 in years without a leap day.

use chrono::{Datelike, Local, NaiveDate};

pub const URGENT_WITHIN_DAYS: i64 = 7;

/// Current local calendar date.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// The origin's month/day placed in `year`.
pub fn occurrence_in_year(origin: NaiveDate, year: i32) -> NaiveDate {
    if origin.month() == 2 && origin.day() == 29 && !is_leap_year(year) {
        if let Some(march_first) = NaiveDate::from_ymd_opt(year, 3, 1) {
            return march_first;
        }
    }
    NaiveDate::from_ymd_opt(year, origin.month(), origin.day()).unwrap_or(origin)
}

/// Next date, on or after `today`, on which the origin's month/day recurs.
pub fn next_occurrence(origin: NaiveDate, today: NaiveDate) -> NaiveDate {
    let candidate = occurrence_in_year(origin, today.year());
    if candidate < today {
        occurrence_in_year(origin, today.year() + 1)
    } else {
        candidate
    }
}

/// Whole days from `today` until the next occurrence. Zero when the
/// occurrence is today; always below 366.
pub fn days_until_next_occurrence(origin: NaiveDate, today: NaiveDate) -> i64 {
    next_occurrence(origin, today)
        .signed_duration_since(today)
        .num_days()
}

/// `today.year - origin.year`, regardless of whether this year's occurrence
/// has passed.
pub fn elapsed_years(origin: NaiveDate, today: NaiveDate) -> i32 {
    today.year() - origin.year()
}

/// Recurring display form, `MM月DD日`.
pub fn format_month_day(origin: NaiveDate) -> String {
    format!("{:02}月{:02}日", origin.month(), origin.day())
}

pub fn is_urgent(days_until: i64, within_days: i64) -> bool {
    days_until <= within_days
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}
