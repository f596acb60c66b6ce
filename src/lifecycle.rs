//! Document lifecycle classification.
//!
//! Every validity-bearing record is in exactly one of three states relative to
//! "today":
//!
//! - `expired`        → `valid_to < today`
//! - `expiring_soon`  → `today <= valid_to <= today + N`
//! - `active`         → `valid_to > today + N`
//!
//! `N` is the lookahead window in days and differs per document kind (see
//! [`crate::documents::DocumentKind::default_window_days`]). Both ends of the
//! expiring window are inclusive for every kind.
//!
//! Raw display strings (`DD-MM-YYYY`, `DD/MM/YYYY`, `YYYY-MM-DD`) can be
//! classified directly with [`classify_display_date`], which yields
//! [`Status::Unknown`] instead of failing when the input cannot be parsed.

use chrono::{Days, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Active,
    ExpiringSoon,
    Expired,
    /// The validity end date could not be read.
    Unknown,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Active => "active",
            Status::ExpiringSoon => "expiring_soon",
            Status::Expired => "expired",
            Status::Unknown => "unknown",
        }
    }

    /// Parse a stored or query-string label. Unrecognized labels yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Status::Active),
            "expiring_soon" | "expiring-soon" => Some(Status::ExpiringSoon),
            "expired" => Some(Status::Expired),
            "unknown" => Some(Status::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last day that still counts as `expiring_soon` for a window of `window_days`.
///
/// Saturates at the maximum representable date.
pub fn expiring_until(today: NaiveDate, window_days: u32) -> NaiveDate {
    today
        .checked_add_days(Days::new(u64::from(window_days)))
        .unwrap_or(NaiveDate::MAX)
}

/// Classify a validity end date against `today`.
pub fn classify(valid_to: NaiveDate, today: NaiveDate, window_days: u32) -> Status {
    if valid_to < today {
        Status::Expired
    } else if valid_to <= expiring_until(today, window_days) {
        Status::ExpiringSoon
    } else {
        Status::Active
    }
}

/// Parse a display-formatted date.
///
/// Fields are split on `-` or `/` and read day-first (`DD-MM-YYYY`). When the
/// first field has four digits the input is read as ISO (`YYYY-MM-DD`).
/// Returns `None` for anything else, including impossible calendar dates.
pub fn parse_display_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let separator = if value.contains('/') { '/' } else { '-' };
    let parts: Vec<&str> = value.split(separator).collect();
    if parts.len() != 3 {
        return None;
    }
    if parts
        .iter()
        .any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit()))
    {
        return None;
    }

    let (year, month, day) = if parts[0].len() == 4 {
        (parts[0], parts[1], parts[2])
    } else if parts[2].len() == 4 {
        (parts[2], parts[1], parts[0])
    } else {
        return None;
    };

    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

/// Format a date the way the desk prints it (`DD-MM-YYYY`).
pub fn format_display_date(date: NaiveDate) -> String {
    date.format("%d-%m-%Y").to_string()
}

/// Classify a raw display string. Unparseable input yields [`Status::Unknown`].
pub fn classify_display_date(value: &str, today: NaiveDate, window_days: u32) -> Status {
    match parse_display_date(value) {
        Some(valid_to) => classify(valid_to, today, window_days),
        None => Status::Unknown,
    }
}

/// Current calendar date at a fixed UTC offset (in minutes).
///
/// Offsets outside ±24h fall back to UTC.
pub fn today_at_offset(offset_minutes: i32) -> NaiveDate {
    let now = Utc::now();
    match offset_minutes.checked_mul(60).and_then(FixedOffset::east_opt) {
        Some(offset) => now.with_timezone(&offset).date_naive(),
        None => now.date_naive(),
    }
}
