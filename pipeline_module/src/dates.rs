//! Date parsing and reminder-date suggestion helpers.
//!
//! All reminder times are interpreted at a fixed UTC+8 local offset; pure
//! functions take `today` explicitly so behavior is reproducible in tests.

use chrono::{Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Fixed local-time offset for reminder semantics.
pub const LOCAL_UTC_OFFSET_HOURS: i32 = 8;

/// Reminders without an explicit time fire at this local time.
pub const DEFAULT_REMINDER_HOUR: u32 = 8;

/// Days offered by the pick-a-date calendar.
pub const CALENDAR_LOOKAHEAD_DAYS: usize = 14;

#[derive(Debug, thiserror::Error)]
pub enum DateParseError {
    #[error("could not understand date: {0}")]
    Unrecognized(String),
    #[error("not a valid calendar date: {0}")]
    InvalidDate(String),
    #[error("not a valid time: {0}")]
    InvalidTime(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDate {
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
}

pub fn local_offset() -> FixedOffset {
    FixedOffset::east_opt(LOCAL_UTC_OFFSET_HOURS * 3600).expect("fixed offset in range")
}

/// Today's date at the fixed local offset.
pub fn local_today() -> NaiveDate {
    Utc::now().with_timezone(&local_offset()).date_naive()
}

fn time_suffix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // A bare trailing number is only a time when it carries a colon or
    // meridiem; "at" makes either form explicit.
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(?:\s+at\s+(?P<at>\d{1,2}(?::\d{2})?\s*(?:am|pm)?)|\s+(?P<bare>\d{1,2}:\d{2}\s*(?:am|pm)?|\d{1,2}\s*(?:am|pm)))\s*$",
        )
        .expect("invalid time suffix pattern")
    })
}

fn time_parts_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?P<hour>\d{1,2})(?::(?P<minute>\d{2}))?\s*(?P<meridiem>am|pm)?$")
            .expect("invalid time parts pattern")
    })
}

/// Parse a standalone time expression (`3pm`, `10:30`, `at 3pm` without the
/// `at`).
pub fn parse_time_str(raw: &str) -> Result<NaiveTime, DateParseError> {
    let trimmed = raw.trim();
    let captures = time_parts_regex()
        .captures(trimmed)
        .ok_or_else(|| DateParseError::InvalidTime(trimmed.to_string()))?;

    let mut hour: u32 = captures
        .name("hour")
        .and_then(|m| m.as_str().parse().ok())
        .ok_or_else(|| DateParseError::InvalidTime(trimmed.to_string()))?;
    let minute: u32 = captures
        .name("minute")
        .map(|m| m.as_str().parse())
        .transpose()
        .map_err(|_| DateParseError::InvalidTime(trimmed.to_string()))?
        .unwrap_or(0);

    match captures
        .name("meridiem")
        .map(|m| m.as_str().to_ascii_lowercase())
        .as_deref()
    {
        Some("pm") if hour < 12 => hour += 12,
        Some("am") if hour == 12 => hour = 0,
        _ => {}
    }

    NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| DateParseError::InvalidTime(trimmed.to_string()))
}

/// Parse free-text user input into a date and optional time.
///
/// Accepted date forms: `today`, `tomorrow`/`tmr`, `DD/MM/YYYY`,
/// `YYYY-MM-DD`, `<Month> <Day>[, Year]`, `<Day> <Month>[, Year]`; any form
/// may carry a trailing time (`at 3pm`, `10:30`, `3pm`).
pub fn parse_user_date(input: &str, today: NaiveDate) -> Result<ParsedDate, DateParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DateParseError::Unrecognized(input.to_string()));
    }

    let (date_part, time_part) = match time_suffix_regex().captures(trimmed) {
        Some(captures) => {
            let matched = captures.get(0).map(|m| m.start()).unwrap_or(trimmed.len());
            let time_str = captures
                .name("at")
                .or_else(|| captures.name("bare"))
                .map(|m| m.as_str().to_string());
            (trimmed[..matched].trim(), time_str)
        }
        None => (trimmed, None),
    };

    let time = time_part.map(|raw| parse_time_str(&raw)).transpose()?;
    let date = parse_date_part(date_part, today)?;
    Ok(ParsedDate { date, time })
}

fn parse_date_part(raw: &str, today: NaiveDate) -> Result<NaiveDate, DateParseError> {
    let lower = raw.trim().to_ascii_lowercase();
    if lower.is_empty() {
        return Err(DateParseError::Unrecognized(raw.to_string()));
    }

    match lower.as_str() {
        "today" => return Ok(today),
        "tomorrow" | "tmr" => return Ok(today + Duration::days(1)),
        _ => {}
    }

    static ISO_RE: OnceLock<Regex> = OnceLock::new();
    let iso = ISO_RE.get_or_init(|| {
        Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})$").expect("invalid iso date pattern")
    });
    if let Some(captures) = iso.captures(&lower) {
        return ymd(
            captures[1].parse().unwrap_or_default(),
            captures[2].parse().unwrap_or_default(),
            captures[3].parse().unwrap_or_default(),
            raw,
        );
    }

    static SLASH_RE: OnceLock<Regex> = OnceLock::new();
    let slash = SLASH_RE.get_or_init(|| {
        Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})$").expect("invalid slash date pattern")
    });
    if let Some(captures) = slash.captures(&lower) {
        // DD/MM/YYYY
        return ymd(
            captures[3].parse().unwrap_or_default(),
            captures[2].parse().unwrap_or_default(),
            captures[1].parse().unwrap_or_default(),
            raw,
        );
    }

    static MONTH_FIRST_RE: OnceLock<Regex> = OnceLock::new();
    let month_first = MONTH_FIRST_RE.get_or_init(|| {
        Regex::new(r"^([a-z]+)\s+(\d{1,2})(?:,?\s*(\d{4}))?$").expect("invalid month-day pattern")
    });
    if let Some(captures) = month_first.captures(&lower) {
        if let Some(month) = month_from_name(&captures[1]) {
            let day: u32 = captures[2].parse().unwrap_or_default();
            let year = captures.get(3).map(|m| m.as_str().parse().unwrap_or_default());
            return named_month_date(year, month, day, today, raw);
        }
    }

    static DAY_FIRST_RE: OnceLock<Regex> = OnceLock::new();
    let day_first = DAY_FIRST_RE.get_or_init(|| {
        Regex::new(r"^(\d{1,2})\s+([a-z]+)(?:,?\s*(\d{4}))?$").expect("invalid day-month pattern")
    });
    if let Some(captures) = day_first.captures(&lower) {
        if let Some(month) = month_from_name(&captures[2]) {
            let day: u32 = captures[1].parse().unwrap_or_default();
            let year = captures.get(3).map(|m| m.as_str().parse().unwrap_or_default());
            return named_month_date(year, month, day, today, raw);
        }
    }

    Err(DateParseError::Unrecognized(raw.to_string()))
}

fn ymd(year: i32, month: u32, day: u32, raw: &str) -> Result<NaiveDate, DateParseError> {
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| DateParseError::InvalidDate(raw.to_string()))
}

/// A month/day without a year means the next occurrence: this year, or next
/// year when the date has already passed.
fn named_month_date(
    year: Option<i32>,
    month: u32,
    day: u32,
    today: NaiveDate,
    raw: &str,
) -> Result<NaiveDate, DateParseError> {
    match year {
        Some(year) => ymd(year, month, day, raw),
        None => {
            let this_year = ymd(today.year(), month, day, raw)?;
            if this_year < today {
                ymd(today.year() + 1, month, day, raw)
            } else {
                Ok(this_year)
            }
        }
    }
}

fn month_from_name(name: &str) -> Option<u32> {
    let month = match name {
        "jan" | "january" => 1,
        "feb" | "february" => 2,
        "mar" | "march" => 3,
        "apr" | "april" => 4,
        "may" => 5,
        "jun" | "june" => 6,
        "jul" | "july" => 7,
        "aug" | "august" => 8,
        "sep" | "sept" | "september" => 9,
        "oct" | "october" => 10,
        "nov" | "november" => 11,
        "dec" | "december" => 12,
        _ => return None,
    };
    Some(month)
}

/// Upcoming dates for the pick-a-date calendar, starting tomorrow.
pub fn build_calendar_days(today: NaiveDate, count: usize) -> Vec<NaiveDate> {
    (1..=count as i64)
        .map(|offset| today + Duration::days(offset))
        .collect()
}

/// Short human label for a calendar date.
pub fn format_friendly_date(date: NaiveDate, today: NaiveDate) -> String {
    if date == today {
        "Today".to_string()
    } else if date == today + Duration::days(1) {
        "Tomorrow".to_string()
    } else {
        date.format("%a %-d %b").to_string()
    }
}

/// Quick-suggest reminder dates: always tomorrow, then dateline-minus-
/// {3,5,7} days when still in the future, padded with today+3, +5, +7, …
/// until three unique dates exist; ascending, first three.
pub fn suggested_dates(today: NaiveDate, dateline: Option<NaiveDate>) -> Vec<NaiveDate> {
    let mut dates: BTreeSet<NaiveDate> = BTreeSet::new();
    dates.insert(today + Duration::days(1));

    if let Some(dateline) = dateline {
        for offset in [3i64, 5, 7] {
            let candidate = dateline - Duration::days(offset);
            if candidate > today {
                dates.insert(candidate);
            }
        }
    }

    let mut pad = 3i64;
    while dates.len() < 3 {
        dates.insert(today + Duration::days(pad));
        pad += 2;
    }

    dates.into_iter().take(3).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn today() -> NaiveDate {
        date(2026, 2, 20)
    }

    #[test]
    fn parses_relative_words() {
        assert_eq!(
            parse_user_date("today", today()).unwrap().date,
            today()
        );
        assert_eq!(
            parse_user_date("tomorrow", today()).unwrap().date,
            date(2026, 2, 21)
        );
        assert_eq!(
            parse_user_date("tmr", today()).unwrap().date,
            date(2026, 2, 21)
        );
    }

    #[test]
    fn parses_tomorrow_at_3pm() {
        let parsed = parse_user_date("tomorrow at 3pm", today()).unwrap();
        assert_eq!(parsed.date, date(2026, 2, 21));
        assert_eq!(parsed.time, NaiveTime::from_hms_opt(15, 0, 0));
    }

    #[test]
    fn parses_slash_and_iso_forms() {
        assert_eq!(
            parse_user_date("12/03/2026", today()).unwrap().date,
            date(2026, 3, 12)
        );
        assert_eq!(
            parse_user_date("2026-03-12", today()).unwrap().date,
            date(2026, 3, 12)
        );
    }

    #[test]
    fn parses_month_name_forms() {
        assert_eq!(
            parse_user_date("March 5, 2026", today()).unwrap().date,
            date(2026, 3, 5)
        );
        assert_eq!(
            parse_user_date("5 March 2026", today()).unwrap().date,
            date(2026, 3, 5)
        );
        assert_eq!(
            parse_user_date("March 5", today()).unwrap().date,
            date(2026, 3, 5)
        );
        // Already past this year, so it rolls forward.
        assert_eq!(
            parse_user_date("5 Jan", today()).unwrap().date,
            date(2027, 1, 5)
        );
    }

    #[test]
    fn parses_time_variants() {
        let at_1030 = parse_user_date("12/03/2026 at 10:30", today()).unwrap();
        assert_eq!(at_1030.time, NaiveTime::from_hms_opt(10, 30, 0));

        let bare_clock = parse_user_date("tomorrow 10:30", today()).unwrap();
        assert_eq!(bare_clock.time, NaiveTime::from_hms_opt(10, 30, 0));

        let meridiem = parse_user_date("tomorrow 9am", today()).unwrap();
        assert_eq!(meridiem.time, NaiveTime::from_hms_opt(9, 0, 0));

        let noon = parse_user_date("tomorrow at 12pm", today()).unwrap();
        assert_eq!(noon.time, NaiveTime::from_hms_opt(12, 0, 0));

        let midnight = parse_user_date("tomorrow at 12am", today()).unwrap();
        assert_eq!(midnight.time, NaiveTime::from_hms_opt(0, 0, 0));
    }

    #[test]
    fn rejects_invalid_dates() {
        assert!(matches!(
            parse_user_date("31/02/2026", today()),
            Err(DateParseError::InvalidDate(_))
        ));
        assert!(matches!(
            parse_user_date("sometime soon", today()),
            Err(DateParseError::Unrecognized(_))
        ));
        assert!(matches!(
            parse_user_date("", today()),
            Err(DateParseError::Unrecognized(_))
        ));
    }

    #[test]
    fn rejects_invalid_times() {
        assert!(matches!(
            parse_user_date("tomorrow at 25:00", today()),
            Err(DateParseError::InvalidTime(_))
        ));
    }

    #[test]
    fn calendar_days_are_distinctly_labeled() {
        let days = build_calendar_days(today(), CALENDAR_LOOKAHEAD_DAYS);
        assert_eq!(days.len(), CALENDAR_LOOKAHEAD_DAYS);

        let labels: Vec<String> = days
            .iter()
            .map(|day| format_friendly_date(*day, today()))
            .collect();
        for label in &labels {
            assert!(!label.is_empty());
        }
        let distinct: std::collections::HashSet<&String> = labels.iter().take(7).collect();
        assert_eq!(distinct.len(), 7);
    }

    #[test]
    fn friendly_labels_for_near_dates() {
        assert_eq!(format_friendly_date(today(), today()), "Today");
        assert_eq!(
            format_friendly_date(today() + Duration::days(1), today()),
            "Tomorrow"
        );
    }

    #[test]
    fn suggested_dates_worked_example() {
        // today=2026-02-20, dateline=2026-03-10: tomorrow plus
        // dateline-{7,5} make the first three ascending dates.
        let suggestions = suggested_dates(today(), Some(date(2026, 3, 10)));
        assert_eq!(
            suggestions,
            vec![date(2026, 2, 21), date(2026, 3, 3), date(2026, 3, 5)]
        );
    }

    #[test]
    fn suggested_dates_pad_when_dateline_too_close() {
        // dateline-{3,5,7} all in the past: falls back to the arithmetic pad.
        let suggestions = suggested_dates(today(), Some(date(2026, 2, 22)));
        assert_eq!(
            suggestions,
            vec![date(2026, 2, 21), date(2026, 2, 23), date(2026, 2, 25)]
        );
    }

    #[test]
    fn suggested_dates_without_dateline() {
        let suggestions = suggested_dates(today(), None);
        assert_eq!(
            suggestions,
            vec![date(2026, 2, 21), date(2026, 2, 23), date(2026, 2, 25)]
        );
    }

    #[test]
    fn suggested_dates_dedupe_overlaps() {
        // dateline-3 equals tomorrow; the pad fills the remaining slots.
        let suggestions = suggested_dates(today(), Some(date(2026, 2, 24)));
        assert_eq!(suggestions.len(), 3);
        assert_eq!(suggestions[0], date(2026, 2, 21));
        let unique: std::collections::HashSet<_> = suggestions.iter().collect();
        assert_eq!(unique.len(), 3);
    }
}
