//! Firing schedules for background jobs.
//!
//! Textual forms (as read from configuration):
//! - `daily@HH:MM`: once a day at a wall-clock time in a fixed UTC offset
//! - `every:<n><unit>`: fixed interval, unit one of `s`, `m`, `h`, `d`, at most 366 days

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Local, NaiveTime, TimeZone, Utc};
use thiserror::Error;

// Floor for interval schedules so the next firing is always strictly later.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Longest accepted interval.
pub const MAX_INTERVAL: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// When a job fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Once a day at `at`, interpreted in `offset`.
    DailyAt { at: NaiveTime, offset: FixedOffset },
    /// Every `Duration`, measured from the previous firing.
    Every(Duration),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScheduleParseError {
    #[error("unrecognized schedule `{0}` (expected `daily@HH:MM` or `every:<n><s|m|h|d>`)")]
    Unrecognized(String),

    #[error("invalid time of day `{0}` (expected HH:MM)")]
    InvalidTime(String),

    #[error("invalid interval `{0}`")]
    InvalidInterval(String),

    #[error("invalid UTC offset `{0}` (expected +HH:MM or -HH:MM)")]
    InvalidOffset(String),
}

impl Schedule {
    /// Midnight in the host's current local offset.
    pub fn daily_midnight_local() -> Self {
        Schedule::DailyAt {
            at: NaiveTime::MIN,
            offset: *Local::now().offset(),
        }
    }

    /// Parse `daily@HH:MM` or `every:<n><unit>`. `offset` applies to daily schedules.
    pub fn parse(spec: &str, offset: FixedOffset) -> Result<Self, ScheduleParseError> {
        let spec = spec.trim();

        if let Some(time) = spec.strip_prefix("daily@") {
            let at = NaiveTime::parse_from_str(time.trim(), "%H:%M")
                .map_err(|_| ScheduleParseError::InvalidTime(time.to_string()))?;
            return Ok(Schedule::DailyAt { at, offset });
        }

        if let Some(interval) = spec.strip_prefix("every:") {
            return parse_interval(interval.trim()).map(Schedule::Every);
        }

        Err(ScheduleParseError::Unrecognized(spec.to_string()))
    }

    /// The first firing strictly after `now`.
    ///
    /// Saturates at the end of the representable range instead of overflowing.
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Schedule::DailyAt { at, offset } => {
                let local_date = now.with_timezone(&offset).date_naive();
                let local_fire = local_date.and_time(at);
                let shift = chrono::Duration::seconds(i64::from(offset.local_minus_utc()));
                let mut fire = Utc.from_utc_datetime(&(local_fire - shift));
                while fire <= now {
                    match fire.checked_add_signed(chrono::Duration::days(1)) {
                        Some(later) => fire = later,
                        None => return DateTime::<Utc>::MAX_UTC,
                    }
                }
                fire
            }
            Schedule::Every(interval) => {
                let step = chrono::Duration::from_std(interval.clamp(MIN_INTERVAL, MAX_INTERVAL))
                    .unwrap_or_else(|_| chrono::Duration::days(1));
                now.checked_add_signed(step).unwrap_or(DateTime::<Utc>::MAX_UTC)
            }
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::DailyAt { at, offset } => write!(f, "daily@{} ({})", at.format("%H:%M"), offset),
            Schedule::Every(interval) => write!(f, "every:{}ms", interval.as_millis()),
        }
    }
}

fn parse_interval(raw: &str) -> Result<Duration, ScheduleParseError> {
    let invalid = || ScheduleParseError::InvalidInterval(raw.to_string());

    let split = raw.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
    let (digits, unit) = raw.split_at(split);
    let n: u64 = digits.parse().map_err(|_| invalid())?;
    if n == 0 {
        return Err(invalid());
    }

    let secs_per_unit = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        _ => return Err(invalid()),
    };
    n.checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .filter(|interval| *interval <= MAX_INTERVAL)
        .ok_or_else(invalid)
}

/// Parse `+HH:MM` / `-HH:MM` (also accepts `Z` for UTC).
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset, ScheduleParseError> {
    let raw = raw.trim();
    let invalid = || ScheduleParseError::InvalidOffset(raw.to_string());

    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, rest) = match raw.split_at_checked(1) {
        Some(("+", rest)) => (1, rest),
        Some(("-", rest)) => (-1, rest),
        _ => return Err(invalid()),
    };
    let (hh, mm) = rest.split_once(':').ok_or_else(invalid)?;
    let hours: i32 = hh.parse().map_err(|_| invalid())?;
    let minutes: i32 = mm.parse().map_err(|_| invalid())?;
    if !(0..=23).contains(&hours) || !(0..=59).contains(&minutes) {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}
