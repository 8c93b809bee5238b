//! Schedule expressions for scheduled rules.
//!
//! Two forms are accepted: `"daily at HH:MM"` and `"hourly at :MM"`. A
//! schedule matches during the whole named minute; rule cooldown keeps a
//! matched rule from firing more than once inside it.

use chrono::Timelike;

/// A parsed schedule expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Fire once a day at the given hour and minute.
    DailyAt {
        /// Hour of day, 0-23.
        hour: u32,
        /// Minute of hour, 0-59.
        minute: u32,
    },
    /// Fire once an hour at the given minute.
    HourlyAt {
        /// Minute of hour, 0-59.
        minute: u32,
    },
}

/// Error raised for malformed schedule expressions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid schedule expression: {0}")]
pub struct ScheduleError(pub String);

impl Schedule {
    /// Parse a schedule expression.
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let expr = expr.trim();
        let invalid = || ScheduleError(expr.to_string());

        if let Some(rest) = expr.strip_prefix("daily at ") {
            let (hour, minute) = parse_clock(rest).ok_or_else(invalid)?;
            if hour > 23 || minute > 59 {
                return Err(invalid());
            }
            return Ok(Schedule::DailyAt { hour, minute });
        }
        if let Some(rest) = expr.strip_prefix("hourly at :") {
            let minute: u32 = rest.trim().parse().map_err(|_| invalid())?;
            if minute > 59 {
                return Err(invalid());
            }
            return Ok(Schedule::HourlyAt { minute });
        }
        Err(invalid())
    }

    /// Whether the schedule matches the given local time.
    pub fn matches<Tz: chrono::TimeZone>(&self, now: &chrono::DateTime<Tz>) -> bool {
        match self {
            Schedule::DailyAt { hour, minute } => now.hour() == *hour && now.minute() == *minute,
            Schedule::HourlyAt { minute } => now.minute() == *minute,
        }
    }
}

fn parse_clock(s: &str) -> Option<(u32, u32)> {
    let (h, m) = s.trim().split_once(':')?;
    Some((h.parse().ok()?, m.parse().ok()?))
}
