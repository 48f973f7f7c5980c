use chrono::{DateTime, Utc};
use cron::Schedule;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Schedule used when the configuration leaves it empty: every five minutes.
pub const DEFAULT_SCHEDULE: &str = "*/5 * * * *";

/// A flush schedule expression that could not be parsed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid flush schedule {expr:?}: {reason}")]
pub struct ScheduleError {
    pub expr: String,
    pub reason: String,
}

impl ScheduleError {
    fn new(expr: &str, reason: impl Into<String>) -> Self {
        ScheduleError { expr: expr.to_string(), reason: reason.into() }
    }
}

#[derive(Debug, Clone)]
enum Recurrence {
    Every(Duration),
    Cron(Box<Schedule>),
}

/// When the flusher drains the buffer.
///
/// Parsed once from a human-readable expression:
///
/// - standard five-field cron lines (`minute hour day-of-month month
///   day-of-week`, day-of-week `0`/`7` = Sunday), evaluated in UTC on
///   wall-clock boundaries: `30 2 * * *` fires at 02:30 UTC
/// - `@hourly`, `@daily`, `@midnight`, `@weekly`, `@monthly`, `@yearly`,
///   `@annually`
/// - `@every <duration>` with `ms`, `s`, `m`, `h` units, e.g. `@every 1h30m`,
///   counted from the moment the flusher starts
#[derive(Debug, Clone)]
pub struct FlushSchedule {
    expr: String,
    recurrence: Recurrence,
}

impl FlushSchedule {
    /// A fixed interval. Zero is raised to one millisecond.
    pub fn every(interval: Duration) -> Self {
        let interval = interval.max(Duration::from_millis(1));
        FlushSchedule {
            expr: format!("@every {}ms", interval.as_millis()),
            recurrence: Recurrence::Every(interval),
        }
    }

    /// The fixed period of an `@every` schedule. Cron schedules have none.
    pub fn interval(&self) -> Option<Duration> {
        match &self.recurrence {
            Recurrence::Every(d) => Some(*d),
            Recurrence::Cron(_) => None,
        }
    }

    /// First cron fire time strictly after `after`. `None` for `@every`
    /// schedules and for cron lines that never fire again.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.recurrence {
            Recurrence::Every(_) => None,
            Recurrence::Cron(schedule) => schedule.after(&after).next(),
        }
    }

    /// Parse a schedule expression. An empty or blank expression yields
    /// [`DEFAULT_SCHEDULE`].
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Self::parse(DEFAULT_SCHEDULE);
        }

        let recurrence = match trimmed.strip_prefix('@') {
            Some(descriptor) => parse_descriptor(expr, descriptor)?,
            None => Recurrence::Cron(Box::new(parse_cron(expr, trimmed)?)),
        };
        Ok(FlushSchedule { expr: trimmed.to_string(), recurrence })
    }
}

impl Default for FlushSchedule {
    fn default() -> Self {
        Self::parse(DEFAULT_SCHEDULE).unwrap_or_else(|_| Self::every(Duration::from_secs(5 * 60)))
    }
}

impl PartialEq for FlushSchedule {
    fn eq(&self, other: &Self) -> bool {
        match (&self.recurrence, &other.recurrence) {
            (Recurrence::Every(a), Recurrence::Every(b)) => a == b,
            (Recurrence::Cron(_), Recurrence::Cron(_)) => self.expr == other.expr,
            _ => false,
        }
    }
}

impl FromStr for FlushSchedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FlushSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

fn parse_descriptor(expr: &str, descriptor: &str) -> Result<Recurrence, ScheduleError> {
    let mut parts = descriptor.splitn(2, char::is_whitespace);
    let line = match (parts.next().unwrap_or(""), parts.next().map(str::trim)) {
        ("every", Some(body)) if !body.is_empty() => {
            return parse_duration(expr, body).map(Recurrence::Every);
        }
        ("every", _) => return Err(ScheduleError::new(expr, "@every needs a duration")),
        ("hourly", None) => "0 * * * *",
        ("daily", None) | ("midnight", None) => "0 0 * * *",
        ("weekly", None) => "0 0 * * 0",
        ("monthly", None) => "0 0 1 * *",
        ("yearly", None) | ("annually", None) => "0 0 1 1 *",
        (other, _) => {
            return Err(ScheduleError::new(expr, format!("unknown descriptor @{}", other)));
        }
    };
    parse_cron(expr, line).map(|s| Recurrence::Cron(Box::new(s)))
}

/// Five standard fields, handed to `cron` with a zero seconds field.
fn parse_cron(expr: &str, line: &str) -> Result<Schedule, ScheduleError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(ScheduleError::new(
            expr,
            format!("expected 5 cron fields, found {}", fields.len()),
        ));
    }
    let full = format!(
        "0 {} {} {} {} {}",
        fields[0],
        fields[1],
        fields[2],
        fields[3],
        day_of_week(fields[4])
    );
    Schedule::from_str(&full).map_err(|e| ScheduleError::new(expr, e.to_string()))
}

/// `cron` numbers weekdays from 1 = Sunday; standard cron uses 0 = Sunday.
/// Numeric days are rewritten as names, which mean the same in both.
fn day_of_week(field: &str) -> String {
    field
        .split(',')
        .map(|item| {
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (item, None),
            };
            let range = range.split('-').map(day_name).collect::<Vec<_>>().join("-");
            match step {
                Some(step) => format!("{}/{}", range, step),
                None => range,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn day_name(day: &str) -> &str {
    match day {
        "0" | "7" => "Sun",
        "1" => "Mon",
        "2" => "Tue",
        "3" => "Wed",
        "4" => "Thu",
        "5" => "Fri",
        "6" => "Sat",
        other => other,
    }
}

fn parse_duration(expr: &str, body: &str) -> Result<Duration, ScheduleError> {
    let mut total = Duration::ZERO;
    let mut rest = body.trim();
    if rest.is_empty() {
        return Err(ScheduleError::new(expr, "empty duration"));
    }

    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(ScheduleError::new(expr, format!("expected a number at {:?}", rest)));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| ScheduleError::new(expr, "number out of range"))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Some(Duration::from_millis(value)),
            "s" => Some(Duration::from_secs(value)),
            "m" => value.checked_mul(60).map(Duration::from_secs),
            "h" => value.checked_mul(3600).map(Duration::from_secs),
            other => {
                return Err(ScheduleError::new(expr, format!("unknown unit {:?}", other)));
            }
        };
        total = part
            .and_then(|p| total.checked_add(p))
            .ok_or_else(|| ScheduleError::new(expr, "duration out of range"))?;
        rest = &rest[unit_len..];
    }

    if total.is_zero() {
        return Err(ScheduleError::new(expr, "interval must be positive"));
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn next(expr: &str, after: DateTime<Utc>) -> DateTime<Utc> {
        FlushSchedule::parse(expr).unwrap().next_after(after).unwrap()
    }

    #[test]
    fn empty_expression_uses_default() {
        let default = FlushSchedule::default();
        assert_eq!(default.to_string(), DEFAULT_SCHEDULE);
        assert_eq!(FlushSchedule::parse("").unwrap(), default);
        assert_eq!(FlushSchedule::parse("   ").unwrap(), default);
        assert_eq!(next("", at(2026, 3, 1, 10, 2)), at(2026, 3, 1, 10, 5));
    }

    #[test]
    fn cron_lines_fire_on_wall_clock_boundaries() {
        let start = at(2026, 3, 4, 10, 2); // a Wednesday
        assert_eq!(next("*/5 * * * *", start), at(2026, 3, 4, 10, 5));
        assert_eq!(next("* * * * *", start), at(2026, 3, 4, 10, 3));
        assert_eq!(next("30 2 * * *", start), at(2026, 3, 5, 2, 30));
        assert_eq!(next("*/7 * * * *", start), at(2026, 3, 4, 10, 7));
        assert_eq!(next("0,30 * * * *", start), at(2026, 3, 4, 10, 30));
        assert_eq!(next("*/10 9-17 * * *", at(2026, 3, 4, 17, 55)), at(2026, 3, 5, 9, 0));
    }

    #[test]
    fn weekdays_count_from_sunday_zero() {
        let saturday = at(2026, 3, 7, 12, 0);
        let fire = next("0 9 * * 1-5", saturday);
        assert_eq!(fire.weekday(), Weekday::Mon);
        assert_eq!((fire.hour(), fire.minute()), (9, 0));

        assert_eq!(next("0 0 * * 0", saturday).weekday(), Weekday::Sun);
        assert_eq!(next("0 0 * * 7", saturday).weekday(), Weekday::Sun);
    }

    #[test]
    fn descriptors() {
        let start = at(2026, 3, 4, 10, 2);
        assert_eq!(next("@hourly", start), at(2026, 3, 4, 11, 0));
        assert_eq!(next("@daily", start), at(2026, 3, 5, 0, 0));
        assert_eq!(next("@midnight", start), at(2026, 3, 5, 0, 0));
        assert_eq!(next("@weekly", start).weekday(), Weekday::Sun);
        assert_eq!(next("@monthly", start), at(2026, 4, 1, 0, 0));
        assert_eq!(next("@yearly", start), at(2027, 1, 1, 0, 0));
    }

    #[test]
    fn every_is_a_fixed_interval() {
        let every = |expr: &str| FlushSchedule::parse(expr).unwrap().interval();
        assert_eq!(every("@every 90s"), Some(Duration::from_secs(90)));
        assert_eq!(every("@every 1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(every("@every 250ms"), Some(Duration::from_millis(250)));
        assert_eq!(every("*/5 * * * *"), None);
        assert!(FlushSchedule::parse("@every 1s").unwrap().next_after(Utc::now()).is_none());
    }

    #[test]
    fn rejects_malformed_expressions() {
        for expr in [
            "* * * *",
            "* * * * * *",
            "61 * * * *",
            "* 25 * * *",
            "* * 32 * *",
            "*/x * * * *",
            "@fortnightly",
            "@every",
            "@every 5x",
            "@every 0s",
            "every five minutes",
        ] {
            assert!(FlushSchedule::parse(expr).is_err(), "accepted {:?}", expr);
        }
    }

    #[test]
    fn error_names_the_expression() {
        let err = FlushSchedule::parse("@fortnightly").unwrap_err();
        assert_eq!(err.expr, "@fortnightly");
        assert!(err.to_string().contains("@fortnightly"));
    }
}
