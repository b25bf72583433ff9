//! Five-field cron matching (`minute hour day-of-month month day-of-week`).
//!
//! Supported per field: `*`, literals, `a-b` ranges, `/step` on any of
//! those, comma lists, and three-letter month/weekday names. Malformed
//! expressions never match; malformed list items never match. All five
//! fields must match (day-of-month and day-of-week are ANDed).

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use std::sync::Arc;

/// How far `next_match` scans: 366 days of minutes, so any expression
/// that fires at least once per calendar year is found.
pub const NEXT_MATCH_HORIZON_MINUTES: i64 = 366 * 24 * 60;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// Wall-clock components a cron expression is matched against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarParts {
    pub minute: u32,
    pub hour: u32,
    pub day: u32,
    pub month: u32,
    /// 0 = Sunday
    pub weekday: u32,
}

impl CalendarParts {
    pub fn from_datetime<T: TimeZone>(dt: &DateTime<T>) -> Self {
        Self {
            minute: dt.minute(),
            hour: dt.hour(),
            day: dt.day(),
            month: dt.month(),
            weekday: dt.weekday().num_days_from_sunday(),
        }
    }

    /// Some locale formatters report midnight as hour 24
    pub fn normalized(mut self) -> Self {
        if self.hour == 24 {
            self.hour = 0;
        }
        self
    }
}

/// Resolves a UTC instant to calendar parts in a named timezone
pub trait CalendarSource: Send + Sync {
    fn parts(&self, at: DateTime<Utc>, timezone: Option<&str>) -> CalendarParts;
}

/// IANA timezone resolution through chrono-tz. Unknown or missing
/// timezone names fall back to UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct TzCalendar;

impl CalendarSource for TzCalendar {
    fn parts(&self, at: DateTime<Utc>, timezone: Option<&str>) -> CalendarParts {
        match timezone.and_then(|name| name.parse::<Tz>().ok()) {
            Some(tz) => CalendarParts::from_datetime(&at.with_timezone(&tz)),
            None => CalendarParts::from_datetime(&at),
        }
    }
}

/// One comma-separated item of a field, resolved to `start..=end` by `step`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldPart {
    start: u32,
    end: u32,
    step: u32,
}

impl FieldPart {
    fn parse(part: &str, min: u32, max: u32) -> Option<Self> {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, Some(step.parse::<u32>().ok().filter(|s| *s >= 1)?)),
            None => (part, None),
        };

        let (start, end) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (a.parse().ok()?, b.parse().ok()?)
        } else {
            let value: u32 = range.parse().ok()?;
            match step {
                Some(_) => (value, max),
                None => (value, value),
            }
        };

        Some(Self {
            start,
            end,
            step: step.unwrap_or(1),
        })
    }

    fn contains(&self, value: u32) -> bool {
        value >= self.start && value <= self.end && (value - self.start) % self.step == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CronField {
    parts: Vec<FieldPart>,
}

impl CronField {
    /// Unparseable items are dropped; they could never match anyway
    fn parse(field: &str, min: u32, max: u32) -> Self {
        Self {
            parts: field
                .split(',')
                .filter_map(|part| FieldPart::parse(part.trim(), min, max))
                .collect(),
        }
    }

    fn matches(&self, value: u32) -> bool {
        self.parts.iter().any(|p| p.contains(value))
    }
}

/// Does `value` satisfy one cron field bounded by `min..=max`?
pub fn cron_field_matches(field: &str, value: u32, min: u32, max: u32) -> bool {
    CronField::parse(field, min, max).matches(value)
}

/// Replace three-letter names (case-insensitive) by their number.
/// Unrecognised words are left untouched.
fn substitute_names(field: &str, names: &[&str], first: usize) -> String {
    let mut out = String::with_capacity(field.len());
    let mut word = String::new();

    let flush = |word: &mut String, out: &mut String| {
        if word.is_empty() {
            return;
        }
        let lower = word.to_ascii_lowercase();
        match names.iter().position(|n| *n == lower) {
            Some(idx) => out.push_str(&(idx + first).to_string()),
            None => out.push_str(word),
        }
        word.clear();
    };

    for c in field.chars() {
        if c.is_ascii_alphabetic() {
            word.push(c);
        } else {
            flush(&mut word, &mut out);
            out.push(c);
        }
    }
    flush(&mut word, &mut out);
    out
}

/// A parsed five-field expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl CronSchedule {
    /// `None` unless the expression has exactly five whitespace-separated fields
    pub fn parse(expression: &str) -> Option<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let [minute, hour, day_of_month, month, day_of_week] = fields.as_slice() else {
            return None;
        };

        Some(Self {
            minute: CronField::parse(minute, 0, 59),
            hour: CronField::parse(hour, 0, 23),
            day_of_month: CronField::parse(day_of_month, 1, 31),
            month: CronField::parse(&substitute_names(month, &MONTH_NAMES, 1), 1, 12),
            day_of_week: CronField::parse(&substitute_names(day_of_week, &WEEKDAY_NAMES, 0), 0, 6),
        })
    }

    pub fn matches_parts(&self, parts: CalendarParts) -> bool {
        let parts = parts.normalized();
        self.minute.matches(parts.minute)
            && self.hour.matches(parts.hour)
            && self.day_of_month.matches(parts.day)
            && self.month.matches(parts.month)
            && self.day_of_week.matches(parts.weekday)
    }
}

/// Cron evaluation bound to a calendar source
#[derive(Clone)]
pub struct CronEngine {
    calendar: Arc<dyn CalendarSource>,
}

impl Default for CronEngine {
    fn default() -> Self {
        Self::new(Arc::new(TzCalendar))
    }
}

impl CronEngine {
    pub fn new(calendar: Arc<dyn CalendarSource>) -> Self {
        Self { calendar }
    }

    pub fn matches(&self, expression: &str, at: DateTime<Utc>, timezone: Option<&str>) -> bool {
        match CronSchedule::parse(expression) {
            Some(schedule) => schedule.matches_parts(self.calendar.parts(at, timezone)),
            None => false,
        }
    }

    /// First matching minute strictly after `after`, scanning at most
    /// [`NEXT_MATCH_HORIZON_MINUTES`] minutes ahead.
    pub fn next_match(
        &self,
        expression: &str,
        after: DateTime<Utc>,
        timezone: Option<&str>,
    ) -> Option<DateTime<Utc>> {
        let schedule = CronSchedule::parse(expression)?;
        let start = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);

        (0..NEXT_MATCH_HORIZON_MINUTES)
            .map(|offset| start + Duration::minutes(offset))
            .find(|candidate| schedule.matches_parts(self.calendar.parts(*candidate, timezone)))
    }
}
