use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone, Utc};

use super::ServiceError;

/// Format of every date-and-time string exchanged with callers.
pub const DATE_TIME_FORMAT: &str = "%d/%m/%Y %H:%M";

/// Every appointment occupies exactly one hour.
pub fn slot_length() -> Duration {
    Duration::hours(1)
}

/// Minimum distance between "now" and an appointment's start.
pub fn lead_time() -> Duration {
    Duration::hours(1)
}

/// The half-open interval `[start, start + 1h)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: DateTime<Utc>,
}

impl TimeWindow {
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self { start }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start + slot_length()
    }

    /// Back-to-back windows (`a.end == b.start`) do not intersect.
    pub fn intersects(&self, other: &TimeWindow) -> bool {
        self.start < other.end() && other.start < self.end()
    }

    /// Start-time range that contains every window able to intersect this one.
    pub fn candidate_range(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.start - slot_length(), self.start + slot_length())
    }

    pub fn respects_lead_time(&self, now: DateTime<Utc>) -> bool {
        self.start > now + lead_time()
    }
}

pub fn ensure_lead_time(window: &TimeWindow, now: DateTime<Utc>) -> Result<(), ServiceError> {
    if window.respects_lead_time(now) {
        Ok(())
    } else {
        Err(ServiceError::Validation(
            "the appointment must start more than 1 hour from now".into(),
        ))
    }
}

/// Reads and writes `DD/MM/YYYY HH:MM` in the clinic's wall-clock offset.
#[derive(Debug, Clone, Copy)]
pub struct ClinicTime {
    offset: FixedOffset,
}

impl ClinicTime {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn parse(&self, raw: &str) -> Result<DateTime<Utc>, ServiceError> {
        let naive = NaiveDateTime::parse_from_str(raw.trim(), DATE_TIME_FORMAT).map_err(|_| {
            ServiceError::Validation(format!(
                "dateAndTime must be in format DD/MM/YYYY HH:MM (e.g. 30/01/2030 23:59), got `{raw}`"
            ))
        })?;

        self.offset
            .from_local_datetime(&naive)
            .single()
            .map(|local| local.with_timezone(&Utc))
            .ok_or_else(|| ServiceError::Validation(format!("dateAndTime `{raw}` is not a valid instant")))
    }

    pub fn format(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.offset)
            .format(DATE_TIME_FORMAT)
            .to_string()
    }
}
