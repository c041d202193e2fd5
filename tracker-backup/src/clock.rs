//! Time source for snapshot ids and the once-per-day backup check.

use chrono::{DateTime, Local, NaiveDate, Utc};

/// Source of the current time.
///
/// `now()` stamps snapshots; `today()` is the user's local calendar date, used to decide
/// whether an automatic backup already ran today.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate;
}

/// Wall clock in the process's local timezone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Format a timestamp the way snapshot ids and `createdAt` are written:
/// RFC 3339, UTC, millisecond precision (`2026-10-16T08:30:00.123Z`).
pub fn format_created_at(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Derive a path-safe snapshot id from its creation timestamp.
pub fn snapshot_id_for(ts: DateTime<Utc>) -> String {
    format_created_at(ts).replace(':', "-")
}
