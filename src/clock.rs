//! Timestamp sources for `created_on` / `updated_on` columns.
//!
//! Readings are naive UTC datetimes truncated to microseconds, which is the
//! resolution the store keeps. [`MonotonicClock`] wraps any source and never
//! hands out the same reading twice, so a row updated twice within one
//! microsecond still sees `updated_on` move forward.

use std::sync::{Mutex, PoisonError};

use chrono::{NaiveDateTime, TimeDelta, Timelike, Utc};

/// Text layout of DATETIME columns in the store.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Accepts both the microsecond layout and SQLite's millisecond `strftime('%f')`.
pub const TIMESTAMP_PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Trait for getting the current time, abstracted for testing.
pub trait ClockSource {
    fn now(&self) -> NaiveDateTime;
}

/// System clock reading UTC wall time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }
}

impl<C: ClockSource> ClockSource for &C {
    fn now(&self) -> NaiveDateTime {
        (*self).now()
    }
}

/// Clock that returns strictly increasing readings.
#[derive(Debug)]
pub struct MonotonicClock<C: ClockSource = SystemClock> {
    source: C,
    last: Mutex<Option<NaiveDateTime>>,
}

impl MonotonicClock<SystemClock> {
    pub fn new() -> Self {
        Self::with_source(SystemClock)
    }
}

impl Default for MonotonicClock<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ClockSource> MonotonicClock<C> {
    pub fn with_source(source: C) -> Self {
        MonotonicClock {
            source,
            last: Mutex::new(None),
        }
    }

    pub fn source(&self) -> &C {
        &self.source
    }
}

impl<C: ClockSource> ClockSource for MonotonicClock<C> {
    fn now(&self) -> NaiveDateTime {
        let reading = truncate_to_micros(self.source.now());
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let next = match *last {
            Some(prev) if reading <= prev => prev + TimeDelta::microseconds(1),
            _ => reading,
        };
        *last = Some(next);
        next
    }
}

/// Format a timestamp the way DATETIME columns store it.
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored DATETIME value.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_PARSE_FORMAT).ok()
}

fn truncate_to_micros(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_nanosecond(ts.nanosecond() / 1_000 * 1_000)
        .unwrap_or(ts)
}
