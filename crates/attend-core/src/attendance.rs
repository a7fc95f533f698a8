//! Attendance records, the sink that persists them, and remote notification.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One credited identity for one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub identity: String,
    pub day: NaiveDate,
    pub time: NaiveTime,
}

impl AttendanceRecord {
    pub fn new(identity: impl Into<String>, at: NaiveDateTime) -> Self {
        Self {
            identity: identity.into(),
            day: at.date(),
            time: at.time(),
        }
    }
}

/// What a successful commit did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A new (identity, day) row was written.
    Recorded,
    /// The store already held a record for (identity, day); nothing changed.
    AlreadyPresent,
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("report store unavailable: {0}")]
    Unavailable(String),
    #[error("report write failed: {0}")]
    Write(String),
    #[error("report read failed: {0}")]
    Read(String),
}

/// Persistent attendance report.
///
/// `commit` must be idempotent per (identity, day) at the store level: the
/// store may be shared with other sessions or processes, so the check cannot
/// rely on in-memory state.
pub trait AttendanceSink {
    fn commit(&mut self, identity: &str, at: NaiveDateTime) -> Result<CommitOutcome, SinkError>;

    /// Records for `day`, ordered by time.
    fn list_day(&self, day: NaiveDate) -> Result<Vec<AttendanceRecord>, SinkError>;

    fn list_today(&self) -> Result<Vec<AttendanceRecord>, SinkError> {
        self.list_day(chrono::Local::now().date_naive())
    }
}

/// Best-effort outward notification of a new attendance record.
///
/// Must not block the caller on network I/O and has no failure path.
pub trait Notifier {
    fn notify(&self, identity: &str, at: NaiveDateTime);
}

pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _identity: &str, _at: NaiveDateTime) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_splits_timestamp() {
        let at = NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(8, 59, 3)
            .unwrap();
        let rec = AttendanceRecord::new("alice", at);
        assert_eq!(rec.day, NaiveDate::from_ymd_opt(2026, 10, 19).unwrap());
        assert_eq!(rec.time, NaiveTime::from_hms_opt(8, 59, 3).unwrap());
    }
}
