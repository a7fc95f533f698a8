//! SQLite-backed attendance report.
//!
//! Uniqueness of (identity, day) is a table constraint, so concurrent writers
//! in other processes cannot create duplicate rows: the first insert wins and
//! later ones are ignored.

use attend_core::{AttendanceRecord, AttendanceSink, CommitOutcome, SinkError};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DAY_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS attendance (
    identity TEXT NOT NULL,
    day      TEXT NOT NULL,
    time     TEXT NOT NULL,
    PRIMARY KEY (identity, day)
);
";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub struct ReportStore {
    conn: Connection,
}

impl ReportStore {
    /// Open (or create) the report database at `path`.
    pub fn open(path: &Path) -> Result<Self, ReportError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ReportError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        tracing::info!(path = %path.display(), "report store opened");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, ReportError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Insert a record unless one exists for (identity, day).
    pub fn record(&self, identity: &str, at: NaiveDateTime) -> Result<CommitOutcome, ReportError> {
        let day = at.date().format(DAY_FORMAT).to_string();
        let time = at.time().format(TIME_FORMAT).to_string();
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO attendance (identity, day, time) VALUES (?1, ?2, ?3)",
            params![identity, day, time],
        )?;
        Ok(if inserted == 1 {
            CommitOutcome::Recorded
        } else {
            CommitOutcome::AlreadyPresent
        })
    }

    /// Records for `day`, ordered by time then identity.
    pub fn records_for(&self, day: NaiveDate) -> Result<Vec<AttendanceRecord>, ReportError> {
        let mut stmt = self.conn.prepare(
            "SELECT identity, time FROM attendance WHERE day = ?1 ORDER BY time, identity",
        )?;
        let rows = stmt.query_map(params![day.format(DAY_FORMAT).to_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (identity, time) = row?;
            let time = NaiveTime::parse_from_str(&time, TIME_FORMAT)
                .map_err(|e| ReportError::Corrupt(format!("{identity}: time {time:?}: {e}")))?;
            records.push(AttendanceRecord { identity, day, time });
        }
        Ok(records)
    }

    /// Distinct identities credited on `day`.
    pub fn present_count(&self, day: NaiveDate) -> Result<usize, ReportError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT identity) FROM attendance WHERE day = ?1",
            params![day.format(DAY_FORMAT).to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Write the day's report as a JSON array to `path`.
    ///
    /// Written to a sibling temp file and renamed into place.
    pub fn export_json(&self, day: NaiveDate, path: &Path) -> Result<usize, ReportError> {
        let records = self.records_for(day)?;
        let json = serde_json::to_vec_pretty(&records)?;

        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, json).map_err(|source| ReportError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, path).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::info!(day = %day, records = records.len(), path = %path.display(), "report exported");
        Ok(records.len())
    }
}

impl AttendanceSink for ReportStore {
    fn commit(&mut self, identity: &str, at: NaiveDateTime) -> Result<CommitOutcome, SinkError> {
        self.record(identity, at).map_err(|e| {
            let busy = matches!(
                &e,
                ReportError::Sqlite(rusqlite::Error::SqliteFailure(f, _))
                    if f.code == rusqlite::ErrorCode::DatabaseBusy
            );
            if busy {
                SinkError::Unavailable(e.to_string())
            } else {
                SinkError::Write(e.to_string())
            }
        })
    }

    fn list_day(&self, day: NaiveDate) -> Result<Vec<AttendanceRecord>, SinkError> {
        self.records_for(day).map_err(|e| SinkError::Read(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        day().and_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_record_is_idempotent_per_day() {
        let store = ReportStore::open_in_memory().unwrap();
        assert_eq!(store.record("alice", at(9, 0)).unwrap(), CommitOutcome::Recorded);
        assert_eq!(store.record("alice", at(17, 30)).unwrap(), CommitOutcome::AlreadyPresent);

        let records = store.records_for(day()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
    }

    #[test]
    fn test_next_day_is_a_new_record() {
        let store = ReportStore::open_in_memory().unwrap();
        store.record("alice", at(9, 0)).unwrap();
        let tomorrow = day().succ_opt().unwrap().and_hms_opt(9, 0, 0).unwrap();
        assert_eq!(store.record("alice", tomorrow).unwrap(), CommitOutcome::Recorded);
        assert_eq!(store.records_for(day()).unwrap().len(), 1);
    }

    #[test]
    fn test_records_ordered_by_time() {
        let store = ReportStore::open_in_memory().unwrap();
        store.record("carol", at(10, 0)).unwrap();
        store.record("bob", at(8, 0)).unwrap();
        store.record("alice", at(8, 0)).unwrap();

        let names: Vec<_> = store
            .records_for(day())
            .unwrap()
            .into_iter()
            .map(|r| r.identity)
            .collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
        assert_eq!(store.present_count(day()).unwrap(), 3);
    }

    #[test]
    fn test_two_connections_share_uniqueness() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logs").join("attendance.db");
        let mut first = ReportStore::open(&path).unwrap();
        let mut second = ReportStore::open(&path).unwrap();

        assert_eq!(first.commit("alice", at(9, 0)).unwrap(), CommitOutcome::Recorded);
        assert_eq!(second.commit("alice", at(9, 1)).unwrap(), CommitOutcome::AlreadyPresent);
        assert_eq!(second.list_day(day()).unwrap().len(), 1);
    }

    #[test]
    fn test_reopen_keeps_records() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("attendance.db");
        ReportStore::open(&path).unwrap().record("bob", at(9, 0)).unwrap();

        let store = ReportStore::open(&path).unwrap();
        assert_eq!(store.records_for(day()).unwrap().len(), 1);
    }

    #[test]
    fn test_export_json() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ReportStore::open_in_memory().unwrap();
        store.record("alice", at(9, 5)).unwrap();

        let out = tmp.path().join("access_summary_2026-10-19.json");
        assert_eq!(store.export_json(day(), &out).unwrap(), 1);

        let parsed: Vec<AttendanceRecord> =
            serde_json::from_slice(&fs::read(&out).unwrap()).unwrap();
        assert_eq!(parsed[0].identity, "alice");
        assert_eq!(parsed[0].day, day());
        assert!(!out.with_extension("tmp").exists());
    }

    #[test]
    fn test_empty_day() {
        let store = ReportStore::open_in_memory().unwrap();
        assert!(store.records_for(day()).unwrap().is_empty());
        assert_eq!(store.present_count(day()).unwrap(), 0);
    }
}
