//! Attendance events. Rows are insert-only; there is no update or delete path.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::{params, ErrorCode, Row};
use serde::Serialize;
use tracing::info;

use crate::error::{Result, StoreError};
use crate::{format_timestamp, parse_timestamp, sql_limit, Store};

/// A successful recognition to be written to the log.
#[derive(Debug, Clone)]
pub struct NewAttendance {
    pub student_id: String,
    pub student_name: String,
    pub session_id: Option<i64>,
    /// Match confidence, 0..=100.
    pub confidence: u8,
    /// Snapshot already written to disk.
    pub photo_path: PathBuf,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceEvent {
    pub id: i64,
    pub recorded_at: DateTime<Utc>,
    pub student_id: String,
    pub student_name: String,
    pub session_id: Option<i64>,
    pub confidence: u8,
    pub photo_path: String,
    pub is_late: bool,
}

const EVENT_COLUMNS: &str =
    "id, recorded_at, student_id, student_name, session_id, confidence, photo_path, is_late";

impl Store {
    /// Append an attendance event.
    ///
    /// Lateness is derived from the session. A student already recorded for
    /// the same session is rejected with [`StoreError::AlreadyMarked`].
    pub fn record_attendance(&self, new: NewAttendance) -> Result<AttendanceEvent> {
        if new.confidence > 100 {
            return Err(StoreError::InvalidConfidence(new.confidence));
        }
        if self.get_student(&new.student_id)?.is_none() {
            return Err(StoreError::StudentNotFound(new.student_id));
        }

        let is_late = match new.session_id {
            Some(session_id) => {
                let session = self
                    .get_session(session_id)?
                    .ok_or(StoreError::SessionNotFound(session_id))?;
                if self.has_attendance(&new.student_id, session_id)? {
                    return Err(StoreError::AlreadyMarked {
                        student_id: new.student_id,
                        session_id,
                    });
                }
                session.is_late(new.recorded_at)
            }
            None => false,
        };

        let photo_path = new.photo_path.to_string_lossy().into_owned();
        let inserted = self.conn.execute(
            r"
            INSERT INTO attendance
                (recorded_at, student_id, student_name, session_id, confidence, photo_path, is_late)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
            params![
                format_timestamp(&new.recorded_at),
                new.student_id,
                new.student_name,
                new.session_id,
                new.confidence,
                photo_path,
                is_late
            ],
        );

        if let Err(e) = inserted {
            return Err(match (e, new.session_id) {
                (rusqlite::Error::SqliteFailure(failure, _), Some(session_id))
                    if failure.code == ErrorCode::ConstraintViolation =>
                {
                    StoreError::AlreadyMarked {
                        student_id: new.student_id,
                        session_id,
                    }
                }
                (e, _) => e.into(),
            });
        }

        let event = AttendanceEvent {
            id: self.conn.last_insert_rowid(),
            recorded_at: new.recorded_at,
            student_id: new.student_id,
            student_name: new.student_name,
            session_id: new.session_id,
            confidence: new.confidence,
            photo_path,
            is_late,
        };
        info!(
            event_id = event.id,
            student_id = %event.student_id,
            session_id = ?event.session_id,
            confidence = event.confidence,
            is_late,
            "attendance recorded"
        );
        Ok(event)
    }

    pub fn has_attendance(&self, student_id: &str, session_id: i64) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM attendance WHERE student_id = ?1 AND session_id = ?2",
            params![student_id, session_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// One student's events, newest first.
    pub fn attendance_history(&self, student_id: &str, limit: usize) -> Result<Vec<AttendanceEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM attendance WHERE student_id = ?1
             ORDER BY recorded_at DESC, id DESC LIMIT ?2"
        );
        self.query_events(&sql, params![student_id, sql_limit(limit)])
    }

    /// Events of every student, newest first.
    pub fn recent_attendance(&self, limit: usize) -> Result<Vec<AttendanceEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM attendance ORDER BY recorded_at DESC, id DESC LIMIT ?1"
        );
        self.query_events(&sql, params![sql_limit(limit)])
    }

    /// Everyone recorded for a session, in arrival order.
    pub fn session_attendance(&self, session_id: i64) -> Result<Vec<AttendanceEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM attendance WHERE session_id = ?1 ORDER BY recorded_at, id"
        );
        self.query_events(&sql, params![session_id])
    }

    fn query_events(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<AttendanceEvent>> {
        let mut stmt = self.conn.prepare(sql)?;
        let events = stmt
            .query_map(params, row_to_event)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(events)
    }
}

fn row_to_event(row: &Row) -> rusqlite::Result<AttendanceEvent> {
    let recorded_at: String = row.get(1)?;
    Ok(AttendanceEvent {
        id: row.get(0)?,
        recorded_at: parse_timestamp(1, &recorded_at)?,
        student_id: row.get(2)?,
        student_name: row.get(3)?,
        session_id: row.get(4)?,
        confidence: row.get(5)?,
        photo_path: row.get(6)?,
        is_late: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn store_with_student() -> Store {
        let store = Store::open_in_memory().unwrap();
        store.register_student("s1", "pw", "Ada", "CS-1").unwrap();
        store
    }

    fn new_event(session_id: Option<i64>, at: DateTime<Utc>, confidence: u8) -> NewAttendance {
        NewAttendance {
            student_id: "s1".into(),
            student_name: "Ada".into(),
            session_id,
            confidence,
            photo_path: PathBuf::from("snapshots/s1_20260302_090000.jpg"),
            recorded_at: at,
        }
    }

    #[test]
    fn test_record_without_session() {
        let store = store_with_student();
        let first = store.record_attendance(new_event(None, start(), 82)).unwrap();
        let second = store
            .record_attendance(new_event(None, start() + Duration::minutes(1), 90))
            .unwrap();

        assert!(!first.is_late);
        assert_eq!(first.confidence, 82);
        assert_ne!(first.id, second.id);
        assert_eq!(store.attendance_history("s1", 10).unwrap().len(), 2);
    }

    #[test]
    fn test_once_per_session() {
        let store = store_with_student();
        let session = store.create_session("Algebra", "", start(), 10).unwrap();

        store
            .record_attendance(new_event(Some(session.id), start(), 70))
            .unwrap();
        assert!(store.has_attendance("s1", session.id).unwrap());
        assert!(matches!(
            store.record_attendance(new_event(Some(session.id), start() + Duration::minutes(2), 95)),
            Err(StoreError::AlreadyMarked { session_id, .. }) if session_id == session.id
        ));
        assert_eq!(store.session_attendance(session.id).unwrap().len(), 1);
    }

    #[test]
    fn test_lateness_from_session() {
        let store = store_with_student();
        let session = store.create_session("Algebra", "", start(), 10).unwrap();
        let event = store
            .record_attendance(new_event(Some(session.id), start() + Duration::minutes(25), 70))
            .unwrap();
        assert!(event.is_late);
        assert!(store.attendance_history("s1", 1).unwrap()[0].is_late);
    }

    #[test]
    fn test_rejects_bad_references_and_confidence() {
        let store = store_with_student();
        assert!(matches!(
            store.record_attendance(new_event(None, start(), 101)),
            Err(StoreError::InvalidConfidence(101))
        ));
        assert!(matches!(
            store.record_attendance(new_event(Some(42), start(), 80)),
            Err(StoreError::SessionNotFound(42))
        ));

        let mut stranger = new_event(None, start(), 80);
        stranger.student_id = "nobody".into();
        assert!(matches!(
            store.record_attendance(stranger),
            Err(StoreError::StudentNotFound(_))
        ));
        assert!(store.recent_attendance(10).unwrap().is_empty());
    }

    #[test]
    fn test_history_newest_first_with_limit() {
        let store = store_with_student();
        store.register_student("s2", "pw", "Bob", "").unwrap();
        for minutes in [0, 30, 15] {
            store
                .record_attendance(new_event(None, start() + Duration::minutes(minutes), 80))
                .unwrap();
        }
        let mut bob = new_event(None, start() + Duration::hours(2), 77);
        bob.student_id = "s2".into();
        bob.student_name = "Bob".into();
        store.record_attendance(bob).unwrap();

        let history = store.attendance_history("s1", 2).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].recorded_at, start() + Duration::minutes(30));
        assert_eq!(history[1].recorded_at, start() + Duration::minutes(15));

        let recent = store.recent_attendance(10).unwrap();
        assert_eq!(recent.len(), 4);
        assert_eq!(recent[0].student_id, "s2");
    }

    #[test]
    fn test_events_are_immutable() {
        let store = store_with_student();
        store.record_attendance(new_event(None, start(), 80)).unwrap();

        assert!(store.conn.execute("UPDATE attendance SET confidence = 100", []).is_err());
        assert!(store.conn.execute("DELETE FROM attendance", []).is_err());
        assert_eq!(store.recent_attendance(10).unwrap()[0].confidence, 80);
    }
}
