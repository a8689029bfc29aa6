//! Class sessions: the unit attendance is deduplicated and judged late against.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use tracing::info;

use crate::error::{Result, StoreError};
use crate::{format_timestamp, parse_timestamp, Store};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassSession {
    pub id: i64,
    pub name: String,
    pub class_name: String,
    pub starts_at: DateTime<Utc>,
    /// Grace period after `starts_at` before arrivals count as late.
    pub late_after_minutes: u32,
}

impl ClassSession {
    /// True when `at` falls after the grace period; the boundary itself is on time.
    pub fn is_late(&self, at: DateTime<Utc>) -> bool {
        at > self.starts_at + Duration::minutes(i64::from(self.late_after_minutes))
    }
}

const SESSION_COLUMNS: &str = "id, name, class_name, starts_at, late_after_minutes";

impl Store {
    pub fn create_session(
        &self,
        name: &str,
        class_name: &str,
        starts_at: DateTime<Utc>,
        late_after_minutes: u32,
    ) -> Result<ClassSession> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::InvalidInput("session name must not be empty".into()));
        }

        self.conn.execute(
            r"
            INSERT INTO class_sessions (name, class_name, starts_at, late_after_minutes)
            VALUES (?1, ?2, ?3, ?4)
            ",
            params![name, class_name.trim(), format_timestamp(&starts_at), late_after_minutes],
        )?;

        let session = ClassSession {
            id: self.conn.last_insert_rowid(),
            name: name.to_string(),
            class_name: class_name.trim().to_string(),
            starts_at,
            late_after_minutes,
        };
        info!(session_id = session.id, name, "created class session");
        Ok(session)
    }

    pub fn get_session(&self, id: i64) -> Result<Option<ClassSession>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM class_sessions WHERE id = ?1");
        Ok(self.conn.query_row(&sql, [id], row_to_session).optional()?)
    }

    /// Sessions, most recent start first.
    pub fn list_sessions(&self) -> Result<Vec<ClassSession>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM class_sessions ORDER BY starts_at DESC, id DESC");
        let mut stmt = self.conn.prepare(&sql)?;
        let sessions = stmt
            .query_map([], row_to_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }
}

fn row_to_session(row: &Row) -> rusqlite::Result<ClassSession> {
    let starts_at: String = row.get(3)?;
    Ok(ClassSession {
        id: row.get(0)?,
        name: row.get(1)?,
        class_name: row.get(2)?,
        starts_at: parse_timestamp(3, &starts_at)?,
        late_after_minutes: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn nine_am() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_create_and_get_session() {
        let store = Store::open_in_memory().unwrap();
        let created = store.create_session("Algebra", "MATH-1", nine_am(), 10).unwrap();
        let fetched = store.get_session(created.id).unwrap().unwrap();
        assert_eq!(created, fetched);
        assert!(store.get_session(created.id + 1).unwrap().is_none());
    }

    #[test]
    fn test_list_sessions_newest_first() {
        let store = Store::open_in_memory().unwrap();
        store.create_session("Mon", "", nine_am(), 5).unwrap();
        store
            .create_session("Tue", "", nine_am() + Duration::days(1), 5)
            .unwrap();
        let names: Vec<_> = store
            .list_sessions()
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["Tue", "Mon"]);
    }

    #[test]
    fn test_empty_session_name_rejected() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.create_session(" ", "", nine_am(), 5),
            Err(StoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_is_late_boundary() {
        let session = ClassSession {
            id: 1,
            name: "Algebra".into(),
            class_name: String::new(),
            starts_at: nine_am(),
            late_after_minutes: 10,
        };
        assert!(!session.is_late(nine_am() - Duration::minutes(5)));
        assert!(!session.is_late(nine_am() + Duration::minutes(10)));
        assert!(session.is_late(nine_am() + Duration::minutes(10) + Duration::seconds(1)));
    }
}
