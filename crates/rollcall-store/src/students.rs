//! Student accounts: registration and password login.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::password::{self, SALT_LEN};
use crate::{format_timestamp, parse_timestamp, Store};

/// A registered student. The password hash never leaves the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Student {
    pub id: i64,
    /// Login name, unique across the database.
    pub student_id: String,
    pub name: String,
    pub class_name: String,
    pub created_at: DateTime<Utc>,
}

const STUDENT_COLUMNS: &str = "id, student_id, name, class_name, created_at";

impl Store {
    /// Register a new student with a salted password hash.
    pub fn register_student(
        &self,
        student_id: &str,
        password: &str,
        name: &str,
        class_name: &str,
    ) -> Result<Student> {
        let student_id = student_id.trim();
        let name = name.trim();
        if student_id.is_empty() {
            return Err(StoreError::InvalidInput("student id must not be empty".into()));
        }
        if name.is_empty() {
            return Err(StoreError::InvalidInput("name must not be empty".into()));
        }
        if password.is_empty() {
            return Err(StoreError::InvalidInput("password must not be empty".into()));
        }
        if self.get_student(student_id)?.is_some() {
            return Err(StoreError::StudentExists(student_id.to_string()));
        }

        let salt = password::generate_salt();
        let hash = password::hash_password(&salt, password);
        let created_at = Utc::now();

        self.conn.execute(
            r"
            INSERT INTO students (student_id, name, class_name, password_salt, password_hash, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
            params![
                student_id,
                name,
                class_name.trim(),
                &salt[..],
                &hash[..],
                format_timestamp(&created_at)
            ],
        )?;

        info!(student_id, "registered student");
        Ok(Student {
            id: self.conn.last_insert_rowid(),
            student_id: student_id.to_string(),
            name: name.to_string(),
            class_name: class_name.trim().to_string(),
            created_at,
        })
    }

    /// Check a login. `Ok(None)` covers both unknown ids and wrong passwords.
    pub fn authenticate(&self, student_id: &str, password: &str) -> Result<Option<Student>> {
        let student_id = student_id.trim();
        let stored: Option<(Vec<u8>, Vec<u8>)> = self
            .conn
            .query_row(
                "SELECT password_salt, password_hash FROM students WHERE student_id = ?1",
                [student_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((salt, hash)) = stored else {
            // Same hashing work as a real account.
            let _ = password::verify_password(&[0u8; SALT_LEN], password, &[0u8; 32]);
            debug!(student_id, "login for unknown student");
            return Ok(None);
        };

        if !password::verify_password(&salt, password, &hash) {
            warn!(student_id, "login rejected: wrong password");
            return Ok(None);
        }
        self.get_student(student_id)
    }

    pub fn get_student(&self, student_id: &str) -> Result<Option<Student>> {
        let sql = format!("SELECT {STUDENT_COLUMNS} FROM students WHERE student_id = ?1");
        Ok(self
            .conn
            .query_row(&sql, [student_id.trim()], row_to_student)
            .optional()?)
    }

    /// All students ordered by student id.
    pub fn list_students(&self) -> Result<Vec<Student>> {
        let sql = format!("SELECT {STUDENT_COLUMNS} FROM students ORDER BY student_id");
        let mut stmt = self.conn.prepare(&sql)?;
        let students = stmt
            .query_map([], row_to_student)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(students)
    }
}

fn row_to_student(row: &Row) -> rusqlite::Result<Student> {
    let created_at: String = row.get(4)?;
    Ok(Student {
        id: row.get(0)?,
        student_id: row.get(1)?,
        name: row.get(2)?,
        class_name: row.get(3)?,
        created_at: parse_timestamp(4, &created_at)?,
    })
}
