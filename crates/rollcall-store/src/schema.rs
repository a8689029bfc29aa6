//! SQLite schema for the attendance database.

pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

pub const CREATE_STUDENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS students (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    class_name TEXT NOT NULL DEFAULT '',
    password_salt BLOB NOT NULL,
    password_hash BLOB NOT NULL,
    created_at TEXT NOT NULL
)
";

pub const CREATE_SESSIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS class_sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    class_name TEXT NOT NULL DEFAULT '',
    starts_at TEXT NOT NULL,
    late_after_minutes INTEGER NOT NULL DEFAULT 10
)
";

pub const CREATE_ATTENDANCE_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS attendance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    recorded_at TEXT NOT NULL,
    student_id TEXT NOT NULL REFERENCES students(student_id),
    student_name TEXT NOT NULL,
    session_id INTEGER REFERENCES class_sessions(id),
    confidence INTEGER NOT NULL CHECK (confidence BETWEEN 0 AND 100),
    photo_path TEXT NOT NULL,
    is_late INTEGER NOT NULL DEFAULT 0
)
";

/// One row per student per session; session-less rows are unrestricted.
pub const CREATE_ATTENDANCE_UNIQUE_INDEX: &str = r"
CREATE UNIQUE INDEX IF NOT EXISTS idx_attendance_student_session
    ON attendance(student_id, session_id) WHERE session_id IS NOT NULL
";

pub const CREATE_ATTENDANCE_TIME_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_attendance_recorded_at ON attendance(recorded_at DESC)
";

/// Attendance rows are append-only.
pub const CREATE_ATTENDANCE_NO_UPDATE: &str = r"
CREATE TRIGGER IF NOT EXISTS attendance_no_update BEFORE UPDATE ON attendance
BEGIN
    SELECT RAISE(ABORT, 'attendance events are immutable');
END
";

pub const CREATE_ATTENDANCE_NO_DELETE: &str = r"
CREATE TRIGGER IF NOT EXISTS attendance_no_delete BEFORE DELETE ON attendance
BEGIN
    SELECT RAISE(ABORT, 'attendance events are immutable');
END
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_METADATA_TABLE,
    CREATE_STUDENTS_TABLE,
    CREATE_SESSIONS_TABLE,
    CREATE_ATTENDANCE_TABLE,
    CREATE_ATTENDANCE_UNIQUE_INDEX,
    CREATE_ATTENDANCE_TIME_INDEX,
    CREATE_ATTENDANCE_NO_UPDATE,
    CREATE_ATTENDANCE_NO_DELETE,
];
