//! Where attendance snapshots live on disk.

use std::fmt::Display;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};

use crate::error::{Result, StoreError};

/// Directory of `<student_id>_<YYYYmmdd_HHMMSS>.jpg` snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotDir {
    root: PathBuf,
}

impl SnapshotDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root).map_err(|source| StoreError::DirectoryCreate {
            path: self.root.clone(),
            source,
        })
    }

    /// Next free snapshot path for `student_id` at `at`.
    ///
    /// Two captures within the same second get `_1`, `_2`, ... suffixes.
    pub fn path_for<Tz>(&self, student_id: &str, at: &DateTime<Tz>) -> PathBuf
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        let stem = format!("{}_{}", file_safe(student_id), at.format("%Y%m%d_%H%M%S"));
        let mut path = self.root.join(format!("{stem}.jpg"));
        let mut n = 1u32;
        while path.exists() {
            path = self.root.join(format!("{stem}_{n}.jpg"));
            n += 1;
        }
        path
    }
}

/// Student ids come from user input; keep them to one path component.
fn file_safe(student_id: &str) -> String {
    let cleaned: String = student_id
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("rollcall-snapshots-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_path_format() {
        let dir = SnapshotDir::new("/var/lib/rollcall/snapshots");
        let at = Utc.with_ymd_and_hms(2026, 1, 5, 8, 3, 9).unwrap();
        assert_eq!(
            dir.path_for("s1001", &at),
            PathBuf::from("/var/lib/rollcall/snapshots/s1001_20260105_080309.jpg")
        );
    }

    #[test]
    fn test_collision_gets_suffix() {
        let root = temp_root();
        let dir = SnapshotDir::new(&root);
        dir.ensure().unwrap();
        let at = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap();

        let first = dir.path_for("s1", &at);
        std::fs::write(&first, b"jpeg").unwrap();
        let second = dir.path_for("s1", &at);
        assert_eq!(second, root.join("s1_20260105_080000_1.jpg"));
        std::fs::write(&second, b"jpeg").unwrap();
        assert_eq!(dir.path_for("s1", &at), root.join("s1_20260105_080000_2.jpg"));

        std::fs::remove_dir_all(root).ok();
    }

    #[test]
    fn test_student_id_cannot_escape_directory() {
        let dir = SnapshotDir::new("snaps");
        let at = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap();
        let path = dir.path_for("../../etc/x", &at);
        assert_eq!(path.parent(), Some(Path::new("snaps")));
        assert_eq!(file_safe("  "), "unknown");
    }
}
