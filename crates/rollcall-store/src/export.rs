//! CSV export of attendance events.

use std::borrow::Cow;
use std::io::Write;

use crate::attendance::AttendanceEvent;
use crate::error::Result;

pub const CSV_HEADER: &str =
    "recorded_at,student_id,student_name,session_id,confidence,is_late,photo_path";

/// Write `events` as RFC 4180 CSV with a header row. Returns the number of rows.
pub fn export_csv<W: Write>(mut writer: W, events: &[AttendanceEvent]) -> Result<usize> {
    writeln!(writer, "{CSV_HEADER}")?;
    for event in events {
        let session = event.session_id.map(|id| id.to_string()).unwrap_or_default();
        writeln!(
            writer,
            "{},{},{},{},{},{},{}",
            crate::format_timestamp(&event.recorded_at),
            csv_field(&event.student_id),
            csv_field(&event.student_name),
            session,
            event.confidence,
            event.is_late,
            csv_field(&event.photo_path),
        )?;
    }
    writer.flush()?;
    Ok(events.len())
}

fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn event(name: &str, session_id: Option<i64>) -> AttendanceEvent {
        AttendanceEvent {
            id: 1,
            recorded_at: Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap(),
            student_id: "s1".into(),
            student_name: name.into(),
            session_id,
            confidence: 87,
            photo_path: "snapshots/s1_20260105_080000.jpg".into(),
            is_late: false,
        }
    }

    #[test]
    fn test_export_plain_rows() {
        let mut out = Vec::new();
        let rows = export_csv(&mut out, &[event("Ada", Some(3)), event("Ada", None)]).unwrap();
        assert_eq!(rows, 2);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(
            lines[1],
            "2026-01-05T08:00:00.000000Z,s1,Ada,3,87,false,snapshots/s1_20260105_080000.jpg"
        );
        assert_eq!(
            lines[2],
            "2026-01-05T08:00:00.000000Z,s1,Ada,,87,false,snapshots/s1_20260105_080000.jpg"
        );
    }

    #[test]
    fn test_export_quotes_special_fields() {
        let mut out = Vec::new();
        export_csv(&mut out, &[event("Lovelace, \"Ada\"", None)]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains(",\"Lovelace, \"\"Ada\"\"\","));
    }

    #[test]
    fn test_export_empty_has_header_only() {
        let mut out = Vec::new();
        assert_eq!(export_csv(&mut out, &[]).unwrap(), 0);
        assert_eq!(String::from_utf8(out).unwrap(), format!("{CSV_HEADER}\n"));
    }
}
