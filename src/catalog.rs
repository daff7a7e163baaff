//! Status-code catalog (Present/Absent/Late/Excused and any school-specific codes).

use rusqlite::{Connection, OptionalExtension, Row};

use crate::error::{AttendanceError, Result};
use crate::model::{StatusCode, StatusKind};

fn status_from_row(r: &Row<'_>) -> rusqlite::Result<StatusCode> {
    let kind_raw: String = r.get(2)?;
    let kind = StatusKind::parse(&kind_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown status kind {kind_raw}").into(),
        )
    })?;
    Ok(StatusCode {
        code: r.get(0)?,
        name: r.get(1)?,
        kind,
        active: r.get::<_, i64>(3)? != 0,
    })
}

pub fn find_status(conn: &Connection, code: &str) -> Result<Option<StatusCode>> {
    let found = conn
        .query_row(
            "SELECT code, name, kind, active FROM attendance_statuses WHERE code = ?",
            [code],
            status_from_row,
        )
        .optional()?;
    Ok(found)
}

pub fn list_statuses(conn: &Connection) -> Result<Vec<StatusCode>> {
    let mut stmt =
        conn.prepare("SELECT code, name, kind, active FROM attendance_statuses ORDER BY code")?;
    let rows = stmt
        .query_map([], status_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn upsert_status(conn: &Connection, status: &StatusCode) -> Result<()> {
    if status.code.trim().is_empty() {
        return Err(AttendanceError::BadInput("status code must not be empty".into()));
    }
    conn.execute(
        "INSERT INTO attendance_statuses(code, name, kind, active)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(code) DO UPDATE SET
           name = excluded.name,
           kind = excluded.kind,
           active = excluded.active",
        (
            &status.code,
            &status.name,
            status.kind.as_str(),
            status.active as i64,
        ),
    )?;
    Ok(())
}

/// The configured absent code, which must exist, be active and be absent-kind.
pub fn require_absent_status(conn: &Connection, absent_code: &str) -> Result<StatusCode> {
    match find_status(conn, absent_code)? {
        Some(s) if s.active && s.kind == StatusKind::Absent => Ok(s),
        _ => Err(AttendanceError::Configuration(format!(
            "Absent status not configured (expected an active absent-kind status with code '{absent_code}')"
        ))),
    }
}
