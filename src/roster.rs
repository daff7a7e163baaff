//! Enrollment roster: sections, subjects, students and who sits in which section.
//!
//! The administration layer owns these rows; the core only needs enough write
//! access to keep the roster in step and read access for reconciliation.

use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;

use crate::error::{AttendanceError, Result};

pub fn upsert_section(
    conn: &Connection,
    id: &str,
    name: &str,
    adviser_id: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO sections(id, name, adviser_id) VALUES(?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, adviser_id = excluded.adviser_id",
        (id, name, adviser_id),
    )?;
    Ok(())
}

pub fn upsert_subject(conn: &Connection, id: &str, name: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO subjects(id, name) VALUES(?, ?)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        (id, name),
    )?;
    Ok(())
}

pub fn upsert_student(conn: &Connection, id: &str, display_name: &str, active: bool) -> Result<()> {
    conn.execute(
        "INSERT INTO students(id, display_name, active) VALUES(?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name, active = excluded.active",
        (id, display_name, active as i64),
    )?;
    Ok(())
}

fn section_exists(conn: &Connection, section_id: &str) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM sections WHERE id = ?", [section_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some())
}

pub fn enroll(conn: &Connection, section_id: &str, student_id: &str) -> Result<()> {
    if !section_exists(conn, section_id)? {
        return Err(AttendanceError::not_found("section", section_id));
    }
    let student = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?;
    if student.is_none() {
        return Err(AttendanceError::not_found("student", student_id));
    }
    conn.execute(
        "INSERT INTO section_enrollments(section_id, student_id, active) VALUES(?, ?, 1)
         ON CONFLICT(section_id, student_id) DO UPDATE SET active = 1",
        (section_id, student_id),
    )?;
    Ok(())
}

pub fn withdraw(conn: &Connection, section_id: &str, student_id: &str) -> Result<()> {
    let changed = conn.execute(
        "UPDATE section_enrollments SET active = 0 WHERE section_id = ? AND student_id = ?",
        (section_id, student_id),
    )?;
    if changed == 0 {
        return Err(AttendanceError::not_found("enrollment", format!("{section_id}/{student_id}")));
    }
    Ok(())
}

pub fn is_enrolled(conn: &Connection, section_id: &str, student_id: &str) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM section_enrollments e
             JOIN students s ON s.id = e.student_id
             WHERE e.section_id = ? AND e.student_id = ? AND e.active = 1 AND s.active = 1",
            (section_id, student_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

/// Active students of a section plus any integrity problems found on the way.
#[derive(Debug, Clone, Default)]
pub struct SectionRoster {
    pub student_ids: Vec<String>,
    pub warnings: Vec<String>,
}

/// Enrolled, active students of `section_id`. Enrollment rows pointing at a
/// missing student are skipped and reported as warnings.
pub fn enrolled_students(conn: &Connection, section_id: &str) -> Result<SectionRoster> {
    if !section_exists(conn, section_id)? {
        return Err(AttendanceError::not_found("section", section_id));
    }
    let mut stmt = conn.prepare(
        "SELECT e.student_id, s.id, s.active
         FROM section_enrollments e
         LEFT JOIN students s ON s.id = e.student_id
         WHERE e.section_id = ? AND e.active = 1
         ORDER BY e.student_id",
    )?;
    let rows = stmt
        .query_map([section_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, Option<String>>(1)?,
                r.get::<_, Option<i64>>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut roster = SectionRoster::default();
    for (student_id, found, active) in rows {
        match (found, active) {
            (None, _) => {
                let warning = format!(
                    "section {section_id} enrolls student {student_id}, which does not exist"
                );
                tracing::warn!(section_id, student_id = %student_id, "orphaned enrollment row");
                roster.warnings.push(warning);
            }
            (Some(_), Some(a)) if a != 0 => roster.student_ids.push(student_id),
            _ => {}
        }
    }
    Ok(roster)
}

/// Every active student reachable through the teacher's active slots.
pub fn students_for_teacher(conn: &Connection, teacher_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT e.student_id
         FROM scheduled_slots sl
         JOIN section_enrollments e ON e.section_id = sl.section_id AND e.active = 1
         JOIN students s ON s.id = e.student_id AND s.active = 1
         WHERE sl.teacher_id = ? AND sl.active = 1
         ORDER BY e.student_id",
    )?;
    let rows = stmt
        .query_map([teacher_id], |r| r.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn subject_names(conn: &Connection) -> Result<HashMap<String, String>> {
    let mut stmt = conn.prepare("SELECT id, name FROM subjects")?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<std::result::Result<HashMap<_, _>, _>>()?;
    Ok(rows)
}
