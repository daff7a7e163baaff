//! Weekly slot registry with overlap validation per teacher and per section.

use chrono::{NaiveDateTime, NaiveTime, Timelike, Weekday};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use uuid::Uuid;

use crate::error::{AttendanceError, Result};
use crate::model::{parse_weekday, weekday_name, ScheduledSlot};

const SLOT_COLUMNS: &str =
    "id, teacher_id, section_id, subject_id, weekday, start_time, end_time, active";

#[derive(Debug, Clone)]
pub struct SlotInput {
    pub teacher_id: String,
    pub section_id: String,
    pub subject_id: String,
    pub weekday: Weekday,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

fn slot_from_row(r: &Row<'_>) -> rusqlite::Result<ScheduledSlot> {
    let weekday_raw: String = r.get(4)?;
    let weekday = parse_weekday(&weekday_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown weekday {weekday_raw}").into(),
        )
    })?;
    Ok(ScheduledSlot {
        id: r.get(0)?,
        teacher_id: r.get(1)?,
        section_id: r.get(2)?,
        subject_id: r.get(3)?,
        weekday,
        start_time: r.get(5)?,
        end_time: r.get(6)?,
        active: r.get::<_, i64>(7)? != 0,
    })
}

fn find_overlap(
    tx: &Transaction<'_>,
    owner_column: &str,
    owner_id: &str,
    input: &SlotInput,
) -> Result<Option<String>> {
    let sql = format!(
        "SELECT id FROM scheduled_slots
         WHERE active = 1 AND weekday = ? AND {owner_column} = ?
           AND start_time < ? AND end_time > ?
         LIMIT 1"
    );
    let hit = tx
        .query_row(
            &sql,
            (
                weekday_name(input.weekday),
                owner_id,
                input.end_time,
                input.start_time,
            ),
            |r| r.get::<_, String>(0),
        )
        .optional()?;
    Ok(hit)
}

pub fn create_slot(conn: &Connection, input: &SlotInput) -> Result<ScheduledSlot> {
    if input.start_time >= input.end_time {
        return Err(AttendanceError::BadInput(
            "slot start time must be before its end time".to_string(),
        ));
    }
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    if let Some(other) = find_overlap(&tx, "teacher_id", &input.teacher_id, input)? {
        return Err(AttendanceError::ScheduleConflict {
            message: format!(
                "teacher {} already has a slot overlapping {}-{} on {}",
                input.teacher_id,
                input.start_time.format("%H:%M"),
                input.end_time.format("%H:%M"),
                weekday_name(input.weekday)
            ),
            conflicting_slot_id: other,
        });
    }
    if let Some(other) = find_overlap(&tx, "section_id", &input.section_id, input)? {
        return Err(AttendanceError::ScheduleConflict {
            message: format!(
                "section {} already has a slot overlapping {}-{} on {}",
                input.section_id,
                input.start_time.format("%H:%M"),
                input.end_time.format("%H:%M"),
                weekday_name(input.weekday)
            ),
            conflicting_slot_id: other,
        });
    }

    let id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO scheduled_slots(id, teacher_id, section_id, subject_id, weekday, start_time, end_time, active)
         VALUES(?, ?, ?, ?, ?, ?, ?, 1)",
        (
            &id,
            &input.teacher_id,
            &input.section_id,
            &input.subject_id,
            weekday_name(input.weekday),
            input.start_time,
            input.end_time,
        ),
    )?;
    tx.commit()?;
    tracing::debug!(slot_id = %id, teacher_id = %input.teacher_id, section_id = %input.section_id, "slot created");

    Ok(ScheduledSlot {
        id,
        teacher_id: input.teacher_id.clone(),
        section_id: input.section_id.clone(),
        subject_id: input.subject_id.clone(),
        weekday: input.weekday,
        start_time: input.start_time,
        end_time: input.end_time,
        active: true,
    })
}

pub fn deactivate_slot(conn: &Connection, slot_id: &str) -> Result<()> {
    let changed = conn.execute(
        "UPDATE scheduled_slots SET active = 0 WHERE id = ?",
        [slot_id],
    )?;
    if changed == 0 {
        return Err(AttendanceError::not_found("slot", slot_id));
    }
    Ok(())
}

pub fn get_slot(conn: &Connection, slot_id: &str) -> Result<ScheduledSlot> {
    conn.query_row(
        &format!("SELECT {SLOT_COLUMNS} FROM scheduled_slots WHERE id = ?"),
        [slot_id],
        slot_from_row,
    )
    .optional()?
    .ok_or_else(|| AttendanceError::not_found("slot", slot_id))
}

pub fn list_slots(
    conn: &Connection,
    teacher_id: Option<&str>,
    section_id: Option<&str>,
) -> Result<Vec<ScheduledSlot>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SLOT_COLUMNS} FROM scheduled_slots
         WHERE (?1 IS NULL OR teacher_id = ?1) AND (?2 IS NULL OR section_id = ?2)
         ORDER BY teacher_id, weekday, start_time"
    ))?;
    let slots = stmt
        .query_map((teacher_id, section_id), slot_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(slots)
}

pub fn active_slots_on(conn: &Connection, weekday: Weekday) -> Result<Vec<ScheduledSlot>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SLOT_COLUMNS} FROM scheduled_slots
         WHERE active = 1 AND weekday = ?
         ORDER BY start_time, id"
    ))?;
    let slots = stmt
        .query_map([weekday_name(weekday)], slot_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(slots)
}

/// Active slot for the identity on the instant's weekday. When the identity
/// meets more than once that day, the slot whose window holds `at` wins,
/// otherwise the one starting closest to it.
pub fn find_slot_for(
    conn: &Connection,
    teacher_id: &str,
    section_id: &str,
    subject_id: &str,
    at: NaiveDateTime,
) -> Result<Option<ScheduledSlot>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SLOT_COLUMNS} FROM scheduled_slots
         WHERE active = 1 AND teacher_id = ? AND section_id = ? AND subject_id = ? AND weekday = ?
         ORDER BY start_time"
    ))?;
    let weekday = chrono::Datelike::weekday(&at.date());
    let candidates = stmt
        .query_map(
            (teacher_id, section_id, subject_id, weekday_name(weekday)),
            slot_from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let t = at.time();
    if let Some(inside) = candidates
        .iter()
        .find(|s| s.start_time <= t && t <= s.end_time)
    {
        return Ok(Some(inside.clone()));
    }
    let secs = |x: NaiveTime| x.num_seconds_from_midnight() as i64;
    Ok(candidates
        .into_iter()
        .min_by_key(|s| (secs(s.start_time) - secs(t)).abs()))
}
