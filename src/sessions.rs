//! Attendance-session lifecycle: no-session -> active -> completed.
//!
//! Sessions are keyed by (teacher, section, subject, date, start, end). The
//! storage-level unique index on that tuple makes `start_or_get_session`
//! idempotent under concurrent callers. Completed is terminal.

use chrono::NaiveDateTime;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde::Serialize;
use uuid::Uuid;

use crate::catalog;
use crate::error::{AttendanceError, Result};
use crate::model::{
    AttendanceRecord, AttendanceSession, SessionKey, SessionStatus, StatusKind,
};
use crate::roster;
use crate::timing::{self, TimingCheck};

const SESSION_COLUMNS: &str = "id, slot_id, teacher_id, section_id, subject_id, session_date, \
     start_time, end_time, status, auto_absence_marked, started_at, completed_at";

fn session_from_row(r: &Row<'_>) -> rusqlite::Result<AttendanceSession> {
    let status_raw: String = r.get(8)?;
    let status = SessionStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            8,
            rusqlite::types::Type::Text,
            format!("unknown session status {status_raw}").into(),
        )
    })?;
    Ok(AttendanceSession {
        id: r.get(0)?,
        slot_id: r.get(1)?,
        key: SessionKey {
            teacher_id: r.get(2)?,
            section_id: r.get(3)?,
            subject_id: r.get(4)?,
            session_date: r.get(5)?,
            start_time: r.get(6)?,
            end_time: r.get(7)?,
        },
        status,
        auto_absence_marked: r.get::<_, i64>(9)? != 0,
        started_at: r.get(10)?,
        completed_at: r.get(11)?,
    })
}

pub fn get_session(conn: &Connection, session_id: &str) -> Result<AttendanceSession> {
    conn.query_row(
        &format!("SELECT {SESSION_COLUMNS} FROM attendance_sessions WHERE id = ?"),
        [session_id],
        session_from_row,
    )
    .optional()?
    .ok_or_else(|| AttendanceError::not_found("session", session_id))
}

pub fn find_session(conn: &Connection, key: &SessionKey) -> Result<Option<AttendanceSession>> {
    let found = conn
        .query_row(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM attendance_sessions
                 WHERE teacher_id = ? AND section_id = ? AND subject_id = ?
                   AND session_date = ? AND start_time = ? AND end_time = ?"
            ),
            (
                &key.teacher_id,
                &key.section_id,
                &key.subject_id,
                key.session_date,
                key.start_time,
                key.end_time,
            ),
            session_from_row,
        )
        .optional()?;
    Ok(found)
}

/// Insert the session for `key` in `status` unless one already exists.
/// Returns the stored row and whether this call created it.
pub(crate) fn ensure_session(
    conn: &Connection,
    key: &SessionKey,
    slot_id: Option<&str>,
    status: SessionStatus,
    now: NaiveDateTime,
) -> Result<(AttendanceSession, bool)> {
    if key.start_time >= key.end_time {
        return Err(AttendanceError::BadInput(
            "session start time must be before its end time".to_string(),
        ));
    }
    let completed_at = match status {
        SessionStatus::Completed => Some(now),
        SessionStatus::Active => None,
    };
    let inserted = conn.execute(
        "INSERT INTO attendance_sessions(
            id, slot_id, teacher_id, section_id, subject_id, session_date,
            start_time, end_time, status, auto_absence_marked, started_at, completed_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
         ON CONFLICT(teacher_id, section_id, subject_id, session_date, start_time, end_time)
         DO NOTHING",
        (
            Uuid::new_v4().to_string(),
            slot_id,
            &key.teacher_id,
            &key.section_id,
            &key.subject_id,
            key.session_date,
            key.start_time,
            key.end_time,
            status.as_str(),
            now,
            completed_at,
        ),
    )?;
    let session = find_session(conn, key)?.ok_or_else(|| {
        AttendanceError::DataIntegrity("session vanished after insert".to_string())
    })?;
    Ok((session, inserted == 1))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStart {
    pub session: AttendanceSession,
    pub created: bool,
}

/// Idempotent upsert: an existing session for `key` is returned unchanged.
pub fn start_or_get_session(
    conn: &Connection,
    key: &SessionKey,
    slot_id: Option<&str>,
    now: NaiveDateTime,
) -> Result<SessionStart> {
    let (session, created) = ensure_session(conn, key, slot_id, SessionStatus::Active, now)?;
    if created {
        tracing::info!(
            session_id = %session.id,
            teacher_id = %key.teacher_id,
            section_id = %key.section_id,
            date = %key.session_date,
            "attendance session started"
        );
    }
    Ok(SessionStart { session, created })
}

#[derive(Debug, Clone)]
pub struct StartRequest {
    pub teacher_id: String,
    pub section_id: String,
    pub subject_id: String,
    pub at: NaiveDateTime,
    /// Explicit period; when absent the matching slot's window is used.
    pub period: Option<(chrono::NaiveTime, chrono::NaiveTime)>,
    pub session_date: Option<chrono::NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOutcome {
    pub timing: TimingCheck,
    pub session: AttendanceSession,
    pub created: bool,
}

/// Timing check followed by `start_or_get_session`. The advisory never blocks.
pub fn start_session(conn: &Connection, req: &StartRequest, grace_minutes: i64) -> Result<StartOutcome> {
    let timing = timing::validate_timing(
        conn,
        &req.teacher_id,
        &req.section_id,
        &req.subject_id,
        req.at,
        grace_minutes,
    )?;
    let (start_time, end_time) = match (req.period, timing.slot.as_ref()) {
        (Some(period), _) => period,
        (None, Some(slot)) => (slot.start_time, slot.end_time),
        (None, None) => {
            return Err(AttendanceError::BadInput(
                "no scheduled slot matches; pass startTime and endTime explicitly".to_string(),
            ))
        }
    };
    let key = SessionKey {
        teacher_id: req.teacher_id.clone(),
        section_id: req.section_id.clone(),
        subject_id: req.subject_id.clone(),
        session_date: req.session_date.unwrap_or_else(|| req.at.date()),
        start_time,
        end_time,
    };
    let slot_id = timing
        .slot
        .as_ref()
        .filter(|s| s.start_time == start_time && s.end_time == end_time)
        .map(|s| s.id.clone());
    let started = start_or_get_session(conn, &key, slot_id.as_deref(), req.at)?;
    Ok(StartOutcome {
        timing,
        session: started.session,
        created: started.created,
    })
}

/// Flip an active session to completed. Returns false if it was already completed.
pub(crate) fn complete_session(
    conn: &Connection,
    session_id: &str,
    now: NaiveDateTime,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE attendance_sessions
         SET status = 'completed', completed_at = ?
         WHERE id = ? AND status = 'active'",
        (now, session_id),
    )?;
    Ok(changed == 1)
}

/// Active sessions whose period ended at or before `as_of`.
pub fn ended_active_sessions(
    conn: &Connection,
    as_of: NaiveDateTime,
) -> Result<Vec<AttendanceSession>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SESSION_COLUMNS} FROM attendance_sessions
         WHERE status = 'active'
           AND (session_date < ?1 OR (session_date = ?1 AND end_time <= ?2))
         ORDER BY session_date, start_time, id"
    ))?;
    let sessions = stmt
        .query_map((as_of.date(), as_of.time()), session_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(sessions)
}

/// Result of completing one session together with its completion hook.
#[derive(Debug)]
pub struct Completion<T> {
    pub session_id: String,
    pub outcome: Result<Option<T>>,
}

/// Complete every ended active session, running `on_completed` inside the
/// same write transaction. A hook error rolls back that session only, which
/// stays active for the next run. `Ok(None)` means another worker completed
/// the session first.
pub fn complete_ended_sessions<T, F>(
    conn: &Connection,
    as_of: NaiveDateTime,
    now: NaiveDateTime,
    mut on_completed: F,
) -> Result<Vec<Completion<T>>>
where
    F: FnMut(&Transaction<'_>, &AttendanceSession) -> Result<T>,
{
    let due = ended_active_sessions(conn, as_of)?;
    let mut out = Vec::with_capacity(due.len());
    for session in due {
        let outcome = complete_one(conn, &session.id, now, &mut on_completed);
        if let Err(e) = &outcome {
            tracing::warn!(session_id = %session.id, error = %e, "session completion rolled back");
        }
        out.push(Completion {
            session_id: session.id,
            outcome,
        });
    }
    Ok(out)
}

fn complete_one<T, F>(
    conn: &Connection,
    session_id: &str,
    now: NaiveDateTime,
    on_completed: &mut F,
) -> Result<Option<T>>
where
    F: FnMut(&Transaction<'_>, &AttendanceSession) -> Result<T>,
{
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    if !complete_session(&tx, session_id, now)? {
        return Ok(None);
    }
    let session = get_session(&tx, session_id)?;
    let value = on_completed(&tx, &session)?;
    tx.commit()?;
    tracing::info!(session_id, "attendance session completed");
    Ok(Some(value))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkOutcome {
    pub record: AttendanceRecord,
    pub created: bool,
}

/// Teacher marks one student. A second mark for the same (session, student)
/// leaves the first record untouched and reports `created = false`.
pub fn mark_attendance(
    conn: &Connection,
    session_id: &str,
    student_id: &str,
    status_code: &str,
    marked_by: &str,
    remarks: Option<&str>,
    now: NaiveDateTime,
) -> Result<MarkOutcome> {
    let session = get_session(conn, session_id)?;
    if session.status == SessionStatus::Completed {
        return Err(AttendanceError::InvalidState(format!(
            "session {session_id} is completed and can no longer be marked"
        )));
    }
    let status = catalog::find_status(conn, status_code)?
        .filter(|s| s.active)
        .ok_or_else(|| AttendanceError::not_found("status", status_code))?;
    if !roster::is_enrolled(conn, &session.key.section_id, student_id)? {
        return Err(AttendanceError::not_found("enrolled student", student_id));
    }

    let inserted = conn.execute(
        "INSERT INTO attendance_records(id, session_id, student_id, status_code, marked_by, marked_at, remarks)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(session_id, student_id) DO NOTHING",
        (
            Uuid::new_v4().to_string(),
            session_id,
            student_id,
            &status.code,
            marked_by,
            now,
            remarks,
        ),
    )?;
    let record = get_record(conn, session_id, student_id)?
        .ok_or_else(|| AttendanceError::DataIntegrity("record vanished after insert".into()))?;
    Ok(MarkOutcome {
        record,
        created: inserted == 1,
    })
}

fn record_from_row(r: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let kind_raw: String = r.get(3)?;
    let kind = StatusKind::parse(&kind_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown status kind {kind_raw}").into(),
        )
    })?;
    Ok(AttendanceRecord {
        session_id: r.get(0)?,
        student_id: r.get(1)?,
        status_code: r.get(2)?,
        kind,
        marked_by: r.get(4)?,
        marked_at: r.get(5)?,
        remarks: r.get(6)?,
    })
}

const RECORD_SELECT: &str = "SELECT r.session_id, r.student_id, r.status_code, s.kind, r.marked_by, r.marked_at, r.remarks
     FROM attendance_records r
     JOIN attendance_statuses s ON s.code = r.status_code";

pub fn get_record(
    conn: &Connection,
    session_id: &str,
    student_id: &str,
) -> Result<Option<AttendanceRecord>> {
    let rec = conn
        .query_row(
            &format!("{RECORD_SELECT} WHERE r.session_id = ? AND r.student_id = ?"),
            (session_id, student_id),
            record_from_row,
        )
        .optional()?;
    Ok(rec)
}

pub fn list_records(conn: &Connection, session_id: &str) -> Result<Vec<AttendanceRecord>> {
    let mut stmt = conn.prepare(&format!(
        "{RECORD_SELECT} WHERE r.session_id = ? ORDER BY r.student_id"
    ))?;
    let records = stmt
        .query_map([session_id], record_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::schedule::{create_slot, SlotInput};
    use crate::timing::TimingStatus;
    use chrono::{NaiveDate, NaiveTime, Weekday};

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 11, 4).unwrap()
    }

    fn key() -> SessionKey {
        SessionKey {
            teacher_id: "t1".into(),
            section_id: "s1".into(),
            subject_id: "math".into(),
            session_date: monday(),
            start_time: hm(8, 0),
            end_time: hm(9, 0),
        }
    }

    fn setup() -> Connection {
        let conn = db::open_memory().unwrap();
        db::apply_config_seeds(&conn, &crate::config::Config::default()).unwrap();
        roster::upsert_section(&conn, "s1", "Grade 7 - Rizal", None).unwrap();
        for i in 0..3 {
            let id = format!("st{i}");
            roster::upsert_student(&conn, &id, &format!("Student {i}"), true).unwrap();
            roster::enroll(&conn, "s1", &id).unwrap();
        }
        conn
    }

    #[test]
    fn start_or_get_is_idempotent() {
        let conn = setup();
        let now = monday().and_time(hm(8, 1));
        let a = start_or_get_session(&conn, &key(), None, now).unwrap();
        let b = start_or_get_session(&conn, &key(), None, now + chrono::Duration::minutes(5)).unwrap();
        assert!(a.created);
        assert!(!b.created);
        assert_eq!(a.session.id, b.session.id);
        assert_eq!(b.session.started_at, Some(now));
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM attendance_sessions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn different_period_is_a_different_session() {
        let conn = setup();
        let now = monday().and_time(hm(8, 0));
        let a = start_or_get_session(&conn, &key(), None, now).unwrap();
        let mut other = key();
        other.start_time = hm(9, 0);
        other.end_time = hm(10, 0);
        let b = start_or_get_session(&conn, &other, None, now).unwrap();
        assert_ne!(a.session.id, b.session.id);
    }

    #[test]
    fn start_uses_slot_window_and_reports_lateness() {
        let conn = setup();
        let slot = create_slot(
            &conn,
            &SlotInput {
                teacher_id: "t1".into(),
                section_id: "s1".into(),
                subject_id: "math".into(),
                weekday: Weekday::Mon,
                start_time: hm(8, 0),
                end_time: hm(9, 0),
            },
        )
        .unwrap();
        let req = StartRequest {
            teacher_id: "t1".into(),
            section_id: "s1".into(),
            subject_id: "math".into(),
            at: monday().and_time(hm(8, 20)),
            period: None,
            session_date: None,
        };
        let out = start_session(&conn, &req, 10).unwrap();
        assert_eq!(out.timing.status, TimingStatus::LateStart { minutes_late: 20 });
        assert!(out.created);
        assert_eq!(out.session.slot_id.as_deref(), Some(slot.id.as_str()));
        assert_eq!(out.session.key, key());
        assert_eq!(out.session.status, SessionStatus::Active);
    }

    #[test]
    fn start_without_slot_needs_explicit_period() {
        let conn = setup();
        let mut req = StartRequest {
            teacher_id: "t1".into(),
            section_id: "s1".into(),
            subject_id: "math".into(),
            at: monday().and_time(hm(8, 0)),
            period: None,
            session_date: None,
        };
        assert_eq!(start_session(&conn, &req, 10).unwrap_err().code(), "bad_params");
        req.period = Some((hm(8, 0), hm(9, 0)));
        let out = start_session(&conn, &req, 10).unwrap();
        assert_eq!(out.timing.status, TimingStatus::NoSchedule);
        assert!(out.session.slot_id.is_none());
    }

    #[test]
    fn completion_is_terminal_and_runs_hook_in_transaction() {
        let conn = setup();
        let started = start_or_get_session(&conn, &key(), None, monday().and_time(hm(8, 0))).unwrap();
        let as_of = monday().and_time(hm(9, 0));
        let done = complete_ended_sessions(&conn, as_of, as_of, |_tx, s| Ok(s.id.clone())).unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].outcome.as_ref().unwrap().as_deref(), Some(started.session.id.as_str()));
        let s = get_session(&conn, &started.session.id).unwrap();
        assert_eq!(s.status, SessionStatus::Completed);
        assert_eq!(s.completed_at, Some(as_of));

        let again = complete_ended_sessions(&conn, as_of, as_of, |_tx, s| Ok(s.id.clone())).unwrap();
        assert!(again.is_empty());
        // Restarting the same identity returns the completed row unchanged.
        let restarted = start_or_get_session(&conn, &key(), None, as_of).unwrap();
        assert_eq!(restarted.session.status, SessionStatus::Completed);
    }

    #[test]
    fn failing_hook_leaves_session_active() {
        let conn = setup();
        let started = start_or_get_session(&conn, &key(), None, monday().and_time(hm(8, 0))).unwrap();
        let as_of = monday().and_time(hm(10, 0));
        let done: Vec<Completion<()>> = complete_ended_sessions(&conn, as_of, as_of, |_tx, _s| {
            Err(AttendanceError::Configuration("Absent status not configured".into()))
        })
        .unwrap();
        assert!(done[0].outcome.is_err());
        assert_eq!(
            get_session(&conn, &started.session.id).unwrap().status,
            SessionStatus::Active
        );
    }

    #[test]
    fn sessions_still_running_are_not_completed() {
        let conn = setup();
        start_or_get_session(&conn, &key(), None, monday().and_time(hm(8, 0))).unwrap();
        let ended = ended_active_sessions(&conn, monday().and_time(hm(8, 59))).unwrap();
        assert!(ended.is_empty());
        let next_day = monday().succ_opt().unwrap().and_time(hm(7, 0));
        assert_eq!(ended_active_sessions(&conn, next_day).unwrap().len(), 1);
    }

    #[test]
    fn marking_inserts_once_and_rejects_completed_sessions() {
        let conn = setup();
        let now = monday().and_time(hm(8, 5));
        let s = start_or_get_session(&conn, &key(), None, now).unwrap().session;
        let first = mark_attendance(&conn, &s.id, "st0", "P", "t1", None, now).unwrap();
        assert!(first.created);
        assert_eq!(first.record.kind, StatusKind::Present);
        let second = mark_attendance(&conn, &s.id, "st0", "L", "t1", Some("late bus"), now).unwrap();
        assert!(!second.created);
        assert_eq!(second.record.status_code, "P");

        assert_eq!(
            mark_attendance(&conn, &s.id, "nobody", "P", "t1", None, now).unwrap_err().code(),
            "not_found"
        );
        assert_eq!(
            mark_attendance(&conn, &s.id, "st1", "ZZ", "t1", None, now).unwrap_err().code(),
            "not_found"
        );

        complete_session(&conn, &s.id, now).unwrap();
        assert_eq!(
            mark_attendance(&conn, &s.id, "st1", "P", "t1", None, now).unwrap_err().code(),
            "invalid_state"
        );
        assert_eq!(list_records(&conn, &s.id).unwrap().len(), 1);
    }
}
