//! Backfills "absent" for enrolled students with no record once a period ends.
//!
//! Completion and backfill for a session always share one IMMEDIATE
//! transaction. Inserts go through the (session, student) unique index with
//! insert-or-ignore, so re-running on a reconciled session marks nobody.

use chrono::{Datelike, NaiveDateTime};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

use crate::calendar::SchoolCalendar;
use crate::catalog;
use crate::config::{Config, ReconcilerConfig};
use crate::error::{AttendanceError, Result};
use crate::model::{AttendanceSession, BatchSummary, SessionKey, SessionStatus};
use crate::roster;
use crate::schedule;
use crate::sessions;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub session_id: String,
    pub marked_student_ids: Vec<String>,
    pub already_recorded: usize,
    pub warnings: Vec<String>,
}

impl ReconcileOutcome {
    pub fn marked(&self) -> usize {
        self.marked_student_ids.len()
    }
}

/// Backfill inside the caller's transaction. The session must be completed.
pub fn reconcile_in(
    conn: &Connection,
    session: &AttendanceSession,
    cfg: &ReconcilerConfig,
    now: NaiveDateTime,
) -> Result<ReconcileOutcome> {
    if session.status != SessionStatus::Completed {
        return Err(AttendanceError::InvalidState(format!(
            "session {} is still active; absences are only reconciled once it completes",
            session.id
        )));
    }
    let absent = catalog::require_absent_status(conn, &cfg.absent_code)?;
    let roster = roster::enrolled_students(conn, &session.key.section_id)?;
    if roster.student_ids.is_empty() {
        return Err(AttendanceError::not_found(
            "enrolled students for section",
            session.key.section_id.clone(),
        ));
    }

    let mut stmt = conn.prepare("SELECT student_id FROM attendance_records WHERE session_id = ?")?;
    let recorded = stmt
        .query_map([&session.id], |r| r.get::<_, String>(0))?
        .collect::<std::result::Result<HashSet<_>, _>>()?;

    let mut outcome = ReconcileOutcome {
        session_id: session.id.clone(),
        warnings: roster.warnings,
        ..Default::default()
    };
    for student_id in roster.student_ids {
        if recorded.contains(&student_id) {
            outcome.already_recorded += 1;
            continue;
        }
        let inserted = conn.execute(
            "INSERT INTO attendance_records(id, session_id, student_id, status_code, marked_by, marked_at, remarks)
             VALUES(?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(session_id, student_id) DO NOTHING",
            (
                Uuid::new_v4().to_string(),
                &session.id,
                &student_id,
                &absent.code,
                &cfg.system_actor,
                now,
                &cfg.remark,
            ),
        )?;
        if inserted == 1 {
            outcome.marked_student_ids.push(student_id);
        } else {
            outcome.already_recorded += 1;
        }
    }
    conn.execute(
        "UPDATE attendance_sessions SET auto_absence_marked = 1 WHERE id = ?",
        [&session.id],
    )?;
    tracing::info!(
        session_id = %session.id,
        marked = outcome.marked(),
        already_recorded = outcome.already_recorded,
        "absences reconciled"
    );
    Ok(outcome)
}

/// Reconcile one completed session in its own write transaction.
pub fn reconcile(
    conn: &Connection,
    session_id: &str,
    cfg: &ReconcilerConfig,
    now: NaiveDateTime,
) -> Result<ReconcileOutcome> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let session = sessions::get_session(&tx, session_id)?;
    let outcome = reconcile_in(&tx, &session, cfg, now)?;
    tx.commit()?;
    Ok(outcome)
}

enum SlotRun {
    Reconciled(ReconcileOutcome),
    Skipped,
}

/// A slot whose period ended with no session row: create it as completed and
/// reconcile, all in one transaction.
fn materialize_and_reconcile(
    conn: &Connection,
    key: &SessionKey,
    slot_id: &str,
    cfg: &ReconcilerConfig,
    now: NaiveDateTime,
) -> Result<SlotRun> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let (session, created) =
        sessions::ensure_session(&tx, key, Some(slot_id), SessionStatus::Completed, now)?;
    if !created && (session.status == SessionStatus::Active || session.auto_absence_marked) {
        // Another worker got here first; an active row is left to completion.
        return Ok(SlotRun::Skipped);
    }
    if created {
        tracing::info!(session_id = %session.id, slot_id, "no session was opened; created as completed");
    }
    let outcome = reconcile_in(&tx, &session, cfg, now)?;
    tx.commit()?;
    Ok(SlotRun::Reconciled(outcome))
}

fn unreconciled_completed(conn: &Connection, as_of: NaiveDateTime) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM attendance_sessions
         WHERE status = 'completed' AND auto_absence_marked = 0
           AND (session_date < ?1 OR (session_date = ?1 AND end_time <= ?2))
         ORDER BY session_date, start_time, id",
    )?;
    let ids = stmt
        .query_map((as_of.date(), as_of.time()), |r| r.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn absorb(summary: &mut BatchSummary, outcome: ReconcileOutcome) {
    summary.processed += 1;
    summary.marked += outcome.marked();
    summary.warnings.extend(outcome.warnings);
}

/// Periodic job: complete and reconcile every session whose period ended by `as_of`.
///
/// Three passes, each session in its own transaction:
/// 1. scheduled slots with no session row, on valid school days from the
///    previous school day (or further back, per `lookback_days`) through `as_of`;
/// 2. active sessions whose end time has passed;
/// 3. completed sessions that were never reconciled.
pub fn reconcile_due_sessions(
    conn: &Connection,
    as_of: NaiveDateTime,
    config: &Config,
    now: NaiveDateTime,
) -> Result<BatchSummary> {
    let cfg = &config.reconciler;
    let calendar = SchoolCalendar::load(conn)?;
    let mut summary = BatchSummary::default();

    let today = as_of.date();
    let lookback = today - chrono::Duration::days(cfg.lookback_days.max(0));
    let first_day = calendar
        .previous_school_day(today)
        .map_or(lookback, |d| d.min(lookback));
    for date in calendar.valid_school_days_between(first_day, as_of.date()) {
        for slot in schedule::active_slots_on(conn, date.weekday())? {
            let key = SessionKey::for_slot(&slot, date);
            if key.ends_at() > as_of {
                continue;
            }
            if let Some(existing) = sessions::find_session(conn, &key)? {
                if existing.status == SessionStatus::Completed && existing.auto_absence_marked {
                    summary.skipped += 1;
                }
                continue;
            }
            match materialize_and_reconcile(conn, &key, &slot.id, cfg, now) {
                Ok(SlotRun::Reconciled(outcome)) => absorb(&mut summary, outcome),
                Ok(SlotRun::Skipped) => summary.skipped += 1,
                Err(e) => {
                    log_item_failure(&slot.id, &e);
                    summary.record_error(&slot.id, &e);
                }
            }
        }
    }

    let completions =
        sessions::complete_ended_sessions(conn, as_of, now, |tx, s| reconcile_in(tx, s, cfg, now))?;
    for completion in completions {
        match completion.outcome {
            Ok(Some(outcome)) => absorb(&mut summary, outcome),
            Ok(None) => summary.skipped += 1,
            Err(e) => {
                log_item_failure(&completion.session_id, &e);
                summary.record_error(&completion.session_id, &e);
            }
        }
    }

    for session_id in unreconciled_completed(conn, as_of)? {
        match reconcile(conn, &session_id, cfg, now) {
            Ok(outcome) => absorb(&mut summary, outcome),
            Err(e) => {
                log_item_failure(&session_id, &e);
                summary.record_error(&session_id, &e);
            }
        }
    }

    tracing::info!(
        as_of = %as_of,
        processed = summary.processed,
        marked = summary.marked,
        skipped = summary.skipped,
        errors = summary.errors.len(),
        "due-session reconciliation finished"
    );
    Ok(summary)
}

fn log_item_failure(item_id: &str, e: &AttendanceError) {
    match e {
        AttendanceError::Configuration(_) => {
            tracing::error!(item_id, error = %e, "reconciliation aborted: configuration");
        }
        _ => tracing::warn!(item_id, error = %e, "reconciliation failed; skipping"),
    }
}
