use crate::calendar::SchoolCalendar;
use crate::ipc::helpers::{
    date_or_today, get_optional_str, get_required_str, respond, to_json, HandlerErr,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::notify::{self, OutboxSink};
use crate::recommend;
use crate::risk::{self, RiskSnapshot};
use rusqlite::Connection;
use serde_json::json;

fn snapshot_for(state: &AppState, conn: &Connection, params: &serde_json::Value) -> Result<RiskSnapshot, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let as_of = date_or_today(state, params, "asOf")?;
    let now = state.clock.now();
    let calendar = SchoolCalendar::load(conn)?;
    let mut sink = OutboxSink::new(conn, now);
    let snapshot = risk::generate_snapshot(
        conn,
        &calendar,
        &state.config,
        &student_id,
        as_of,
        now,
        &mut sink,
    )?;
    Ok(snapshot)
}

fn snapshot(state: &AppState, params: &serde_json::Value) -> HandlerResult {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::no_workspace());
    };
    to_json(&snapshot_for(state, conn, params)?)
}

fn recommendations(state: &AppState, params: &serde_json::Value) -> HandlerResult {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::no_workspace());
    };
    let current = snapshot_for(state, conn, params)?;
    let previous = risk::previous_snapshot(conn, &current.student_id, current.analysis_date)?;
    let recs = recommend::recommend(&current, previous.as_ref(), &current.patterns, &state.config);
    Ok(json!({
        "snapshot": current,
        "recommendations": recs,
    }))
}

fn teacher_batch(state: &AppState, params: &serde_json::Value) -> HandlerResult {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::no_workspace());
    };
    let teacher_id = get_required_str(params, "teacherId")?;
    let as_of = date_or_today(state, params, "asOf")?;
    let now = state.clock.now();
    let mut sink = OutboxSink::new(conn, now);
    let analytics =
        risk::analyze_teacher_students(conn, &state.config, &teacher_id, as_of, now, &mut sink)?;
    to_json(&analytics)
}

fn pending_notifications(state: &AppState, params: &serde_json::Value) -> HandlerResult {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::no_workspace());
    };
    let recipient = get_optional_str(params, "recipient");
    let entries = notify::list_outbox(conn, recipient.as_deref())?;
    Ok(json!({ "notifications": entries }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let op: fn(&AppState, &serde_json::Value) -> HandlerResult = match req.method.as_str() {
        "analytics.snapshot" => snapshot,
        "analytics.recommendations" => recommendations,
        "analytics.teacherBatch" => teacher_batch,
        "notifications.pending" => pending_notifications,
        _ => return None,
    };
    Some(respond(req, op(state, &req.params)))
}
