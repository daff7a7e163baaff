use crate::ipc::helpers::{
    get_optional_date, get_optional_str, get_optional_time, get_required_str, instant_or_now,
    respond, to_json, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::sessions::{self, StartRequest};
use crate::timing;
use serde_json::json;

fn validate_timing(state: &AppState, params: &serde_json::Value) -> HandlerResult {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::no_workspace());
    };
    let teacher_id = get_required_str(params, "teacherId")?;
    let section_id = get_required_str(params, "sectionId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let at = instant_or_now(state, params, "at")?;
    let check = timing::validate_timing(
        conn,
        &teacher_id,
        &section_id,
        &subject_id,
        at,
        state.config.timing.on_time_grace_minutes,
    )?;
    to_json(&check)
}

fn start(state: &AppState, params: &serde_json::Value) -> HandlerResult {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::no_workspace());
    };
    let period = match (
        get_optional_time(params, "startTime")?,
        get_optional_time(params, "endTime")?,
    ) {
        (Some(start), Some(end)) => Some((start, end)),
        (None, None) => None,
        _ => {
            return Err(HandlerErr::bad_params(
                "startTime and endTime must be given together",
            ))
        }
    };
    let req = StartRequest {
        teacher_id: get_required_str(params, "teacherId")?,
        section_id: get_required_str(params, "sectionId")?,
        subject_id: get_required_str(params, "subjectId")?,
        at: instant_or_now(state, params, "at")?,
        period,
        session_date: get_optional_date(params, "sessionDate")?,
    };
    let outcome = sessions::start_session(conn, &req, state.config.timing.on_time_grace_minutes)?;
    to_json(&outcome)
}

fn get(state: &AppState, params: &serde_json::Value) -> HandlerResult {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::no_workspace());
    };
    let session_id = get_required_str(params, "sessionId")?;
    to_json(&sessions::get_session(conn, &session_id)?)
}

fn records(state: &AppState, params: &serde_json::Value) -> HandlerResult {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::no_workspace());
    };
    let session_id = get_required_str(params, "sessionId")?;
    let session = sessions::get_session(conn, &session_id)?;
    let records = sessions::list_records(conn, &session.id)?;
    Ok(json!({ "sessionId": session.id, "records": records }))
}

fn mark(state: &AppState, params: &serde_json::Value) -> HandlerResult {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::no_workspace());
    };
    let session_id = get_required_str(params, "sessionId")?;
    let student_id = get_required_str(params, "studentId")?;
    let status_code = get_required_str(params, "statusCode")?;
    let marked_by = get_required_str(params, "markedBy")?;
    let remarks = get_optional_str(params, "remarks");
    let at = instant_or_now(state, params, "at")?;
    let outcome = sessions::mark_attendance(
        conn,
        &session_id,
        &student_id,
        &status_code,
        &marked_by,
        remarks.as_deref(),
        at,
    )?;
    to_json(&outcome)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let op: fn(&AppState, &serde_json::Value) -> HandlerResult = match req.method.as_str() {
        "sessions.validateTiming" => validate_timing,
        "sessions.start" => start,
        "sessions.get" => get,
        "sessions.records" => records,
        "sessions.mark" => mark,
        _ => return None,
    };
    Some(respond(req, op(state, &req.params)))
}
