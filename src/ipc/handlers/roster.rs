use crate::ipc::error::err;
use crate::ipc::helpers::{get_bool, get_optional_str, get_required_str, respond, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::roster;
use rusqlite::Connection;
use serde_json::json;

fn sections_upsert(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let id = get_required_str(params, "id")?;
    let name = get_required_str(params, "name")?;
    let adviser_id = get_optional_str(params, "adviserId");
    roster::upsert_section(conn, &id, &name, adviser_id.as_deref())?;
    Ok(json!({ "id": id, "name": name, "adviserId": adviser_id }))
}

fn subjects_upsert(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let id = get_required_str(params, "id")?;
    let name = get_required_str(params, "name")?;
    roster::upsert_subject(conn, &id, &name)?;
    Ok(json!({ "id": id, "name": name }))
}

fn students_upsert(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let id = get_required_str(params, "id")?;
    let display_name = get_required_str(params, "displayName")?;
    let active = get_bool(params, "active", true)?;
    roster::upsert_student(conn, &id, &display_name, active)?;
    Ok(json!({ "id": id, "displayName": display_name, "active": active }))
}

fn enroll(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let section_id = get_required_str(params, "sectionId")?;
    let student_id = get_required_str(params, "studentId")?;
    roster::enroll(conn, &section_id, &student_id)?;
    Ok(json!({ "sectionId": section_id, "studentId": student_id, "active": true }))
}

fn withdraw(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let section_id = get_required_str(params, "sectionId")?;
    let student_id = get_required_str(params, "studentId")?;
    roster::withdraw(conn, &section_id, &student_id)?;
    Ok(json!({ "sectionId": section_id, "studentId": student_id, "active": false }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let op: fn(&Connection, &serde_json::Value) -> HandlerResult = match req.method.as_str() {
        "roster.sections.upsert" => sections_upsert,
        "roster.subjects.upsert" => subjects_upsert,
        "roster.students.upsert" => students_upsert,
        "roster.enroll" => enroll,
        "roster.withdraw" => withdraw,
        _ => return None,
    };
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    Some(respond(req, op(conn, &req.params)))
}
