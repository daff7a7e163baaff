use crate::ipc::error::err;
use crate::ipc::helpers::{
    get_optional_str, get_required_str, get_required_time, respond, to_json, HandlerErr,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::parse_weekday;
use crate::schedule::{self, SlotInput};
use rusqlite::Connection;
use serde_json::json;

fn slots_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let weekday_raw = get_required_str(params, "weekday")?;
    let Some(weekday) = parse_weekday(&weekday_raw) else {
        return Err(HandlerErr::bad_params(format!("unknown weekday {}", weekday_raw)));
    };
    let input = SlotInput {
        teacher_id: get_required_str(params, "teacherId")?,
        section_id: get_required_str(params, "sectionId")?,
        subject_id: get_required_str(params, "subjectId")?,
        weekday,
        start_time: get_required_time(params, "startTime")?,
        end_time: get_required_time(params, "endTime")?,
    };
    let slot = schedule::create_slot(conn, &input)?;
    to_json(&slot)
}

fn slots_deactivate(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let slot_id = get_required_str(params, "slotId")?;
    schedule::deactivate_slot(conn, &slot_id)?;
    to_json(&schedule::get_slot(conn, &slot_id)?)
}

fn slots_list(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let teacher_id = get_optional_str(params, "teacherId");
    let section_id = get_optional_str(params, "sectionId");
    let slots = schedule::list_slots(conn, teacher_id.as_deref(), section_id.as_deref())?;
    Ok(json!({ "slots": slots }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let op: fn(&Connection, &serde_json::Value) -> HandlerResult = match req.method.as_str() {
        "schedule.slots.create" => slots_create,
        "schedule.slots.deactivate" => slots_deactivate,
        "schedule.slots.list" => slots_list,
        _ => return None,
    };
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    Some(respond(req, op(conn, &req.params)))
}
