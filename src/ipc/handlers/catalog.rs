use crate::catalog;
use crate::ipc::error::err;
use crate::ipc::helpers::{get_bool, get_required_str, respond, to_json, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::model::{StatusCode, StatusKind};
use rusqlite::Connection;
use serde_json::json;

fn statuses_upsert(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let kind_raw = get_required_str(params, "kind")?;
    let kind = StatusKind::parse(&kind_raw).ok_or_else(|| {
        HandlerErr::bad_params("kind must be one of present, absent, late, excused")
    })?;
    let status = StatusCode {
        code: get_required_str(params, "code")?,
        name: get_required_str(params, "name")?,
        kind,
        active: get_bool(params, "active", true)?,
    };
    catalog::upsert_status(conn, &status)?;
    to_json(&status)
}

fn statuses_list(conn: &Connection) -> HandlerResult {
    let statuses = catalog::list_statuses(conn)?;
    Ok(json!({ "statuses": statuses }))
}

fn handle_statuses_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    respond(req, statuses_upsert(conn, &req.params))
}

fn handle_statuses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    respond(req, statuses_list(conn))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "catalog.statuses.upsert" => Some(handle_statuses_upsert(state, req)),
        "catalog.statuses.list" => Some(handle_statuses_list(state, req)),
        _ => None,
    }
}
