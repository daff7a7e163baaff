use crate::ipc::error::err;
use crate::ipc::helpers::{get_required_str, instant_or_now, respond, to_json, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::reconcile;
use rusqlite::Connection;

fn reconcile_session(state: &AppState, conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let session_id = get_required_str(params, "sessionId")?;
    let now = instant_or_now(state, params, "at")?;
    let outcome = reconcile::reconcile(conn, &session_id, &state.config.reconciler, now)?;
    to_json(&outcome)
}

fn reconcile_due(state: &AppState, conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let as_of = instant_or_now(state, params, "asOf")?;
    let summary = reconcile::reconcile_due_sessions(conn, as_of, &state.config, state.clock.now())?;
    to_json(&summary)
}

fn handle_reconcile_session(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    respond(req, reconcile_session(state, conn, &req.params))
}

fn handle_reconcile_due(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    respond(req, reconcile_due(state, conn, &req.params))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reconcile.session" => Some(handle_reconcile_session(state, req)),
        "reconcile.due" => Some(handle_reconcile_due(state, req)),
        _ => None,
    }
}
