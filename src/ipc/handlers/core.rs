use crate::config::Config;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "now": state.clock.now(),
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    let config = match Config::load(&path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(workspace = %path.display(), error = %format!("{e:#}"), "invalid workspace config");
            return err(&req.id, "configuration_error", format!("{e:#}"), None);
        }
    };
    let conn = match db::open_db(&path) {
        Ok(conn) => conn,
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:#}"), None),
    };
    if let Err(e) = db::apply_config_seeds(&conn, &config) {
        return err(&req.id, "db_open_failed", format!("{e:#}"), None);
    }

    tracing::info!(
        workspace = %path.display(),
        holidays = config.holidays.len(),
        statuses = config.statuses.len(),
        "workspace opened"
    );
    state.workspace = Some(path.clone());
    state.config = config;
    state.db = Some(conn);
    ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
