use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

use crate::error::AttendanceError;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn no_workspace() -> Self {
        Self {
            code: "no_workspace",
            message: "select a workspace first".to_string(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<AttendanceError> for HandlerErr {
    fn from(e: AttendanceError) -> Self {
        Self {
            code: e.code(),
            details: e.details(),
            message: e.to_string(),
        }
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        AttendanceError::from(e).into()
    }
}

pub type HandlerResult = Result<serde_json::Value, HandlerErr>;

pub fn respond(req: &Request, result: HandlerResult) -> serde_json::Value {
    match result {
        Ok(value) => ok(&req.id, value),
        Err(error) => error.response(&req.id),
    }
}

pub fn to_json<T: Serialize>(value: &T) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| AttendanceError::from(e).into())
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

pub fn get_bool(params: &serde_json::Value, key: &str, default: bool) -> Result<bool, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(v) => v
            .as_bool()
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a boolean", key))),
    }
}

pub fn parse_date(raw: &str, key: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
}

pub fn parse_time(raw: &str, key: &str) -> Result<NaiveTime, HandlerErr> {
    let t = raw.trim();
    NaiveTime::parse_from_str(t, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M"))
        .map_err(|_| HandlerErr::bad_params(format!("{} must be HH:MM or HH:MM:SS", key)))
}

pub fn parse_datetime(raw: &str, key: &str) -> Result<NaiveDateTime, HandlerErr> {
    let t = raw.trim();
    NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M"))
        .or_else(|_| NaiveDateTime::parse_from_str(t, "%Y-%m-%d %H:%M:%S"))
        .map_err(|_| HandlerErr::bad_params(format!("{} must be YYYY-MM-DDTHH:MM[:SS]", key)))
}

pub fn get_required_date(params: &serde_json::Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    parse_date(&get_required_str(params, key)?, key)
}

pub fn get_optional_date(params: &serde_json::Value, key: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    get_optional_str(params, key)
        .map(|s| parse_date(&s, key))
        .transpose()
}

pub fn get_required_time(params: &serde_json::Value, key: &str) -> Result<NaiveTime, HandlerErr> {
    parse_time(&get_required_str(params, key)?, key)
}

pub fn get_optional_time(params: &serde_json::Value, key: &str) -> Result<Option<NaiveTime>, HandlerErr> {
    get_optional_str(params, key)
        .map(|s| parse_time(&s, key))
        .transpose()
}

/// Explicit `key` instant if given, otherwise the sidecar clock.
pub fn instant_or_now(
    state: &AppState,
    params: &serde_json::Value,
    key: &str,
) -> Result<NaiveDateTime, HandlerErr> {
    match get_optional_str(params, key) {
        Some(raw) => parse_datetime(&raw, key),
        None => Ok(state.clock.now()),
    }
}

/// Explicit `key` date if given, otherwise today on the sidecar clock.
pub fn date_or_today(
    state: &AppState,
    params: &serde_json::Value,
    key: &str,
) -> Result<NaiveDate, HandlerErr> {
    Ok(get_optional_date(params, key)?.unwrap_or_else(|| state.clock.now().date()))
}
