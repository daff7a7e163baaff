use serde::Serialize;
use serde_json::json;

use crate::error::AttendanceError;

/// The `error` object of a failed response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&AttendanceError> for ErrorBody {
    fn from(e: &AttendanceError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
            details: e.details(),
        }
    }
}

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({ "id": id, "ok": true, "result": result })
}

pub fn failure(id: &str, body: ErrorBody) -> serde_json::Value {
    json!({ "id": id, "ok": false, "error": body })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    failure(
        id,
        ErrorBody {
            code: code.to_string(),
            message: message.into(),
            details,
        },
    )
}

/// Envelope for a core error, keeping its stable code and details.
pub fn attendance_err(id: &str, e: &AttendanceError) -> serde_json::Value {
    failure(id, e.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_are_omitted_when_absent() {
        let v = err("7", "no_workspace", "select a workspace first", None);
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"]["code"], "no_workspace");
        assert!(v["error"].get("details").is_none());
    }

    #[test]
    fn core_errors_carry_code_and_details() {
        let v = attendance_err("9", &AttendanceError::not_found("slot", "slot-1"));
        assert_eq!(v["id"], "9");
        assert_eq!(v["error"]["code"], "not_found");
        assert_eq!(v["error"]["message"], "slot not found: slot-1");
        assert_eq!(v["error"]["details"]["id"], "slot-1");
    }
}
