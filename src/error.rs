//! Error taxonomy for the attendance core.
//!
//! Timing advisories (early/late starts) are not errors and never appear here;
//! they travel as data in `timing::TimingCheck`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttendanceError {
    /// A session, slot, status, student or section lookup came back empty.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A slot would overlap an existing active slot for the same teacher or section.
    #[error("schedule conflict: {message}")]
    ScheduleConflict {
        message: String,
        conflicting_slot_id: String,
    },

    /// Required configuration is missing (no active school year, no absent status).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The operation is not allowed in the entity's current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("{0}")]
    BadInput(String),

    /// Storage failure; the enclosing unit of work has been rolled back.
    #[error("transaction failed: {0}")]
    Transaction(#[from] rusqlite::Error),

    #[error("data integrity warning: {0}")]
    DataIntegrity(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AttendanceError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Stable code used in IPC error responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::ScheduleConflict { .. } => "schedule_conflict",
            Self::Configuration(_) => "configuration_error",
            Self::InvalidState(_) => "invalid_state",
            Self::BadInput(_) => "bad_params",
            Self::Transaction(_) => "db_transaction_failed",
            Self::DataIntegrity(_) => "data_integrity_warning",
            Self::Json(_) => "bad_json",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::NotFound { entity, id } => Some(serde_json::json!({
                "entity": entity,
                "id": id,
            })),
            Self::ScheduleConflict {
                conflicting_slot_id,
                ..
            } => Some(serde_json::json!({ "conflictingSlotId": conflicting_slot_id })),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, AttendanceError>;
