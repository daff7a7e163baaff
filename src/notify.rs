//! Write-only alert sink. Delivery is someone else's job; this side only
//! records what should be sent, once per (recipient, student, date, kind).

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AttendanceError, Result};

/// Recipient used when a student's sections have no adviser on file.
pub const ADMINISTRATION: &str = "administration";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    AnnualLimitExceeded,
    CriticalRisk,
    HighRisk,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AnnualLimitExceeded => "annual_limit_exceeded",
            Self::CriticalRisk => "critical_risk",
            Self::HighRisk => "high_risk",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub recipient: String,
    pub student_id: String,
    pub alert_date: NaiveDate,
    pub kind: AlertKind,
    pub severity: String,
    pub payload: serde_json::Value,
}

pub trait NotificationSink {
    /// Returns false when an identical alert was already accepted.
    fn send(&mut self, alert: &Alert) -> Result<bool>;
}

/// Persists alerts to `notification_outbox`.
pub struct OutboxSink<'c> {
    conn: &'c Connection,
    now: NaiveDateTime,
}

impl<'c> OutboxSink<'c> {
    pub fn new(conn: &'c Connection, now: NaiveDateTime) -> Self {
        Self { conn, now }
    }
}

impl NotificationSink for OutboxSink<'_> {
    fn send(&mut self, alert: &Alert) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT INTO notification_outbox(id, recipient, student_id, alert_date, kind, severity, payload, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(recipient, student_id, alert_date, kind) DO NOTHING",
            (
                Uuid::new_v4().to_string(),
                &alert.recipient,
                &alert.student_id,
                alert.alert_date,
                alert.kind.as_str(),
                &alert.severity,
                serde_json::to_string(&alert.payload)?,
                self.now,
            ),
        )?;
        if inserted == 1 {
            tracing::info!(
                recipient = %alert.recipient,
                student_id = %alert.student_id,
                kind = alert.kind.as_str(),
                "alert queued"
            );
        }
        Ok(inserted == 1)
    }
}

/// Advisers of the student's active sections, or `administration` when none are known.
pub fn recipients_for(conn: &Connection, student_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT s.adviser_id
         FROM section_enrollments e
         JOIN sections s ON s.id = e.section_id
         WHERE e.student_id = ? AND e.active = 1 AND s.adviser_id IS NOT NULL AND s.adviser_id <> ''
         ORDER BY s.adviser_id",
    )?;
    let mut advisers = stmt
        .query_map([student_id], |r| r.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if advisers.is_empty() {
        advisers.push(ADMINISTRATION.to_string());
    }
    Ok(advisers)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    pub id: String,
    pub recipient: String,
    pub student_id: String,
    pub alert_date: NaiveDate,
    pub kind: String,
    pub severity: String,
    pub payload: serde_json::Value,
    pub created_at: NaiveDateTime,
}

pub fn list_outbox(conn: &Connection, recipient: Option<&str>) -> Result<Vec<OutboxEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, recipient, student_id, alert_date, kind, severity, payload, created_at
         FROM notification_outbox
         WHERE (?1 IS NULL OR recipient = ?1)
         ORDER BY created_at, alert_date, recipient, student_id, kind",
    )?;
    let rows = stmt
        .query_map([recipient], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, NaiveDate>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, String>(6)?,
                r.get::<_, NaiveDateTime>(7)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(
            |(id, recipient, student_id, alert_date, kind, severity, payload, created_at)| {
                let payload = serde_json::from_str(&payload).map_err(|e| {
                    AttendanceError::DataIntegrity(format!("outbox entry {id} has a corrupt payload: {e}"))
                })?;
                Ok(OutboxEntry {
                    id,
                    recipient,
                    student_id,
                    alert_date,
                    kind,
                    severity,
                    payload,
                    created_at,
                })
            },
        )
        .collect()
}

/// Keeps alerts in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub alerts: Vec<Alert>,
}

#[cfg(test)]
impl NotificationSink for CollectingSink {
    fn send(&mut self, alert: &Alert) -> Result<bool> {
        if self.alerts.contains(alert) {
            return Ok(false);
        }
        self.alerts.push(alert.clone());
        Ok(true)
    }
}
