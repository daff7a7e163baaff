//! Per-student attendance risk snapshots.
//!
//! A snapshot is a derived cache keyed by (student, analysis date). It carries
//! two 30-day metrics that must not be confused:
//! - `attendance_percentage_last_30_days`: present over recorded sessions,
//!   used for tiering;
//! - `compliance_rate_last_30_days`: the calendar rate, where a school day
//!   with no record counts as absent.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Weekday};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};

use crate::calendar::{collapse_daily, round2, AttendanceRate, DayMark, SchoolCalendar};
use crate::config::{ComplianceConfig, Config, RecognitionConfig, SubjectConfig};
use crate::error::{AttendanceError, Result};
use crate::model::{BatchItemError, LedgerEntry, StatusKind};
use crate::notify::{self, Alert, AlertKind, NotificationSink};
use crate::roster;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    pub fn ordinal(self) -> i64 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowStats {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub sessions_recorded: i64,
    pub present: i64,
    pub late: i64,
    pub absent: i64,
    pub excused: i64,
    pub attendance_percentage: f64,
}

impl WindowStats {
    fn empty(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date,
            end_date,
            sessions_recorded: 0,
            present: 0,
            late: 0,
            absent: 0,
            excused: 0,
            attendance_percentage: 0.0,
        }
    }

    /// Session-level counts. The percentage is present over every recorded
    /// session; late and excused sessions are counted but not attended.
    pub fn from_entries(entries: &[LedgerEntry], start_date: NaiveDate, end_date: NaiveDate) -> Self {
        let mut stats = Self::empty(start_date, end_date);
        for e in entries.iter().filter(|e| start_date <= e.date && e.date <= end_date) {
            stats.sessions_recorded += 1;
            match e.kind {
                StatusKind::Present => stats.present += 1,
                StatusKind::Late => stats.late += 1,
                StatusKind::Absent => stats.absent += 1,
                StatusKind::Excused => stats.excused += 1,
            }
        }
        if stats.sessions_recorded > 0 {
            stats.attendance_percentage =
                round2(stats.present as f64 / stats.sessions_recorded as f64 * 100.0);
        }
        stats
    }
}

/// A threshold that contributed to the tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum TierTrigger {
    AnnualLimitExceeded {
        #[serde(rename = "totalAbsences")]
        total_absences: i64,
        limit: i64,
    },
    LowAttendance {
        percentage: f64,
        sessions: i64,
        tier: RiskTier,
    },
    FrequentTardiness {
        tardies: i64,
    },
}

impl TierTrigger {
    pub fn tier(&self) -> RiskTier {
        match self {
            Self::AnnualLimitExceeded { .. } => RiskTier::Critical,
            Self::LowAttendance { tier, .. } => *tier,
            Self::FrequentTardiness { .. } => RiskTier::Medium,
        }
    }
}

/// What the 30-day percentage would indicate if there were enough sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LowConfidenceSignal {
    pub percentage: f64,
    pub sessions: i64,
    pub indicated_tier: RiskTier,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TierAssessment {
    pub tier: RiskTier,
    pub triggers: Vec<TierTrigger>,
    pub low_confidence: Option<LowConfidenceSignal>,
}

/// Every triggered threshold is kept; the tier is the most severe of them,
/// which is the same as evaluating critical, high, medium, low top-down.
pub fn assess_tier(total_absences: i64, window: &WindowStats, cfg: &ComplianceConfig) -> TierAssessment {
    let mut triggers = Vec::new();
    let mut low_confidence = None;

    if total_absences > cfg.annual_absence_limit {
        triggers.push(TierTrigger::AnnualLimitExceeded {
            total_absences,
            limit: cfg.annual_absence_limit,
        });
    }

    let sessions = window.sessions_recorded;
    let pct = window.attendance_percentage;
    let indicated = if pct < cfg.critical_percentage {
        Some(RiskTier::Critical)
    } else if pct < cfg.high_percentage {
        Some(RiskTier::High)
    } else {
        None
    };
    if let Some(tier) = indicated {
        if sessions >= cfg.min_sessions_for_tiering {
            triggers.push(TierTrigger::LowAttendance {
                percentage: pct,
                sessions,
                tier,
            });
        } else if sessions >= cfg.min_sessions_low_confidence {
            low_confidence = Some(LowConfidenceSignal {
                percentage: pct,
                sessions,
                indicated_tier: tier,
            });
        }
    }

    if window.late >= cfg.tardy_medium_threshold {
        triggers.push(TierTrigger::FrequentTardiness {
            tardies: window.late,
        });
    }

    let tier = triggers
        .iter()
        .map(TierTrigger::tier)
        .max()
        .unwrap_or(RiskTier::Low);
    TierAssessment {
        tier,
        triggers,
        low_confidence,
    }
}

const WEEKEND_ADJACENT_MIN_ABSENCES: i64 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekendAdjacentPattern {
    pub monday_absences: i64,
    pub friday_absences: i64,
    pub absence_days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsecutiveAbsencePattern {
    pub longest_run: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub ongoing: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patterns {
    pub weekend_adjacent: Option<WeekendAdjacentPattern>,
    pub consecutive_absence: Option<ConsecutiveAbsencePattern>,
    pub perfect_streak_days: i64,
}

/// Patterns over day-collapsed marks between `start` and `end`.
///
/// Consecutive runs walk valid school days only; a day with no record breaks
/// a run. The perfect streak counts school days back from `end`, stopping at
/// the first day that was not fully present or has no record.
pub fn detect_patterns(
    calendar: &SchoolCalendar,
    days: &[DayMark],
    start: NaiveDate,
    end: NaiveDate,
) -> Patterns {
    let by_date: BTreeMap<NaiveDate, StatusKind> = days
        .iter()
        .filter(|d| start <= d.date && d.date <= end)
        .map(|d| (d.date, d.kind))
        .collect();

    let absences: Vec<NaiveDate> = by_date
        .iter()
        .filter(|(_, k)| **k == StatusKind::Absent)
        .map(|(d, _)| *d)
        .collect();
    let monday = absences.iter().filter(|d| d.weekday() == Weekday::Mon).count() as i64;
    let friday = absences.iter().filter(|d| d.weekday() == Weekday::Fri).count() as i64;
    let adjacent = monday + friday;
    let weekend_adjacent = (adjacent >= WEEKEND_ADJACENT_MIN_ABSENCES
        && adjacent * 2 >= absences.len() as i64)
        .then(|| WeekendAdjacentPattern {
            monday_absences: monday,
            friday_absences: friday,
            absence_days: absences.len() as i64,
        });

    let school_days = calendar.valid_school_days_between(start, end);
    let mut best: Option<ConsecutiveAbsencePattern> = None;
    let mut run_start: Option<NaiveDate> = None;
    let mut run_len = 0i64;
    for (i, day) in school_days.iter().enumerate() {
        if by_date.get(day) == Some(&StatusKind::Absent) {
            if run_start.is_none() {
                run_start = Some(*day);
            }
            run_len += 1;
            let longer = best.as_ref().map_or(true, |b| run_len > b.longest_run);
            if longer {
                best = Some(ConsecutiveAbsencePattern {
                    longest_run: run_len,
                    start_date: run_start.unwrap_or(*day),
                    end_date: *day,
                    ongoing: i + 1 == school_days.len(),
                });
            }
        } else {
            run_start = None;
            run_len = 0;
        }
    }
    let consecutive_absence = best.filter(|b| b.longest_run >= 2);

    let perfect_streak_days = school_days
        .iter()
        .rev()
        .take_while(|d| by_date.get(*d) == Some(&StatusKind::Present))
        .count() as i64;

    Patterns {
        weekend_adjacent,
        consecutive_absence,
        perfect_streak_days,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectSeverity {
    Concern,
    Elevated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectBreakdown {
    pub subject_id: String,
    pub subject_name: String,
    pub sessions: i64,
    pub present: i64,
    pub late: i64,
    pub absent: i64,
    pub excused: i64,
    pub attendance_rate: f64,
    pub absence_rate: f64,
    pub severity: Option<SubjectSeverity>,
}

pub fn subject_breakdown(
    entries: &[LedgerEntry],
    names: &HashMap<String, String>,
    cfg: &SubjectConfig,
) -> Vec<SubjectBreakdown> {
    let mut by_subject: BTreeMap<&str, [i64; 4]> = BTreeMap::new();
    for e in entries {
        let counts = by_subject.entry(e.subject_id.as_str()).or_default();
        let slot = match e.kind {
            StatusKind::Present => 0,
            StatusKind::Late => 1,
            StatusKind::Absent => 2,
            StatusKind::Excused => 3,
        };
        counts[slot] += 1;
    }

    by_subject
        .into_iter()
        .map(|(subject_id, [present, late, absent, excused])| {
            let sessions = present + late + absent + excused;
            let attendance_rate = round2((present + late) as f64 / sessions as f64 * 100.0);
            let absence_rate = round2(absent as f64 / sessions as f64 * 100.0);
            let severity = if sessions < cfg.min_sessions {
                None
            } else if absence_rate >= cfg.elevated_absence_rate {
                Some(SubjectSeverity::Elevated)
            } else if absence_rate >= cfg.concern_absence_rate {
                Some(SubjectSeverity::Concern)
            } else {
                None
            };
            SubjectBreakdown {
                subject_id: subject_id.to_string(),
                subject_name: names
                    .get(subject_id)
                    .cloned()
                    .unwrap_or_else(|| subject_id.to_string()),
                sessions,
                present,
                late,
                absent,
                excused,
                attendance_rate,
                absence_rate,
                severity,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskSnapshot {
    pub student_id: String,
    pub analysis_date: NaiveDate,
    /// False for the "no data yet" snapshot of a student with no records.
    pub has_data: bool,
    pub school_year_id: Option<String>,
    pub total_absences_this_year: i64,
    pub annual_absence_limit: i64,
    pub exceeds_annual_absence_limit: bool,
    pub sessions_last_30_days: i64,
    pub tardies_last_30_days: i64,
    pub attendance_percentage_last_30_days: f64,
    pub compliance_rate_last_30_days: AttendanceRate,
    pub window: WindowStats,
    pub risk_tier: RiskTier,
    pub triggers: Vec<TierTrigger>,
    pub low_confidence: Option<LowConfidenceSignal>,
    pub patterns: Patterns,
    pub subjects: Vec<SubjectBreakdown>,
    pub generated_at: NaiveDateTime,
}

fn window_start(as_of: NaiveDate, window_days: i64) -> NaiveDate {
    as_of - chrono::Duration::days(window_days.max(1) - 1)
}

impl RiskSnapshot {
    pub fn no_data(student_id: &str, as_of: NaiveDate, now: NaiveDateTime, cfg: &ComplianceConfig) -> Self {
        Self {
            student_id: student_id.to_string(),
            analysis_date: as_of,
            has_data: false,
            school_year_id: None,
            total_absences_this_year: 0,
            annual_absence_limit: cfg.annual_absence_limit,
            exceeds_annual_absence_limit: false,
            sessions_last_30_days: 0,
            tardies_last_30_days: 0,
            attendance_percentage_last_30_days: 0.0,
            compliance_rate_last_30_days: AttendanceRate::empty(),
            window: WindowStats::empty(window_start(as_of, cfg.window_days), as_of),
            risk_tier: RiskTier::Low,
            triggers: Vec::new(),
            low_confidence: None,
            patterns: Patterns::default(),
            subjects: Vec::new(),
            generated_at: now,
        }
    }
}

/// Every record for the student on sessions dated within `[from, to]`.
pub fn student_ledger(
    conn: &Connection,
    student_id: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<LedgerEntry>> {
    let mut stmt = conn.prepare(
        "SELECT s.session_date, s.subject_id, st.kind
         FROM attendance_records r
         JOIN attendance_sessions s ON s.id = r.session_id
         JOIN attendance_statuses st ON st.code = r.status_code
         WHERE r.student_id = ? AND s.session_date >= ? AND s.session_date <= ?
         ORDER BY s.session_date, s.start_time, s.subject_id",
    )?;
    let rows = stmt
        .query_map((student_id, from, to), |r| {
            let kind_raw: String = r.get(2)?;
            let kind = StatusKind::parse(&kind_raw).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    2,
                    rusqlite::types::Type::Text,
                    format!("unknown status kind {kind_raw}").into(),
                )
            })?;
            Ok(LedgerEntry {
                date: r.get(0)?,
                subject_id: r.get(1)?,
                kind,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn has_any_record(conn: &Connection, student_id: &str, as_of: NaiveDate) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM attendance_records r
             JOIN attendance_sessions s ON s.id = r.session_id
             WHERE r.student_id = ? AND s.session_date <= ?
             LIMIT 1",
            (student_id, as_of),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

fn ensure_student(conn: &Connection, student_id: &str) -> Result<()> {
    conn.query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()?
    .map(|_| ())
    .ok_or_else(|| AttendanceError::not_found("student", student_id))
}

/// Compute, persist (overwriting any same-day snapshot) and alert.
pub fn generate_snapshot(
    conn: &Connection,
    calendar: &SchoolCalendar,
    config: &Config,
    student_id: &str,
    as_of: NaiveDate,
    now: NaiveDateTime,
    sink: &mut dyn NotificationSink,
) -> Result<RiskSnapshot> {
    let cfg = &config.compliance;
    ensure_student(conn, student_id)?;
    if !has_any_record(conn, student_id, as_of)? {
        tracing::debug!(student_id, "no attendance recorded yet");
        return Ok(RiskSnapshot::no_data(student_id, as_of, now, cfg));
    }
    let year = calendar.require_active_year()?;
    let year_end = as_of.min(year.end_date);

    let year_entries = student_ledger(conn, student_id, year.start_date, year_end)?;
    let total_absences = year_entries
        .iter()
        .filter(|e| e.kind == StatusKind::Absent)
        .count() as i64;

    let start = window_start(as_of, cfg.window_days);
    let window_entries = student_ledger(conn, student_id, start, as_of)?;
    let window = WindowStats::from_entries(&window_entries, start, as_of);
    let compliance = calendar.compute_attendance_rate(
        &collapse_daily(&window_entries),
        start,
        as_of,
        cfg.min_reporting_days,
    );

    let assessment = assess_tier(total_absences, &window, cfg);
    let patterns = detect_patterns(calendar, &collapse_daily(&year_entries), year.start_date, year_end);
    let subjects = subject_breakdown(&year_entries, &roster::subject_names(conn)?, &config.subjects);

    let snapshot = RiskSnapshot {
        student_id: student_id.to_string(),
        analysis_date: as_of,
        has_data: true,
        school_year_id: Some(year.id.clone()),
        total_absences_this_year: total_absences,
        annual_absence_limit: cfg.annual_absence_limit,
        exceeds_annual_absence_limit: total_absences > cfg.annual_absence_limit,
        sessions_last_30_days: window.sessions_recorded,
        tardies_last_30_days: window.late,
        attendance_percentage_last_30_days: window.attendance_percentage,
        compliance_rate_last_30_days: compliance,
        window,
        risk_tier: assessment.tier,
        triggers: assessment.triggers,
        low_confidence: assessment.low_confidence,
        patterns,
        subjects,
        generated_at: now,
    };
    save_snapshot(conn, &snapshot)?;
    emit_alerts(conn, &snapshot, sink);
    tracing::info!(
        student_id,
        analysis_date = %as_of,
        risk_tier = snapshot.risk_tier.as_str(),
        "risk snapshot generated"
    );
    Ok(snapshot)
}

fn save_snapshot(conn: &Connection, snapshot: &RiskSnapshot) -> Result<()> {
    conn.execute(
        "INSERT INTO risk_snapshots(student_id, analysis_date, risk_tier, payload, generated_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(student_id, analysis_date) DO UPDATE SET
           risk_tier = excluded.risk_tier,
           payload = excluded.payload,
           generated_at = excluded.generated_at",
        (
            &snapshot.student_id,
            snapshot.analysis_date,
            snapshot.risk_tier.as_str(),
            serde_json::to_string(snapshot)?,
            snapshot.generated_at,
        ),
    )?;
    Ok(())
}

fn alert_kinds(snapshot: &RiskSnapshot) -> Vec<AlertKind> {
    let mut kinds = Vec::new();
    if snapshot.exceeds_annual_absence_limit {
        kinds.push(AlertKind::AnnualLimitExceeded);
    }
    match snapshot.risk_tier {
        RiskTier::Critical => kinds.push(AlertKind::CriticalRisk),
        RiskTier::High => kinds.push(AlertKind::HighRisk),
        _ => {}
    }
    kinds
}

/// Alerts are fire-and-forget: failures are logged, never returned.
fn emit_alerts(conn: &Connection, snapshot: &RiskSnapshot, sink: &mut dyn NotificationSink) {
    let kinds = alert_kinds(snapshot);
    if kinds.is_empty() {
        return;
    }
    let recipients = match notify::recipients_for(conn, &snapshot.student_id) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(student_id = %snapshot.student_id, error = %e, "could not resolve alert recipients");
            vec![notify::ADMINISTRATION.to_string()]
        }
    };
    let payload = json!({
        "riskTier": snapshot.risk_tier,
        "totalAbsencesThisYear": snapshot.total_absences_this_year,
        "attendancePercentageLast30Days": snapshot.attendance_percentage_last_30_days,
        "exceedsAnnualAbsenceLimit": snapshot.exceeds_annual_absence_limit,
    });
    for recipient in &recipients {
        for kind in &kinds {
            let severity = match kind {
                AlertKind::HighRisk => RiskTier::High,
                _ => RiskTier::Critical,
            };
            let alert = Alert {
                recipient: recipient.clone(),
                student_id: snapshot.student_id.clone(),
                alert_date: snapshot.analysis_date,
                kind: *kind,
                severity: severity.as_str().to_string(),
                payload: payload.clone(),
            };
            if let Err(e) = sink.send(&alert) {
                tracing::warn!(
                    student_id = %snapshot.student_id,
                    recipient = %recipient,
                    error = %e,
                    "alert could not be queued"
                );
            }
        }
    }
}

fn decode_snapshot(payload: &str) -> Result<RiskSnapshot> {
    serde_json::from_str(payload)
        .map_err(|e| AttendanceError::DataIntegrity(format!("stored risk snapshot is unreadable: {e}")))
}

#[cfg(test)]
pub fn load_snapshot(conn: &Connection, student_id: &str, date: NaiveDate) -> Result<Option<RiskSnapshot>> {
    let payload: Option<String> = conn
        .query_row(
            "SELECT payload FROM risk_snapshots WHERE student_id = ? AND analysis_date = ?",
            (student_id, date),
            |r| r.get(0),
        )
        .optional()?;
    payload.as_deref().map(decode_snapshot).transpose()
}

/// Latest stored snapshot strictly before `before`.
pub fn previous_snapshot(
    conn: &Connection,
    student_id: &str,
    before: NaiveDate,
) -> Result<Option<RiskSnapshot>> {
    let payload: Option<String> = conn
        .query_row(
            "SELECT payload FROM risk_snapshots
             WHERE student_id = ? AND analysis_date < ?
             ORDER BY analysis_date DESC
             LIMIT 1",
            (student_id, before),
            |r| r.get(0),
        )
        .optional()?;
    payload.as_deref().map(decode_snapshot).transpose()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotComparison {
    pub previous_date: NaiveDate,
    pub percentage_change: f64,
    /// Current minus previous; negative means fewer tardies.
    pub tardiness_change: i64,
    /// Current ordinal minus previous; negative means a lower tier.
    pub tier_change: i64,
    pub percentage_improved: bool,
    pub tardiness_improved: bool,
    pub tier_improved: bool,
    pub improved: bool,
}

pub fn compare_to_previous(
    current: &RiskSnapshot,
    previous: &RiskSnapshot,
    cfg: &RecognitionConfig,
) -> SnapshotComparison {
    let percentage_change = round2(
        current.attendance_percentage_last_30_days - previous.attendance_percentage_last_30_days,
    );
    let tardiness_change = current.tardies_last_30_days - previous.tardies_last_30_days;
    let tier_change = current.risk_tier.ordinal() - previous.risk_tier.ordinal();

    let percentage_improved = percentage_change >= cfg.improvement_points;
    let tardiness_improved = -tardiness_change >= cfg.tardiness_drop;
    let tier_improved = tier_change < 0;
    SnapshotComparison {
        previous_date: previous.analysis_date,
        percentage_change,
        tardiness_change,
        tier_change,
        percentage_improved,
        tardiness_improved,
        tier_improved,
        improved: percentage_improved || tardiness_improved || tier_improved,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRisk {
    pub student_id: String,
    pub has_data: bool,
    pub risk_tier: RiskTier,
    pub attendance_percentage_last_30_days: f64,
    pub total_absences_this_year: i64,
    pub exceeds_annual_absence_limit: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherAnalytics {
    pub teacher_id: String,
    pub analysis_date: NaiveDate,
    pub processed: usize,
    pub errors: Vec<BatchItemError>,
    pub tier_counts: BTreeMap<RiskTier, usize>,
    /// Most at-risk first.
    pub students: Vec<StudentRisk>,
}

/// Snapshot every student reachable from the teacher's active slots.
/// One student's failure is recorded and the rest carry on.
pub fn analyze_teacher_students(
    conn: &Connection,
    config: &Config,
    teacher_id: &str,
    as_of: NaiveDate,
    now: NaiveDateTime,
    sink: &mut dyn NotificationSink,
) -> Result<TeacherAnalytics> {
    let calendar = SchoolCalendar::load(conn)?;
    let student_ids = roster::students_for_teacher(conn, teacher_id)?;

    let mut out = TeacherAnalytics {
        teacher_id: teacher_id.to_string(),
        analysis_date: as_of,
        processed: 0,
        errors: Vec::new(),
        tier_counts: BTreeMap::new(),
        students: Vec::new(),
    };
    for student_id in student_ids {
        match generate_snapshot(conn, &calendar, config, &student_id, as_of, now, sink) {
            Ok(s) => {
                out.processed += 1;
                *out.tier_counts.entry(s.risk_tier).or_default() += 1;
                out.students.push(StudentRisk {
                    student_id: s.student_id,
                    has_data: s.has_data,
                    risk_tier: s.risk_tier,
                    attendance_percentage_last_30_days: s.attendance_percentage_last_30_days,
                    total_absences_this_year: s.total_absences_this_year,
                    exceeds_annual_absence_limit: s.exceeds_annual_absence_limit,
                });
            }
            Err(e) => {
                tracing::warn!(teacher_id, student_id = %student_id, error = %e, "snapshot failed; skipping");
                out.errors.push(BatchItemError {
                    item_id: student_id,
                    code: e.code().to_string(),
                    message: e.to_string(),
                });
            }
        }
    }
    out.students.sort_by(|a, b| {
        b.risk_tier
            .cmp(&a.risk_tier)
            .then_with(|| a.student_id.cmp(&b.student_id))
    });
    Ok(out)
}
