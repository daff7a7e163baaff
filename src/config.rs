//! TOML workspace configuration.
//!
//! Read from `attendanced.toml` in the workspace directory. Every key has a
//! default, so a missing file or a partial file is fine.

use anyhow::Context;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::model::{HolidayKind, StatusKind};

pub const CONFIG_FILE_NAME: &str = "attendanced.toml";

/// Thresholds used by risk tiering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceConfig {
    #[serde(default = "default_annual_absence_limit")]
    pub annual_absence_limit: i64,
    #[serde(default = "default_critical_percentage")]
    pub critical_percentage: f64,
    #[serde(default = "default_high_percentage")]
    pub high_percentage: f64,
    #[serde(default = "default_min_sessions_for_tiering")]
    pub min_sessions_for_tiering: i64,
    #[serde(default = "default_min_sessions_low_confidence")]
    pub min_sessions_low_confidence: i64,
    #[serde(default = "default_tardy_medium_threshold")]
    pub tardy_medium_threshold: i64,
    #[serde(default = "default_tardy_transport_threshold")]
    pub tardy_transport_threshold: i64,
    #[serde(default = "default_window_days")]
    pub window_days: i64,
    #[serde(default = "default_min_reporting_days")]
    pub min_reporting_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectConfig {
    #[serde(default = "default_concern_absence_rate")]
    pub concern_absence_rate: f64,
    #[serde(default = "default_elevated_absence_rate")]
    pub elevated_absence_rate: f64,
    #[serde(default = "default_subject_min_sessions")]
    pub min_sessions: i64,
    #[serde(default = "default_excellence_rate")]
    pub excellence_rate: f64,
    #[serde(default = "default_excellence_min_sessions")]
    pub excellence_min_sessions: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    #[serde(default = "default_streak_days")]
    pub streak_days: i64,
    #[serde(default = "default_improvement_points")]
    pub improvement_points: f64,
    #[serde(default = "default_tardiness_drop")]
    pub tardiness_drop: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Minutes after the slot start still reported as on time.
    #[serde(default = "default_on_time_grace_minutes")]
    pub on_time_grace_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    #[serde(default = "default_system_actor")]
    pub system_actor: String,
    #[serde(default = "default_absent_code")]
    pub absent_code: String,
    #[serde(default = "default_remark")]
    pub remark: String,
    /// Calendar days before `as_of` scanned for never-opened slots. The
    /// previous school day is always scanned.
    #[serde(default)]
    pub lookback_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSeed {
    pub code: String,
    pub name: String,
    pub kind: StatusKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HolidaySeed {
    pub date: NaiveDate,
    pub name: String,
    #[serde(default)]
    pub kind: HolidayKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub compliance: ComplianceConfig,
    #[serde(default)]
    pub subjects: SubjectConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default = "default_statuses")]
    pub statuses: Vec<StatusSeed>,
    /// Merged into the holiday table when a workspace opens.
    #[serde(default)]
    pub holidays: Vec<HolidaySeed>,
}

fn default_annual_absence_limit() -> i64 {
    18
}
fn default_critical_percentage() -> f64 {
    70.0
}
fn default_high_percentage() -> f64 {
    80.0
}
fn default_min_sessions_for_tiering() -> i64 {
    10
}
fn default_min_sessions_low_confidence() -> i64 {
    5
}
fn default_tardy_medium_threshold() -> i64 {
    5
}
fn default_tardy_transport_threshold() -> i64 {
    8
}
fn default_window_days() -> i64 {
    30
}
fn default_min_reporting_days() -> i64 {
    10
}
fn default_concern_absence_rate() -> f64 {
    30.0
}
fn default_elevated_absence_rate() -> f64 {
    50.0
}
fn default_subject_min_sessions() -> i64 {
    5
}
fn default_excellence_rate() -> f64 {
    95.0
}
fn default_excellence_min_sessions() -> i64 {
    10
}
fn default_streak_days() -> i64 {
    7
}
fn default_improvement_points() -> f64 {
    10.0
}
fn default_tardiness_drop() -> i64 {
    3
}
fn default_on_time_grace_minutes() -> i64 {
    10
}
fn default_system_actor() -> String {
    "system".to_string()
}
fn default_absent_code() -> String {
    "A".to_string()
}
fn default_remark() -> String {
    "Automatically marked absent: no attendance recorded before the period ended".to_string()
}
fn default_statuses() -> Vec<StatusSeed> {
    [
        ("P", "Present", StatusKind::Present),
        ("A", "Absent", StatusKind::Absent),
        ("L", "Late", StatusKind::Late),
        ("E", "Excused", StatusKind::Excused),
    ]
    .into_iter()
    .map(|(code, name, kind)| StatusSeed {
        code: code.to_string(),
        name: name.to_string(),
        kind,
    })
    .collect()
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            annual_absence_limit: default_annual_absence_limit(),
            critical_percentage: default_critical_percentage(),
            high_percentage: default_high_percentage(),
            min_sessions_for_tiering: default_min_sessions_for_tiering(),
            min_sessions_low_confidence: default_min_sessions_low_confidence(),
            tardy_medium_threshold: default_tardy_medium_threshold(),
            tardy_transport_threshold: default_tardy_transport_threshold(),
            window_days: default_window_days(),
            min_reporting_days: default_min_reporting_days(),
        }
    }
}

impl Default for SubjectConfig {
    fn default() -> Self {
        Self {
            concern_absence_rate: default_concern_absence_rate(),
            elevated_absence_rate: default_elevated_absence_rate(),
            min_sessions: default_subject_min_sessions(),
            excellence_rate: default_excellence_rate(),
            excellence_min_sessions: default_excellence_min_sessions(),
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            streak_days: default_streak_days(),
            improvement_points: default_improvement_points(),
            tardiness_drop: default_tardiness_drop(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            on_time_grace_minutes: default_on_time_grace_minutes(),
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            system_actor: default_system_actor(),
            absent_code: default_absent_code(),
            remark: default_remark(),
            lookback_days: 0,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            compliance: ComplianceConfig::default(),
            subjects: SubjectConfig::default(),
            recognition: RecognitionConfig::default(),
            timing: TimingConfig::default(),
            reconciler: ReconcilerConfig::default(),
            statuses: default_statuses(),
            holidays: Vec::new(),
        }
    }
}

impl Config {
    /// Load `attendanced.toml` from `workspace`, falling back to defaults when absent.
    pub fn load(workspace: &Path) -> anyhow::Result<Self> {
        let path = workspace.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let c = &self.compliance;
        if c.critical_percentage > c.high_percentage {
            anyhow::bail!(
                "compliance.critical_percentage ({}) must not exceed compliance.high_percentage ({})",
                c.critical_percentage,
                c.high_percentage
            );
        }
        if c.min_sessions_low_confidence > c.min_sessions_for_tiering {
            anyhow::bail!("compliance.min_sessions_low_confidence must not exceed min_sessions_for_tiering");
        }
        if c.window_days < 1 {
            anyhow::bail!("compliance.window_days must be at least 1");
        }
        if self.subjects.concern_absence_rate > self.subjects.elevated_absence_rate {
            anyhow::bail!("subjects.concern_absence_rate must not exceed subjects.elevated_absence_rate");
        }
        if self.reconciler.lookback_days < 0 {
            anyhow::bail!("reconciler.lookback_days must not be negative");
        }
        if self.reconciler.absent_code.trim().is_empty() {
            anyhow::bail!("reconciler.absent_code must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.compliance.annual_absence_limit, 18);
        assert_eq!(cfg.reconciler.absent_code, "A");
        assert_eq!(cfg.statuses.len(), 4);
        assert!(cfg.holidays.is_empty());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"
[compliance]
annual_absence_limit = 15

[[holidays]]
date = "2024-12-25"
name = "Christmas Day"
kind = "national"
"#,
        )
        .unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.compliance.annual_absence_limit, 15);
        assert_eq!(cfg.compliance.high_percentage, 80.0);
        assert_eq!(cfg.timing.on_time_grace_minutes, 10);
        assert_eq!(cfg.holidays.len(), 1);
        assert_eq!(cfg.holidays[0].kind, HolidayKind::National);
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[compliance]\ncritical_percentage = 90.0\n",
        )
        .unwrap();
        assert!(Config::load(dir.path()).is_err());
    }
}
