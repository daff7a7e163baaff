//! Ranked improvements, concerns and next steps for one risk snapshot.
//!
//! Pure: no storage, no clock. Every list is stably sorted by urgency,
//! most urgent first, so items of equal urgency keep detection order.

use serde::Serialize;
use std::cmp::Reverse;

use crate::config::Config;
use crate::risk::{
    compare_to_previous, Patterns, RiskSnapshot, RiskTier, SnapshotComparison, SubjectSeverity,
    TierTrigger,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    pub fn rank(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }
}

trait Ranked {
    fn urgency(&self) -> Urgency;
}

fn sort_by_urgency<T: Ranked>(items: &mut [T]) {
    // sort_by_key is stable.
    items.sort_by_key(|i| Reverse(i.urgency().rank()));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImprovementKind {
    Trend,
    Streak,
    SubjectExcellence,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Improvement {
    pub kind: ImprovementKind,
    pub urgency: Urgency,
    pub title: String,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcernCategory {
    AnnualLimit,
    LowAttendance,
    LimitedData,
    Tardiness,
    WeekendPattern,
    ConsecutiveAbsence,
    Subject,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Concern {
    pub category: ConcernCategory,
    pub urgency: Urgency,
    pub title: String,
    pub detail: String,
    pub subject_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextStep {
    pub category: Option<ConcernCategory>,
    pub urgency: Urgency,
    pub action: String,
    pub timeframe: Option<String>,
}

impl Ranked for Improvement {
    fn urgency(&self) -> Urgency {
        self.urgency
    }
}

impl Ranked for Concern {
    fn urgency(&self) -> Urgency {
        self.urgency
    }
}

impl Ranked for NextStep {
    fn urgency(&self) -> Urgency {
        self.urgency
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendations {
    pub comparison: Option<SnapshotComparison>,
    pub improvements: Vec<Improvement>,
    pub concerns: Vec<Concern>,
    pub next_steps: Vec<NextStep>,
}

pub fn recommend(
    current: &RiskSnapshot,
    previous: Option<&RiskSnapshot>,
    patterns: &Patterns,
    config: &Config,
) -> Recommendations {
    let comparison = previous.map(|p| compare_to_previous(current, p, &config.recognition));

    let mut improvements = improvements(current, comparison.as_ref(), patterns, config);
    let mut concerns = concerns(current, patterns);
    let mut next_steps = next_steps(current, &concerns, config);

    sort_by_urgency(&mut improvements);
    sort_by_urgency(&mut concerns);
    sort_by_urgency(&mut next_steps);
    Recommendations {
        comparison,
        improvements,
        concerns,
        next_steps,
    }
}

fn improvements(
    current: &RiskSnapshot,
    comparison: Option<&SnapshotComparison>,
    patterns: &Patterns,
    config: &Config,
) -> Vec<Improvement> {
    let mut out = Vec::new();
    if let Some(c) = comparison {
        if c.tier_improved {
            out.push(Improvement {
                kind: ImprovementKind::Trend,
                urgency: Urgency::High,
                title: "Risk level reduced".to_string(),
                detail: format!(
                    "Now {} risk, down {} level(s) since {}",
                    current.risk_tier.as_str(),
                    -c.tier_change,
                    c.previous_date
                ),
            });
        }
        if c.percentage_improved {
            out.push(Improvement {
                kind: ImprovementKind::Trend,
                urgency: Urgency::Medium,
                title: "Attendance is improving".to_string(),
                detail: format!(
                    "30-day attendance up {:.2} points since {}",
                    c.percentage_change, c.previous_date
                ),
            });
        }
        if c.tardiness_improved {
            out.push(Improvement {
                kind: ImprovementKind::Trend,
                urgency: Urgency::Medium,
                title: "Fewer late arrivals".to_string(),
                detail: format!(
                    "{} fewer tardies than on {}",
                    -c.tardiness_change, c.previous_date
                ),
            });
        }
    }

    if patterns.perfect_streak_days >= config.recognition.streak_days {
        out.push(Improvement {
            kind: ImprovementKind::Streak,
            urgency: Urgency::Low,
            title: "Perfect attendance streak".to_string(),
            detail: format!("{} school days present in a row", patterns.perfect_streak_days),
        });
    }

    for subject in &current.subjects {
        if subject.sessions >= config.subjects.excellence_min_sessions
            && subject.attendance_rate >= config.subjects.excellence_rate
        {
            out.push(Improvement {
                kind: ImprovementKind::SubjectExcellence,
                urgency: Urgency::Low,
                title: format!("Excellent attendance in {}", subject.subject_name),
                detail: format!(
                    "{:.2}% over {} sessions",
                    subject.attendance_rate, subject.sessions
                ),
            });
        }
    }
    out
}

fn tier_urgency(tier: RiskTier) -> Urgency {
    match tier {
        RiskTier::Low => Urgency::Low,
        RiskTier::Medium => Urgency::Medium,
        RiskTier::High => Urgency::High,
        RiskTier::Critical => Urgency::Critical,
    }
}

fn concerns(current: &RiskSnapshot, patterns: &Patterns) -> Vec<Concern> {
    let mut out = Vec::new();
    for trigger in &current.triggers {
        let concern = match trigger {
            TierTrigger::AnnualLimitExceeded {
                total_absences,
                limit,
            } => Concern {
                category: ConcernCategory::AnnualLimit,
                urgency: Urgency::Critical,
                title: "Annual absence limit exceeded".to_string(),
                detail: format!("{total_absences} absences this school year (limit {limit})"),
                subject_id: None,
            },
            TierTrigger::LowAttendance {
                percentage,
                sessions,
                tier,
            } => Concern {
                category: ConcernCategory::LowAttendance,
                urgency: tier_urgency(*tier),
                title: "Low attendance in the last 30 days".to_string(),
                detail: format!("{percentage:.2}% over {sessions} recorded sessions"),
                subject_id: None,
            },
            TierTrigger::FrequentTardiness { tardies } => Concern {
                category: ConcernCategory::Tardiness,
                urgency: Urgency::Medium,
                title: "Frequent tardiness".to_string(),
                detail: format!("{tardies} late arrivals in the last 30 days"),
                subject_id: None,
            },
        };
        out.push(concern);
    }

    if let Some(signal) = &current.low_confidence {
        out.push(Concern {
            category: ConcernCategory::LimitedData,
            urgency: Urgency::Low,
            title: "Attendance trending low (limited data)".to_string(),
            detail: format!(
                "{:.2}% over only {} sessions; would indicate {} risk",
                signal.percentage,
                signal.sessions,
                signal.indicated_tier.as_str()
            ),
            subject_id: None,
        });
    }

    if let Some(w) = &patterns.weekend_adjacent {
        out.push(Concern {
            category: ConcernCategory::WeekendPattern,
            urgency: Urgency::Medium,
            title: "Absences cluster around weekends".to_string(),
            detail: format!(
                "{} Monday and {} Friday absences out of {} absent days",
                w.monday_absences, w.friday_absences, w.absence_days
            ),
            subject_id: None,
        });
    }
    if let Some(c) = &patterns.consecutive_absence {
        out.push(Concern {
            category: ConcernCategory::ConsecutiveAbsence,
            urgency: if c.ongoing { Urgency::High } else { Urgency::Medium },
            title: "Consecutive absences".to_string(),
            detail: format!(
                "{} school days in a row, {} to {}",
                c.longest_run, c.start_date, c.end_date
            ),
            subject_id: None,
        });
    }

    for subject in &current.subjects {
        let urgency = match subject.severity {
            Some(SubjectSeverity::Elevated) => Urgency::High,
            Some(SubjectSeverity::Concern) => Urgency::Medium,
            None => continue,
        };
        out.push(Concern {
            category: ConcernCategory::Subject,
            urgency,
            title: format!("Missing {} frequently", subject.subject_name),
            detail: format!(
                "{:.2}% of {} sessions absent",
                subject.absence_rate, subject.sessions
            ),
            subject_id: Some(subject.subject_id.clone()),
        });
    }
    out
}

fn step(category: ConcernCategory, urgency: Urgency, action: &str, timeframe: Option<&str>) -> NextStep {
    NextStep {
        category: Some(category),
        urgency,
        action: action.to_string(),
        timeframe: timeframe.map(str::to_string),
    }
}

fn next_steps(current: &RiskSnapshot, concerns: &[Concern], config: &Config) -> Vec<NextStep> {
    if concerns.is_empty() {
        return vec![NextStep {
            category: None,
            urgency: Urgency::Low,
            action: "Maintain current approach".to_string(),
            timeframe: None,
        }];
    }

    let mut out = Vec::new();
    let mut pattern_step_added = false;
    for concern in concerns {
        match concern.category {
            ConcernCategory::AnnualLimit => {
                out.push(step(
                    concern.category,
                    Urgency::Critical,
                    "Schedule immediate parent conference",
                    Some("within 24 hours"),
                ));
                out.push(step(
                    concern.category,
                    Urgency::Critical,
                    "Begin daily attendance check-ins",
                    Some("daily"),
                ));
                out.push(step(
                    concern.category,
                    Urgency::High,
                    "Put an attendance contract in place",
                    Some("within 3 days"),
                ));
            }
            ConcernCategory::LowAttendance => out.push(step(
                concern.category,
                concern.urgency,
                "Contact parent or guardian about recent attendance",
                Some("within 72 hours"),
            )),
            ConcernCategory::LimitedData => out.push(step(
                concern.category,
                Urgency::Low,
                "Monitor attendance as more sessions are recorded",
                None,
            )),
            ConcernCategory::Tardiness => {
                out.push(step(
                    concern.category,
                    Urgency::Medium,
                    "Discuss morning routine and punctuality with the student",
                    None,
                ));
                if current.tardies_last_30_days >= config.compliance.tardy_transport_threshold {
                    out.push(step(
                        concern.category,
                        Urgency::Medium,
                        "Review transportation arrangements with the family",
                        None,
                    ));
                }
            }
            ConcernCategory::WeekendPattern | ConcernCategory::ConsecutiveAbsence => {
                if !pattern_step_added {
                    pattern_step_added = true;
                    out.push(step(
                        concern.category,
                        concern.urgency,
                        "Discuss possible scheduling conflicts with the family",
                        None,
                    ));
                }
            }
            ConcernCategory::Subject => {
                let name = current
                    .subjects
                    .iter()
                    .find(|s| Some(&s.subject_id) == concern.subject_id.as_ref())
                    .map(|s| s.subject_name.as_str())
                    .unwrap_or("the subject");
                out.push(step(
                    concern.category,
                    concern.urgency,
                    &format!("Arrange catch-up support for {name}"),
                    None,
                ));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ComplianceConfig;
    use crate::risk::{
        ConsecutiveAbsencePattern, LowConfidenceSignal, SubjectBreakdown, WeekendAdjacentPattern,
    };
    use chrono::NaiveDate;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn base(tier: RiskTier) -> RiskSnapshot {
        let as_of = ymd(2024, 11, 29);
        let mut s = RiskSnapshot::no_data(
            "st1",
            as_of,
            as_of.and_hms_opt(17, 0, 0).unwrap(),
            &ComplianceConfig::default(),
        );
        s.has_data = true;
        s.risk_tier = tier;
        s.attendance_percentage_last_30_days = 100.0;
        s
    }

    fn subject(id: &str, sessions: i64, absent: i64, severity: Option<SubjectSeverity>) -> SubjectBreakdown {
        SubjectBreakdown {
            subject_id: id.into(),
            subject_name: id.to_uppercase(),
            sessions,
            present: sessions - absent,
            late: 0,
            absent,
            excused: 0,
            attendance_rate: (sessions - absent) as f64 / sessions as f64 * 100.0,
            absence_rate: absent as f64 / sessions as f64 * 100.0,
            severity,
        }
    }

    #[test]
    fn annual_limit_leads_with_an_immediate_conference() {
        let mut s = base(RiskTier::Critical);
        s.total_absences_this_year = 19;
        s.exceeds_annual_absence_limit = true;
        s.triggers = vec![TierTrigger::AnnualLimitExceeded {
            total_absences: 19,
            limit: 18,
        }];
        let r = recommend(&s, None, &s.patterns, &Config::default());

        assert_eq!(r.concerns[0].category, ConcernCategory::AnnualLimit);
        assert_eq!(r.concerns[0].urgency, Urgency::Critical);
        let first = &r.next_steps[0];
        assert_eq!(first.action, "Schedule immediate parent conference");
        assert_eq!(first.urgency, Urgency::Critical);
        assert_eq!(first.timeframe.as_deref(), Some("within 24 hours"));
        let actions: Vec<&str> = r.next_steps.iter().map(|n| n.action.as_str()).collect();
        assert!(actions.contains(&"Begin daily attendance check-ins"));
        assert!(actions.contains(&"Put an attendance contract in place"));
        assert!(r.comparison.is_none());
    }

    #[test]
    fn no_concerns_means_maintain_current_approach() {
        let s = base(RiskTier::Low);
        let r = recommend(&s, None, &s.patterns, &Config::default());
        assert!(r.concerns.is_empty());
        assert_eq!(r.next_steps.len(), 1);
        assert_eq!(r.next_steps[0].action, "Maintain current approach");
        assert_eq!(r.next_steps[0].urgency, Urgency::Low);
    }

    #[test]
    fn heavy_tardiness_adds_a_transportation_review() {
        let mut s = base(RiskTier::Medium);
        s.tardies_last_30_days = 8;
        s.triggers = vec![TierTrigger::FrequentTardiness { tardies: 8 }];
        let r = recommend(&s, None, &s.patterns, &Config::default());
        let actions: Vec<&str> = r.next_steps.iter().map(|n| n.action.as_str()).collect();
        assert_eq!(
            actions,
            vec![
                "Discuss morning routine and punctuality with the student",
                "Review transportation arrangements with the family",
            ]
        );

        s.tardies_last_30_days = 5;
        s.triggers = vec![TierTrigger::FrequentTardiness { tardies: 5 }];
        let r = recommend(&s, None, &s.patterns, &Config::default());
        assert_eq!(r.next_steps.len(), 1);
    }

    #[test]
    fn lists_are_sorted_by_urgency_and_keep_detection_order_on_ties() {
        let mut s = base(RiskTier::High);
        s.triggers = vec![
            TierTrigger::LowAttendance {
                percentage: 75.0,
                sessions: 12,
                tier: RiskTier::High,
            },
            TierTrigger::FrequentTardiness { tardies: 5 },
        ];
        s.subjects = vec![
            subject("math", 10, 3, Some(SubjectSeverity::Concern)),
            subject("sci", 10, 5, Some(SubjectSeverity::Elevated)),
            subject("eng", 10, 3, Some(SubjectSeverity::Concern)),
        ];
        let patterns = Patterns {
            weekend_adjacent: Some(WeekendAdjacentPattern {
                monday_absences: 2,
                friday_absences: 1,
                absence_days: 3,
            }),
            consecutive_absence: Some(ConsecutiveAbsencePattern {
                longest_run: 2,
                start_date: ymd(2024, 11, 7),
                end_date: ymd(2024, 11, 8),
                ongoing: false,
            }),
            perfect_streak_days: 0,
        };
        let r = recommend(&s, None, &patterns, &Config::default());

        let order: Vec<(ConcernCategory, Urgency)> =
            r.concerns.iter().map(|c| (c.category, c.urgency)).collect();
        assert_eq!(
            order,
            vec![
                (ConcernCategory::LowAttendance, Urgency::High),
                (ConcernCategory::Subject, Urgency::High),
                (ConcernCategory::Tardiness, Urgency::Medium),
                (ConcernCategory::WeekendPattern, Urgency::Medium),
                (ConcernCategory::ConsecutiveAbsence, Urgency::Medium),
                (ConcernCategory::Subject, Urgency::Medium),
                (ConcernCategory::Subject, Urgency::Medium),
            ]
        );
        let medium_subjects: Vec<&str> = r
            .concerns
            .iter()
            .filter(|c| c.category == ConcernCategory::Subject && c.urgency == Urgency::Medium)
            .filter_map(|c| c.subject_id.as_deref())
            .collect();
        assert_eq!(medium_subjects, vec!["math", "eng"]);

        let scheduling = r
            .next_steps
            .iter()
            .filter(|n| n.action.contains("scheduling conflicts"))
            .count();
        assert_eq!(scheduling, 1);
        assert!(r
            .next_steps
            .windows(2)
            .all(|w| w[0].urgency.rank() >= w[1].urgency.rank()));
        assert_eq!(r.next_steps[0].action, "Contact parent or guardian about recent attendance");
        assert_eq!(r.next_steps[1].action, "Arrange catch-up support for SCI");
    }

    #[test]
    fn improvements_cover_trend_streak_and_subject_excellence() {
        let mut prev = base(RiskTier::High);
        prev.analysis_date = ymd(2024, 11, 22);
        prev.attendance_percentage_last_30_days = 75.0;
        prev.tardies_last_30_days = 5;

        let mut s = base(RiskTier::Low);
        s.attendance_percentage_last_30_days = 90.0;
        s.tardies_last_30_days = 1;
        s.subjects = vec![subject("math", 20, 0, None), subject("sci", 8, 0, None)];
        let patterns = Patterns {
            perfect_streak_days: 7,
            ..Patterns::default()
        };
        let r = recommend(&s, Some(&prev), &patterns, &Config::default());

        let comparison = r.comparison.as_ref().unwrap();
        assert!(comparison.improved);
        let kinds: Vec<(ImprovementKind, Urgency)> =
            r.improvements.iter().map(|i| (i.kind, i.urgency)).collect();
        assert_eq!(
            kinds,
            vec![
                (ImprovementKind::Trend, Urgency::High),
                (ImprovementKind::Trend, Urgency::Medium),
                (ImprovementKind::Trend, Urgency::Medium),
                (ImprovementKind::Streak, Urgency::Low),
                (ImprovementKind::SubjectExcellence, Urgency::Low),
            ]
        );
        assert!(r.improvements[4].title.contains("MATH"));
        assert_eq!(r.next_steps[0].action, "Maintain current approach");
    }

    #[test]
    fn limited_data_stays_advisory() {
        let mut s = base(RiskTier::Low);
        s.low_confidence = Some(LowConfidenceSignal {
            percentage: 50.0,
            sessions: 6,
            indicated_tier: RiskTier::Critical,
        });
        let r = recommend(&s, None, &s.patterns, &Config::default());
        assert_eq!(r.concerns.len(), 1);
        assert_eq!(r.concerns[0].urgency, Urgency::Low);
        assert!(r.next_steps.iter().all(|n| n.urgency == Urgency::Low));
    }
}
