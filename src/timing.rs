//! Advisory classification of a session start against its weekly slot.
//!
//! Nothing here blocks a teacher: every outcome carries `can_proceed = true`.

use chrono::{NaiveDateTime, NaiveTime};
use rusqlite::Connection;
use serde::Serialize;

use crate::error::Result;
use crate::model::ScheduledSlot;
use crate::schedule;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TimingStatus {
    OnTime,
    EarlyStart {
        #[serde(rename = "minutesEarly")]
        minutes_early: i64,
    },
    LateStart {
        #[serde(rename = "minutesLate")]
        minutes_late: i64,
    },
    NoSchedule,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingCheck {
    #[serde(flatten)]
    pub status: TimingStatus,
    pub can_proceed: bool,
    pub message: String,
    pub slot: Option<ScheduledSlot>,
}

/// Pure classification against a known slot.
///
/// `[start, start + grace]` (clamped to the slot end) is on time; before the
/// start is early; anything later is late, measured from the slot start.
pub fn classify(slot: &ScheduledSlot, at: NaiveDateTime, grace_minutes: i64) -> TimingStatus {
    let start = at.date().and_time(slot.start_time);
    let on_time_until = std::cmp::min(
        start + chrono::Duration::minutes(grace_minutes.max(0)),
        at.date().and_time(slot.end_time),
    );
    if at < start {
        return TimingStatus::EarlyStart {
            minutes_early: ceil_minutes(start - at),
        };
    }
    if at <= on_time_until {
        return TimingStatus::OnTime;
    }
    TimingStatus::LateStart {
        minutes_late: (at - start).num_minutes(),
    }
}

fn ceil_minutes(d: chrono::Duration) -> i64 {
    let secs = d.num_seconds();
    (secs + 59) / 60
}

fn hhmm(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

fn describe(status: &TimingStatus, slot: Option<&ScheduledSlot>) -> String {
    match (status, slot) {
        (TimingStatus::NoSchedule, _) | (_, None) => {
            "No scheduled slot for this class today; you may still take attendance".to_string()
        }
        (TimingStatus::OnTime, Some(s)) => format!(
            "Session is on time for the {}-{} period",
            hhmm(s.start_time),
            hhmm(s.end_time)
        ),
        (TimingStatus::EarlyStart { minutes_early }, Some(s)) => format!(
            "Starting {} minute(s) before the scheduled {} start",
            minutes_early,
            hhmm(s.start_time)
        ),
        (TimingStatus::LateStart { minutes_late }, Some(s)) => format!(
            "Starting {} minute(s) after the scheduled {} start",
            minutes_late,
            hhmm(s.start_time)
        ),
    }
}

pub fn check_against(slot: Option<ScheduledSlot>, at: NaiveDateTime, grace_minutes: i64) -> TimingCheck {
    let status = match &slot {
        Some(s) => classify(s, at, grace_minutes),
        None => TimingStatus::NoSchedule,
    };
    let message = describe(&status, slot.as_ref());
    TimingCheck {
        status,
        can_proceed: true,
        message,
        slot,
    }
}

/// Look up the identity's slot for `at` and classify the start.
pub fn validate_timing(
    conn: &Connection,
    teacher_id: &str,
    section_id: &str,
    subject_id: &str,
    at: NaiveDateTime,
    grace_minutes: i64,
) -> Result<TimingCheck> {
    let slot = schedule::find_slot_for(conn, teacher_id, section_id, subject_id, at)?;
    let check = check_against(slot, at, grace_minutes);
    if !matches!(check.status, TimingStatus::OnTime) {
        tracing::info!(
            teacher_id,
            section_id,
            subject_id,
            advisory = ?check.status,
            "session start outside its scheduled window"
        );
    }
    Ok(check)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::schedule::{create_slot, SlotInput};
    use chrono::{NaiveDate, Weekday};

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn monday(t: NaiveTime) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 11, 4).unwrap().and_time(t)
    }

    fn slot() -> ScheduledSlot {
        ScheduledSlot {
            id: "slot-1".into(),
            teacher_id: "t1".into(),
            section_id: "s1".into(),
            subject_id: "math".into(),
            weekday: Weekday::Mon,
            start_time: hm(8, 0),
            end_time: hm(9, 0),
            active: true,
        }
    }

    #[test]
    fn classifies_relative_to_slot_start() {
        let s = slot();
        assert_eq!(classify(&s, monday(hm(8, 0)), 10), TimingStatus::OnTime);
        assert_eq!(classify(&s, monday(hm(8, 10)), 10), TimingStatus::OnTime);
        assert_eq!(
            classify(&s, monday(hm(7, 45)), 10),
            TimingStatus::EarlyStart { minutes_early: 15 }
        );
        assert_eq!(
            classify(&s, monday(hm(8, 25)), 10),
            TimingStatus::LateStart { minutes_late: 25 }
        );
    }

    #[test]
    fn partial_minutes_early_round_up() {
        let s = slot();
        let at = monday(hm(7, 59)) + chrono::Duration::seconds(30);
        assert_eq!(
            classify(&s, at, 10),
            TimingStatus::EarlyStart { minutes_early: 1 }
        );
    }

    #[test]
    fn grace_never_extends_past_slot_end() {
        let mut s = slot();
        s.end_time = hm(8, 5);
        assert_eq!(
            classify(&s, monday(hm(8, 7)), 10),
            TimingStatus::LateStart { minutes_late: 7 }
        );
    }

    #[test]
    fn every_outcome_is_advisory() {
        let conn = db::open_memory().unwrap();
        let none = validate_timing(&conn, "t1", "s1", "math", monday(hm(8, 0)), 10).unwrap();
        assert_eq!(none.status, TimingStatus::NoSchedule);
        assert!(none.can_proceed);
        assert!(none.slot.is_none());

        create_slot(
            &conn,
            &SlotInput {
                teacher_id: "t1".into(),
                section_id: "s1".into(),
                subject_id: "math".into(),
                weekday: Weekday::Mon,
                start_time: hm(8, 0),
                end_time: hm(9, 0),
            },
        )
        .unwrap();
        for t in [hm(7, 0), hm(8, 5), hm(8, 45)] {
            let check = validate_timing(&conn, "t1", "s1", "math", monday(t), 10).unwrap();
            assert!(check.can_proceed);
            assert!(check.slot.is_some());
        }
    }

    #[test]
    fn serializes_with_status_tag() {
        let check = check_against(Some(slot()), monday(hm(8, 20)), 10);
        let v = serde_json::to_value(&check).unwrap();
        assert_eq!(v["status"], "late_start");
        assert_eq!(v["minutesLate"], 20);
        assert_eq!(v["canProceed"], true);
    }
}
