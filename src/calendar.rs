//! School-day calendar: which dates count as instructional days.
//!
//! A `SchoolCalendar` is loaded once from the active school years and active
//! holidays and then answers every query from memory.

use chrono::{Datelike, NaiveDate, Weekday};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{AttendanceError, Result};
use crate::model::{Holiday, HolidayKind, LedgerEntry, Quarter, SchoolYear, StatusKind};

#[derive(Debug, Clone, Default)]
pub struct SchoolCalendar {
    years: Vec<SchoolYear>,
    holidays: BTreeSet<NaiveDate>,
}

/// One student's attendance for one calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayMark {
    pub date: NaiveDate,
    pub kind: StatusKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRate {
    pub total_school_days: i64,
    pub days_present: i64,
    pub days_absent: i64,
    pub days_late: i64,
    pub days_excused: i64,
    pub attendance_rate: f64,
    pub valid_for_reporting: bool,
}

impl AttendanceRate {
    pub fn empty() -> Self {
        Self {
            total_school_days: 0,
            days_present: 0,
            days_absent: 0,
            days_late: 0,
            days_excused: 0,
            attendance_rate: 0.0,
            valid_for_reporting: false,
        }
    }
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

impl SchoolCalendar {
    pub fn new(years: Vec<SchoolYear>, holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            years: years.into_iter().filter(|y| y.active).collect(),
            holidays: holidays.into_iter().collect(),
        }
    }

    pub fn load(conn: &Connection) -> Result<Self> {
        let years = load_school_years(conn, true)?;
        let mut stmt = conn.prepare("SELECT date FROM holidays WHERE active = 1")?;
        let holidays = stmt
            .query_map([], |r| r.get::<_, NaiveDate>(0))?
            .collect::<std::result::Result<BTreeSet<_>, _>>()?;
        Ok(Self { years, holidays })
    }

    pub fn is_valid_school_day(&self, date: NaiveDate) -> bool {
        if is_weekend(date) {
            return false;
        }
        if self.holidays.contains(&date) {
            return false;
        }
        self.years.iter().any(|y| y.contains(date))
    }

    /// Inclusive scan; an inverted range yields nothing.
    pub fn valid_school_days_between(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        if start > end {
            return Vec::new();
        }
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| self.is_valid_school_day(*d))
            .collect()
    }

    pub fn count_valid_school_days(&self, start: NaiveDate, end: NaiveDate) -> i64 {
        self.valid_school_days_between(start, end).len() as i64
    }

    /// Latest valid school day strictly before `date`.
    pub fn previous_school_day(&self, date: NaiveDate) -> Option<NaiveDate> {
        let earliest = self.years.iter().map(|y| y.start_date).min()?;
        let mut day = date.pred_opt()?;
        while day >= earliest {
            if self.is_valid_school_day(day) {
                return Some(day);
            }
            day = day.pred_opt()?;
        }
        None
    }

    /// The single active school year, if configured.
    pub fn active_year(&self) -> Option<&SchoolYear> {
        self.years.first()
    }

    pub fn require_active_year(&self) -> Result<&SchoolYear> {
        self.active_year()
            .ok_or_else(|| AttendanceError::Configuration("no active school year".to_string()))
    }

    pub fn year_containing(&self, date: NaiveDate) -> Option<&SchoolYear> {
        self.years.iter().find(|y| y.contains(date))
    }

    pub fn quarter_for(&self, date: NaiveDate) -> Option<&Quarter> {
        self.year_containing(date)?
            .quarters
            .iter()
            .find(|q| q.start_date <= date && date <= q.end_date)
    }

    /// Counts only marks on valid school days; valid days without a mark are absences.
    pub fn compute_attendance_rate(
        &self,
        marks: &[DayMark],
        start: NaiveDate,
        end: NaiveDate,
        min_reporting_days: i64,
    ) -> AttendanceRate {
        let days = self.valid_school_days_between(start, end);
        if days.is_empty() {
            return AttendanceRate::empty();
        }
        let by_date: BTreeMap<NaiveDate, StatusKind> =
            marks.iter().map(|m| (m.date, m.kind)).collect();

        let mut rate = AttendanceRate::empty();
        rate.total_school_days = days.len() as i64;
        for day in &days {
            match by_date.get(day) {
                Some(StatusKind::Present) => rate.days_present += 1,
                Some(StatusKind::Late) => rate.days_late += 1,
                Some(StatusKind::Excused) => rate.days_excused += 1,
                Some(StatusKind::Absent) | None => rate.days_absent += 1,
            }
        }
        rate.attendance_rate =
            round2(rate.days_present as f64 / rate.total_school_days as f64 * 100.0);
        rate.valid_for_reporting = rate.total_school_days >= min_reporting_days;
        rate
    }
}

/// Collapse per-session ledger rows into one mark per date.
///
/// Precedence: any present session makes the day present, then late, then
/// excused; a day is absent only when every recorded session was missed.
pub fn collapse_daily(ledger: &[LedgerEntry]) -> Vec<DayMark> {
    fn rank(kind: StatusKind) -> u8 {
        match kind {
            StatusKind::Present => 3,
            StatusKind::Late => 2,
            StatusKind::Excused => 1,
            StatusKind::Absent => 0,
        }
    }
    let mut by_date: BTreeMap<NaiveDate, StatusKind> = BTreeMap::new();
    for entry in ledger {
        by_date
            .entry(entry.date)
            .and_modify(|k| {
                if rank(entry.kind) > rank(*k) {
                    *k = entry.kind;
                }
            })
            .or_insert(entry.kind);
    }
    by_date
        .into_iter()
        .map(|(date, kind)| DayMark { date, kind })
        .collect()
}

pub fn load_school_years(conn: &Connection, active_only: bool) -> Result<Vec<SchoolYear>> {
    let sql = if active_only {
        "SELECT id, name, start_date, end_date, active FROM school_years WHERE active = 1 ORDER BY start_date"
    } else {
        "SELECT id, name, start_date, end_date, active FROM school_years ORDER BY start_date"
    };
    let mut stmt = conn.prepare(sql)?;
    let mut years = stmt
        .query_map([], |r| {
            Ok(SchoolYear {
                id: r.get(0)?,
                name: r.get(1)?,
                start_date: r.get(2)?,
                end_date: r.get(3)?,
                active: r.get::<_, i64>(4)? != 0,
                quarters: Vec::new(),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut q_stmt = conn.prepare(
        "SELECT quarter, start_date, end_date
         FROM school_year_quarters
         WHERE school_year_id = ?
         ORDER BY quarter",
    )?;
    for year in years.iter_mut() {
        year.quarters = q_stmt
            .query_map([&year.id], |r| {
                Ok(Quarter {
                    quarter: r.get(0)?,
                    start_date: r.get(1)?,
                    end_date: r.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
    }
    Ok(years)
}

#[derive(Debug, Clone)]
pub struct SchoolYearInput {
    pub id: String,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub active: bool,
    pub quarters: Vec<Quarter>,
}

fn validate_school_year(input: &SchoolYearInput) -> Result<()> {
    if input.start_date > input.end_date {
        return Err(AttendanceError::BadInput(
            "school year start must not be after its end".to_string(),
        ));
    }
    let mut prev_end: Option<NaiveDate> = None;
    for (i, q) in input.quarters.iter().enumerate() {
        if q.quarter != (i as i64) + 1 {
            return Err(AttendanceError::BadInput(format!(
                "quarters must be numbered 1..={} in order",
                input.quarters.len()
            )));
        }
        if q.start_date > q.end_date {
            return Err(AttendanceError::BadInput(format!(
                "quarter {} starts after it ends",
                q.quarter
            )));
        }
        if q.start_date < input.start_date || q.end_date > input.end_date {
            return Err(AttendanceError::BadInput(format!(
                "quarter {} lies outside the school year",
                q.quarter
            )));
        }
        if let Some(prev) = prev_end {
            if q.start_date <= prev {
                return Err(AttendanceError::BadInput(format!(
                    "quarter {} overlaps the previous quarter",
                    q.quarter
                )));
            }
        }
        prev_end = Some(q.end_date);
    }
    Ok(())
}

/// Create or replace a school year. Activating it deactivates every other year
/// in the same transaction.
pub fn upsert_school_year(conn: &Connection, input: &SchoolYearInput) -> Result<SchoolYear> {
    validate_school_year(input)?;
    let tx = conn.unchecked_transaction()?;
    if input.active {
        tx.execute(
            "UPDATE school_years SET active = 0 WHERE id <> ? AND active = 1",
            [&input.id],
        )?;
    }
    tx.execute(
        "INSERT INTO school_years(id, name, start_date, end_date, active)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           start_date = excluded.start_date,
           end_date = excluded.end_date,
           active = excluded.active",
        (
            &input.id,
            &input.name,
            input.start_date,
            input.end_date,
            input.active as i64,
        ),
    )?;
    tx.execute(
        "DELETE FROM school_year_quarters WHERE school_year_id = ?",
        [&input.id],
    )?;
    for q in &input.quarters {
        tx.execute(
            "INSERT INTO school_year_quarters(school_year_id, quarter, start_date, end_date)
             VALUES(?, ?, ?, ?)",
            (&input.id, q.quarter, q.start_date, q.end_date),
        )?;
    }
    tx.commit()?;
    tracing::info!(school_year_id = %input.id, active = input.active, "school year saved");

    Ok(SchoolYear {
        id: input.id.clone(),
        name: input.name.clone(),
        start_date: input.start_date,
        end_date: input.end_date,
        active: input.active,
        quarters: input.quarters.clone(),
    })
}

pub fn upsert_holiday(conn: &Connection, holiday: &Holiday) -> Result<()> {
    conn.execute(
        "INSERT INTO holidays(date, name, kind, active)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(date) DO UPDATE SET
           name = excluded.name,
           kind = excluded.kind,
           active = excluded.active",
        (
            holiday.date,
            &holiday.name,
            holiday.kind.as_str(),
            holiday.active as i64,
        ),
    )?;
    Ok(())
}

pub fn get_holiday(conn: &Connection, date: NaiveDate) -> Result<Option<Holiday>> {
    let row: Option<(String, String, i64)> = conn
        .query_row(
            "SELECT name, kind, active FROM holidays WHERE date = ?",
            [date],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    Ok(row.map(|(name, kind, active)| Holiday {
        date,
        name,
        kind: HolidayKind::parse(&kind).unwrap_or_default(),
        active: active != 0,
    }))
}
