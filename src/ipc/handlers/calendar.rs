use crate::calendar::{self, collapse_daily, SchoolCalendar, SchoolYearInput};
use crate::ipc::error::err;
use crate::ipc::helpers::{
    get_bool, get_optional_str, get_required_date, get_required_str, respond, to_json, HandlerErr,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Holiday, HolidayKind, Quarter};
use crate::risk;
use rusqlite::Connection;
use serde_json::json;

fn parse_quarters(params: &serde_json::Value) -> Result<Vec<Quarter>, HandlerErr> {
    let Some(raw) = params.get("quarters") else {
        return Ok(Vec::new());
    };
    let Some(items) = raw.as_array() else {
        return Err(HandlerErr::bad_params("quarters must be an array"));
    };
    items
        .iter()
        .map(|q| -> Result<Quarter, HandlerErr> {
            let quarter = q
                .get("quarter")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| HandlerErr::bad_params("quarter number is required"))?;
            Ok(Quarter {
                quarter,
                start_date: get_required_date(q, "startDate")?,
                end_date: get_required_date(q, "endDate")?,
            })
        })
        .collect()
}

fn school_year_upsert(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let input = SchoolYearInput {
        id: get_required_str(params, "id")?,
        name: get_required_str(params, "name")?,
        start_date: get_required_date(params, "startDate")?,
        end_date: get_required_date(params, "endDate")?,
        active: get_bool(params, "active", true)?,
        quarters: parse_quarters(params)?,
    };
    let year = calendar::upsert_school_year(conn, &input)?;
    to_json(&year)
}

fn holiday_upsert(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let kind = match get_optional_str(params, "kind") {
        None => HolidayKind::default(),
        Some(raw) => HolidayKind::parse(&raw)
            .ok_or_else(|| HandlerErr::bad_params("kind must be national or local"))?,
    };
    let holiday = Holiday {
        date: get_required_date(params, "date")?,
        name: get_required_str(params, "name")?,
        kind,
        active: get_bool(params, "active", true)?,
    };
    calendar::upsert_holiday(conn, &holiday)?;
    to_json(&holiday)
}

fn is_valid_school_day(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let date = get_required_date(params, "date")?;
    let cal = SchoolCalendar::load(conn)?;
    Ok(json!({
        "date": date,
        "valid": cal.is_valid_school_day(date),
        "holiday": calendar::get_holiday(conn, date)?.filter(|h| h.active),
    }))
}

fn valid_days(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let start = get_required_date(params, "startDate")?;
    let end = get_required_date(params, "endDate")?;
    let cal = SchoolCalendar::load(conn)?;
    let days = cal.valid_school_days_between(start, end);
    Ok(json!({ "count": cal.count_valid_school_days(start, end), "days": days }))
}

fn attendance_rate(state: &AppState, conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let student_id = get_required_str(params, "studentId")?;
    let start = get_required_date(params, "startDate")?;
    let end = get_required_date(params, "endDate")?;
    let ledger = risk::student_ledger(conn, &student_id, start, end)?;
    let rate = SchoolCalendar::load(conn)?.compute_attendance_rate(
        &collapse_daily(&ledger),
        start,
        end,
        state.config.compliance.min_reporting_days,
    );
    to_json(&rate)
}

fn quarter_for(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let date = get_required_date(params, "date")?;
    let cal = SchoolCalendar::load(conn)?;
    Ok(json!({
        "date": date,
        "schoolYearId": cal.year_containing(date).map(|y| y.id.clone()),
        "quarter": cal.quarter_for(date),
    }))
}

fn handle_school_year_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    respond(req, school_year_upsert(conn, &req.params))
}

fn handle_holiday_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    respond(req, holiday_upsert(conn, &req.params))
}

fn handle_is_valid_school_day(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    respond(req, is_valid_school_day(conn, &req.params))
}

fn handle_valid_days(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    respond(req, valid_days(conn, &req.params))
}

fn handle_attendance_rate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    respond(req, attendance_rate(state, conn, &req.params))
}

fn handle_quarter_for(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    respond(req, quarter_for(conn, &req.params))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "calendar.schoolYears.upsert" => Some(handle_school_year_upsert(state, req)),
        "calendar.holidays.upsert" => Some(handle_holiday_upsert(state, req)),
        "calendar.isValidSchoolDay" => Some(handle_is_valid_school_day(state, req)),
        "calendar.validDays" => Some(handle_valid_days(state, req)),
        "calendar.attendanceRate" => Some(handle_attendance_rate(state, req)),
        "calendar.quarterFor" => Some(handle_quarter_for(state, req)),
        _ => None,
    }
}
