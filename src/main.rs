mod calendar;
mod catalog;
mod clock;
mod config;
mod db;
mod error;
mod ipc;
mod model;
mod notify;
mod reconcile;
mod recommend;
mod risk;
mod roster;
mod schedule;
mod sessions;
mod timing;

use std::io::{self, BufRead, Write};

use chrono::NaiveDateTime;
use tracing_subscriber::EnvFilter;

use clock::{Clock, FixedClock, SystemClock};
use error::AttendanceError;

/// Pins the sidecar clock, e.g. `2024-11-04T08:00:00`. Used by scripted runs and tests.
const FIXED_NOW_ENV: &str = "ATTENDANCED_FIXED_NOW";

fn init_tracing() {
    let filter = EnvFilter::try_from_env("ATTENDANCED_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    // stdout carries the protocol; logs go to stderr.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn pick_clock() -> Box<dyn Clock> {
    let Ok(raw) = std::env::var(FIXED_NOW_ENV) else {
        return Box::new(SystemClock);
    };
    match NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%dT%H:%M:%S") {
        Ok(at) => {
            tracing::info!(%at, "clock pinned");
            Box::new(FixedClock::new(at))
        }
        Err(e) => {
            tracing::warn!(value = %raw, error = %e, "ignoring unparseable {FIXED_NOW_ENV}");
            Box::new(SystemClock)
        }
    }
}

fn main() {
    init_tracing();
    let mut state = ipc::AppState::new(pick_clock());

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => {
                tracing::debug!(id = %req.id, method = %req.method, "request");
                ipc::handle_request(&mut state, req)
            }
            // No id to echo back.
            Err(e) => ipc::attendance_err("", &AttendanceError::from(e)),
        };
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
