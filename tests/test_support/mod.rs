#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tempfile::TempDir;

pub fn temp_workspace(prefix: &str) -> TempDir {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .expect("create temp workspace")
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    spawn_with_env(&[])
}

/// Sidecar whose clock is pinned to `now` (`YYYY-MM-DDTHH:MM:SS`).
pub fn spawn_sidecar_at(now: &str) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    spawn_with_env(&[("ATTENDANCED_FIXED_NOW", now)])
}

fn spawn_with_env(vars: &[(&str, &str)]) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_attendanced");
    let mut cmd = Command::new(exe);
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    for (k, v) in vars {
        cmd.env(k, v);
    }
    let mut child = cmd.spawn().expect("spawn attendanced");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn read_response(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response");
    serde_json::from_str(line.trim()).expect("parse response json")
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let value = read_response(reader);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(serde_json::Value::Null)
}

/// Sends a request that must fail and returns its error code.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .pointer("/error/code")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string()
}

/// Selects `workspace` and loads the 2024-2025 school year with the
/// All Saints Day holiday.
pub fn select_and_seed_calendar(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &TempDir,
) {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.path().to_string_lossy() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "sy",
        "calendar.schoolYears.upsert",
        json!({
            "id": "sy-2024",
            "name": "2024-2025",
            "startDate": "2024-08-26",
            "endDate": "2025-05-30",
            "quarters": [
                { "quarter": 1, "startDate": "2024-08-26", "endDate": "2024-10-25" },
                { "quarter": 2, "startDate": "2024-10-28", "endDate": "2025-01-17" }
            ]
        }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "hol",
        "calendar.holidays.upsert",
        json!({ "date": "2024-11-01", "name": "All Saints Day", "kind": "national" }),
    );
}

/// One section with an adviser, one subject and `count` enrolled students `st00..`.
pub fn seed_section(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    section_id: &str,
    count: usize,
) -> Vec<String> {
    let _ = request_ok(
        stdin,
        reader,
        "sec",
        "roster.sections.upsert",
        json!({ "id": section_id, "name": format!("Section {}", section_id), "adviserId": "adviser-1" }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "sub",
        "roster.subjects.upsert",
        json!({ "id": "math", "name": "Mathematics" }),
    );
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let id = format!("{}-st{:02}", section_id, i);
        let _ = request_ok(
            stdin,
            reader,
            "stu",
            "roster.students.upsert",
            json!({ "id": id, "displayName": format!("Student {}", i) }),
        );
        let _ = request_ok(
            stdin,
            reader,
            "enr",
            "roster.enroll",
            json!({ "sectionId": section_id, "studentId": id }),
        );
        ids.push(id);
    }
    ids
}
