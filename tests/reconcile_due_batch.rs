mod test_support;

use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{
    request_ok, seed_section, select_and_seed_calendar, spawn_sidecar_at, temp_workspace,
};

fn slot(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    teacher: &str,
    section: &str,
    weekday: &str,
    start: &str,
    end: &str,
) {
    let _ = request_ok(
        stdin,
        reader,
        "slot",
        "schedule.slots.create",
        json!({
            "teacherId": teacher,
            "sectionId": section,
            "subjectId": "math",
            "weekday": weekday,
            "startTime": start,
            "endTime": end,
        }),
    );
}

#[test]
fn due_run_materializes_missed_sessions_once() {
    let workspace = temp_workspace("attendanced-due");
    let (mut child, mut stdin, mut reader) = spawn_sidecar_at("2024-11-04T16:00:00");
    select_and_seed_calendar(&mut stdin, &mut reader, &workspace);
    let _ = seed_section(&mut stdin, &mut reader, "g7", 3);
    let _ = seed_section(&mut stdin, &mut reader, "g8", 2);
    slot(&mut stdin, &mut reader, "t1", "g7", "monday", "08:00", "09:00");
    slot(&mut stdin, &mut reader, "t2", "g8", "monday", "10:00", "11:00");
    // Still running at 16:00.
    slot(&mut stdin, &mut reader, "t1", "g7", "monday", "15:30", "16:30");
    slot(&mut stdin, &mut reader, "t1", "g7", "friday", "08:00", "09:00");

    let first = request_ok(&mut stdin, &mut reader, "1", "reconcile.due", json!({}));
    assert_eq!(first["processed"], 2);
    assert_eq!(first["marked"], 5);
    assert_eq!(first["skipped"], 0);
    assert_eq!(first["errors"].as_array().map(|e| e.len()), Some(0));

    let second = request_ok(&mut stdin, &mut reader, "2", "reconcile.due", json!({}));
    assert_eq!(second["processed"], 0);
    assert_eq!(second["marked"], 0);
    assert_eq!(second["skipped"], 2);

    // All Saints Day is a Friday holiday; its slot is never due.
    let holiday = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "reconcile.due",
        json!({ "asOf": "2024-11-01T16:00:00" }),
    );
    assert_eq!(holiday["processed"], 0);
    assert_eq!(holiday["marked"], 0);

    let friday = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "reconcile.due",
        json!({ "asOf": "2024-11-08T16:00:00" }),
    );
    assert_eq!(friday["processed"], 1);
    assert_eq!(friday["marked"], 3);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn missing_absent_status_fails_each_item_without_writing() {
    let workspace = temp_workspace("attendanced-due-misconfigured");
    std::fs::write(
        workspace.path().join("attendanced.toml"),
        "[reconciler]\nabsent_code = \"X\"\n",
    )
    .expect("write config");
    let (mut child, mut stdin, mut reader) = spawn_sidecar_at("2024-11-04T16:00:00");
    select_and_seed_calendar(&mut stdin, &mut reader, &workspace);
    let _ = seed_section(&mut stdin, &mut reader, "g7", 3);
    slot(&mut stdin, &mut reader, "t1", "g7", "monday", "08:00", "09:00");

    for id in ["1", "2"] {
        let summary = request_ok(&mut stdin, &mut reader, id, "reconcile.due", json!({}));
        assert_eq!(summary["processed"], 0);
        assert_eq!(summary["marked"], 0);
        let errors = summary["errors"].as_array().expect("errors");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0]["code"], "configuration_error");
    }

    // The failed unit rolled back, so starting the session creates it fresh.
    let started = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "sessions.start",
        json!({ "teacherId": "t1", "sectionId": "g7", "subjectId": "math", "at": "2024-11-04T08:00:00" }),
    );
    assert_eq!(started["created"], true);

    drop(stdin);
    let _ = child.wait();
}
