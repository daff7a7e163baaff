mod test_support;

use serde_json::json;
use test_support::{
    request_err, request_ok, seed_section, select_and_seed_calendar, spawn_sidecar_at,
    temp_workspace,
};

#[test]
fn slot_registry_rejects_overlaps_and_classifies_starts() {
    let workspace = temp_workspace("attendanced-timing");
    let (mut child, mut stdin, mut reader) = spawn_sidecar_at("2024-11-04T07:55:00");
    select_and_seed_calendar(&mut stdin, &mut reader, &workspace);
    let _ = seed_section(&mut stdin, &mut reader, "g7", 1);

    let slot = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "schedule.slots.create",
        json!({
            "teacherId": "t1",
            "sectionId": "g7",
            "subjectId": "math",
            "weekday": "monday",
            "startTime": "08:00",
            "endTime": "09:00",
        }),
    );
    let slot_id = slot["id"].as_str().expect("slot id").to_string();
    assert_eq!(slot["weekday"], "monday");

    let conflict = test_support::request(
        &mut stdin,
        &mut reader,
        "2",
        "schedule.slots.create",
        json!({
            "teacherId": "t2",
            "sectionId": "g7",
            "subjectId": "science",
            "weekday": "Mon",
            "startTime": "08:30",
            "endTime": "09:30",
        }),
    );
    assert_eq!(conflict["error"]["code"], "schedule_conflict");
    assert_eq!(conflict["error"]["details"]["conflictingSlotId"], slot_id.as_str());

    // Back-to-back is not an overlap.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "schedule.slots.create",
        json!({
            "teacherId": "t2",
            "sectionId": "g7",
            "subjectId": "science",
            "weekday": "monday",
            "startTime": "09:00",
            "endTime": "10:00",
        }),
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "4",
            "schedule.slots.create",
            json!({
                "teacherId": "t3",
                "sectionId": "g8",
                "subjectId": "art",
                "weekday": "funday",
                "startTime": "08:00",
                "endTime": "09:00",
            }),
        ),
        "bad_params"
    );

    let identity = json!({ "teacherId": "t1", "sectionId": "g7", "subjectId": "math" });
    let early = request_ok(&mut stdin, &mut reader, "5", "sessions.validateTiming", identity.clone());
    assert_eq!(early["status"], "early_start");
    assert_eq!(early["minutesEarly"], 5);
    assert_eq!(early["canProceed"], true);

    let mut at = identity.clone();
    at["at"] = json!("2024-11-04T08:07:00");
    let on_time = request_ok(&mut stdin, &mut reader, "6", "sessions.validateTiming", at);
    assert_eq!(on_time["status"], "on_time");

    let mut at = identity.clone();
    at["at"] = json!("2024-11-04T08:25");
    let late = request_ok(&mut stdin, &mut reader, "7", "sessions.validateTiming", at);
    assert_eq!(late["status"], "late_start");
    assert_eq!(late["minutesLate"], 25);

    let mut at = identity.clone();
    at["at"] = json!("2024-11-05T08:00:00");
    let none = request_ok(&mut stdin, &mut reader, "8", "sessions.validateTiming", at);
    assert_eq!(none["status"], "no_schedule");
    assert_eq!(none["canProceed"], true);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "schedule.slots.deactivate",
        json!({ "slotId": slot_id }),
    );
    let gone = request_ok(&mut stdin, &mut reader, "10", "sessions.validateTiming", identity);
    assert_eq!(gone["status"], "no_schedule");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "schedule.slots.list",
        json!({ "teacherId": "t1" }),
    );
    assert_eq!(listed["slots"][0]["active"], false);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn session_start_mark_and_reconcile_thirty_with_twenty_eight_marked() {
    let workspace = temp_workspace("attendanced-lifecycle");
    let (mut child, mut stdin, mut reader) = spawn_sidecar_at("2024-11-04T08:05:00");
    select_and_seed_calendar(&mut stdin, &mut reader, &workspace);
    let students = seed_section(&mut stdin, &mut reader, "g7", 30);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "slot",
        "schedule.slots.create",
        json!({
            "teacherId": "t1",
            "sectionId": "g7",
            "subjectId": "math",
            "weekday": "monday",
            "startTime": "08:00",
            "endTime": "09:00",
        }),
    );

    let identity = json!({ "teacherId": "t1", "sectionId": "g7", "subjectId": "math" });
    let first = request_ok(&mut stdin, &mut reader, "1", "sessions.start", identity.clone());
    assert_eq!(first["created"], true);
    assert_eq!(first["timing"]["status"], "on_time");
    assert_eq!(first["session"]["status"], "active");
    assert_eq!(first["session"]["startTime"], "08:00:00");
    let session_id = first["session"]["id"].as_str().expect("session id").to_string();

    let again = request_ok(&mut stdin, &mut reader, "2", "sessions.start", identity.clone());
    assert_eq!(again["created"], false);
    assert_eq!(again["session"]["id"], session_id.as_str());

    for (i, student) in students.iter().take(28).enumerate() {
        let marked = request_ok(
            &mut stdin,
            &mut reader,
            &format!("m{}", i),
            "sessions.mark",
            json!({
                "sessionId": session_id,
                "studentId": student,
                "statusCode": "P",
                "markedBy": "t1",
            }),
        );
        assert_eq!(marked["created"], true);
    }
    let remark = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "sessions.mark",
        json!({
            "sessionId": session_id,
            "studentId": students[0],
            "statusCode": "A",
            "markedBy": "t1",
        }),
    );
    assert_eq!(remark["created"], false);
    assert_eq!(remark["record"]["statusCode"], "P");

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "4",
            "sessions.mark",
            json!({ "sessionId": session_id, "studentId": students[29], "statusCode": "Z", "markedBy": "t1" }),
        ),
        "not_found"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "5",
            "sessions.mark",
            json!({ "sessionId": session_id, "studentId": "stranger", "statusCode": "P", "markedBy": "t1" }),
        ),
        "not_found"
    );
    assert_eq!(
        request_err(&mut stdin, &mut reader, "6", "reconcile.session", json!({ "sessionId": session_id })),
        "invalid_state"
    );

    let due = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "reconcile.due",
        json!({ "asOf": "2024-11-04T09:00:00" }),
    );
    assert_eq!(due["processed"], 1);
    assert_eq!(due["marked"], 2);
    assert_eq!(due["errors"].as_array().map(|e| e.len()), Some(0));

    let records = request_ok(&mut stdin, &mut reader, "8", "sessions.records", json!({ "sessionId": session_id }));
    let records = records["records"].as_array().expect("records");
    assert_eq!(records.len(), 30);
    let auto: Vec<&serde_json::Value> = records.iter().filter(|r| r["markedBy"] == "system").collect();
    assert_eq!(auto.len(), 2);
    assert!(auto.iter().all(|r| r["statusCode"] == "A" && r["kind"] == "absent"));

    let session = request_ok(&mut stdin, &mut reader, "9", "sessions.get", json!({ "sessionId": session_id }));
    assert_eq!(session["status"], "completed");
    assert_eq!(session["autoAbsenceMarked"], true);

    let rerun = request_ok(&mut stdin, &mut reader, "10", "reconcile.session", json!({ "sessionId": session_id }));
    assert_eq!(rerun["markedStudentIds"].as_array().map(|m| m.len()), Some(0));
    assert_eq!(rerun["alreadyRecorded"], 30);

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "11",
            "sessions.mark",
            json!({ "sessionId": session_id, "studentId": students[29], "statusCode": "P", "markedBy": "t1" }),
        ),
        "invalid_state"
    );

    let due_again = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "reconcile.due",
        json!({ "asOf": "2024-11-04T09:30:00" }),
    );
    assert_eq!(due_again["processed"], 0);
    assert_eq!(due_again["marked"], 0);
    assert_eq!(due_again["skipped"], 1);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn unscheduled_start_needs_an_explicit_period() {
    let workspace = temp_workspace("attendanced-unscheduled");
    let (mut child, mut stdin, mut reader) = spawn_sidecar_at("2024-11-04T13:00:00");
    select_and_seed_calendar(&mut stdin, &mut reader, &workspace);
    let _ = seed_section(&mut stdin, &mut reader, "g7", 2);

    let identity = json!({ "teacherId": "t9", "sectionId": "g7", "subjectId": "math" });
    assert_eq!(
        request_err(&mut stdin, &mut reader, "1", "sessions.start", identity.clone()),
        "bad_params"
    );

    let mut half = identity.clone();
    half["startTime"] = json!("13:00");
    assert_eq!(
        request_err(&mut stdin, &mut reader, "2", "sessions.start", half),
        "bad_params"
    );

    let mut explicit = identity;
    explicit["startTime"] = json!("13:00");
    explicit["endTime"] = json!("14:00");
    let started = request_ok(&mut stdin, &mut reader, "3", "sessions.start", explicit);
    assert_eq!(started["created"], true);
    assert_eq!(started["timing"]["status"], "no_schedule");
    assert!(started["session"]["slotId"].is_null());
    assert_eq!(started["session"]["sessionDate"], "2024-11-04");

    drop(stdin);
    let _ = child.wait();
}
