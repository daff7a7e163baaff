use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

use crate::config::Config;

pub const DB_FILE_NAME: &str = "attendance.sqlite3";

/// Concurrent workers on the same workspace wait this long for the write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    open_db_at(&workspace.join(DB_FILE_NAME))
}

pub fn open_db_at(db_path: &Path) -> anyhow::Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    create_schema(&conn)?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    create_schema(&conn)?;
    Ok(conn)
}

fn create_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS school_years(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS school_year_quarters(
            school_year_id TEXT NOT NULL,
            quarter INTEGER NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            PRIMARY KEY(school_year_id, quarter),
            FOREIGN KEY(school_year_id) REFERENCES school_years(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS holidays(
            date TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sections(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            adviser_id TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;
    // No foreign key to students: the roster is owned elsewhere and orphaned
    // rows are reported as data-integrity warnings rather than rejected.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS section_enrollments(
            section_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY(section_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_section_enrollments_student ON section_enrollments(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_statuses(
            code TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS scheduled_slots(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            section_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            weekday TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scheduled_slots_teacher ON scheduled_slots(teacher_id, weekday)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scheduled_slots_section ON scheduled_slots(section_id, weekday)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_sessions(
            id TEXT PRIMARY KEY,
            slot_id TEXT,
            teacher_id TEXT NOT NULL,
            section_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            session_date TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            status TEXT NOT NULL,
            auto_absence_marked INTEGER NOT NULL DEFAULT 0,
            started_at TEXT,
            completed_at TEXT,
            UNIQUE(teacher_id, section_id, subject_id, session_date, start_time, end_time)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_sessions_status ON attendance_sessions(status, session_date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            status_code TEXT NOT NULL,
            marked_by TEXT NOT NULL,
            marked_at TEXT NOT NULL,
            remarks TEXT,
            FOREIGN KEY(session_id) REFERENCES attendance_sessions(id),
            FOREIGN KEY(status_code) REFERENCES attendance_statuses(code),
            UNIQUE(session_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_student ON attendance_records(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS risk_snapshots(
            student_id TEXT NOT NULL,
            analysis_date TEXT NOT NULL,
            risk_tier TEXT NOT NULL,
            payload TEXT NOT NULL,
            generated_at TEXT NOT NULL,
            PRIMARY KEY(student_id, analysis_date)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notification_outbox(
            id TEXT PRIMARY KEY,
            recipient TEXT NOT NULL,
            student_id TEXT NOT NULL,
            alert_date TEXT NOT NULL,
            kind TEXT NOT NULL,
            severity TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(recipient, student_id, alert_date, kind)
        )",
        [],
    )?;

    Ok(())
}

/// Seed the status catalog and merge configured holidays. Persisted rows win.
pub fn apply_config_seeds(conn: &Connection, config: &Config) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    for status in &config.statuses {
        tx.execute(
            "INSERT INTO attendance_statuses(code, name, kind, active)
             VALUES(?, ?, ?, 1)
             ON CONFLICT(code) DO NOTHING",
            (&status.code, &status.name, status.kind.as_str()),
        )?;
    }
    for holiday in &config.holidays {
        tx.execute(
            "INSERT INTO holidays(date, name, kind, active)
             VALUES(?, ?, ?, 1)
             ON CONFLICT(date) DO NOTHING",
            (holiday.date, &holiday.name, holiday.kind.as_str()),
        )?;
    }
    tx.commit()?;
    Ok(())
}
