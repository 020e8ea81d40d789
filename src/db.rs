use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "resultsd.sqlite3";
pub const GRADING_SETTINGS_KEY: &str = "grading.system";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            student_no TEXT,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_sort ON students(class_id, sort_order)",
        [],
    )?;

    // Raw inputs only. Totals and grades are derived on read.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS scores(
            student_id TEXT NOT NULL,
            session TEXT NOT NULL,
            term TEXT NOT NULL,
            subject TEXT NOT NULL,
            ca_json TEXT NOT NULL,
            exam REAL NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY(student_id, session, term, subject),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scores_term ON scores(session, term)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS terms(
            class_id TEXT NOT NULL,
            session TEXT NOT NULL,
            term TEXT NOT NULL,
            closed_at TEXT,
            PRIMARY KEY(class_id, session, term),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS result_snapshots(
            class_id TEXT NOT NULL,
            session TEXT NOT NULL,
            term TEXT NOT NULL,
            snapshot_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY(class_id, session, term),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

/// `Some(closed_at)` once a class-term has been finalized.
pub fn term_closed_at(
    conn: &Connection,
    class_id: &str,
    session: &str,
    term: &str,
) -> rusqlite::Result<Option<String>> {
    let row: Option<Option<String>> = conn
        .query_row(
            "SELECT closed_at FROM terms WHERE class_id = ? AND session = ? AND term = ?",
            (class_id, session, term),
            |r| r.get(0),
        )
        .optional()?;
    Ok(row.flatten())
}

/// Stored scores in terms that are still open whose CA count differs from
/// `components`. Closed terms answer from snapshots and never regrade.
pub fn open_scores_with_other_layout(conn: &Connection, components: usize) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*)
         FROM scores sc
         JOIN students s ON s.id = sc.student_id
         LEFT JOIN terms t
           ON t.class_id = s.class_id AND t.session = sc.session AND t.term = sc.term
         WHERE t.closed_at IS NULL AND json_array_length(sc.ca_json) <> ?",
        [components as i64],
        |r| r.get(0),
    )
}

pub fn class_exists(conn: &Connection, class_id: &str) -> rusqlite::Result<bool> {
    let hit: Option<i64> = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| r.get(0))
        .optional()?;
    Ok(hit.is_some())
}

pub fn student_class_id(conn: &Connection, student_id: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT class_id FROM students WHERE id = ?",
        [student_id],
        |r| r.get(0),
    )
    .optional()
}
