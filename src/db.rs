use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "boletin.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sites(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_levels(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS groups(
            id INTEGER PRIMARY KEY,
            site_id INTEGER NOT NULL,
            grade_level_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(site_id) REFERENCES sites(id),
            FOREIGN KEY(grade_level_id) REFERENCES grade_levels(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_groups_grade_level ON groups(grade_level_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id INTEGER PRIMARY KEY,
            given_name TEXT NOT NULL,
            surname TEXT NOT NULL,
            document_id TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_groups(
            id INTEGER PRIMARY KEY,
            student_id INTEGER NOT NULL,
            group_id INTEGER NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(group_id) REFERENCES groups(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_groups_group ON student_groups(group_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_groups_student ON student_groups(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS areas(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id INTEGER PRIMARY KEY,
            area_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(area_id) REFERENCES areas(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_area ON subjects(area_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS group_subjects(
            group_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            PRIMARY KEY(group_id, subject_id),
            FOREIGN KEY(group_id) REFERENCES groups(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS periods(
            id INTEGER PRIMARY KEY CHECK (id IN (1, 2, 3)),
            name TEXT NOT NULL,
            is_open INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    for (id, name) in [(1_i64, "Periodo 1"), (2, "Periodo 2"), (3, "Periodo 3")] {
        conn.execute(
            "INSERT OR IGNORE INTO periods(id, name, is_open) VALUES(?, ?, 0)",
            (id, name),
        )?;
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_records(
            id INTEGER PRIMARY KEY,
            student_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            period_id INTEGER NOT NULL,
            score REAL,
            absences INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(period_id) REFERENCES periods(id),
            UNIQUE(student_id, subject_id, period_id)
        )",
        [],
    )?;
    // Early workspaces stored scores only; absences were tracked elsewhere.
    ensure_grade_records_absences(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_records_student ON grade_records(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_records_subject ON grade_records(subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

fn ensure_grade_records_absences(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "grade_records", "absences")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE grade_records ADD COLUMN absences INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
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

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let text = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, text),
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
