#![allow(dead_code)]

use rusqlite::Connection;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_boletind");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn boletind");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

/// Raw response envelope.
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

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
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
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

pub fn error_code(resp: &serde_json::Value) -> Option<&str> {
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

/// Opens the workspace database the sidecar created on `workspace.select`.
pub fn open_workspace_db(workspace: &Path) -> Connection {
    Connection::open(workspace.join("boletin.sqlite3")).expect("open workspace db")
}

/// Two grade levels across two sites:
///
/// - group 61 (Sede Central, Sexto): Arango 5.0, Bernal 5.0, Castro 3.0, Gómez no grades,
///   Franco withdrawn
/// - group 62 (Sede Norte, Sexto): Duque 4.0
/// - group 71 (Sede Central, Séptimo): Estrada 4.5
///
/// Every group takes Aritmética (Matemáticas) and Inglés (Humanidades).
/// All listed scores are period 1, the same value in both subjects.
pub fn seed_school(conn: &Connection) {
    conn.execute_batch(
        "INSERT INTO sites(id, name) VALUES (1, 'Sede Central'), (2, 'Sede Norte');
         INSERT INTO grade_levels(id, name) VALUES (1, 'Sexto'), (2, 'Séptimo');
         INSERT INTO groups(id, site_id, grade_level_id, name) VALUES
            (61, 1, 1, '6-1'), (62, 2, 1, '6-2'), (71, 1, 2, '7-1');
         INSERT INTO areas(id, name) VALUES (1, 'Humanidades'), (2, 'Matemáticas');
         INSERT INTO subjects(id, area_id, name) VALUES (100, 2, 'Aritmética'), (200, 1, 'Inglés');
         INSERT INTO group_subjects(group_id, subject_id) VALUES
            (61, 100), (61, 200), (62, 100), (62, 200), (71, 100), (71, 200);
         INSERT INTO students(id, given_name, surname, document_id) VALUES
            (1, 'Ana', 'Arango', 'D1'),
            (2, 'Beto', 'Bernal', 'D2'),
            (3, 'Carla', 'Castro', 'D3'),
            (4, 'Dora', 'Duque', 'D4'),
            (5, 'Eva', 'Estrada', 'D5'),
            (6, 'Fabio', 'Franco', 'D6'),
            (7, 'Gina', 'Gómez', 'D7');
         INSERT INTO student_groups(student_id, group_id, start_date, end_date) VALUES
            (1, 61, '2026-02-01', NULL),
            (2, 61, '2026-02-01', NULL),
            (3, 61, '2026-02-01', NULL),
            (4, 62, '2026-02-01', NULL),
            (5, 71, '2026-02-01', NULL),
            (6, 61, '2026-02-01', '2026-04-01'),
            (7, 61, '2026-02-01', NULL);",
    )
    .expect("seed school");
    for (student, score) in [(1_i64, 5.0_f64), (2, 5.0), (3, 3.0), (4, 4.0), (5, 4.5), (6, 1.0)] {
        for subject in [100_i64, 200] {
            set_grade(conn, student, subject, 1, Some(score), 0);
        }
    }
}

pub fn set_grade(
    conn: &Connection,
    student_id: i64,
    subject_id: i64,
    period: i64,
    score: Option<f64>,
    absences: i64,
) {
    conn.execute(
        "INSERT INTO grade_records(student_id, subject_id, period_id, score, absences)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(student_id, subject_id, period_id)
         DO UPDATE SET score = excluded.score, absences = excluded.absences",
        (student_id, subject_id, period, score, absences),
    )
    .expect("set grade");
}

pub fn open_period(conn: &Connection, period: i64) {
    conn.execute("UPDATE periods SET is_open = 1 WHERE id = ?", [period])
        .expect("open period");
}

/// Sidecar with a selected workspace seeded by `seed_school`.
pub fn seeded_sidecar(prefix: &str) -> (Child, ChildStdin, BufReader<ChildStdout>, PathBuf) {
    let workspace = temp_dir(prefix);
    let (child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let conn = open_workspace_db(&workspace);
    seed_school(&conn);
    (child, stdin, reader, workspace)
}
