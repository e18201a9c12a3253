use crate::boletin;
use crate::calc::{self, Period};
use crate::dataset::{self, ReportRequest};
use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::helpers::{db_conn, optional_i64, optional_str, required_i64, resolve_period};
use crate::ipc::types::{AppState, Request};
use crate::store::{roster_sort_key, SqliteStore};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::json;
use tracing::info;

fn parse_report_request(
    req: &Request,
    store: &SqliteStore<'_>,
) -> Result<ReportRequest, serde_json::Value> {
    let group_id = required_i64(req, "groupId")?;
    let period = resolve_period(req, store)?;
    let student_id = optional_i64(req, "studentId")?;
    Ok(ReportRequest {
        group_id,
        period,
        student_id,
    })
}

fn parse_emission_date(req: &Request) -> Result<NaiveDate, serde_json::Value> {
    match optional_str(req, "emissionDate")? {
        None => Ok(chrono::Local::now().date_naive()),
        Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|_| {
            err(
                &req.id,
                "bad_params",
                "emissionDate must be YYYY-MM-DD",
                Some(json!({ "emissionDate": raw })),
            )
        }),
    }
}

fn handle_boletin_dataset(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let store = SqliteStore::new(conn);
    let report = match parse_report_request(req, &store) {
        Ok(v) => v,
        Err(e) => return e,
    };

    match dataset::build_dataset(&store, &report) {
        Ok(ds) => {
            info!(
                group_id = report.group_id,
                period = report.period.number(),
                students = ds.students.len(),
                "boletin dataset built"
            );
            ok(
                &req.id,
                json!({
                    "groupId": ds.group_id,
                    "period": ds.period.number(),
                    "gradeLevel": ds.grade_level,
                    "weights": ds.weights,
                    "students": ds.students,
                }),
            )
        }
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_boletines(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let store = SqliteStore::new(conn);
    let report = match parse_report_request(req, &store) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let issued_on = match parse_emission_date(req) {
        Ok(d) => d,
        Err(e) => return e,
    };

    match boletin::build_boletines(&store, &report, issued_on) {
        Ok(boletines) => {
            info!(
                group_id = report.group_id,
                period = report.period.number(),
                count = boletines.len(),
                "boletines assembled"
            );
            ok(
                &req.id,
                json!({
                    "groupId": report.group_id,
                    "period": report.period.number(),
                    "boletines": boletines,
                }),
            )
        }
        Err(e) => calc_err(&req.id, e),
    }
}

fn group_period_rows(
    conn: &Connection,
    group_id: i64,
    period: Period,
) -> rusqlite::Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.surname, s.given_name, AVG(gr.score), COALESCE(SUM(gr.absences), 0)
         FROM student_groups sg
         JOIN students s ON s.id = sg.student_id
         LEFT JOIN grade_records gr
           ON gr.student_id = s.id
          AND gr.period_id = ?2
          AND gr.subject_id IN (SELECT subject_id FROM group_subjects WHERE group_id = ?1)
         WHERE sg.group_id = ?1 AND sg.end_date IS NULL
         GROUP BY s.id, s.surname, s.given_name",
    )?;
    let mut rows = stmt
        .query_map((group_id, period.number()), |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<f64>>(3)?,
                r.get::<_, i64>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.sort_by_cached_key(|(id, surname, given_name, _, _)| {
        roster_sort_key(surname, given_name, *id)
    });
    Ok(rows
        .into_iter()
        .map(|(id, surname, given_name, avg, absences)| {
            json!({
                "studentId": id,
                "surname": surname,
                "givenName": given_name,
                "average": avg.map(calc::round_off_2_decimals),
                "absences": absences,
            })
        })
        .collect())
}

fn handle_group_period_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let store = SqliteStore::new(conn);
    let group_id = match required_i64(req, "groupId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let period = match resolve_period(req, &store) {
        Ok(p) => p,
        Err(e) => return e,
    };

    match group_period_rows(conn, group_id, period) {
        Ok(students) => ok(
            &req.id,
            json!({
                "groupId": group_id,
                "period": period.number(),
                "students": students,
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.boletinDataset" => Some(handle_boletin_dataset(state, req)),
        "reports.boletines" => Some(handle_boletines(state, req)),
        "reports.groupPeriodSummary" => Some(handle_group_period_summary(state, req)),
        _ => None,
    }
}
