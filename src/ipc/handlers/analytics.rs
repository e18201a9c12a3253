use crate::grading;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_i64, optional_period, optional_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value, Connection};
use serde_json::json;
use std::collections::BTreeMap;

/// Lowest and highest histogram bins, in half points.
const HISTOGRAM_MIN_HALVES: i64 = 2;
const HISTOGRAM_MAX_HALVES: i64 = 10;

/// Optional scope shared by the metrics methods.
#[derive(Debug, Default)]
struct MetricFilters {
    site_name: Option<String>,
    grade_level_id: Option<i64>,
    group_id: Option<i64>,
    period: Option<i64>,
}

impl MetricFilters {
    /// Appends `AND ...` clauses over the aliases `si`, `g`, `gr`.
    fn push_sql(&self, sql: &mut String, bind: &mut Vec<Value>) {
        if let Some(name) = &self.site_name {
            sql.push_str(" AND si.name = ?");
            bind.push(Value::Text(name.clone()));
        }
        if let Some(id) = self.grade_level_id {
            sql.push_str(" AND g.grade_level_id = ?");
            bind.push(Value::Integer(id));
        }
        if let Some(id) = self.group_id {
            sql.push_str(" AND g.id = ?");
            bind.push(Value::Integer(id));
        }
        if let Some(p) = self.period {
            sql.push_str(" AND gr.period_id = ?");
            bind.push(Value::Integer(p));
        }
    }
}

fn parse_filters(
    req: &Request,
    with_grade: bool,
    with_period: bool,
) -> Result<MetricFilters, serde_json::Value> {
    Ok(MetricFilters {
        site_name: optional_str(req, "siteName")?,
        grade_level_id: if with_grade {
            optional_i64(req, "gradeLevelId")?
        } else {
            None
        },
        group_id: optional_i64(req, "groupId")?,
        period: if with_period {
            optional_period(req)?.map(|p| p.number())
        } else {
            None
        },
    })
}

/// One row per grade record of an actively enrolled student, even when the
/// student sits in more than one active group.
fn active_scores(
    conn: &Connection,
    filters: &MetricFilters,
) -> rusqlite::Result<Vec<(i64, String, f64)>> {
    let mut sql = String::from(
        "SELECT DISTINCT gr.id, sub.id, sub.name, gr.score
         FROM grade_records gr
         JOIN subjects sub ON sub.id = gr.subject_id
         JOIN student_groups sg ON sg.student_id = gr.student_id AND sg.end_date IS NULL
         JOIN groups g ON g.id = sg.group_id
         JOIN sites si ON si.id = g.site_id
         WHERE gr.score IS NOT NULL",
    );
    let mut bind = Vec::new();
    filters.push_sql(&mut sql, &mut bind);

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), |r| {
            Ok((r.get::<_, i64>(1)?, r.get::<_, String>(2)?, r.get::<_, f64>(3)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn handle_failing_by_subject(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let filters = match parse_filters(req, true, true) {
        Ok(f) => f,
        Err(e) => return e,
    };
    let threshold = match req.params.get("threshold") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_f64().filter(|t| t.is_finite()) {
            Some(t) => Some(t),
            None => return err(&req.id, "bad_params", "threshold must be a number", None),
        },
    };

    let rows = match active_scores(conn, &filters) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut counts: BTreeMap<(String, i64), u64> = BTreeMap::new();
    for (subject_id, name, score) in rows {
        let failing = match threshold {
            Some(t) => score < t,
            None => grading::is_failing(&name, Some(score)),
        };
        if failing {
            *counts.entry((name, subject_id)).or_insert(0) += 1;
        }
    }

    let subjects: Vec<serde_json::Value> = counts
        .into_iter()
        .map(|((name, subject_id), failing)| {
            json!({ "subjectId": subject_id, "subject": name, "failing": failing })
        })
        .collect();
    ok(&req.id, json!({ "threshold": threshold, "subjects": subjects }))
}

fn handle_score_histogram(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let filters = match parse_filters(req, false, true) {
        Ok(f) => f,
        Err(e) => return e,
    };
    let rows = match active_scores(conn, &filters) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut counts: BTreeMap<i64, u64> = (HISTOGRAM_MIN_HALVES..=HISTOGRAM_MAX_HALVES)
        .map(|h| (h, 0))
        .collect();
    let mut total = 0_u64;
    for (_, _, score) in rows {
        let halves = (score * 2.0).round() as i64;
        if let Some(n) = counts.get_mut(&halves) {
            *n += 1;
            total += 1;
        }
    }

    let bins: Vec<serde_json::Value> = counts
        .into_iter()
        .map(|(halves, count)| {
            json!({ "bin": format!("{:.1}", halves as f64 / 2.0), "count": count })
        })
        .collect();
    ok(&req.id, json!({ "bins": bins, "total": total }))
}

fn handle_active_by_site(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let filters = match parse_filters(req, false, false) {
        Ok(f) => f,
        Err(e) => return e,
    };

    let mut sql = String::from(
        "SELECT si.id, si.name, COUNT(DISTINCT sg.student_id)
         FROM student_groups sg
         JOIN groups g ON g.id = sg.group_id
         JOIN sites si ON si.id = g.site_id
         WHERE sg.end_date IS NULL",
    );
    let mut bind = Vec::new();
    filters.push_sql(&mut sql, &mut bind);
    sql.push_str(" GROUP BY si.id, si.name ORDER BY si.name, si.id");

    match site_counts(conn, &sql, bind) {
        Ok(sites) => ok(&req.id, json!({ "sites": sites })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn site_counts(
    conn: &Connection,
    sql: &str,
    bind: Vec<Value>,
) -> rusqlite::Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), |r| {
            Ok(json!({
                "siteId": r.get::<_, i64>(0)?,
                "site": r.get::<_, String>(1)?,
                "active": r.get::<_, i64>(2)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.failingBySubject" => Some(handle_failing_by_subject(state, req)),
        "analytics.scoreHistogram" => Some(handle_score_histogram(state, req)),
        "analytics.activeBySite" => Some(handle_active_by_site(state, req)),
        _ => None,
    }
}
