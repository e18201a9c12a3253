use crate::calc::Period;
use crate::ipc::error::{calc_err, err};
use crate::ipc::types::{AppState, Request};
use crate::store::ReadStore;
use rusqlite::Connection;

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Integer param that may be absent or null.
pub fn optional_i64(req: &Request, key: &str) -> Result<Option<i64>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| err(&req.id, "bad_params", format!("{} must be an integer", key), None)),
    }
}

pub fn required_i64(req: &Request, key: &str) -> Result<i64, serde_json::Value> {
    optional_i64(req, key)?
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Result<Option<String>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(s) = v.as_str() else {
                return Err(err(
                    &req.id,
                    "bad_params",
                    format!("{} must be a string", key),
                    None,
                ));
            };
            let t = s.trim();
            Ok(if t.is_empty() { None } else { Some(t.to_string()) })
        }
    }
}

/// Explicit `period` param, or the latest open period when absent.
pub fn resolve_period<S: ReadStore + ?Sized>(
    req: &Request,
    store: &S,
) -> Result<Period, serde_json::Value> {
    match optional_i64(req, "period")? {
        Some(n) => Period::from_i64(n).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "period must be one of: 1, 2, 3",
                Some(serde_json::json!({ "period": n })),
            )
        }),
        None => match store.latest_open_period() {
            Ok(Some(p)) => Ok(p),
            Ok(None) => Err(err(
                &req.id,
                "bad_params",
                "no period given and no period is open",
                None,
            )),
            Err(e) => Err(calc_err(&req.id, e)),
        },
    }
}

/// Like `resolve_period`, but analytics treat a missing period as "all periods".
pub fn optional_period(req: &Request) -> Result<Option<Period>, serde_json::Value> {
    match optional_i64(req, "period")? {
        None => Ok(None),
        Some(n) => Period::from_i64(n).map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "period must be one of: 1, 2, 3",
                Some(serde_json::json!({ "period": n })),
            )
        }),
    }
}
