use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::json;
use std::str::FromStr;

use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::{parse_date, ModelError};

pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

pub fn now_stamp() -> String {
    chrono::Local::now().to_rfc3339()
}

/// Runs `f` against the open workspace database.
pub fn with_db<F>(state: &AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => {
            tracing::debug!(code = error.code, message = %error.message, "request failed");
            error.response(&req.id)
        }
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &'static str) -> Result<String, HandlerErr> {
    get_optional_str(params, key).ok_or_else(|| {
        HandlerErr::bad_params(format!("missing {}", key)).with_details(json!({ "field": key }))
    })
}

/// Trimmed string, `None` when absent, null or blank.
pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

pub fn get_bool(params: &serde_json::Value, key: &str, default: bool) -> bool {
    params.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

pub fn get_required_date(params: &serde_json::Value, key: &'static str) -> Result<NaiveDate, HandlerErr> {
    let raw = get_required_str(params, key)?;
    Ok(parse_date(key, &raw)?)
}

pub fn get_optional_date(
    params: &serde_json::Value,
    key: &'static str,
) -> Result<Option<NaiveDate>, HandlerErr> {
    match get_optional_str(params, key) {
        Some(raw) => Ok(Some(parse_date(key, &raw)?)),
        None => Ok(None),
    }
}

pub fn get_optional_f64(
    params: &serde_json::Value,
    key: &'static str,
) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| ModelError::invalid(key, "must be a number").into()),
    }
}

pub fn get_required_i64(params: &serde_json::Value, key: &'static str) -> Result<i64, HandlerErr> {
    params.get(key).and_then(|v| v.as_i64()).ok_or_else(|| {
        HandlerErr::bad_params(format!("missing {}", key)).with_details(json!({ "field": key }))
    })
}

/// Optional enum-like parameter parsed through its validating `FromStr`.
pub fn get_optional_parsed<T>(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<T>, HandlerErr>
where
    T: FromStr<Err = ModelError>,
{
    match get_optional_str(params, key) {
        Some(raw) => Ok(Some(raw.parse::<T>()?)),
        None => Ok(None),
    }
}

pub fn get_required_parsed<T>(params: &serde_json::Value, key: &'static str) -> Result<T, HandlerErr>
where
    T: FromStr<Err = ModelError>,
{
    let raw = get_required_str(params, key)?;
    Ok(raw.parse::<T>()?)
}

/// Maps a stored enum column back to its type inside a row closure.
pub fn stored<T>(idx: usize, raw: String) -> rusqlite::Result<T>
where
    T: FromStr<Err = ModelError>,
{
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
