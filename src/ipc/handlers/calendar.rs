use chrono::{Datelike, NaiveDate};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::calendar::static_holiday_name;
use crate::db::is_unique_violation;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{
    get_optional_date, get_optional_parsed, get_required_date, get_required_i64,
    get_required_parsed, get_required_str, stored, with_db,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{format_date, Bilingual, CalendarEventType, ModelError};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CalendarEventRow {
    id: String,
    date: String,
    #[serde(rename = "type")]
    event_type: CalendarEventType,
    title: Bilingual,
}

pub(crate) fn has_recorded_poya(conn: &Connection, date: NaiveDate) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM calendar_events WHERE date = ? AND event_type = 'poya'",
        [format_date(date)],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db_query)
}

fn parse_year(params: &serde_json::Value) -> Result<i32, HandlerErr> {
    let year = get_required_i64(params, "year")?;
    if !(1900..=2200).contains(&year) {
        return Err(ModelError::invalid("year", "must be between 1900 and 2200").into());
    }
    Ok(year as i32)
}

fn holidays_get(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let year = parse_year(params)?;
    Ok(state.calendar(year).to_json())
}

fn calendar_classify(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let date = get_required_date(params, "date")?;
    let calendar = state.calendar(date.year());
    let recorded_poya = match state.db.as_ref() {
        Some(conn) => has_recorded_poya(conn, date)?,
        None => false,
    };
    Ok(json!({
        "date": format_date(date),
        "kind": calendar.classify(date),
        "weekday": date.weekday().to_string(),
        "recordedPoya": recorded_poya,
        "isClassDay": calendar.is_class_day(date, recorded_poya),
    }))
}

fn events_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let from = get_optional_date(params, "from")?;
    let to = get_optional_date(params, "to")?;
    let event_type: Option<CalendarEventType> = get_optional_parsed(params, "type")?;

    let mut clauses: Vec<&str> = Vec::new();
    let mut args: Vec<String> = Vec::new();
    if let Some(d) = from {
        clauses.push("date >= ?");
        args.push(format_date(d));
    }
    if let Some(d) = to {
        clauses.push("date <= ?");
        args.push(format_date(d));
    }
    if let Some(t) = event_type {
        clauses.push("event_type = ?");
        args.push(t.as_str().to_string());
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "SELECT id, date, event_type, title_en, title_si FROM calendar_events {where_sql}
         ORDER BY date, event_type"
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let events = stmt
        .query_map(params_from_iter(args.iter()), |r| {
            Ok(CalendarEventRow {
                id: r.get(0)?,
                date: r.get(1)?,
                event_type: stored(2, r.get(2)?)?,
                title: Bilingual {
                    en: r.get(3)?,
                    si: r.get(4)?,
                },
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "events": events }))
}

fn insert_event(
    conn: &Connection,
    date: NaiveDate,
    event_type: CalendarEventType,
    title: &Bilingual,
) -> Result<String, rusqlite::Error> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO calendar_events(id, date, event_type, title_en, title_si)
         VALUES(?, ?, ?, ?, ?)",
        (&id, format_date(date), event_type.as_str(), &title.en, &title.si),
    )?;
    Ok(id)
}

fn events_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let date = get_required_date(params, "date")?;
    let event_type: CalendarEventType = get_required_parsed(params, "type")?;
    let title = Bilingual::from_json("title", params.get("title"))?;
    let id = insert_event(conn, date, event_type, &title).map_err(|e| {
        if is_unique_violation(&e) {
            HandlerErr::conflict("an event of this type already exists on this date").with_details(
                json!({ "date": format_date(date), "type": event_type }),
            )
        } else {
            HandlerErr::db_update(e, "calendar_events")
        }
    })?;
    Ok(json!({ "eventId": id }))
}

fn events_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "eventId")?;
    let deleted = conn
        .execute("DELETE FROM calendar_events WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db_update(e, "calendar_events"))?;
    if deleted == 0 {
        return Err(HandlerErr::not_found("event").with_details(json!({ "eventId": id })));
    }
    Ok(json!({ "deleted": deleted }))
}

/// Records the year's holidays and approximate Poya days as events. Dates
/// already carrying an event of the same type are left alone.
fn events_generate(state: &AppState, conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let year = parse_year(params)?;
    let calendar = state.calendar(year);

    let mut planned: Vec<(NaiveDate, CalendarEventType, Bilingual)> = Vec::new();
    for d in calendar.holidays() {
        let en = static_holiday_name(d).unwrap_or("Public holiday");
        planned.push((
            d,
            CalendarEventType::Holiday,
            Bilingual {
                en: en.to_string(),
                si: en.to_string(),
            },
        ));
    }
    for d in calendar.poya_days() {
        planned.push((
            d,
            CalendarEventType::Poya,
            Bilingual {
                en: "Poya day (approximate)".to_string(),
                si: "පොහොය දිනය".to_string(),
            },
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let mut inserted = 0usize;
    let mut skipped = 0usize;
    for (date, event_type, title) in &planned {
        match insert_event(&tx, *date, *event_type, title) {
            Ok(_) => inserted += 1,
            Err(e) if is_unique_violation(&e) => skipped += 1,
            Err(e) => return Err(HandlerErr::db_update(e, "calendar_events")),
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    tracing::info!(year, inserted, skipped, source = calendar.source(), "calendar events generated");
    Ok(json!({
        "year": year,
        "inserted": inserted,
        "skipped": skipped,
        "holidaySource": calendar.source(),
    }))
}

fn handle_holidays_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    match holidays_get(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_calendar_classify(state: &mut AppState, req: &Request) -> serde_json::Value {
    match calendar_classify(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_events_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, events_list)
}

fn handle_events_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, events_create)
}

fn handle_events_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, events_delete)
}

fn handle_events_generate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let state: &AppState = state;
    with_db(state, req, |conn, params| events_generate(state, conn, params))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "holidays.get" => Some(handle_holidays_get(state, req)),
        "calendar.classify" => Some(handle_calendar_classify(state, req)),
        "attendance.events" | "calendar.events.list" => Some(handle_events_list(state, req)),
        "calendar.events.create" => Some(handle_events_create(state, req)),
        "calendar.events.delete" => Some(handle_events_delete(state, req)),
        "calendar.events.generate" => Some(handle_events_generate(state, req)),
        _ => None,
    }
}
