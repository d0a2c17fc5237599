use chrono::{Datelike, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

use crate::attendance::{
    bulk_assign, group_by_student, needs_confirmation, summarize, summarize_roster, PendingMark,
    RecordedMark,
};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::calendar::has_recorded_poya;
use crate::ipc::handlers::students::{load_roster, StudentRow};
use crate::ipc::helpers::{
    get_bool, get_optional_parsed, get_optional_str, get_required_date, get_required_parsed,
    now_stamp, stored, with_db,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{
    format_date, parse_date, AttendanceStatus, ClassCode, FlowerOffering, ModelError, StudentId,
};

struct StoredRecord {
    student_id: String,
    date: NaiveDate,
    status: AttendanceStatus,
    reason: Option<String>,
    flower: FlowerOffering,
}

fn records_between(
    conn: &Connection,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<StoredRecord>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT student_id, date, status, reason, flower_brought, flower_type, flower_notes
             FROM attendance_records
             WHERE date >= ? AND date <= ?
             ORDER BY date, student_id",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map((format_date(from), format_date(to)), |r| {
            let raw: String = r.get(1)?;
            let date = parse_date("date", &raw).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
            })?;
            Ok(StoredRecord {
                student_id: r.get(0)?,
                date,
                status: stored(2, r.get(2)?)?,
                reason: r.get(3)?,
                flower: FlowerOffering {
                    brought: r.get::<_, i64>(4)? != 0,
                    kind: r.get(5)?,
                    notes: r.get(6)?,
                },
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(rows)
}

fn student_json(s: &StudentRow) -> serde_json::Value {
    json!({
        "studentId": s.student_id,
        "name": s.name,
        "classCode": s.class_code,
        "ageGroup": s.age_group,
    })
}

fn attendance_list(state: &AppState, conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let date = get_required_date(params, "date")?;
    let class_code: Option<ClassCode> = get_optional_parsed(params, "classCode")?;
    let roster = load_roster(conn, class_code)?;
    let by_student: HashMap<String, StoredRecord> = records_between(conn, date, date)?
        .into_iter()
        .map(|r| (r.student_id.clone(), r))
        .collect();

    let calendar = state.calendar(date.year());
    let recorded_poya = has_recorded_poya(conn, date)?;

    let mut unmarked = 0usize;
    let rows: Vec<serde_json::Value> = roster
        .iter()
        .map(|s| {
            let mut row = student_json(s);
            match by_student.get(&s.student_id) {
                Some(rec) => {
                    row["status"] = json!(rec.status);
                    row["reason"] = json!(rec.reason);
                    row["flowerOffering"] = json!(rec.flower);
                }
                None => {
                    unmarked += 1;
                    row["status"] = serde_json::Value::Null;
                }
            }
            row
        })
        .collect();
    let marks: Vec<RecordedMark> = by_student
        .values()
        .filter(|r| roster.iter().any(|s| s.student_id == r.student_id))
        .map(|r| RecordedMark {
            student_id: r.student_id.clone(),
            date: r.date,
            status: r.status,
            flower_brought: r.flower.brought,
        })
        .collect();
    let summary = summarize(&marks);

    Ok(json!({
        "date": format_date(date),
        "classCode": class_code,
        "dayKind": calendar.classify(date),
        "isClassDay": calendar.is_class_day(date, recorded_poya),
        "rows": rows,
        "summary": {
            "present": summary.present,
            "absent": summary.absent,
            "late": summary.late,
            "unmarked": unmarked,
        }
    }))
}

fn parse_flower(v: Option<&serde_json::Value>) -> Result<Option<FlowerOffering>, HandlerErr> {
    match v {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => serde_json::from_value::<FlowerOffering>(v.clone())
            .map(Some)
            .map_err(|e| ModelError::invalid("flowerOffering", e.to_string()).into()),
    }
}

/// Builds the sheet to save: the roster when a bulk status is given, then
/// per-student entries on top.
fn build_sheet(
    conn: &Connection,
    params: &serde_json::Value,
    class_code: Option<ClassCode>,
) -> Result<Vec<PendingMark>, HandlerErr> {
    let bulk: Option<AttendanceStatus> = get_optional_parsed(params, "bulkStatus")?;
    let mut sheet: Vec<PendingMark> = Vec::new();
    if let Some(status) = bulk {
        sheet = load_roster(conn, class_code)?
            .into_iter()
            .map(|s| PendingMark::new(s.student_id))
            .collect();
        bulk_assign(&mut sheet, status);
    }

    let records = match params.get("records") {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(serde_json::Value::Array(a)) => a.clone(),
        Some(_) => return Err(ModelError::invalid("records", "must be an array").into()),
    };
    for rec in &records {
        let id: StudentId = get_required_parsed(rec, "studentId")?;
        let status: Option<AttendanceStatus> = get_optional_parsed(rec, "status")?;
        let reason = get_optional_str(rec, "reason");
        let flower = parse_flower(rec.get("flowerOffering"))?;

        let idx = match sheet.iter().position(|m| m.student_id == id.as_str()) {
            Some(i) => i,
            None => {
                sheet.push(PendingMark::new(id.as_str()));
                sheet.len() - 1
            }
        };
        let row = &mut sheet[idx];
        if status.is_some() {
            row.status = status;
        }
        if reason.is_some() {
            row.reason = reason;
        }
        if flower.is_some() {
            row.flower_offering = flower;
        }
    }

    if let Some(missing) = sheet.iter().find(|m| m.status.is_none()) {
        return Err(HandlerErr::bad_params("status is required")
            .with_details(json!({ "field": "status", "studentId": missing.student_id })));
    }
    if sheet.is_empty() {
        return Err(HandlerErr::bad_params("nothing to mark: pass records or bulkStatus"));
    }
    Ok(sheet)
}

fn attendance_mark(state: &AppState, conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let date = get_required_date(params, "date")?;
    let class_code: Option<ClassCode> = get_optional_parsed(params, "classCode")?;
    let confirmed = get_bool(params, "confirmNonClassDay", false);

    let sheet = build_sheet(conn, params, class_code)?;

    if state.config.attendance.require_class_day_confirmation && !confirmed {
        let calendar = state.calendar(date.year());
        let recorded_poya = has_recorded_poya(conn, date)?;
        if needs_confirmation(&calendar, date, recorded_poya) {
            return Err(HandlerErr::new(
                "confirmation_required",
                "date is neither a Sunday nor a Poya day; resend with confirmNonClassDay to record it",
            )
            .with_details(json!({
                "date": format_date(date),
                "weekday": date.weekday().to_string(),
                "dayKind": calendar.classify(date),
            })));
        }
    }

    let date_key = format_date(date);
    let stamp = now_stamp();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for m in &sheet {
        let active: Option<i64> = tx
            .query_row(
                "SELECT active FROM students WHERE student_id = ?",
                [&m.student_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(HandlerErr::db_query)?;
        match active {
            None => {
                return Err(HandlerErr::not_found("student")
                    .with_details(json!({ "studentId": m.student_id })));
            }
            Some(0) => {
                return Err(HandlerErr::bad_params("student is inactive")
                    .with_details(json!({ "field": "studentId", "studentId": m.student_id })));
            }
            Some(_) => {}
        }
        let Some(status) = m.status else { continue };
        let flower = m.flower_offering.clone().unwrap_or_default();
        tx.execute(
            "INSERT INTO attendance_records(id, student_id, date, status, reason,
               flower_brought, flower_type, flower_notes, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, date) DO UPDATE SET
               status = excluded.status,
               reason = excluded.reason,
               flower_brought = excluded.flower_brought,
               flower_type = excluded.flower_type,
               flower_notes = excluded.flower_notes,
               updated_at = excluded.updated_at",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                m.student_id,
                date_key,
                status.as_str(),
                m.reason,
                flower.brought as i64,
                flower.kind,
                flower.notes,
                stamp,
            ],
        )
        .map_err(|e| HandlerErr::db_update(e, "attendance_records"))?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    tracing::info!(date = %date_key, saved = sheet.len(), confirmed, "attendance saved");
    Ok(json!({ "date": date_key, "saved": sheet.len() }))
}

fn attendance_report(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let from = get_required_date(params, "from")?;
    let to = get_required_date(params, "to")?;
    if from > to {
        return Err(ModelError::invalid("to", "must not be before from").into());
    }
    let class_code: Option<ClassCode> = get_optional_parsed(params, "classCode")?;
    let roster = load_roster(conn, class_code)?;
    let ids: Vec<String> = roster.iter().map(|s| s.student_id.clone()).collect();

    let marks: Vec<RecordedMark> = records_between(conn, from, to)?
        .into_iter()
        .filter(|r| ids.contains(&r.student_id))
        .map(|r| RecordedMark {
            student_id: r.student_id,
            date: r.date,
            status: r.status,
            flower_brought: r.flower.brought,
        })
        .collect();

    let per_student = summarize_roster(&ids, &marks);
    let dates = group_by_student(&marks);
    let students: Vec<serde_json::Value> = roster
        .iter()
        .zip(per_student.iter())
        .map(|(s, (_, summary))| {
            let mut row = student_json(s);
            row["summary"] = json!(summary);
            row["dates"] = match dates.get(s.student_id.as_str()) {
                Some(by_status) => by_status
                    .iter()
                    .map(|(status, days)| {
                        let days: Vec<String> = days.iter().copied().map(format_date).collect();
                        (status.as_str().to_string(), json!(days))
                    })
                    .collect::<serde_json::Map<_, _>>()
                    .into(),
                None => json!({}),
            };
            row
        })
        .collect();
    let mut days: Vec<NaiveDate> = marks.iter().map(|m| m.date).collect();
    days.sort();
    days.dedup();

    Ok(json!({
        "from": format_date(from),
        "to": format_date(to),
        "classCode": class_code,
        "ageGroup": class_code.map(ClassCode::age_group),
        "daysRecorded": days.len(),
        "students": students,
        "totals": summarize(&marks),
    }))
}

fn attendance_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let date = get_required_date(params, "date")?;
    let id: StudentId = get_required_parsed(params, "studentId")?;
    let deleted = conn
        .execute(
            "DELETE FROM attendance_records WHERE student_id = ? AND date = ?",
            (id.as_str(), format_date(date)),
        )
        .map_err(|e| HandlerErr::db_update(e, "attendance_records"))?;
    if deleted == 0 {
        return Err(HandlerErr::not_found("attendance record")
            .with_details(json!({ "studentId": id, "date": format_date(date) })));
    }
    Ok(json!({ "deleted": deleted }))
}

fn handle_attendance_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let state: &AppState = state;
    with_db(state, req, |conn, params| attendance_list(state, conn, params))
}

fn handle_attendance_mark(state: &mut AppState, req: &Request) -> serde_json::Value {
    let state: &AppState = state;
    with_db(state, req, |conn, params| attendance_mark(state, conn, params))
}

fn handle_attendance_report(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, attendance_report)
}

fn handle_attendance_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, attendance_delete)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.list" => Some(handle_attendance_list(state, req)),
        "attendance.mark" => Some(handle_attendance_mark(state, req)),
        "attendance.report" => Some(handle_attendance_report(state, req)),
        "attendance.delete" => Some(handle_attendance_delete(state, req)),
        _ => None,
    }
}
