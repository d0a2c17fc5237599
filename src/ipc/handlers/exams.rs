use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::db::is_unique_violation;
use crate::exams::{result_stats, ExamRules};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::students::require_student;
use crate::ipc::helpers::{
    get_optional_f64, get_optional_parsed, get_required_date, get_required_parsed,
    get_required_str, now_stamp, stored, with_db,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{format_date, AgeGroup, Bilingual, ExamType, ModelError, StudentId};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExamRow {
    id: String,
    title: Bilingual,
    date: String,
    age_group: AgeGroup,
    #[serde(rename = "type")]
    exam_type: ExamType,
    max_score: f64,
    pass_mark: f64,
}

impl ExamRow {
    fn rules(&self) -> ExamRules {
        ExamRules {
            exam_type: self.exam_type,
            max_score: self.max_score,
            pass_mark: self.pass_mark,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultRow {
    id: String,
    exam_id: String,
    student_id: String,
    student_name: Bilingual,
    written_score: Option<f64>,
    oral_score: Option<f64>,
    total_score: f64,
    passed: bool,
    remarks: Bilingual,
    updated_at: Option<String>,
}

const EXAM_COLUMNS: &str = "id, title_en, title_si, date, age_group, exam_type, max_score, pass_mark";

fn exam_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ExamRow> {
    Ok(ExamRow {
        id: r.get(0)?,
        title: Bilingual {
            en: r.get(1)?,
            si: r.get(2)?,
        },
        date: r.get(3)?,
        age_group: stored(4, r.get(4)?)?,
        exam_type: stored(5, r.get(5)?)?,
        max_score: r.get(6)?,
        pass_mark: r.get(7)?,
    })
}

fn require_exam(conn: &Connection, exam_id: &str) -> Result<ExamRow, HandlerErr> {
    conn.query_row(
        &format!("SELECT {EXAM_COLUMNS} FROM exams WHERE id = ?"),
        [exam_id],
        exam_from_row,
    )
    .optional()
    .map_err(HandlerErr::db_query)?
    .ok_or_else(|| HandlerErr::not_found("exam").with_details(json!({ "examId": exam_id })))
}

fn load_results(conn: &Connection, exam: &ExamRow) -> Result<Vec<ResultRow>, HandlerErr> {
    let rules = exam.rules();
    let mut stmt = conn
        .prepare(
            "SELECT r.id, r.exam_id, r.student_id, s.name_en, s.name_si,
                    r.written_score, r.oral_score, r.total_score,
                    r.remarks_en, r.remarks_si, r.updated_at
             FROM exam_results r
             JOIN students s ON s.student_id = r.student_id
             WHERE r.exam_id = ?
             ORDER BY r.total_score DESC, r.student_id",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map([&exam.id], |r| {
            let total_score: f64 = r.get(7)?;
            Ok(ResultRow {
                id: r.get(0)?,
                exam_id: r.get(1)?,
                student_id: r.get(2)?,
                student_name: Bilingual {
                    en: r.get(3)?,
                    si: r.get(4)?,
                },
                written_score: r.get(5)?,
                oral_score: r.get(6)?,
                total_score,
                passed: rules.passed(total_score),
                remarks: Bilingual {
                    en: r.get(8)?,
                    si: r.get(9)?,
                },
                updated_at: r.get(10)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(rows)
}

fn parse_remarks(params: &serde_json::Value) -> Result<Option<Bilingual>, HandlerErr> {
    match params.get("remarks") {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(Some(Bilingual::empty())),
        Some(v) => Ok(Some(Bilingual::from_json("remarks", Some(v))?)),
    }
}

fn exams_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let title = Bilingual::from_json("title", params.get("title"))?;
    let date = get_required_date(params, "date")?;
    let age_group: AgeGroup = get_required_parsed(params, "ageGroup")?;
    let exam_type: ExamType = get_required_parsed(params, "type")?;
    let max_score = get_optional_f64(params, "maxScore")?
        .ok_or(ModelError::Missing { field: "maxScore" })?;
    let pass_mark = get_optional_f64(params, "passMark")?
        .ok_or(ModelError::Missing { field: "passMark" })?;
    let rules = ExamRules::new(exam_type, max_score, pass_mark)?;

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO exams(id, title_en, title_si, date, age_group, exam_type, max_score, pass_mark)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            title.en,
            title.si,
            format_date(date),
            age_group.as_str(),
            rules.exam_type.as_str(),
            rules.max_score,
            rules.pass_mark,
        ],
    )
    .map_err(|e| HandlerErr::db_update(e, "exams"))?;
    tracing::info!(exam_id = %id, age_group = age_group.as_str(), "exam created");
    Ok(json!({ "examId": id }))
}

fn exams_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let age_group: Option<AgeGroup> = get_optional_parsed(params, "ageGroup")?;
    let (sql, args): (String, Vec<String>) = match age_group {
        Some(g) => (
            format!("SELECT {EXAM_COLUMNS} FROM exams WHERE age_group = ? ORDER BY date DESC, title_en"),
            vec![g.as_str().to_string()],
        ),
        None => (
            format!("SELECT {EXAM_COLUMNS} FROM exams ORDER BY date DESC, title_en"),
            Vec::new(),
        ),
    };
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let exams = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), exam_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "exams": exams }))
}

fn exams_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let exam = require_exam(conn, &exam_id)?;
    let totals: Vec<f64> = load_results(conn, &exam)?
        .iter()
        .map(|r| r.total_score)
        .collect();
    let stats = result_stats(&exam.rules(), &totals);
    Ok(json!({ "exam": exam, "stats": stats }))
}

fn exams_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    require_exam(conn, &exam_id)?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let results_deleted = tx
        .execute("DELETE FROM exam_results WHERE exam_id = ?", [&exam_id])
        .map_err(|e| HandlerErr::db_update(e, "exam_results"))?;
    tx.execute("DELETE FROM exams WHERE id = ?", [&exam_id])
        .map_err(|e| HandlerErr::db_update(e, "exams"))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "deleted": 1, "resultsDeleted": results_deleted }))
}

fn results_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let student_id: StudentId = get_required_parsed(params, "studentId")?;
    let exam = require_exam(conn, &exam_id)?;
    require_student(conn, student_id.as_str())?;

    let written = get_optional_f64(params, "writtenScore")?;
    let oral = get_optional_f64(params, "oralScore")?;
    let rules = exam.rules();
    let total = rules.total_score(written, oral)?;
    let remarks = parse_remarks(params)?.unwrap_or_else(Bilingual::empty);

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO exam_results(id, exam_id, student_id, written_score, oral_score,
           total_score, remarks_en, remarks_si, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            exam.id,
            student_id.as_str(),
            written,
            oral,
            total,
            remarks.en,
            remarks.si,
            now_stamp(),
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            HandlerErr::conflict("a result for this student already exists; use exams.results.update")
                .with_details(json!({ "examId": exam.id, "studentId": student_id }))
        } else {
            HandlerErr::db_update(e, "exam_results")
        }
    })?;

    Ok(json!({
        "resultId": id,
        "totalScore": total,
        "passed": rules.passed(total),
    }))
}

/// Rescores an existing result. Components left out keep their stored value.
fn results_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let student_id: StudentId = get_required_parsed(params, "studentId")?;
    let exam = require_exam(conn, &exam_id)?;

    let current: Option<(Option<f64>, Option<f64>, String, String)> = conn
        .query_row(
            "SELECT written_score, oral_score, remarks_en, remarks_si
             FROM exam_results WHERE exam_id = ? AND student_id = ?",
            (&exam.id, student_id.as_str()),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some((old_written, old_oral, old_en, old_si)) = current else {
        return Err(HandlerErr::not_found("exam result")
            .with_details(json!({ "examId": exam.id, "studentId": student_id })));
    };

    let written = get_optional_f64(params, "writtenScore")?.or(old_written);
    let oral = get_optional_f64(params, "oralScore")?.or(old_oral);
    let rules = exam.rules();
    let total = rules.total_score(written, oral)?;
    let remarks = parse_remarks(params)?.unwrap_or(Bilingual {
        en: old_en,
        si: old_si,
    });

    conn.execute(
        "UPDATE exam_results
         SET written_score = ?, oral_score = ?, total_score = ?,
             remarks_en = ?, remarks_si = ?, updated_at = ?
         WHERE exam_id = ? AND student_id = ?",
        rusqlite::params![
            written,
            oral,
            total,
            remarks.en,
            remarks.si,
            now_stamp(),
            exam.id,
            student_id.as_str(),
        ],
    )
    .map_err(|e| HandlerErr::db_update(e, "exam_results"))?;

    Ok(json!({
        "totalScore": total,
        "passed": rules.passed(total),
    }))
}

fn results_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let exam = require_exam(conn, &exam_id)?;
    let results = load_results(conn, &exam)?;
    let totals: Vec<f64> = results.iter().map(|r| r.total_score).collect();
    let stats = result_stats(&exam.rules(), &totals);
    Ok(json!({
        "exam": exam,
        "results": results,
        "stats": stats,
    }))
}

fn handle_exams_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, exams_create)
}

fn handle_exams_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, exams_list)
}

fn handle_exams_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, exams_get)
}

fn handle_exams_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, exams_delete)
}

fn handle_results_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, results_create)
}

fn handle_results_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, results_update)
}

fn handle_results_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, results_list)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exams.create" => Some(handle_exams_create(state, req)),
        "exams.list" => Some(handle_exams_list(state, req)),
        "exams.get" => Some(handle_exams_get(state, req)),
        "exams.delete" => Some(handle_exams_delete(state, req)),
        "exams.results.create" => Some(handle_results_create(state, req)),
        "exams.results.update" => Some(handle_results_update(state, req)),
        "exams.results.list" => Some(handle_results_list(state, req)),
        _ => None,
    }
}
