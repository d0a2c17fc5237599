use chrono::{Datelike, NaiveDate};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;

use crate::db::is_unique_violation;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_bool, get_optional_parsed, get_optional_str, get_required_parsed, now_stamp, stored,
    today, with_db,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{
    age_on, format_date, parse_date, placement_for, AgeGroup, Bilingual, ClassCode, ModelError,
    StudentId,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Parent {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StudentRow {
    pub student_id: String,
    pub name: Bilingual,
    pub date_of_birth: String,
    pub age: Option<u32>,
    pub age_group: AgeGroup,
    pub class_code: ClassCode,
    pub class_year: i64,
    pub parent: Parent,
    pub profile_image: Option<String>,
    pub active: bool,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

const STUDENT_COLUMNS: &str = "student_id, name_en, name_si, date_of_birth, age_group, class_code,
    class_year, parent_name, parent_phone, parent_email, profile_image, active,
    created_at, updated_at";

fn student_from_row(r: &rusqlite::Row<'_>, today: NaiveDate) -> rusqlite::Result<StudentRow> {
    let dob: String = r.get(3)?;
    let age = NaiveDate::parse_from_str(&dob, crate::model::DATE_FORMAT)
        .ok()
        .and_then(|d| age_on(d, today).ok());
    Ok(StudentRow {
        student_id: r.get(0)?,
        name: Bilingual {
            en: r.get(1)?,
            si: r.get(2)?,
        },
        date_of_birth: dob,
        age,
        age_group: stored(4, r.get(4)?)?,
        class_code: stored(5, r.get(5)?)?,
        class_year: r.get(6)?,
        parent: Parent {
            name: r.get(7)?,
            phone: r.get(8)?,
            email: r.get(9)?,
        },
        profile_image: r.get(10)?,
        active: r.get::<_, i64>(11)? != 0,
        created_at: r.get(12)?,
        updated_at: r.get(13)?,
    })
}

pub(crate) fn find_student(
    conn: &Connection,
    student_id: &str,
) -> Result<Option<StudentRow>, HandlerErr> {
    let today = today();
    conn.query_row(
        &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE student_id = ?"),
        [student_id],
        |r| student_from_row(r, today),
    )
    .optional()
    .map_err(HandlerErr::db_query)
}

pub(crate) fn require_student(conn: &Connection, student_id: &str) -> Result<StudentRow, HandlerErr> {
    find_student(conn, student_id)?.ok_or_else(|| {
        HandlerErr::not_found("student").with_details(json!({ "studentId": student_id }))
    })
}

/// Active students, optionally one class, ordered for roll call.
pub(crate) fn load_roster(
    conn: &Connection,
    class_code: Option<ClassCode>,
) -> Result<Vec<StudentRow>, HandlerErr> {
    let filters = StudentFilters {
        class_code,
        ..StudentFilters::default()
    };
    query_students(conn, &filters)
}

#[derive(Debug, Default)]
struct StudentFilters {
    class_code: Option<ClassCode>,
    age_group: Option<AgeGroup>,
    search: Option<String>,
    include_inactive: bool,
}

/// Escapes `%`, `_` and the escape character itself for `LIKE ... ESCAPE '\'`.
fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn query_students(conn: &Connection, f: &StudentFilters) -> Result<Vec<StudentRow>, HandlerErr> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut args: Vec<String> = Vec::new();
    if !f.include_inactive {
        clauses.push("active = 1");
    }
    if let Some(code) = f.class_code {
        clauses.push("class_code = ?");
        args.push(code.as_str().to_string());
    }
    if let Some(group) = f.age_group {
        clauses.push("age_group = ?");
        args.push(group.as_str().to_string());
    }
    if let Some(q) = f.search.as_deref() {
        clauses.push(
            "(student_id LIKE ? ESCAPE '\\' OR name_en LIKE ? ESCAPE '\\' OR name_si LIKE ? ESCAPE '\\')",
        );
        let pattern = format!("%{}%", escape_like(q));
        args.extend(std::iter::repeat(pattern).take(3));
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "SELECT {STUDENT_COLUMNS} FROM students {where_sql} ORDER BY class_code, name_en, student_id"
    );

    let today = today();
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    stmt.query_map(params_from_iter(args.iter()), |r| student_from_row(r, today))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)
}

/// Next free `BSP_YY_NNNN` for the enrolment year.
fn allocate_student_id(conn: &Connection, class_year: i32) -> Result<StudentId, HandlerErr> {
    let prefix = format!("BSP_{:02}_", class_year.rem_euclid(100));
    let max_seq: Option<String> = conn
        .query_row(
            "SELECT MAX(student_id) FROM students WHERE student_id LIKE ? || '%' ESCAPE '\\'",
            [escape_like(&prefix)],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;
    let next = match max_seq {
        Some(id) => id.parse::<StudentId>()?.sequence() + 1,
        None => 1,
    };
    Ok(StudentId::new(class_year, next)?)
}

fn parse_parent(params: &serde_json::Value) -> Result<Parent, HandlerErr> {
    let Some(p) = params.get("parent").filter(|v| v.is_object()) else {
        return Err(ModelError::Missing { field: "parent" }.into());
    };
    let name = get_optional_str(p, "name").ok_or(ModelError::Missing {
        field: "parent.name",
    })?;
    let phone = get_optional_str(p, "phone").ok_or(ModelError::Missing {
        field: "parent.phone",
    })?;
    let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
    let allowed = phone
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-'));
    if !allowed || !(9..=15).contains(&digits) {
        return Err(ModelError::invalid("parent.phone", "expected 9-15 digits").into());
    }
    let email = get_optional_str(p, "email");
    if let Some(e) = email.as_deref() {
        if !e.contains('@') {
            return Err(ModelError::invalid("parent.email", "not an email address").into());
        }
    }
    Ok(Parent { name, phone, email })
}

fn parse_class_year(params: &serde_json::Value, default: i32) -> Result<i32, HandlerErr> {
    match params.get("classYear") {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(v) => v
            .as_i64()
            .filter(|y| (2000..=2100).contains(y))
            .map(|y| y as i32)
            .ok_or_else(|| ModelError::invalid("classYear", "expected a year").into()),
    }
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let filters = StudentFilters {
        class_code: get_optional_parsed(params, "classCode")?,
        age_group: get_optional_parsed(params, "ageGroup")?,
        search: get_optional_str(params, "search"),
        include_inactive: get_bool(params, "includeInactive", false),
    };
    let students = query_students(conn, &filters)?;
    Ok(json!({ "students": students }))
}

fn students_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id: StudentId = get_required_parsed(params, "studentId")?;
    let student = require_student(conn, id.as_str())?;
    Ok(json!({ "student": student }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let today = today();
    let name = Bilingual::from_json("name", params.get("name"))?;
    let dob_raw = get_optional_str(params, "dateOfBirth").unwrap_or_default();
    let dob = parse_date("dateOfBirth", &dob_raw)?;
    let placement = placement_for(dob, today)?;
    let class_year = parse_class_year(params, today.year())?;
    let parent = parse_parent(params)?;
    let profile_image = get_optional_str(params, "profileImage");

    let student_id = match get_optional_parsed::<StudentId>(params, "studentId")? {
        Some(id) => id,
        None => allocate_student_id(conn, class_year)?,
    };

    let stamp = now_stamp();
    conn.execute(
        "INSERT INTO students(student_id, name_en, name_si, date_of_birth, age_group, class_code,
           class_year, parent_name, parent_phone, parent_email, profile_image, active,
           created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
        rusqlite::params![
            student_id.as_str(),
            name.en,
            name.si,
            format_date(dob),
            placement.age_group.as_str(),
            placement.class_code.as_str(),
            class_year,
            parent.name,
            parent.phone,
            parent.email,
            profile_image,
            stamp,
            stamp,
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            HandlerErr::conflict("studentId already exists")
                .with_details(json!({ "studentId": student_id.as_str() }))
        } else {
            HandlerErr::db_update(e, "students")
        }
    })?;

    tracing::info!(
        student_id = student_id.as_str(),
        age = placement.age,
        class_code = placement.class_code.as_str(),
        "student created"
    );
    let student = require_student(conn, student_id.as_str())?;
    Ok(json!({ "student": student }))
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id: StudentId = get_required_parsed(params, "studentId")?;
    let current = require_student(conn, id.as_str())?;

    let name = match params.get("name") {
        Some(v) if !v.is_null() => Bilingual::from_json("name", Some(v))?,
        _ => current.name.clone(),
    };
    let (dob, age_group, class_code) = match get_optional_str(params, "dateOfBirth") {
        Some(raw) => {
            let dob = parse_date("dateOfBirth", &raw)?;
            let placement = placement_for(dob, today())?;
            (format_date(dob), placement.age_group, placement.class_code)
        }
        None => (
            current.date_of_birth.clone(),
            current.age_group,
            current.class_code,
        ),
    };
    let class_year = parse_class_year(params, current.class_year as i32)?;
    let parent = if params.get("parent").is_some_and(|v| !v.is_null()) {
        parse_parent(params)?
    } else {
        current.parent.clone()
    };
    let profile_image = match params.get("profileImage") {
        None => current.profile_image.clone(),
        Some(_) => get_optional_str(params, "profileImage"),
    };
    let active = get_bool(params, "active", current.active);

    conn.execute(
        "UPDATE students SET name_en = ?, name_si = ?, date_of_birth = ?, age_group = ?,
           class_code = ?, class_year = ?, parent_name = ?, parent_phone = ?, parent_email = ?,
           profile_image = ?, active = ?, updated_at = ?
         WHERE student_id = ?",
        rusqlite::params![
            name.en,
            name.si,
            dob,
            age_group.as_str(),
            class_code.as_str(),
            class_year,
            parent.name,
            parent.phone,
            parent.email,
            profile_image,
            active as i64,
            now_stamp(),
            id.as_str(),
        ],
    )
    .map_err(|e| HandlerErr::db_update(e, "students"))?;

    let student = require_student(conn, id.as_str())?;
    Ok(json!({ "student": student }))
}

fn students_deactivate(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id: StudentId = get_required_parsed(params, "studentId")?;
    let changed = conn
        .execute(
            "UPDATE students SET active = 0, updated_at = ? WHERE student_id = ?",
            (now_stamp(), id.as_str()),
        )
        .map_err(|e| HandlerErr::db_update(e, "students"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("student").with_details(json!({ "studentId": id })));
    }
    Ok(json!({ "studentId": id, "active": false }))
}

/// Re-derives age group and class for every active student, e.g. at the start
/// of a school year. Students who have aged out keep their last placement.
fn students_regroup(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let today = today();
    let roster = load_roster(conn, None)?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let mut moved = Vec::new();
    let mut out_of_range = Vec::new();
    let stamp = now_stamp();
    for s in &roster {
        let placement = parse_date("dateOfBirth", &s.date_of_birth)
            .and_then(|dob| placement_for(dob, today));
        let Ok(p) = placement else {
            out_of_range.push(s.student_id.clone());
            continue;
        };
        if p.age_group == s.age_group && p.class_code == s.class_code {
            continue;
        }
        tx.execute(
            "UPDATE students SET age_group = ?, class_code = ?, updated_at = ? WHERE student_id = ?",
            (p.age_group.as_str(), p.class_code.as_str(), &stamp, &s.student_id),
        )
        .map_err(|e| HandlerErr::db_update(e, "students"))?;
        moved.push(json!({
            "studentId": s.student_id,
            "from": s.class_code,
            "to": p.class_code,
        }));
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    tracing::info!(moved = moved.len(), out_of_range = out_of_range.len(), "students regrouped");
    Ok(json!({
        "moved": moved,
        "outOfRange": out_of_range,
        "checked": roster.len(),
    }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, students_list)
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, students_get)
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, students_create)
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, students_update)
}

fn handle_students_deactivate(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, students_deactivate)
}

fn handle_students_regroup(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, students_regroup)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.deactivate" => Some(handle_students_deactivate(state, req)),
        "students.regroup" => Some(handle_students_regroup(state, req)),
        _ => None,
    }
}
