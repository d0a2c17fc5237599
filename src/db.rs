use rusqlite::{Connection, ErrorCode};
use std::path::Path;

pub const DB_FILE: &str = "sathipasala.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            student_id TEXT PRIMARY KEY,
            name_en TEXT NOT NULL,
            name_si TEXT NOT NULL,
            date_of_birth TEXT NOT NULL,
            age_group TEXT NOT NULL,
            class_code TEXT NOT NULL,
            class_year INTEGER NOT NULL,
            parent_name TEXT NOT NULL,
            parent_phone TEXT NOT NULL,
            parent_email TEXT,
            profile_image TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_code, name_en)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            reason TEXT,
            flower_brought INTEGER NOT NULL DEFAULT 0,
            flower_type TEXT,
            flower_notes TEXT,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(student_id),
            UNIQUE(student_id, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance_records(date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS calendar_events(
            id TEXT PRIMARY KEY,
            date TEXT NOT NULL,
            event_type TEXT NOT NULL,
            title_en TEXT NOT NULL,
            title_si TEXT NOT NULL,
            UNIQUE(date, event_type)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_calendar_events_date ON calendar_events(date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            title_en TEXT NOT NULL,
            title_si TEXT NOT NULL,
            date TEXT NOT NULL,
            age_group TEXT NOT NULL,
            exam_type TEXT NOT NULL,
            max_score REAL NOT NULL,
            pass_mark REAL NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_results(
            id TEXT PRIMARY KEY,
            exam_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            written_score REAL,
            oral_score REAL,
            total_score REAL NOT NULL,
            remarks_en TEXT NOT NULL DEFAULT '',
            remarks_si TEXT NOT NULL DEFAULT '',
            updated_at TEXT,
            FOREIGN KEY(exam_id) REFERENCES exams(id),
            FOREIGN KEY(student_id) REFERENCES students(student_id),
            UNIQUE(exam_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_results_student ON exam_results(student_id)",
        [],
    )?;

    Ok(conn)
}

/// UNIQUE or PRIMARY KEY violation, as opposed to a foreign-key failure.
pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(f, _) => {
            f.code == ErrorCode::ConstraintViolation
                && (f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> std::path::PathBuf {
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

    fn insert_exam_and_student(conn: &Connection) {
        conn.execute(
            "INSERT INTO students(student_id, name_en, name_si, date_of_birth, age_group,
               class_code, class_year, parent_name, parent_phone)
             VALUES('BSP_24_0001', 'Nimal', 'Nimal', '2016-05-01', '7-10', 'MET', 2024, 'Sunil', '0771234567')",
            [],
        )
        .expect("insert student");
        conn.execute(
            "INSERT INTO exams(id, title_en, title_si, date, age_group, exam_type, max_score, pass_mark)
             VALUES('e1', 'Term 1', 'Term 1', '2024-04-07', '7-10', 'written', 100, 40)",
            [],
        )
        .expect("insert exam");
    }

    #[test]
    fn second_result_for_same_pair_is_a_unique_violation() {
        let ws = temp_dir("sathipasala-db-unique");
        let conn = open_db(&ws).expect("open db");
        insert_exam_and_student(&conn);

        let insert = "INSERT INTO exam_results(id, exam_id, student_id, written_score, total_score)
                      VALUES(?, 'e1', 'BSP_24_0001', 50, 50)";
        conn.execute(insert, ["r1"]).expect("first result");
        let e = conn.execute(insert, ["r2"]).expect_err("duplicate result");
        assert!(is_unique_violation(&e));
    }

    #[test]
    fn foreign_key_failure_is_not_a_unique_violation() {
        let ws = temp_dir("sathipasala-db-fk");
        let conn = open_db(&ws).expect("open db");
        let e = conn
            .execute(
                "INSERT INTO attendance_records(id, student_id, date, status)
                 VALUES('a1', 'BSP_99_9999', '2024-01-07', 'present')",
                [],
            )
            .expect_err("unknown student");
        assert!(!is_unique_violation(&e));
    }

    #[test]
    fn reopening_is_idempotent() {
        let ws = temp_dir("sathipasala-db-reopen");
        drop(open_db(&ws).expect("first open"));
        let conn = open_db(&ws).expect("second open");
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                [],
                |r| r.get(0),
            )
            .expect("count tables");
        assert_eq!(tables, 5);
    }
}
