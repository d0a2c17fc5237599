use chrono::NaiveDate;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
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

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_sathipasalad");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn sathipasalad");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
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

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("success").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("data").cloned().unwrap_or_else(|| json!({}))
}

fn dates(v: &serde_json::Value) -> Vec<NaiveDate> {
    v.as_array()
        .expect("date array")
        .iter()
        .map(|d| NaiveDate::parse_from_str(d.as_str().expect("date string"), "%Y-%m-%d").expect("date"))
        .collect()
}

#[test]
fn static_holidays_and_poya_approximation() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let year = request_ok(&mut stdin, &mut reader, "1", "holidays.get", json!({ "year": 2024 }));
    assert_eq!(year["source"], json!("static"));
    assert_eq!(year["poyaApproximation"], json!(true));

    let holidays = dates(&year["holidays"]);
    assert!(holidays.contains(&NaiveDate::from_ymd_opt(2024, 1, 1).expect("date")));
    assert!(holidays.contains(&NaiveDate::from_ymd_opt(2024, 12, 25).expect("date")));

    let poya = dates(&year["poyaDays"]);
    assert!(!poya.is_empty() && poya.len() <= 13);
    assert_eq!(poya[0], NaiveDate::from_ymd_opt(2024, 1, 25).expect("date"));
    assert!(poya.windows(2).all(|w| w[0] < w[1]));
    assert!(poya.iter().all(|d| d.format("%Y").to_string() == "2024"));

    let bad = request(&mut stdin, &mut reader, "2", "holidays.get", json!({ "year": 12 }));
    assert_eq!(bad["error"]["code"], json!("bad_params"));
    assert_eq!(bad["error"]["details"]["field"], json!("year"));

    let sunday = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "calendar.classify",
        json!({ "date": "2024-06-02" }),
    );
    assert_eq!(sunday["kind"], json!("ordinary"));
    assert_eq!(sunday["weekday"], json!("Sun"));
    assert_eq!(sunday["isClassDay"], json!(true));

    let christmas = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "calendar.classify",
        json!({ "date": "2024-12-25" }),
    );
    assert_eq!(christmas["kind"], json!("holiday"));
    assert_eq!(christmas["isClassDay"], json!(false));
}

#[test]
fn holiday_file_is_used_and_falls_back_when_missing() {
    let workspace = temp_dir("sathipasala-holiday-file");
    std::fs::write(
        workspace.join("holidays.json"),
        r#"{ "2025": ["2025-02-04", "2025-04-14", "2025-05-12"] }"#,
    )
    .expect("write holiday file");
    std::fs::write(
        workspace.join("sathipasala.toml"),
        "[calendar]\nholiday_source = \"holidays.json\"\n",
    )
    .expect("write config");

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert!(selected["configWarning"].is_null());

    let listed = request_ok(&mut stdin, &mut reader, "2", "holidays.get", json!({ "year": 2025 }));
    assert_eq!(listed["source"], json!("file"));
    assert_eq!(dates(&listed["holidays"]).len(), 3);

    // 2026 is not in the file.
    let fallback = request_ok(&mut stdin, &mut reader, "3", "holidays.get", json!({ "year": 2026 }));
    assert_eq!(fallback["source"], json!("static"));
    assert!(dates(&fallback["holidays"]).contains(&NaiveDate::from_ymd_opt(2026, 12, 25).expect("date")));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn invalid_config_still_opens_workspace() {
    let workspace = temp_dir("sathipasala-bad-config");
    std::fs::write(workspace.join("sathipasala.toml"), "[calendar]\npoya_anchor_month = 2\npoya_anchor_day = 30\n")
        .expect("write config");

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert!(selected["configWarning"].is_string());

    let year = request_ok(&mut stdin, &mut reader, "2", "holidays.get", json!({ "year": 2024 }));
    assert_eq!(dates(&year["poyaDays"])[0], NaiveDate::from_ymd_opt(2024, 1, 25).expect("date"));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn generate_records_events_once() {
    let workspace = temp_dir("sathipasala-events-generate");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let first = request_ok(&mut stdin, &mut reader, "2", "calendar.events.generate", json!({ "year": 2024 }));
    let inserted = first["inserted"].as_u64().expect("inserted");
    assert!(inserted >= 7);
    assert_eq!(first["skipped"], json!(0));

    let again = request_ok(&mut stdin, &mut reader, "3", "calendar.events.generate", json!({ "year": 2024 }));
    assert_eq!(again["inserted"], json!(0));
    assert_eq!(again["skipped"], json!(inserted));

    let poya = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.events",
        json!({ "from": "2024-01-01", "to": "2024-01-31", "type": "poya" }),
    );
    let events = poya["events"].as_array().expect("events");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["date"], json!("2024-01-25"));

    let event_id = events[0]["id"].as_str().expect("id").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "calendar.events.delete",
        json!({ "eventId": event_id }),
    );
    let gone = request(
        &mut stdin,
        &mut reader,
        "6",
        "calendar.events.delete",
        json!({ "eventId": event_id }),
    );
    assert_eq!(gone["error"]["code"], json!("not_found"));

    let _ = std::fs::remove_dir_all(workspace);
}
