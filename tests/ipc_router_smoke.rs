use chrono::Datelike;
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

fn read_response(reader: &mut BufReader<ChildStdout>, what: &str) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", what);
    serde_json::from_str(line.trim()).expect("parse response json")
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

    let value = read_response(reader, method);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("success").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

fn error_code(v: &serde_json::Value) -> Option<&str> {
    v.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("sathipasala-router-smoke");
    let bundle_out = workspace.join("smoke-backup.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["success"], json!(true));
    assert!(health["data"]["workspacePath"].is_null());

    let before = request(&mut stdin, &mut reader, "2", "students.list", json!({}));
    assert_eq!(error_code(&before), Some("no_workspace"));

    // Calendar queries do not need a workspace.
    let holidays = request(&mut stdin, &mut reader, "3", "holidays.get", json!({ "year": 2024 }));
    assert_eq!(holidays["success"], json!(true));

    let selected = request(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected["success"], json!(true));
    assert!(selected["data"]["configWarning"].is_null());

    let _ = request(&mut stdin, &mut reader, "5", "students.list", json!({}));
    let _ = request(&mut stdin, &mut reader, "6", "attendance.list", json!({ "date": "2024-06-02" }));
    let _ = request(&mut stdin, &mut reader, "7", "attendance.events", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "8",
        "attendance.report",
        json!({ "from": "2024-01-01", "to": "2024-12-31" }),
    );
    let _ = request(&mut stdin, &mut reader, "9", "calendar.classify", json!({ "date": "2024-06-02" }));
    let _ = request(&mut stdin, &mut reader, "10", "exams.list", json!({}));
    let exported = request(
        &mut stdin,
        &mut reader,
        "11",
        "workspace.exportBundle",
        json!({ "outPath": bundle_out.to_string_lossy() }),
    );
    assert_eq!(exported["success"], json!(true));
    assert_eq!(exported["data"]["bundleFormat"], json!("sathipasala-workspace-v1"));

    let unknown = request_raw(&mut stdin, &mut reader, "12", "grades.compute");
    assert_eq!(error_code(&unknown), Some("not_implemented"));

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush garbage");
    let bad = read_response(&mut reader, "garbage line");
    assert_eq!(bad["success"], json!(false));
    assert_eq!(error_code(&bad), Some("bad_json"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

fn request_raw(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
) -> serde_json::Value {
    writeln!(stdin, "{}", json!({ "id": id, "method": method })).expect("write request");
    stdin.flush().expect("flush request");
    read_response(reader, method)
}

#[test]
fn bundle_import_restores_students_into_new_workspace() {
    let src = temp_dir("sathipasala-bundle-src");
    let dst = temp_dir("sathipasala-bundle-dst");
    let bundle = src.join("bundle.zip");
    let dob = format!("{}-01-01", chrono::Local::now().date_naive().year() - 8);

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": src.to_string_lossy() }),
    );
    let created = request(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({
            "studentId": "BSP_24_0001",
            "name": { "en": "Nimal Perera", "si": "නිමල් පෙරේරා" },
            "dateOfBirth": dob,
            "parent": { "name": "Sunil Perera", "phone": "0771234567" }
        }),
    );
    assert_eq!(created["success"], json!(true), "{created}");
    let _ = request(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.exportBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    let imported = request(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.importBundle",
        json!({ "inPath": bundle.to_string_lossy(), "workspacePath": dst.to_string_lossy() }),
    );
    assert_eq!(imported["success"], json!(true), "{imported}");

    let got = request(
        &mut stdin,
        &mut reader,
        "5",
        "students.get",
        json!({ "studentId": "BSP_24_0001" }),
    );
    assert_eq!(got["data"]["student"]["name"]["si"], json!("නිමල් පෙරේරා"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(src);
    let _ = std::fs::remove_dir_all(dst);
}

#[test]
fn failed_bundle_import_keeps_workspace_usable() {
    let workspace = temp_dir("sathipasala-bad-import");
    let not_a_zip = workspace.join("bad.zip");
    std::fs::write(&not_a_zip, b"definitely not a zip archive").expect("write bad bundle");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let before = request(&mut stdin, &mut reader, "2", "students.list", json!({}));
    assert_eq!(before["success"], json!(true));

    let imported = request(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.importBundle",
        json!({ "inPath": not_a_zip.to_string_lossy() }),
    );
    assert_eq!(imported["success"], json!(false));
    assert_eq!(error_code(&imported), Some("io_failed"));

    let after = request(&mut stdin, &mut reader, "4", "students.list", json!({}));
    assert_eq!(after["success"], json!(true), "{after}");
    let health = request(&mut stdin, &mut reader, "5", "health", json!({}));
    assert!(health["data"]["workspacePath"].is_string());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
