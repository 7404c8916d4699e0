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
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn export_then_import_restores_the_exported_state() {
    let workspace = temp_dir("gradebook-backup");
    let bundle_path = temp_dir("gradebook-backup-out").join("gradebook-backup.zip");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let school_id = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "school.create",
        json!({ "name": "Hillside Academy" }),
    )["schoolId"]
        .as_str()
        .expect("schoolId")
        .to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "student.create",
        json!({ "schoolId": school_id, "firstName": "Chipo", "lastName": "Mwale" }),
    );

    let export = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "backup.export",
        json!({ "outPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(export["bundleFormat"].as_str(), Some("gradebook-workspace-v1"));
    assert_eq!(export["entryCount"].as_u64(), Some(3));
    assert_eq!(export["dbSha256"].as_str().map(|s| s.len()), Some(64));
    assert!(bundle_path.is_file());

    // Mutate after the export, then restore.
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "student.create",
        json!({ "schoolId": school_id, "firstName": "Tariro", "lastName": "Zulu" }),
    );
    let before = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "student.list",
        json!({ "schoolId": school_id }),
    );
    assert_eq!(before["students"].as_array().map(|a| a.len()), Some(2));

    let import = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "backup.import",
        json!({ "inPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(
        import["bundleFormatDetected"].as_str(),
        Some("gradebook-workspace-v1")
    );

    let after = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "student.list",
        json!({ "schoolId": school_id }),
    );
    let students = after["students"].as_array().expect("students");
    assert_eq!(students.len(), 1);
    assert_eq!(students[0]["displayName"].as_str(), Some("Mwale, Chipo"));

    let _ = child.kill();
}
