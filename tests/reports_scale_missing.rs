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

fn request(
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
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Reports refuse to run without a configured grade scale: the error is a
/// user-actionable configuration problem, never a crash or a blank model.
#[test]
fn reports_require_a_configured_grade_scale() {
    let workspace = temp_dir("gradebook-no-scale");
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
    let term_id = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "term.create",
        json!({ "schoolId": school_id, "academicYear": "2025", "name": "Term 1" }),
    )["termId"]
        .as_str()
        .expect("termId")
        .to_string();
    let subject_id = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "subject.create",
        json!({ "schoolId": school_id, "name": "Mathematics" }),
    )["subjectId"]
        .as_str()
        .expect("subjectId")
        .to_string();
    let classroom_id = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "classroom.create",
        json!({ "schoolId": school_id, "academicYear": "2025", "name": "Grade 8" }),
    )["classroomId"]
        .as_str()
        .expect("classroomId")
        .to_string();
    let student_id = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "student.create",
        json!({ "schoolId": school_id, "firstName": "Chipo", "lastName": "Mwale" }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();

    let scoped = json!({
        "schoolId": school_id, "termId": term_id,
        "subjectId": subject_id, "classroomId": classroom_id
    });
    for (id, method, params) in [
        ("7", "reports.classResultModel", scoped.clone()),
        ("8", "reports.subjectAnalysisModel", scoped),
        (
            "9",
            "reports.studentTermReportModel",
            json!({ "schoolId": school_id, "termId": term_id, "studentId": student_id }),
        ),
    ] {
        let value = request(&mut stdin, &mut reader, id, method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        assert_eq!(
            value["error"]["code"].as_str(),
            Some("scale_not_configured"),
            "{}",
            value
        );
        let message = value["error"]["message"].as_str().unwrap_or("");
        assert!(
            message.contains("administrator"),
            "message should tell the user who can fix it: {}",
            message
        );
    }

    let _ = child.kill();
}
