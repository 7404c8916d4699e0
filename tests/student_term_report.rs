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
fn report_card_spans_subjects_and_averages_graded_only() {
    let workspace = temp_dir("gradebook-report-card");
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
    let classroom_id = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "classroom.create",
        json!({ "schoolId": school_id, "academicYear": "2025", "name": "Grade 8" }),
    )["classroomId"]
        .as_str()
        .expect("classroomId")
        .to_string();
    let teacher_id = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "teacher.create",
        json!({ "schoolId": school_id, "name": "Banda, Mary" }),
    )["teacherId"]
        .as_str()
        .expect("teacherId")
        .to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "gradeScale.save",
        json!({
            "schoolId": school_id,
            "name": "Letters",
            "steps": [
                { "gradeLabel": "A", "comment": "Excellent", "minPercent": 80, "maxPercent": 100 },
                { "gradeLabel": "B", "comment": "Good", "minPercent": 50, "maxPercent": 79.9 },
                { "gradeLabel": "F", "comment": "Fail", "minPercent": 0, "maxPercent": 49.9 }
            ]
        }),
    );

    let student_id = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "student.create",
        json!({ "schoolId": school_id, "firstName": "Chipo", "lastName": "Mwale" }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "enrollment.set",
        json!({
            "schoolId": school_id,
            "classroomId": classroom_id,
            "studentIds": [student_id]
        }),
    );

    // Three subjects with one full-weight plan each; History stays ungraded.
    let mut plan_by_subject = Vec::new();
    for (i, name) in ["Mathematics", "Science", "History"].iter().enumerate() {
        let subject_id = request_ok(
            &mut stdin,
            &mut reader,
            &format!("su{}", i),
            "subject.create",
            json!({ "schoolId": school_id, "name": name }),
        )["subjectId"]
            .as_str()
            .expect("subjectId")
            .to_string();
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("ta{}", i),
            "teacher.assign",
            json!({
                "schoolId": school_id,
                "teacherId": teacher_id,
                "classroomId": classroom_id,
                "subjectId": subject_id
            }),
        );
        let plan_id = request_ok(
            &mut stdin,
            &mut reader,
            &format!("pl{}", i),
            "assessmentPlan.create",
            json!({
                "schoolId": school_id, "termId": term_id, "subjectId": subject_id,
                "title": "Term Exam", "maxScore": 100, "weight": 100
            }),
        )["planId"]
            .as_str()
            .expect("planId")
            .to_string();
        plan_by_subject.push((subject_id, plan_id));
    }

    for (i, (subject_id, plan_id, score)) in [
        (&plan_by_subject[0].0, &plan_by_subject[0].1, 82.0),
        (&plan_by_subject[1].0, &plan_by_subject[1].1, 47.0),
    ]
    .iter()
    .enumerate()
    {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("g{}", i),
            "grades.upsert",
            json!({
                "schoolId": school_id, "termId": term_id, "subjectId": subject_id,
                "classroomId": classroom_id, "teacherId": teacher_id,
                "edits": [
                    { "studentId": student_id, "assessmentPlanId": plan_id, "score": score }
                ]
            }),
        );
    }

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "reports.studentTermReportModel",
        json!({ "schoolId": school_id, "termId": term_id, "studentId": student_id }),
    );

    assert_eq!(report["student"]["displayName"].as_str(), Some("Mwale, Chipo"));
    let subjects = report["subjects"].as_array().expect("subjects");
    assert_eq!(subjects.len(), 3);

    let by_name = |name: &str| {
        subjects
            .iter()
            .find(|s| s["subjectName"].as_str() == Some(name))
            .unwrap_or_else(|| panic!("missing subject row {}", name))
    };
    let math = by_name("Mathematics");
    assert_eq!(math["percentage"].as_f64(), Some(82.0));
    assert_eq!(math["grade"].as_str(), Some("A"));
    assert_eq!(math["comment"].as_str(), Some("Excellent"));
    let science = by_name("Science");
    assert_eq!(science["percentage"].as_f64(), Some(47.0));
    assert_eq!(science["grade"].as_str(), Some("F"));
    let history = by_name("History");
    assert_eq!(history["hasData"].as_bool(), Some(false));
    assert!(history["grade"].is_null());

    // Overall average spans graded subjects only: (82 + 47) / 2.
    assert_eq!(report["gradedSubjects"].as_u64(), Some(2));
    assert_eq!(report["overallAverage"].as_f64(), Some(64.5));

    let _ = child.kill();
}
