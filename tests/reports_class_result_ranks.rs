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

struct Seed {
    school_id: String,
    term_id: String,
    subject_id: String,
    classroom_id: String,
    teacher_id: String,
    plan_id: String,
    student_ids: Vec<String>,
}

/// One subject with a single full-weight plan so each student's percentage
/// equals their raw score, plus a letter scale.
fn seed_single_plan_class(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    student_names: &[(&str, &str)],
) -> Seed {
    let workspace = temp_dir("gradebook-ranks");
    request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let school_id = request_ok(
        stdin,
        reader,
        "s2",
        "school.create",
        json!({ "name": "Hillside Academy" }),
    )["schoolId"]
        .as_str()
        .expect("schoolId")
        .to_string();
    let term_id = request_ok(
        stdin,
        reader,
        "s3",
        "term.create",
        json!({ "schoolId": school_id, "academicYear": "2025", "name": "Term 1" }),
    )["termId"]
        .as_str()
        .expect("termId")
        .to_string();
    let subject_id = request_ok(
        stdin,
        reader,
        "s4",
        "subject.create",
        json!({ "schoolId": school_id, "name": "Mathematics" }),
    )["subjectId"]
        .as_str()
        .expect("subjectId")
        .to_string();
    let classroom_id = request_ok(
        stdin,
        reader,
        "s5",
        "classroom.create",
        json!({ "schoolId": school_id, "academicYear": "2025", "name": "Grade 8" }),
    )["classroomId"]
        .as_str()
        .expect("classroomId")
        .to_string();
    let teacher_id = request_ok(
        stdin,
        reader,
        "s6",
        "teacher.create",
        json!({ "schoolId": school_id, "name": "Banda, Mary" }),
    )["teacherId"]
        .as_str()
        .expect("teacherId")
        .to_string();
    request_ok(
        stdin,
        reader,
        "s7",
        "teacher.assign",
        json!({
            "schoolId": school_id,
            "teacherId": teacher_id,
            "classroomId": classroom_id,
            "subjectId": subject_id
        }),
    );
    request_ok(
        stdin,
        reader,
        "s8",
        "gradeScale.save",
        json!({
            "schoolId": school_id,
            "name": "Letters",
            "steps": [
                { "gradeLabel": "A", "minPercent": 80, "maxPercent": 100 },
                { "gradeLabel": "B", "minPercent": 50, "maxPercent": 79.9 },
                { "gradeLabel": "F", "minPercent": 0, "maxPercent": 49.9 }
            ]
        }),
    );
    let plan_id = request_ok(
        stdin,
        reader,
        "s9",
        "assessmentPlan.create",
        json!({
            "schoolId": school_id, "termId": term_id, "subjectId": subject_id,
            "title": "Term Exam", "maxScore": 100, "weight": 100
        }),
    )["planId"]
        .as_str()
        .expect("planId")
        .to_string();

    let mut student_ids = Vec::new();
    for (i, (first, last)) in student_names.iter().enumerate() {
        let id = request_ok(
            stdin,
            reader,
            &format!("st{}", i),
            "student.create",
            json!({ "schoolId": school_id, "firstName": first, "lastName": last }),
        )["studentId"]
            .as_str()
            .expect("studentId")
            .to_string();
        student_ids.push(id);
    }
    request_ok(
        stdin,
        reader,
        "s10",
        "enrollment.set",
        json!({
            "schoolId": school_id,
            "classroomId": classroom_id,
            "studentIds": student_ids
        }),
    );

    Seed {
        school_id,
        term_id,
        subject_id,
        classroom_id,
        teacher_id,
        plan_id,
        student_ids,
    }
}

fn class_result(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    seed: &Seed,
) -> serde_json::Value {
    request_ok(
        stdin,
        reader,
        id,
        "reports.classResultModel",
        json!({
            "schoolId": seed.school_id,
            "termId": seed.term_id,
            "subjectId": seed.subject_id,
            "classroomId": seed.classroom_id
        }),
    )
}

#[test]
fn ties_share_rank_and_next_rank_skips() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed_single_plan_class(
        &mut stdin,
        &mut reader,
        &[
            ("Chipo", "Mwale"),
            ("Tariro", "Zulu"),
            ("Kondwani", "Phiri"),
            ("Thandiwe", "Ngoma"),
        ],
    );

    let edits: Vec<serde_json::Value> = seed
        .student_ids
        .iter()
        .zip([90.0, 70.0, 70.0, 40.0])
        .map(|(sid, score)| {
            json!({ "studentId": sid, "assessmentPlanId": seed.plan_id, "score": score })
        })
        .collect();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.upsert",
        json!({
            "schoolId": seed.school_id, "termId": seed.term_id,
            "subjectId": seed.subject_id, "classroomId": seed.classroom_id,
            "teacherId": seed.teacher_id, "edits": edits
        }),
    );

    let result = class_result(&mut stdin, &mut reader, "2", &seed);
    let students = result["students"].as_array().expect("students");
    assert_eq!(students.len(), 4);

    let ranks: Vec<u64> = students.iter().map(|s| s["rank"].as_u64().unwrap()).collect();
    assert_eq!(ranks, vec![1, 2, 2, 4]);
    let grades: Vec<&str> = students
        .iter()
        .map(|s| s["grade"].as_str().unwrap())
        .collect();
    assert_eq!(grades, vec!["A", "B", "B", "F"]);
    // Tied students keep roster order.
    assert_eq!(students[1]["displayName"].as_str(), Some("Zulu, Tariro"));
    assert_eq!(students[2]["displayName"].as_str(), Some("Phiri, Kondwani"));

    let analysis = &result["analysis"];
    assert_eq!(analysis["totalStudents"].as_u64(), Some(4));
    assert_eq!(analysis["totalGraded"].as_u64(), Some(4));
    assert_eq!(analysis["averageScore"].as_f64(), Some(67.5));
    assert_eq!(analysis["passRate"].as_f64(), Some(75.0));
    let dist = analysis["gradeDistribution"].as_array().expect("distribution");
    let counts: Vec<(&str, u64)> = dist
        .iter()
        .map(|b| (b["gradeLabel"].as_str().unwrap(), b["count"].as_u64().unwrap()))
        .collect();
    assert_eq!(counts, vec![("A", 1), ("B", 2), ("F", 1)]);

    // Re-ranking an unchanged result set yields identical ranks.
    let again = class_result(&mut stdin, &mut reader, "3", &seed);
    assert_eq!(result["students"], again["students"]);

    let _ = child.kill();
}

#[test]
fn ungraded_student_is_flagged_not_scored_zero() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed_single_plan_class(
        &mut stdin,
        &mut reader,
        &[("Chipo", "Mwale"), ("Tariro", "Zulu")],
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.upsert",
        json!({
            "schoolId": seed.school_id, "termId": seed.term_id,
            "subjectId": seed.subject_id, "classroomId": seed.classroom_id,
            "teacherId": seed.teacher_id,
            "edits": [
                { "studentId": seed.student_ids[0], "assessmentPlanId": seed.plan_id, "score": 61 }
            ]
        }),
    );

    let result = class_result(&mut stdin, &mut reader, "2", &seed);
    let students = result["students"].as_array().expect("students");

    assert_eq!(students[0]["studentId"].as_str(), Some(seed.student_ids[0].as_str()));
    assert_eq!(students[0]["hasData"].as_bool(), Some(true));
    assert_eq!(students[0]["rank"].as_u64(), Some(1));

    // The ungraded student displays 0.0 but carries no grade and no data.
    assert_eq!(students[1]["studentId"].as_str(), Some(seed.student_ids[1].as_str()));
    assert_eq!(students[1]["percentage"].as_f64(), Some(0.0));
    assert_eq!(students[1]["hasData"].as_bool(), Some(false));
    assert!(students[1]["grade"].is_null());
    assert!(students[1]["comment"].is_null());
    assert_eq!(students[1]["rank"].as_u64(), Some(2));

    let analysis = &result["analysis"];
    assert_eq!(analysis["totalStudents"].as_u64(), Some(2));
    assert_eq!(analysis["totalGraded"].as_u64(), Some(1));
    assert_eq!(analysis["averageScore"].as_f64(), Some(61.0));
    // The F band must not absorb the ungraded student's display zero.
    let dist = analysis["gradeDistribution"].as_array().expect("distribution");
    let f_band = dist
        .iter()
        .find(|b| b["gradeLabel"].as_str() == Some("F"))
        .expect("F band");
    assert_eq!(f_band["count"].as_u64(), Some(0));

    let _ = child.kill();
}
