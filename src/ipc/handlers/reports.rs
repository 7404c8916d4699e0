use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
}

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn calc_err(req: &Request, e: calc::CalcError) -> serde_json::Value {
    err(&req.id, &e.code, e.message, e.details)
}

const SCALE_NOT_CONFIGURED_MSG: &str =
    "no active grade scale is configured; ask an administrator to configure a grading scale";

fn classroom_json(
    conn: &Connection,
    school_id: &str,
    classroom_id: &str,
) -> Result<serde_json::Value, calc::CalcError> {
    conn.query_row(
        "SELECT name, stream, academic_year FROM classrooms WHERE id = ? AND school_id = ?",
        (classroom_id, school_id),
        |r| {
            let name: String = r.get(0)?;
            let stream: Option<String> = r.get(1)?;
            let academic_year: String = r.get(2)?;
            Ok(json!({
                "id": classroom_id,
                "name": name,
                "stream": stream,
                "academicYear": academic_year
            }))
        },
    )
    .optional()
    .map_err(|e| calc::CalcError::new("db_query_failed", e.to_string()))?
    .ok_or_else(|| calc::CalcError::new("not_found", "classroom not found"))
}

fn subject_json(
    conn: &Connection,
    school_id: &str,
    subject_id: &str,
) -> Result<serde_json::Value, calc::CalcError> {
    conn.query_row(
        "SELECT name, code FROM subjects WHERE id = ? AND school_id = ?",
        (subject_id, school_id),
        |r| {
            let name: String = r.get(0)?;
            let code: Option<String> = r.get(1)?;
            Ok(json!({ "id": subject_id, "name": name, "code": code }))
        },
    )
    .optional()
    .map_err(|e| calc::CalcError::new("db_query_failed", e.to_string()))?
    .ok_or_else(|| calc::CalcError::new("not_found", "subject not found"))
}

fn term_json(
    conn: &Connection,
    school_id: &str,
    term_id: &str,
) -> Result<serde_json::Value, calc::CalcError> {
    conn.query_row(
        "SELECT name, academic_year FROM terms WHERE id = ? AND school_id = ?",
        (term_id, school_id),
        |r| {
            let name: String = r.get(0)?;
            let academic_year: String = r.get(1)?;
            Ok(json!({ "id": term_id, "name": name, "academicYear": academic_year }))
        },
    )
    .optional()
    .map_err(|e| calc::CalcError::new("db_query_failed", e.to_string()))?
    .ok_or_else(|| calc::CalcError::new("not_found", "term not found"))
}

/// Per-student aggregates in roster order, computed once and shared by the
/// ranking and the analysis so both always agree.
fn roster_aggregates(snapshot: &store::GradebookSnapshot) -> Vec<(usize, calc::Aggregate)> {
    snapshot
        .roster
        .iter()
        .enumerate()
        .map(|(i, student)| {
            let grades = snapshot
                .grades_by_student
                .get(&student.id)
                .map(|v| v.as_slice())
                .unwrap_or(&[]);
            (i, calc::compute_student_percentage(grades, &snapshot.plans))
        })
        .collect()
}

fn check_optional_teacher(
    conn: &Connection,
    req: &Request,
    school_id: &str,
    classroom_id: &str,
    subject_id: &str,
) -> Result<(), serde_json::Value> {
    let Some(teacher_id) = optional_str(req, "teacherId") else {
        return Ok(());
    };
    match store::teacher_is_assigned(conn, school_id, &teacher_id, classroom_id, subject_id) {
        Ok(true) => Ok(()),
        Ok(false) => Err(err(
            &req.id,
            "not_assigned",
            "teacher is not assigned to this classroom and subject",
            Some(json!({
                "teacherId": teacher_id,
                "classroomId": classroom_id,
                "subjectId": subject_id
            })),
        )),
        Err(e) => Err(calc_err(req, e)),
    }
}

fn handle_class_result_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let classroom_id = match required_str(req, "classroomId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = check_optional_teacher(conn, req, &school_id, &classroom_id, &subject_id) {
        return e;
    }

    let snapshot = match store::load_snapshot(conn, &school_id, &term_id, &subject_id, &classroom_id)
    {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };
    let Some(scale) = &snapshot.scale else {
        return err(&req.id, "scale_not_configured", SCALE_NOT_CONFIGURED_MSG, None);
    };

    let aggregates = roster_aggregates(&snapshot);
    let standings: Vec<calc::ClassStanding> = aggregates
        .iter()
        .map(|(i, agg)| calc::ClassStanding {
            student_id: snapshot.roster[*i].id.clone(),
            display_name: snapshot.roster[*i].display_name.clone(),
            sort_order: snapshot.roster[*i].sort_order,
            aggregate: *agg,
        })
        .collect();
    let ranked = calc::rank_class(standings);

    let students_json: Vec<serde_json::Value> = ranked
        .iter()
        .map(|r| {
            let resolved = if r.has_data {
                calc::resolve_grade(r.percentage, &scale.steps)
            } else {
                None
            };
            json!({
                "studentId": r.student_id,
                "displayName": r.display_name,
                "percentage": r.percentage,
                "hasData": r.has_data,
                "grade": resolved.map(|s| s.grade_label.clone()),
                "comment": resolved.map(|s| s.comment.clone()),
                "rank": r.rank
            })
        })
        .collect();

    let only_aggregates: Vec<calc::Aggregate> = aggregates.iter().map(|(_, a)| *a).collect();
    let analysis = calc::analyze_subject(&only_aggregates, &scale.steps);

    let class = match classroom_json(conn, &school_id, &classroom_id) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };
    let subject = match subject_json(conn, &school_id, &subject_id) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };
    let term = match term_json(conn, &school_id, &term_id) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };

    ok(
        &req.id,
        json!({
            "class": class,
            "subject": subject,
            "term": term,
            "scale": { "id": scale.id, "name": scale.name },
            "students": students_json,
            "analysis": analysis
        }),
    )
}

fn handle_subject_analysis_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let classroom_id = match required_str(req, "classroomId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = check_optional_teacher(conn, req, &school_id, &classroom_id, &subject_id) {
        return e;
    }

    let snapshot = match store::load_snapshot(conn, &school_id, &term_id, &subject_id, &classroom_id)
    {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };
    let Some(scale) = &snapshot.scale else {
        return err(&req.id, "scale_not_configured", SCALE_NOT_CONFIGURED_MSG, None);
    };

    let aggregates: Vec<calc::Aggregate> = roster_aggregates(&snapshot)
        .iter()
        .map(|(_, a)| *a)
        .collect();
    let analysis = calc::analyze_subject(&aggregates, &scale.steps);

    let class = match classroom_json(conn, &school_id, &classroom_id) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };
    let subject = match subject_json(conn, &school_id, &subject_id) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };
    let term = match term_json(conn, &school_id, &term_id) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };

    ok(
        &req.id,
        json!({
            "class": class,
            "subject": subject,
            "term": term,
            "planCount": snapshot.plans.len(),
            "analysis": analysis
        }),
    )
}

fn handle_student_term_report_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match store::term_exists(conn, &school_id, &term_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "term not found", None),
        Err(e) => return calc_err(req, e),
    }
    let student: Option<(String, String)> = match conn
        .query_row(
            "SELECT last_name, first_name FROM students WHERE id = ? AND school_id = ?",
            (&student_id, &school_id),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((last_name, first_name)) = student else {
        return err(&req.id, "not_found", "student not found", None);
    };

    let scale = match store::load_active_scale(conn, &school_id) {
        Ok(Some(v)) => v,
        Ok(None) => {
            return err(&req.id, "scale_not_configured", SCALE_NOT_CONFIGURED_MSG, None)
        }
        Err(e) => return calc_err(req, e),
    };

    // Subjects with at least one active plan this term, in name order.
    let mut subj_stmt = match conn.prepare(
        "SELECT DISTINCT s.id, s.name
         FROM subjects s
         JOIN assessment_plans ap ON ap.subject_id = s.id
         WHERE s.school_id = ? AND ap.term_id = ? AND ap.is_active = 1
         ORDER BY s.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let subjects: Vec<(String, String)> = match subj_stmt
        .query_map((&school_id, &term_id), |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // This student's grades across the whole term, bucketed per subject.
    let mut grades_stmt = match conn.prepare(
        "SELECT ap.subject_id, g.assessment_plan_id, g.score, g.is_locked
         FROM grades g
         JOIN assessment_plans ap ON ap.id = g.assessment_plan_id
         WHERE g.student_id = ? AND ap.term_id = ? AND ap.school_id = ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let grade_rows: Vec<(String, calc::GradeEntry)> = match grades_stmt
        .query_map((&student_id, &term_id, &school_id), |r| {
            let subject_id: String = r.get(0)?;
            let plan_id: String = r.get(1)?;
            let score: Option<f64> = r.get(2)?;
            let locked: i64 = r.get(3)?;
            Ok((
                subject_id,
                calc::GradeEntry {
                    assessment_plan_id: plan_id,
                    score,
                    is_locked: locked != 0,
                },
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let mut grades_by_subject: HashMap<String, Vec<calc::GradeEntry>> = HashMap::new();
    for (subject_id, entry) in grade_rows {
        grades_by_subject.entry(subject_id).or_default().push(entry);
    }

    let mut subject_rows = Vec::with_capacity(subjects.len());
    let mut graded_percentages: Vec<f64> = Vec::new();
    for (subject_id, subject_name) in &subjects {
        let plans = match store::load_active_plans(conn, &school_id, &term_id, subject_id) {
            Ok(v) => v,
            Err(e) => return calc_err(req, e),
        };
        let grades = grades_by_subject
            .get(subject_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[]);
        let aggregate = calc::compute_student_percentage(grades, &plans);
        let percentage = aggregate.display_percent();
        let resolved = if aggregate.has_data() {
            graded_percentages.push(percentage);
            calc::resolve_grade(percentage, &scale.steps)
        } else {
            None
        };
        subject_rows.push(json!({
            "subjectId": subject_id,
            "subjectName": subject_name,
            "percentage": percentage,
            "hasData": aggregate.has_data(),
            "grade": resolved.map(|s| s.grade_label.clone()),
            "comment": resolved.map(|s| s.comment.clone())
        }));
    }

    let overall_average = if graded_percentages.is_empty() {
        0.0
    } else {
        calc::round_half_away_1dp(
            graded_percentages.iter().sum::<f64>() / graded_percentages.len() as f64,
        )
    };

    let term = match term_json(conn, &school_id, &term_id) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };

    ok(
        &req.id,
        json!({
            "student": {
                "id": student_id,
                "displayName": format!("{}, {}", last_name, first_name)
            },
            "term": term,
            "scale": { "id": scale.id, "name": scale.name },
            "subjects": subject_rows,
            "gradedSubjects": graded_percentages.len(),
            "overallAverage": overall_average
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.classResultModel" => Some(handle_class_result_model(state, req)),
        "reports.subjectAnalysisModel" => Some(handle_subject_analysis_model(state, req)),
        "reports.studentTermReportModel" => Some(handle_student_term_report_model(state, req)),
        _ => None,
    }
}
