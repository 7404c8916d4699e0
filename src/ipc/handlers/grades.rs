use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const GRADES_BULK_UPDATE_MAX_EDITS: usize = 5000;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

struct GradeScopeIds {
    school_id: String,
    term_id: String,
    subject_id: String,
    classroom_id: String,
}

fn parse_scope(req: &Request) -> Result<GradeScopeIds, serde_json::Value> {
    Ok(GradeScopeIds {
        school_id: required_str(req, "schoolId")?,
        term_id: required_str(req, "termId")?,
        subject_id: required_str(req, "subjectId")?,
        classroom_id: required_str(req, "classroomId")?,
    })
}

fn check_scope(conn: &Connection, scope: &GradeScopeIds) -> Result<(), HandlerErr> {
    let check = |found: Result<bool, crate::calc::CalcError>, what: &str| match found {
        Ok(true) => Ok(()),
        Ok(false) => Err(HandlerErr {
            code: "not_found",
            message: format!("{} not found", what),
            details: None,
        }),
        Err(e) => Err(HandlerErr {
            code: "db_query_failed",
            message: e.message,
            details: None,
        }),
    };
    check(
        store::term_exists(conn, &scope.school_id, &scope.term_id),
        "term",
    )?;
    check(
        store::subject_exists(conn, &scope.school_id, &scope.subject_id),
        "subject",
    )?;
    check(
        store::classroom_exists(conn, &scope.school_id, &scope.classroom_id),
        "classroom",
    )?;
    Ok(())
}

fn check_teacher_assignment(
    conn: &Connection,
    scope: &GradeScopeIds,
    teacher_id: &str,
) -> Result<(), HandlerErr> {
    match store::teacher_is_assigned(
        conn,
        &scope.school_id,
        teacher_id,
        &scope.classroom_id,
        &scope.subject_id,
    ) {
        Ok(true) => Ok(()),
        Ok(false) => Err(HandlerErr {
            code: "not_assigned",
            message: "teacher is not assigned to this classroom and subject".to_string(),
            details: Some(json!({
                "teacherId": teacher_id,
                "classroomId": scope.classroom_id,
                "subjectId": scope.subject_id
            })),
        }),
        Err(e) => Err(HandlerErr {
            code: "db_query_failed",
            message: e.message,
            details: None,
        }),
    }
}

struct PlanRow {
    max_score: f64,
    is_active: bool,
}

fn load_plan_in_scope(
    conn: &Connection,
    scope: &GradeScopeIds,
    plan_id: &str,
) -> Result<Option<PlanRow>, HandlerErr> {
    conn.query_row(
        "SELECT max_score, is_active FROM assessment_plans
         WHERE id = ? AND school_id = ? AND term_id = ? AND subject_id = ?",
        (plan_id, &scope.school_id, &scope.term_id, &scope.subject_id),
        |r| {
            Ok(PlanRow {
                max_score: r.get(0)?,
                is_active: r.get::<_, i64>(1)? != 0,
            })
        },
    )
    .optional()
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })
}

fn student_is_enrolled(
    conn: &Connection,
    scope: &GradeScopeIds,
    student_id: &str,
) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM enrollments e
         JOIN students s ON s.id = e.student_id
         WHERE e.classroom_id = ? AND e.student_id = ? AND s.school_id = ?",
        (&scope.classroom_id, student_id, &scope.school_id),
        |_| Ok(()),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })
}

fn apply_edit(
    conn: &Connection,
    scope: &GradeScopeIds,
    edit: &serde_json::Value,
) -> Result<(), HandlerErr> {
    let Some(student_id) = edit.get("studentId").and_then(|v| v.as_str()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "each edit requires studentId".to_string(),
            details: None,
        });
    };
    let Some(plan_id) = edit.get("assessmentPlanId").and_then(|v| v.as_str()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "each edit requires assessmentPlanId".to_string(),
            details: None,
        });
    };
    let score = match edit.get("score") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => match v.as_f64() {
            Some(n) => Some(n),
            None => {
                return Err(HandlerErr {
                    code: "bad_params",
                    message: "score must be a number or null".to_string(),
                    details: Some(json!({ "studentId": student_id, "assessmentPlanId": plan_id })),
                })
            }
        },
    };

    let Some(plan) = load_plan_in_scope(conn, scope, plan_id)? else {
        return Err(HandlerErr {
            code: "not_found",
            message: "assessment plan not found in this term and subject".to_string(),
            details: Some(json!({ "assessmentPlanId": plan_id })),
        });
    };
    if !plan.is_active {
        return Err(HandlerErr {
            code: "plan_inactive",
            message: "assessment plan has been deactivated".to_string(),
            details: Some(json!({ "assessmentPlanId": plan_id })),
        });
    }
    if let Some(v) = score {
        if v < 0.0 || v > plan.max_score {
            return Err(HandlerErr {
                code: "bad_params",
                message: format!("score must be between 0 and {}", plan.max_score),
                details: Some(json!({
                    "studentId": student_id,
                    "assessmentPlanId": plan_id,
                    "score": v
                })),
            });
        }
    }
    if !student_is_enrolled(conn, scope, student_id)? {
        return Err(HandlerErr {
            code: "not_enrolled",
            message: "student is not enrolled in this classroom".to_string(),
            details: Some(json!({ "studentId": student_id })),
        });
    }

    let locked: Option<bool> = conn
        .query_row(
            "SELECT is_locked FROM grades WHERE assessment_plan_id = ? AND student_id = ?",
            (plan_id, student_id),
            |r| Ok(r.get::<_, i64>(0)? != 0),
        )
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    if locked == Some(true) {
        return Err(HandlerErr {
            code: "grade_locked",
            message: "grade is locked and can no longer be edited".to_string(),
            details: Some(json!({ "studentId": student_id, "assessmentPlanId": plan_id })),
        });
    }

    // Last write wins per (student, plan); the UNIQUE pair is the upsert key.
    let grade_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO grades(
            id, assessment_plan_id, student_id, classroom_id, score, is_locked, updated_at)
         VALUES (?, ?, ?, ?, ?, 0, ?)
         ON CONFLICT(assessment_plan_id, student_id) DO UPDATE SET
            score = excluded.score,
            classroom_id = excluded.classroom_id,
            updated_at = excluded.updated_at",
        (&grade_id, plan_id, student_id, &scope.classroom_id, score, &now),
    )
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })?;
    Ok(())
}

fn handle_grades_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let scope = match parse_scope(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(edits) = req.params.get("edits").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing edits array", None);
    };
    if edits.len() > GRADES_BULK_UPDATE_MAX_EDITS {
        return err(
            &req.id,
            "bad_params",
            format!("too many edits (max {})", GRADES_BULK_UPDATE_MAX_EDITS),
            Some(json!({ "count": edits.len() })),
        );
    }

    if let Err(e) = check_scope(conn, &scope) {
        return e.response(&req.id);
    }
    if let Err(e) = check_teacher_assignment(conn, &scope, &teacher_id) {
        return e.response(&req.id);
    }

    let mut updated = 0_usize;
    for edit in edits {
        if let Err(e) = apply_edit(conn, &scope, edit) {
            return e.response(&req.id);
        }
        updated += 1;
    }
    ok(&req.id, json!({ "updated": updated }))
}

fn handle_grades_lock(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let scope = match parse_scope(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let locked = req
        .params
        .get("locked")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    if let Err(e) = check_scope(conn, &scope) {
        return e.response(&req.id);
    }

    let affected = match conn.execute(
        "UPDATE grades SET is_locked = ?
         WHERE classroom_id = ?
           AND assessment_plan_id IN (
               SELECT id FROM assessment_plans
               WHERE school_id = ? AND term_id = ? AND subject_id = ?
           )",
        (
            locked as i64,
            &scope.classroom_id,
            &scope.school_id,
            &scope.term_id,
            &scope.subject_id,
        ),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "affected": affected, "locked": locked }))
}

fn handle_grades_grid(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let scope = match parse_scope(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let snapshot = match store::load_snapshot(
        conn,
        &scope.school_id,
        &scope.term_id,
        &scope.subject_id,
        &scope.classroom_id,
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, &e.code, e.message, e.details),
    };

    let students_json: Vec<serde_json::Value> = snapshot
        .roster
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "displayName": s.display_name,
                "sortOrder": s.sort_order
            })
        })
        .collect();
    let plans_json: Vec<serde_json::Value> = snapshot
        .plans
        .iter()
        .map(|p| {
            json!({
                "id": p.id,
                "title": p.title,
                "maxScore": p.max_score,
                "weight": p.weight,
                "sortOrder": p.sort_order
            })
        })
        .collect();

    let mut cells: Vec<Vec<Option<f64>>> =
        vec![vec![None; snapshot.plans.len()]; snapshot.roster.len()];
    let mut locked_cells: Vec<Vec<bool>> =
        vec![vec![false; snapshot.plans.len()]; snapshot.roster.len()];
    for (r_i, student) in snapshot.roster.iter().enumerate() {
        let Some(grades) = snapshot.grades_by_student.get(&student.id) else {
            continue;
        };
        for grade in grades {
            let Some(c_i) = snapshot
                .plans
                .iter()
                .position(|p| p.id == grade.assessment_plan_id)
            else {
                continue;
            };
            cells[r_i][c_i] = grade.score;
            locked_cells[r_i][c_i] = grade.is_locked;
        }
    }

    ok(
        &req.id,
        json!({
            "students": students_json,
            "plans": plans_json,
            "rowCount": students_json.len(),
            "colCount": plans_json.len(),
            "cells": cells,
            "lockedCells": locked_cells
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.upsert" => Some(handle_grades_upsert(state, req)),
        "grades.lock" => Some(handle_grades_lock(state, req)),
        "grades.grid" => Some(handle_grades_grid(state, req)),
        _ => None,
    }
}
