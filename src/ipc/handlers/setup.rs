use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

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

fn required_f64(req: &Request, key: &str) -> Result<f64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing numeric {}", key), None))
}

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn school_exists(conn: &Connection, school_id: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row("SELECT 1 FROM schools WHERE id = ?", [school_id], |_| Ok(()))
        .optional()
        .map(|v| v.is_some())
}

fn require_school(
    conn: &Connection,
    req: &Request,
    school_id: &str,
) -> Result<(), serde_json::Value> {
    match school_exists(conn, school_id) {
        Ok(true) => Ok(()),
        Ok(false) => Err(err(&req.id, "not_found", "school not found", None)),
        Err(e) => Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    }
}

fn handle_school_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if name.trim().is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO schools(id, name) VALUES (?, ?)",
        (&id, name.trim()),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "schoolId": id }))
}

fn handle_school_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare("SELECT id, name FROM schools ORDER BY name") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let schools = match stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            Ok(json!({ "id": id, "name": name }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "schools": schools }))
}

fn handle_term_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_year = match required_str(req, "academicYear") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_school(conn, req, &school_id) {
        return e;
    }

    let sort_order: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM terms
         WHERE school_id = ? AND academic_year = ?",
        (&school_id, &academic_year),
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO terms(id, school_id, academic_year, name, sort_order)
         VALUES (?, ?, ?, ?, ?)",
        (&id, &school_id, &academic_year, &name, sort_order),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "termId": id }))
}

fn handle_term_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT id, academic_year, name, sort_order FROM terms
         WHERE school_id = ?
         ORDER BY academic_year, sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let terms = match stmt
        .query_map([&school_id], |r| {
            let id: String = r.get(0)?;
            let academic_year: String = r.get(1)?;
            let name: String = r.get(2)?;
            let sort_order: i64 = r.get(3)?;
            Ok(json!({
                "id": id,
                "academicYear": academic_year,
                "name": name,
                "sortOrder": sort_order
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "terms": terms }))
}

fn handle_subject_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let code = optional_str(req, "code");
    if let Err(e) = require_school(conn, req, &school_id) {
        return e;
    }

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, school_id, name, code) VALUES (?, ?, ?, ?)",
        (&id, &school_id, &name, &code),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "subjectId": id }))
}

fn handle_subject_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT id, name, code FROM subjects WHERE school_id = ? ORDER BY name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let subjects = match stmt
        .query_map([&school_id], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let code: Option<String> = r.get(2)?;
            Ok(json!({ "id": id, "name": name, "code": code }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "subjects": subjects }))
}

fn handle_classroom_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_year = match required_str(req, "academicYear") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let stream = optional_str(req, "stream");
    if let Err(e) = require_school(conn, req, &school_id) {
        return e;
    }

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classrooms(id, school_id, academic_year, name, stream)
         VALUES (?, ?, ?, ?, ?)",
        (&id, &school_id, &academic_year, &name, &stream),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "classroomId": id }))
}

fn handle_classroom_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT id, academic_year, name, stream FROM classrooms
         WHERE school_id = ?
         ORDER BY academic_year, name, stream",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let classrooms = match stmt
        .query_map([&school_id], |r| {
            let id: String = r.get(0)?;
            let academic_year: String = r.get(1)?;
            let name: String = r.get(2)?;
            let stream: Option<String> = r.get(3)?;
            Ok(json!({
                "id": id,
                "academicYear": academic_year,
                "name": name,
                "stream": stream
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "classrooms": classrooms }))
}

fn handle_teacher_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_school(conn, req, &school_id) {
        return e;
    }

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO teachers(id, school_id, name) VALUES (?, ?, ?)",
        (&id, &school_id, &name),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "teacherId": id }))
}

fn handle_teacher_assign(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let classroom_id = match required_str(req, "classroomId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let teacher_in_school: bool = match conn
        .query_row(
            "SELECT 1 FROM teachers WHERE id = ? AND school_id = ?",
            (&teacher_id, &school_id),
            |_| Ok(()),
        )
        .optional()
    {
        Ok(v) => v.is_some(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !teacher_in_school {
        return err(&req.id, "not_found", "teacher not found", None);
    }
    match store::classroom_exists(conn, &school_id, &classroom_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "classroom not found", None),
        Err(e) => return err(&req.id, &e.code, e.message, None),
    }
    match store::subject_exists(conn, &school_id, &subject_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "subject not found", None),
        Err(e) => return err(&req.id, &e.code, e.message, None),
    }

    if let Err(e) = conn.execute(
        "INSERT OR IGNORE INTO teacher_assignments(teacher_id, classroom_id, subject_id)
         VALUES (?, ?, ?)",
        (&teacher_id, &classroom_id, &subject_id),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "assigned": true }))
}

fn handle_grade_scale_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_school(conn, req, &school_id) {
        return e;
    }

    let Some(raw_steps) = req.params.get("steps").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing steps array", None);
    };
    if raw_steps.is_empty() {
        return err(&req.id, "bad_params", "steps must not be empty", None);
    }

    let mut steps: Vec<(String, String, f64, f64)> = Vec::with_capacity(raw_steps.len());
    for (i, raw) in raw_steps.iter().enumerate() {
        let label = raw.get("gradeLabel").and_then(|v| v.as_str()).unwrap_or("");
        if label.trim().is_empty() {
            return err(
                &req.id,
                "bad_params",
                "each step requires a non-empty gradeLabel",
                Some(json!({ "index": i })),
            );
        }
        let comment = raw
            .get("comment")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let (Some(min), Some(max)) = (
            raw.get("minPercent").and_then(|v| v.as_f64()),
            raw.get("maxPercent").and_then(|v| v.as_f64()),
        ) else {
            return err(
                &req.id,
                "bad_params",
                "each step requires numeric minPercent and maxPercent",
                Some(json!({ "index": i })),
            );
        };
        if !(0.0..=100.0).contains(&min) || !(0.0..=100.0).contains(&max) || min > max {
            return err(
                &req.id,
                "bad_params",
                "step bounds must satisfy 0 <= minPercent <= maxPercent <= 100",
                Some(json!({ "index": i, "minPercent": min, "maxPercent": max })),
            );
        }
        steps.push((label.trim().to_string(), comment, min, max));
    }

    // One active scale per school; saving replaces the previous one.
    if let Err(e) = conn.execute(
        "UPDATE grade_scales SET is_active = 0 WHERE school_id = ?",
        [&school_id],
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }

    let scale_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO grade_scales(id, school_id, name, is_active) VALUES (?, ?, ?, 1)",
        (&scale_id, &school_id, &name),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    for (i, (label, comment, min, max)) in steps.iter().enumerate() {
        let step_id = Uuid::new_v4().to_string();
        if let Err(e) = conn.execute(
            "INSERT INTO grade_scale_steps(
                id, scale_id, min_percent, max_percent, grade_label, comment, sort_order)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            (&step_id, &scale_id, min, max, label, comment, i as i64),
        ) {
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    }

    ok(&req.id, json!({ "scaleId": scale_id, "stepCount": steps.len() }))
}

fn handle_grade_scale_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, name, is_active FROM grade_scales WHERE school_id = ? ORDER BY rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let headers: Vec<(String, String, bool)> = match stmt
        .query_map([&school_id], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get::<_, i64>(2)? != 0))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut scales = Vec::with_capacity(headers.len());
    for (id, name, is_active) in headers {
        let mut step_stmt = match conn.prepare(
            "SELECT grade_label, comment, min_percent, max_percent, sort_order
             FROM grade_scale_steps WHERE scale_id = ? ORDER BY sort_order",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let steps = match step_stmt
            .query_map([&id], |r| {
                let grade_label: String = r.get(0)?;
                let comment: String = r.get(1)?;
                let min_percent: f64 = r.get(2)?;
                let max_percent: f64 = r.get(3)?;
                let sort_order: i64 = r.get(4)?;
                Ok(json!({
                    "gradeLabel": grade_label,
                    "comment": comment,
                    "minPercent": min_percent,
                    "maxPercent": max_percent,
                    "sortOrder": sort_order
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        scales.push(json!({
            "id": id,
            "name": name,
            "isActive": is_active,
            "steps": steps
        }));
    }
    ok(&req.id, json!({ "scales": scales }))
}

fn handle_assessment_plan_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let max_score = match required_f64(req, "maxScore") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let weight = match required_f64(req, "weight") {
        Ok(v) => v,
        Err(e) => return e,
    };

    if max_score <= 0.0 {
        return err(
            &req.id,
            "bad_params",
            "maxScore must be positive",
            Some(json!({ "maxScore": max_score })),
        );
    }
    if !(0.0..=100.0).contains(&weight) {
        return err(
            &req.id,
            "bad_params",
            "weight must be between 0 and 100",
            Some(json!({ "weight": weight })),
        );
    }
    match store::term_exists(conn, &school_id, &term_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "term not found", None),
        Err(e) => return err(&req.id, &e.code, e.message, None),
    }
    match store::subject_exists(conn, &school_id, &subject_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "subject not found", None),
        Err(e) => return err(&req.id, &e.code, e.message, None),
    }

    let sort_order: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM assessment_plans
         WHERE term_id = ? AND subject_id = ?",
        (&term_id, &subject_id),
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO assessment_plans(
            id, school_id, term_id, subject_id, title, max_score, weight, sort_order, is_active)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1)",
        (
            &id, &school_id, &term_id, &subject_id, &title, max_score, weight, sort_order,
        ),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "planId": id }))
}

fn handle_assessment_plan_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let plan_id = match required_str(req, "planId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let existing: Option<(String, f64, f64)> = match conn
        .query_row(
            "SELECT title, max_score, weight FROM assessment_plans
             WHERE id = ? AND school_id = ?",
            (&plan_id, &school_id),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((cur_title, cur_max, cur_weight)) = existing else {
        return err(&req.id, "not_found", "assessment plan not found", None);
    };

    let title = optional_str(req, "title").unwrap_or(cur_title);
    let max_score = req
        .params
        .get("maxScore")
        .and_then(|v| v.as_f64())
        .unwrap_or(cur_max);
    let weight = req
        .params
        .get("weight")
        .and_then(|v| v.as_f64())
        .unwrap_or(cur_weight);

    if max_score <= 0.0 {
        return err(
            &req.id,
            "bad_params",
            "maxScore must be positive",
            Some(json!({ "maxScore": max_score })),
        );
    }
    if !(0.0..=100.0).contains(&weight) {
        return err(
            &req.id,
            "bad_params",
            "weight must be between 0 and 100",
            Some(json!({ "weight": weight })),
        );
    }

    if let Err(e) = conn.execute(
        "UPDATE assessment_plans SET title = ?, max_score = ?, weight = ?
         WHERE id = ? AND school_id = ?",
        (&title, max_score, weight, &plan_id, &school_id),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "updated": true }))
}

fn handle_assessment_plan_deactivate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let plan_id = match required_str(req, "planId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Soft deactivation only; plans are never hard-deleted once grades exist.
    let affected = match conn.execute(
        "UPDATE assessment_plans SET is_active = 0 WHERE id = ? AND school_id = ?",
        (&plan_id, &school_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if affected == 0 {
        return err(&req.id, "not_found", "assessment plan not found", None);
    }
    ok(&req.id, json!({ "deactivated": true }))
}

fn handle_assessment_plan_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let include_inactive = req
        .params
        .get("includeInactive")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let sql = if include_inactive {
        "SELECT id, title, max_score, weight, sort_order, is_active FROM assessment_plans
         WHERE school_id = ? AND term_id = ? AND subject_id = ?
         ORDER BY sort_order"
    } else {
        "SELECT id, title, max_score, weight, sort_order, is_active FROM assessment_plans
         WHERE school_id = ? AND term_id = ? AND subject_id = ? AND is_active = 1
         ORDER BY sort_order"
    };
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let plans = match stmt
        .query_map((&school_id, &term_id, &subject_id), |r| {
            let id: String = r.get(0)?;
            let title: String = r.get(1)?;
            let max_score: f64 = r.get(2)?;
            let weight: f64 = r.get(3)?;
            let sort_order: i64 = r.get(4)?;
            let is_active: i64 = r.get(5)?;
            Ok(json!({
                "id": id,
                "title": title,
                "maxScore": max_score,
                "weight": weight,
                "sortOrder": sort_order,
                "isActive": is_active != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "plans": plans }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "school.create" => Some(handle_school_create(state, req)),
        "school.list" => Some(handle_school_list(state, req)),
        "term.create" => Some(handle_term_create(state, req)),
        "term.list" => Some(handle_term_list(state, req)),
        "subject.create" => Some(handle_subject_create(state, req)),
        "subject.list" => Some(handle_subject_list(state, req)),
        "classroom.create" => Some(handle_classroom_create(state, req)),
        "classroom.list" => Some(handle_classroom_list(state, req)),
        "teacher.create" => Some(handle_teacher_create(state, req)),
        "teacher.assign" => Some(handle_teacher_assign(state, req)),
        "gradeScale.save" => Some(handle_grade_scale_save(state, req)),
        "gradeScale.list" => Some(handle_grade_scale_list(state, req)),
        "assessmentPlan.create" => Some(handle_assessment_plan_create(state, req)),
        "assessmentPlan.update" => Some(handle_assessment_plan_update(state, req)),
        "assessmentPlan.deactivate" => Some(handle_assessment_plan_deactivate(state, req)),
        "assessmentPlan.list" => Some(handle_assessment_plan_list(state, req)),
        _ => None,
    }
}
