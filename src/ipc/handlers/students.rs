use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

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

fn handle_student_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let first_name = match required_str(req, "firstName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let last_name = match required_str(req, "lastName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let admission_no = req
        .params
        .get("admissionNo")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string());

    let school_found: bool = match conn
        .query_row("SELECT 1 FROM schools WHERE id = ?", [&school_id], |_| Ok(()))
        .optional()
    {
        Ok(v) => v.is_some(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !school_found {
        return err(&req.id, "not_found", "school not found", None);
    }

    let sort_order: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students WHERE school_id = ?",
        [&school_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO students(
            id, school_id, last_name, first_name, admission_no, active, sort_order, updated_at)
         VALUES (?, ?, ?, ?, ?, 1, ?, ?)",
        (
            &id,
            &school_id,
            &last_name,
            &first_name,
            &admission_no,
            sort_order,
            &now,
        ),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "studentId": id }))
}

fn handle_student_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let classroom_id = req
        .params
        .get("classroomId")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string());

    let rows = if let Some(classroom_id) = &classroom_id {
        match store::classroom_exists(conn, &school_id, classroom_id) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", "classroom not found", None),
            Err(e) => return err(&req.id, &e.code, e.message, None),
        }
        let mut stmt = match conn.prepare(
            "SELECT s.id, s.last_name, s.first_name, s.admission_no, s.active, s.sort_order
             FROM students s
             JOIN enrollments e ON e.student_id = s.id
             WHERE s.school_id = ? AND e.classroom_id = ?
             ORDER BY s.sort_order",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        stmt.query_map((&school_id, classroom_id), student_row_json)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    } else {
        let mut stmt = match conn.prepare(
            "SELECT id, last_name, first_name, admission_no, active, sort_order
             FROM students
             WHERE school_id = ?
             ORDER BY sort_order",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        stmt.query_map([&school_id], student_row_json)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    };

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn student_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = r.get(0)?;
    let last: String = r.get(1)?;
    let first: String = r.get(2)?;
    let admission_no: Option<String> = r.get(3)?;
    let active: i64 = r.get(4)?;
    let sort_order: i64 = r.get(5)?;
    Ok(json!({
        "id": id,
        "displayName": format!("{}, {}", last, first),
        "admissionNo": admission_no,
        "active": active != 0,
        "sortOrder": sort_order
    }))
}

fn handle_student_set_active(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(active) = req.params.get("active").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "missing boolean active", None);
    };

    let now = Utc::now().to_rfc3339();
    let affected = match conn.execute(
        "UPDATE students SET active = ?, updated_at = ? WHERE id = ? AND school_id = ?",
        (active as i64, &now, &student_id, &school_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if affected == 0 {
        return err(&req.id, "not_found", "student not found", None);
    }
    ok(&req.id, json!({ "active": active }))
}

/// Replaces the classroom's membership with the given student set.
fn handle_enrollment_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let classroom_id = match required_str(req, "classroomId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(raw_ids) = req.params.get("studentIds").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing studentIds array", None);
    };

    match store::classroom_exists(conn, &school_id, &classroom_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "classroom not found", None),
        Err(e) => return err(&req.id, &e.code, e.message, None),
    }

    let mut wanted: Vec<String> = Vec::with_capacity(raw_ids.len());
    let mut seen = HashSet::new();
    for v in raw_ids {
        let Some(id) = v.as_str() else {
            return err(
                &req.id,
                "bad_params",
                "studentIds must contain only strings",
                None,
            );
        };
        if seen.insert(id.to_string()) {
            wanted.push(id.to_string());
        }
    }

    for student_id in &wanted {
        let in_school: bool = match conn
            .query_row(
                "SELECT 1 FROM students WHERE id = ? AND school_id = ?",
                (student_id, &school_id),
                |_| Ok(()),
            )
            .optional()
        {
            Ok(v) => v.is_some(),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if !in_school {
            return err(
                &req.id,
                "not_found",
                "student not found in school",
                Some(json!({ "studentId": student_id })),
            );
        }
    }

    if let Err(e) = conn.execute(
        "DELETE FROM enrollments WHERE classroom_id = ?",
        [&classroom_id],
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    for student_id in &wanted {
        if let Err(e) = conn.execute(
            "INSERT OR IGNORE INTO enrollments(classroom_id, student_id) VALUES (?, ?)",
            (&classroom_id, student_id),
        ) {
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    }

    ok(&req.id, json!({ "enrolled": wanted.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "student.create" => Some(handle_student_create(state, req)),
        "student.list" => Some(handle_student_list(state, req)),
        "student.setActive" => Some(handle_student_set_active(state, req)),
        "enrollment.set" => Some(handle_enrollment_set(state, req)),
        _ => None,
    }
}
