use crate::calc::{self, CalcError};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RosterStudent {
    pub id: String,
    pub display_name: String,
    pub sort_order: i64,
}

#[derive(Debug, Clone)]
pub struct ScaleDef {
    pub id: String,
    pub name: String,
    pub steps: Vec<calc::ScaleStep>,
}

/// Immutable read snapshot for one (school, term, subject, classroom)
/// report request. Loaded once per request and discarded with the response.
#[derive(Debug)]
pub struct GradebookSnapshot {
    pub plans: Vec<calc::PlanDef>,
    pub roster: Vec<RosterStudent>,
    pub grades_by_student: HashMap<String, Vec<calc::GradeEntry>>,
    pub scale: Option<ScaleDef>,
}

fn db_err(e: rusqlite::Error) -> CalcError {
    CalcError::new("db_query_failed", e.to_string())
}

pub fn classroom_exists(
    conn: &Connection,
    school_id: &str,
    classroom_id: &str,
) -> Result<bool, CalcError> {
    conn.query_row(
        "SELECT 1 FROM classrooms WHERE id = ? AND school_id = ?",
        (classroom_id, school_id),
        |_| Ok(()),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err)
}

pub fn subject_exists(
    conn: &Connection,
    school_id: &str,
    subject_id: &str,
) -> Result<bool, CalcError> {
    conn.query_row(
        "SELECT 1 FROM subjects WHERE id = ? AND school_id = ?",
        (subject_id, school_id),
        |_| Ok(()),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err)
}

pub fn term_exists(conn: &Connection, school_id: &str, term_id: &str) -> Result<bool, CalcError> {
    conn.query_row(
        "SELECT 1 FROM terms WHERE id = ? AND school_id = ?",
        (term_id, school_id),
        |_| Ok(()),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err)
}

/// Whether the teacher is assigned to this classroom+subject. Callers reject
/// with `not_assigned` before any computation runs.
pub fn teacher_is_assigned(
    conn: &Connection,
    school_id: &str,
    teacher_id: &str,
    classroom_id: &str,
    subject_id: &str,
) -> Result<bool, CalcError> {
    conn.query_row(
        "SELECT 1
         FROM teacher_assignments ta
         JOIN teachers t ON t.id = ta.teacher_id
         WHERE ta.teacher_id = ? AND ta.classroom_id = ? AND ta.subject_id = ?
           AND t.school_id = ?",
        (teacher_id, classroom_id, subject_id, school_id),
        |_| Ok(()),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err)
}

pub fn load_active_plans(
    conn: &Connection,
    school_id: &str,
    term_id: &str,
    subject_id: &str,
) -> Result<Vec<calc::PlanDef>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, title, max_score, weight, sort_order
             FROM assessment_plans
             WHERE school_id = ? AND term_id = ? AND subject_id = ? AND is_active = 1
             ORDER BY sort_order",
        )
        .map_err(db_err)?;
    let plans: Vec<calc::PlanDef> = stmt
        .query_map((school_id, term_id, subject_id), |r| {
            Ok(calc::PlanDef {
                id: r.get(0)?,
                title: r.get(1)?,
                max_score: r.get(2)?,
                weight: r.get(3)?,
                sort_order: r.get(4)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    for p in &plans {
        if p.max_score <= 0.0 {
            warn!(
                plan_id = %p.id,
                title = %p.title,
                max_score = p.max_score,
                "assessment plan has a non-positive max score and will be skipped"
            );
        }
    }
    Ok(plans)
}

pub fn load_roster(
    conn: &Connection,
    school_id: &str,
    classroom_id: &str,
) -> Result<Vec<RosterStudent>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.last_name, s.first_name, s.sort_order
             FROM students s
             JOIN enrollments e ON e.student_id = s.id
             WHERE e.classroom_id = ? AND s.school_id = ? AND s.active = 1
             ORDER BY s.sort_order",
        )
        .map_err(db_err)?;
    stmt.query_map((classroom_id, school_id), |r| {
        let last: String = r.get(1)?;
        let first: String = r.get(2)?;
        Ok(RosterStudent {
            id: r.get(0)?,
            display_name: format!("{}, {}", last, first),
            sort_order: r.get(3)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err)
}

pub fn load_active_scale(
    conn: &Connection,
    school_id: &str,
) -> Result<Option<ScaleDef>, CalcError> {
    let header: Option<(String, String)> = conn
        .query_row(
            "SELECT id, name FROM grade_scales
             WHERE school_id = ? AND is_active = 1
             ORDER BY rowid DESC LIMIT 1",
            [school_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((id, name)) = header else {
        return Ok(None);
    };

    let mut stmt = conn
        .prepare(
            "SELECT grade_label, comment, min_percent, max_percent, sort_order
             FROM grade_scale_steps
             WHERE scale_id = ?
             ORDER BY sort_order",
        )
        .map_err(db_err)?;
    let steps: Vec<calc::ScaleStep> = stmt
        .query_map([&id], |r| {
            Ok(calc::ScaleStep {
                grade_label: r.get(0)?,
                comment: r.get(1)?,
                min_percent: r.get(2)?,
                max_percent: r.get(3)?,
                sort_order: r.get(4)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(Some(ScaleDef { id, name, steps }))
}

fn load_grades(
    conn: &Connection,
    plans: &[calc::PlanDef],
    roster: &[RosterStudent],
) -> Result<HashMap<String, Vec<calc::GradeEntry>>, CalcError> {
    let mut by_student: HashMap<String, Vec<calc::GradeEntry>> = HashMap::new();
    if plans.is_empty() || roster.is_empty() {
        return Ok(by_student);
    }

    let plan_placeholders = std::iter::repeat("?")
        .take(plans.len())
        .collect::<Vec<_>>()
        .join(",");
    let student_placeholders = std::iter::repeat("?")
        .take(roster.len())
        .collect::<Vec<_>>()
        .join(",");
    let sql = format!(
        "SELECT assessment_plan_id, student_id, score, is_locked
         FROM grades
         WHERE assessment_plan_id IN ({}) AND student_id IN ({})",
        plan_placeholders, student_placeholders
    );

    let mut bind_values: Vec<Value> = Vec::with_capacity(plans.len() + roster.len());
    for p in plans {
        bind_values.push(Value::Text(p.id.clone()));
    }
    for s in roster {
        bind_values.push(Value::Text(s.id.clone()));
    }

    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let rows = stmt
        .query_map(params_from_iter(bind_values), |r| {
            let plan_id: String = r.get(0)?;
            let student_id: String = r.get(1)?;
            let score: Option<f64> = r.get(2)?;
            let locked: i64 = r.get(3)?;
            Ok((plan_id, student_id, score, locked != 0))
        })
        .map_err(db_err)?;
    for row in rows {
        let (plan_id, student_id, score, is_locked) = row.map_err(db_err)?;
        by_student.entry(student_id).or_default().push(calc::GradeEntry {
            assessment_plan_id: plan_id,
            score,
            is_locked,
        });
    }
    Ok(by_student)
}

pub fn load_snapshot(
    conn: &Connection,
    school_id: &str,
    term_id: &str,
    subject_id: &str,
    classroom_id: &str,
) -> Result<GradebookSnapshot, CalcError> {
    if !term_exists(conn, school_id, term_id)? {
        return Err(CalcError::new("not_found", "term not found"));
    }
    if !subject_exists(conn, school_id, subject_id)? {
        return Err(CalcError::new("not_found", "subject not found"));
    }
    if !classroom_exists(conn, school_id, classroom_id)? {
        return Err(CalcError::new("not_found", "classroom not found"));
    }

    let plans = load_active_plans(conn, school_id, term_id, subject_id)?;
    let roster = load_roster(conn, school_id, classroom_id)?;
    let grades_by_student = load_grades(conn, &plans, &roster)?;
    let scale = load_active_scale(conn, school_id)?;

    Ok(GradebookSnapshot {
        plans,
        roster,
        grades_by_student,
        scale,
    })
}
