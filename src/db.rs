use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "gradebook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS terms(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            UNIQUE(school_id, academic_year, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_terms_school ON terms(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            code TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            UNIQUE(school_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_school ON subjects(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classrooms(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            name TEXT NOT NULL,
            stream TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classrooms_school ON classrooms(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            admission_no TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    ensure_students_updated_at(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_school ON students(school_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_school_sort ON students(school_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            classroom_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            PRIMARY KEY(classroom_id, student_id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_assignments(
            teacher_id TEXT NOT NULL,
            classroom_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            PRIMARY KEY(teacher_id, classroom_id, subject_id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teacher_assignments_classroom
         ON teacher_assignments(classroom_id, subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_scales(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_scales_school ON grade_scales(school_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_scale_steps(
            id TEXT PRIMARY KEY,
            scale_id TEXT NOT NULL,
            min_percent REAL NOT NULL,
            max_percent REAL NOT NULL,
            grade_label TEXT NOT NULL,
            comment TEXT NOT NULL DEFAULT '',
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(scale_id) REFERENCES grade_scales(id),
            UNIQUE(scale_id, sort_order)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_scale_steps_scale ON grade_scale_steps(scale_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessment_plans(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            title TEXT NOT NULL,
            max_score REAL NOT NULL,
            weight REAL NOT NULL,
            sort_order INTEGER NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            FOREIGN KEY(term_id) REFERENCES terms(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(term_id, subject_id, title)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessment_plans_term_subject
         ON assessment_plans(term_id, subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            assessment_plan_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            classroom_id TEXT NOT NULL,
            score REAL,
            is_locked INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            FOREIGN KEY(assessment_plan_id) REFERENCES assessment_plans(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            UNIQUE(assessment_plan_id, student_id)
        )",
        [],
    )?;
    ensure_grades_is_locked(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_plan ON grades(assessment_plan_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student ON grades(student_id)",
        [],
    )?;

    Ok(conn)
}

// Workspaces created before grade locking shipped have a grades table
// without is_locked. Add it; existing rows stay editable.
fn ensure_grades_is_locked(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "grades", "is_locked")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE grades ADD COLUMN is_locked INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn ensure_students_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
