use crate::ipc::helpers::{
    get_required_array, get_required_f64, get_required_str, get_required_str_array, new_id,
    now_millis, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;

fn grade_json(row: &Row) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "studentId": row.get::<_, String>(1)?,
        "academicYear": row.get::<_, String>(2)?,
        "subject": row.get::<_, String>(3)?,
        "marks": row.get::<_, f64>(4)?,
        "createdAt": row.get::<_, i64>(5)?,
        "updatedAt": row.get::<_, Option<i64>>(6)?,
    }))
}

const GRADE_COLUMNS: &str =
    "id, student_id, academic_year, subject, marks, created_at, updated_at";

/// Bulk upsert of one subject's marks for a year; a re-entered mark replaces
/// the earlier one.
fn grades_set(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let academic_year = get_required_str(params, "academicYear")?;
    let subject = get_required_str(params, "subject")?;
    let entries = get_required_array(params, "grades")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for entry in entries {
        let student_id = get_required_str(entry, "studentId")?;
        let marks = get_required_f64(entry, "marks")?;
        tx.execute(
            "INSERT INTO grades(id, student_id, academic_year, subject, marks, created_at)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, academic_year, subject) DO UPDATE SET
               marks = excluded.marks,
               updated_at = excluded.created_at",
            rusqlite::params![new_id(), student_id, academic_year, subject, marks, now_millis()],
        )
        .map_err(HandlerErr::db_update)?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "count": entries.len() }))
}

fn grades_for_class(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let academic_year = get_required_str(params, "academicYear")?;
    let subject = get_required_str(params, "subject")?;
    let student_ids = get_required_str_array(params, "studentIds")?;

    let sql = format!(
        "SELECT {} FROM grades
         WHERE student_id = ? AND academic_year = ? AND subject = ?",
        GRADE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let mut grades = Vec::new();
    for student_id in &student_ids {
        let row = stmt
            .query_row((student_id, &academic_year, &subject), grade_json)
            .optional()
            .map_err(HandlerErr::db_query)?;
        if let Some(grade) = row {
            grades.push(grade);
        }
    }
    Ok(json!({ "grades": grades }))
}

fn grades_for_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let academic_year = get_required_str(params, "academicYear")?;

    let sql = format!(
        "SELECT {} FROM grades
         WHERE student_id = ? AND academic_year = ?
         ORDER BY subject",
        GRADE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let grades = stmt
        .query_map((&student_id, &academic_year), grade_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "grades": grades }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.set" => Some(with_conn(state, req, grades_set)),
        "grades.forClass" => Some(with_conn(state, req, grades_for_class)),
        "grades.forStudent" => Some(with_conn(state, req, grades_for_student)),
        _ => None,
    }
}
