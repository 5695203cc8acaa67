use crate::ipc::handlers::students::student_json;
use crate::ipc::helpers::{
    get_optional_str, get_required_str, new_id, now_millis, require_iso_date, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

const STATUSES: [&str; 4] = ["present", "absent", "late", "excused"];

fn class_name_by_id(conn: &Connection, class_id: &str) -> Result<String, HandlerErr> {
    conn.query_row("SELECT name FROM classes WHERE id = ?", [class_id], |r| {
        r.get(0)
    })
    .optional()
    .map_err(HandlerErr::db_query)?
    .ok_or_else(|| HandlerErr::not_found("class not found"))
}

/// Students of a class, each merged with the attendance status recorded for
/// the requested date (null when unmarked).
fn attendance_roster(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = get_optional_str(params, "date");
    if let Some(date) = date.as_deref() {
        require_iso_date(date, "date")?;
    }
    let class_name = class_name_by_id(conn, &class_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT id, student_no, full_name, date_of_birth, gender, address,
                    parent_name, parent_phone, relationship, academic_year, class_form,
                    created_at, updated_at
             FROM students WHERE class_form = ? ORDER BY full_name",
        )
        .map_err(HandlerErr::db_query)?;
    let mut students = stmt
        .query_map([&class_name], student_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    if let Some(date) = date {
        let mut by_student: HashMap<String, String> = HashMap::new();
        let mut att_stmt = conn
            .prepare("SELECT student_id, status FROM attendance WHERE class_id = ? AND date = ?")
            .map_err(HandlerErr::db_query)?;
        let rows = att_stmt
            .query_map((&class_id, &date), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db_query)?;
        for (student_id, status) in rows {
            by_student.insert(student_id, status);
        }
        for student in &mut students {
            let id = student
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            student["status"] = match by_student.get(&id) {
                Some(status) => json!(status),
                None => serde_json::Value::Null,
            };
        }
    }

    Ok(json!({ "students": students }))
}

/// One attendance cell per student per date; marking twice replaces the
/// earlier status.
fn attendance_mark(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let class_id = get_required_str(params, "classId")?;
    let date = get_required_str(params, "date")?;
    require_iso_date(&date, "date")?;
    let status = get_required_str(params, "status")?;
    if !STATUSES.contains(&status.as_str()) {
        return Err(HandlerErr::bad_params(
            "status must be present, absent, late or excused",
        ));
    }

    class_name_by_id(conn, &class_id)?;
    let student_exists = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?
        .is_some();
    if !student_exists {
        return Err(HandlerErr::not_found("student not found"));
    }

    conn.execute(
        "INSERT INTO attendance(id, student_id, class_id, date, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, date) DO UPDATE SET
           status = excluded.status",
        rusqlite::params![new_id(), student_id, class_id, date, status, now_millis()],
    )
    .map_err(HandlerErr::db_update)?;
    Ok(json!({ "ok": true }))
}

/// Per-student attendance records and counts over a date range.
fn attendance_report(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let start_date = get_required_str(params, "startDate")?;
    let end_date = get_required_str(params, "endDate")?;
    require_iso_date(&start_date, "startDate")?;
    require_iso_date(&end_date, "endDate")?;
    let class_name = class_name_by_id(conn, &class_id)?;

    let mut stmt = conn
        .prepare("SELECT id, full_name FROM students WHERE class_form = ? ORDER BY full_name")
        .map_err(HandlerErr::db_query)?;
    let students = stmt
        .query_map([&class_name], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let mut att_stmt = conn
        .prepare(
            "SELECT student_id, date, status FROM attendance
             WHERE class_id = ? AND date >= ? AND date <= ?
             ORDER BY date",
        )
        .map_err(HandlerErr::db_query)?;
    let records = att_stmt
        .query_map((&class_id, &start_date, &end_date), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let mut by_student: HashMap<String, Vec<(String, String)>> = HashMap::new();
    for (student_id, date, status) in records {
        by_student
            .entry(student_id)
            .or_default()
            .push((date, status));
    }

    let report: Vec<serde_json::Value> = students
        .iter()
        .map(|(id, name)| {
            let empty = Vec::new();
            let records = by_student.get(id).unwrap_or(&empty);
            let count = |status: &str| records.iter().filter(|(_, s)| s == status).count();
            json!({
                "studentId": id,
                "studentName": name,
                "records": records.iter().map(|(date, status)| json!({
                    "date": date,
                    "status": status,
                })).collect::<Vec<_>>(),
                "totalPresent": count("present"),
                "totalAbsent": count("absent"),
                "totalLate": count("late"),
                "totalExcused": count("excused"),
            })
        })
        .collect();

    Ok(json!({ "report": report }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.roster" => Some(with_conn(state, req, attendance_roster)),
        "attendance.mark" => Some(with_conn(state, req, attendance_mark)),
        "attendance.report" => Some(with_conn(state, req, attendance_report)),
        _ => None,
    }
}
