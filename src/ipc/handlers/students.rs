use crate::ipc::helpers::{
    get_required_str, new_id, now_millis, require_iso_date, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;

const STUDENT_COLUMNS: &str = "id, student_no, full_name, date_of_birth, gender, address,
    parent_name, parent_phone, relationship, academic_year, class_form, created_at, updated_at";

pub fn student_json(row: &Row) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "studentNo": row.get::<_, String>(1)?,
        "fullName": row.get::<_, String>(2)?,
        "dateOfBirth": row.get::<_, String>(3)?,
        "gender": row.get::<_, String>(4)?,
        "address": row.get::<_, String>(5)?,
        "parentName": row.get::<_, String>(6)?,
        "parentPhone": row.get::<_, String>(7)?,
        "relationship": row.get::<_, String>(8)?,
        "academicYear": row.get::<_, String>(9)?,
        "classForm": row.get::<_, String>(10)?,
        "createdAt": row.get::<_, i64>(11)?,
        "updatedAt": row.get::<_, i64>(12)?,
    }))
}

struct StudentInput {
    student_no: String,
    full_name: String,
    date_of_birth: String,
    gender: String,
    address: String,
    parent_name: String,
    parent_phone: String,
    relationship: String,
    academic_year: String,
    class_form: String,
}

fn parse_student_input(params: &serde_json::Value) -> Result<StudentInput, HandlerErr> {
    let input = StudentInput {
        student_no: get_required_str(params, "studentNo")?,
        full_name: get_required_str(params, "fullName")?,
        date_of_birth: get_required_str(params, "dateOfBirth")?,
        gender: get_required_str(params, "gender")?,
        address: get_required_str(params, "address")?,
        parent_name: get_required_str(params, "parentName")?,
        parent_phone: get_required_str(params, "parentPhone")?,
        relationship: get_required_str(params, "relationship")?,
        academic_year: get_required_str(params, "academicYear")?,
        class_form: get_required_str(params, "classForm")?,
    };
    require_iso_date(&input.date_of_birth, "dateOfBirth")?;
    Ok(input)
}

fn students_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let sql = format!(
        "SELECT {} FROM students ORDER BY created_at DESC",
        STUDENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let students = stmt
        .query_map([], student_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "students": students }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let input = parse_student_input(params)?;

    let existing = conn
        .query_row(
            "SELECT 1 FROM students WHERE student_no = ?",
            [&input.student_no],
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    if existing.is_some() {
        return Err(HandlerErr::new(
            "duplicate_student",
            "a student with this number already exists",
        ));
    }

    let id = new_id();
    let now = now_millis();
    conn.execute(
        "INSERT INTO students(id, student_no, full_name, date_of_birth, gender, address,
            parent_name, parent_phone, relationship, academic_year, class_form,
            created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            input.student_no,
            input.full_name,
            input.date_of_birth,
            input.gender,
            input.address,
            input.parent_name,
            input.parent_phone,
            input.relationship,
            input.academic_year,
            input.class_form,
            now,
            now,
        ],
    )
    .map_err(HandlerErr::db_update)?;

    Ok(json!({ "studentId": id }))
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let input = parse_student_input(params)?;

    let existing = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?;
    if existing.is_none() {
        return Err(HandlerErr::not_found("student not found"));
    }

    conn.execute(
        "UPDATE students SET student_no = ?, full_name = ?, date_of_birth = ?, gender = ?,
            address = ?, parent_name = ?, parent_phone = ?, relationship = ?,
            academic_year = ?, class_form = ?, updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            input.student_no,
            input.full_name,
            input.date_of_birth,
            input.gender,
            input.address,
            input.parent_name,
            input.parent_phone,
            input.relationship,
            input.academic_year,
            input.class_form,
            now_millis(),
            id,
        ],
    )
    .map_err(HandlerErr::db_update)?;

    Ok(json!({ "ok": true }))
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let existing = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?;
    if existing.is_none() {
        return Err(HandlerErr::not_found("student not found"));
    }
    conn.execute("DELETE FROM students WHERE id = ?", [&id])
        .map_err(HandlerErr::db_update)?;
    Ok(json!({ "ok": true }))
}

fn students_search(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let term = get_required_str(params, "searchTerm")?;
    let term = term.trim().to_string();
    if term.chars().count() < 2 {
        return Ok(json!({ "students": [] }));
    }
    let pattern = format!("%{}%", term);
    let sql = format!(
        "SELECT {} FROM students
         WHERE full_name LIKE ?1 OR student_no LIKE ?1
         ORDER BY full_name
         LIMIT 10",
        STUDENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let students = stmt
        .query_map([&pattern], student_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "students": students }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(with_conn(state, req, |c, _| students_list(c))),
        "students.create" => Some(with_conn(state, req, students_create)),
        "students.update" => Some(with_conn(state, req, students_update)),
        "students.delete" => Some(with_conn(state, req, students_delete)),
        "students.search" => Some(with_conn(state, req, students_search)),
        _ => None,
    }
}
