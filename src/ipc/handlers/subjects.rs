use crate::ipc::helpers::{
    get_optional_str, get_required_str, new_id, now_millis, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn subjects_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, description, created_at, updated_at
             FROM subjects
             ORDER BY name",
        )
        .map_err(HandlerErr::db_query)?;
    let subjects = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "description": row.get::<_, Option<String>>(2)?,
                "createdAt": row.get::<_, i64>(3)?,
                "updatedAt": row.get::<_, Option<i64>>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "subjects": subjects }))
}

fn subjects_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let description = get_optional_str(params, "description");

    let existing = conn
        .query_row("SELECT 1 FROM subjects WHERE name = ?", [&name], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?;
    if existing.is_some() {
        return Err(HandlerErr::new("duplicate_name", "subject already exists"));
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO subjects(id, name, description, created_at) VALUES(?, ?, ?, ?)",
        rusqlite::params![id, name, description, now_millis()],
    )
    .map_err(HandlerErr::db_update)?;
    Ok(json!({ "subjectId": id }))
}

fn subjects_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let name = get_required_str(params, "name")?;
    let description = get_optional_str(params, "description");

    let updated = conn
        .execute(
            "UPDATE subjects SET name = ?, description = ?, updated_at = ? WHERE id = ?",
            rusqlite::params![name, description, now_millis(), id],
        )
        .map_err(HandlerErr::db_update)?;
    if updated == 0 {
        return Err(HandlerErr::not_found("subject not found"));
    }
    Ok(json!({ "ok": true }))
}

fn subjects_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let deleted = conn
        .execute("DELETE FROM subjects WHERE id = ?", [&id])
        .map_err(HandlerErr::db_update)?;
    if deleted == 0 {
        return Err(HandlerErr::not_found("subject not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(with_conn(state, req, |c, _| subjects_list(c))),
        "subjects.create" => Some(with_conn(state, req, subjects_create)),
        "subjects.update" => Some(with_conn(state, req, subjects_update)),
        "subjects.delete" => Some(with_conn(state, req, subjects_delete)),
        _ => None,
    }
}
