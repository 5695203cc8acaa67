use crate::ipc::helpers::{get_required_str, new_id, now_millis, with_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn years_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, year, created_at, updated_at
             FROM academic_years
             ORDER BY created_at DESC",
        )
        .map_err(HandlerErr::db_query)?;
    let years = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "year": row.get::<_, String>(1)?,
                "createdAt": row.get::<_, i64>(2)?,
                "updatedAt": row.get::<_, Option<i64>>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "years": years }))
}

fn years_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let year = get_required_str(params, "year")?;

    let existing = conn
        .query_row(
            "SELECT 1 FROM academic_years WHERE year = ?",
            [&year],
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    if existing.is_some() {
        return Err(HandlerErr::new(
            "duplicate_year",
            "this academic year already exists",
        ));
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO academic_years(id, year, created_at) VALUES(?, ?, ?)",
        rusqlite::params![id, year, now_millis()],
    )
    .map_err(HandlerErr::db_update)?;
    Ok(json!({ "yearId": id }))
}

fn years_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let year = get_required_str(params, "year")?;

    // Another record with the same label is a collision; renaming in place is fine.
    let clash = conn
        .query_row(
            "SELECT id FROM academic_years WHERE year = ?",
            [&year],
            |r| r.get::<_, String>(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    if let Some(existing_id) = clash {
        if existing_id != id {
            return Err(HandlerErr::new(
                "duplicate_year",
                "another record with this year already exists",
            ));
        }
    }

    let updated = conn
        .execute(
            "UPDATE academic_years SET year = ?, updated_at = ? WHERE id = ?",
            rusqlite::params![year, now_millis(), id],
        )
        .map_err(HandlerErr::db_update)?;
    if updated == 0 {
        return Err(HandlerErr::not_found("academic year not found"));
    }
    Ok(json!({ "ok": true }))
}

fn years_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let deleted = conn
        .execute("DELETE FROM academic_years WHERE id = ?", [&id])
        .map_err(HandlerErr::db_update)?;
    if deleted == 0 {
        return Err(HandlerErr::not_found("academic year not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "years.list" => Some(with_conn(state, req, |c, _| years_list(c))),
        "years.create" => Some(with_conn(state, req, years_create)),
        "years.update" => Some(with_conn(state, req, years_update)),
        "years.delete" => Some(with_conn(state, req, years_delete)),
        _ => None,
    }
}
