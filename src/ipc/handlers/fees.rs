use crate::ipc::helpers::{
    get_optional_str, get_required_array, get_required_f64, get_required_str, new_id, now_millis,
    with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn fees_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, description, amount, created_at, updated_at
             FROM fees
             ORDER BY created_at DESC",
        )
        .map_err(HandlerErr::db_query)?;
    let fees = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "description": row.get::<_, String>(2)?,
                "amount": row.get::<_, f64>(3)?,
                "createdAt": row.get::<_, i64>(4)?,
                "updatedAt": row.get::<_, Option<i64>>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "fees": fees }))
}

fn fees_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let description = get_optional_str(params, "description").unwrap_or_default();
    let amount = get_required_f64(params, "amount")?;

    let existing = conn
        .query_row("SELECT 1 FROM fees WHERE name = ?", [&name], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?;
    if existing.is_some() {
        return Err(HandlerErr::new(
            "duplicate_name",
            "fee category already exists",
        ));
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO fees(id, name, description, amount, created_at) VALUES(?, ?, ?, ?, ?)",
        rusqlite::params![id, name, description, amount, now_millis()],
    )
    .map_err(HandlerErr::db_update)?;
    Ok(json!({ "feeId": id }))
}

fn fees_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let name = get_required_str(params, "name")?;
    let description = get_optional_str(params, "description").unwrap_or_default();
    let amount = get_required_f64(params, "amount")?;

    let updated = conn
        .execute(
            "UPDATE fees SET name = ?, description = ?, amount = ?, updated_at = ? WHERE id = ?",
            rusqlite::params![name, description, amount, now_millis(), id],
        )
        .map_err(HandlerErr::db_update)?;
    if updated == 0 {
        return Err(HandlerErr::not_found("fee not found"));
    }
    Ok(json!({ "ok": true }))
}

fn fees_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let deleted = conn
        .execute("DELETE FROM fees WHERE id = ?", [&id])
        .map_err(HandlerErr::db_update)?;
    if deleted == 0 {
        return Err(HandlerErr::not_found("fee not found"));
    }
    Ok(json!({ "ok": true }))
}

fn class_exists(conn: &Connection, class_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db_query)
}

fn fee_structure_list_by_class(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }
    let mut stmt = conn
        .prepare(
            "SELECT id, fee_name, amount FROM fee_structure WHERE class_id = ? ORDER BY fee_name",
        )
        .map_err(HandlerErr::db_query)?;
    let items = stmt
        .query_map([&class_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "feeName": row.get::<_, String>(1)?,
                "amount": row.get::<_, f64>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "items": items }))
}

fn fee_structure_upsert(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }
    let raw_items = get_required_array(params, "items")?;
    let mut items = Vec::with_capacity(raw_items.len());
    for item in raw_items {
        let fee_name = get_required_str(item, "feeName")?;
        let amount = get_required_f64(item, "amount")?;
        items.push((fee_name, amount));
    }

    // Replace the class's fee lines wholesale; the UI edits them as one form.
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute("DELETE FROM fee_structure WHERE class_id = ?", [&class_id])
        .map_err(HandlerErr::db_update)?;
    for (fee_name, amount) in &items {
        tx.execute(
            "INSERT INTO fee_structure(id, class_id, fee_name, amount) VALUES(?, ?, ?, ?)",
            rusqlite::params![new_id(), class_id, fee_name, amount],
        )
        .map_err(HandlerErr::db_update)?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "count": items.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "fees.list" => Some(with_conn(state, req, |c, _| fees_list(c))),
        "fees.create" => Some(with_conn(state, req, fees_create)),
        "fees.update" => Some(with_conn(state, req, fees_update)),
        "fees.delete" => Some(with_conn(state, req, fees_delete)),
        "feeStructure.listByClass" => Some(with_conn(state, req, fee_structure_list_by_class)),
        "feeStructure.upsert" => Some(with_conn(state, req, fee_structure_upsert)),
        _ => None,
    }
}
