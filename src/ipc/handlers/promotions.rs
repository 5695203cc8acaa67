use crate::ipc::handlers::students::student_json;
use crate::ipc::helpers::{
    get_required_str, get_required_str_array, new_id, now_millis, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn promotions_eligible(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let from_year = get_required_str(params, "fromYear")?;
    let from_class = get_required_str(params, "fromClass")?;

    let mut stmt = conn
        .prepare(
            "SELECT id, student_no, full_name, date_of_birth, gender, address,
                    parent_name, parent_phone, relationship, academic_year, class_form,
                    created_at, updated_at
             FROM students
             WHERE academic_year = ? AND class_form = ?
             ORDER BY full_name",
        )
        .map_err(HandlerErr::db_query)?;
    let students = stmt
        .query_map((&from_year, &from_class), student_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "students": students }))
}

/// Move a batch of students to a new class and year, writing one immutable
/// audit row per student. The whole batch commits or none of it does.
fn promotions_promote(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_ids = get_required_str_array(params, "studentIds")?;
    let from_year = get_required_str(params, "fromYear")?;
    let to_year = get_required_str(params, "toYear")?;
    let from_class = get_required_str(params, "fromClass")?;
    let to_class = get_required_str(params, "toClass")?;

    let date_promoted = Utc::now().to_rfc3339();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for student_id in &student_ids {
        let exists = tx
            .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
                r.get::<_, i64>(0)
            })
            .optional()
            .map_err(HandlerErr::db_query)?
            .is_some();
        if !exists {
            return Err(HandlerErr::not_found(format!(
                "student not found: {}",
                student_id
            )));
        }
        tx.execute(
            "UPDATE students SET academic_year = ?, class_form = ?, updated_at = ? WHERE id = ?",
            rusqlite::params![to_year, to_class, now_millis(), student_id],
        )
        .map_err(HandlerErr::db_update)?;
        tx.execute(
            "INSERT INTO promotions(id, student_id, from_class, to_class, from_year, to_year,
                date_promoted)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                new_id(),
                student_id,
                from_class,
                to_class,
                from_year,
                to_year,
                date_promoted,
            ],
        )
        .map_err(HandlerErr::db_update)?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    tracing::info!(
        count = student_ids.len(),
        from = %from_class,
        to = %to_class,
        "students promoted"
    );
    Ok(json!({ "promoted": student_ids.len() }))
}

fn promotions_list(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, student_id, from_class, to_class, from_year, to_year, date_promoted
             FROM promotions
             ORDER BY date_promoted DESC",
        )
        .map_err(HandlerErr::db_query)?;
    let promotions = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "studentId": row.get::<_, String>(1)?,
                "fromClass": row.get::<_, String>(2)?,
                "toClass": row.get::<_, String>(3)?,
                "fromYear": row.get::<_, String>(4)?,
                "toYear": row.get::<_, String>(5)?,
                "datePromoted": row.get::<_, String>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "promotions": promotions }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "promotions.eligible" => Some(with_conn(state, req, promotions_eligible)),
        "promotions.promote" => Some(with_conn(state, req, promotions_promote)),
        "promotions.list" => Some(with_conn(state, req, promotions_list)),
        _ => None,
    }
}
