use crate::db;
use crate::ipc::helpers::{
    get_optional_str, get_required_bool, get_required_f64, get_required_str, new_id, now_millis,
    with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, InvoiceStatus, OpenInvoice, OverpaymentPolicy};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;

pub const OVERPAYMENT_POLICY_KEY: &str = "finance.overpayment_policy";

pub fn overpayment_policy(conn: &Connection) -> Result<OverpaymentPolicy, HandlerErr> {
    let stored = db::settings_get(conn, OVERPAYMENT_POLICY_KEY).map_err(HandlerErr::db_query)?;
    match stored {
        Some(raw) => OverpaymentPolicy::parse(&raw).ok_or_else(|| {
            HandlerErr::new(
                "invalid_setting",
                format!("unknown overpayment policy: {}", raw),
            )
        }),
        None => Ok(OverpaymentPolicy::default()),
    }
}

/// All invoices still owing money for one student, with totals derived
/// from their line items.
fn load_open_invoices(conn: &Connection, student_id: &str) -> Result<Vec<OpenInvoice>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT i.id, i.due_date, i.status, i.remaining_balance,
                    (SELECT COALESCE(SUM(it.quantity * it.amount), 0)
                     FROM invoice_items it WHERE it.invoice_id = i.id) AS total_amount
             FROM invoices i
             WHERE i.student_id = ? AND i.status != 'PAID'",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map([student_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<f64>>(3)?,
                row.get::<_, f64>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    rows.into_iter()
        .map(|(id, due_date, status_raw, remaining_balance, total_amount)| {
            let status = InvoiceStatus::parse(&status_raw).ok_or_else(|| {
                HandlerErr::new(
                    "invalid_invoice_status",
                    format!("invoice {} has status {}", id, status_raw),
                )
            })?;
            Ok(OpenInvoice {
                id,
                due_date,
                total_amount,
                remaining_balance,
                status,
            })
        })
        .collect()
}

/// Record a payment and apply it across the student's open invoices,
/// earliest due date first, as one atomic mutation.
fn payments_record(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let student_name = get_required_str(params, "studentName")?;
    let amount = get_required_f64(params, "amount")?;
    if !(amount > 0.0) {
        return Err(HandlerErr::bad_params("amount must be positive"));
    }
    let method = get_required_str(params, "paymentMethod")?;
    let reference = get_optional_str(params, "reference");
    let notes = get_optional_str(params, "notes");
    let send_receipt = get_required_bool(params, "sendReceipt")?;

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

    let policy = overpayment_policy(conn)?;
    let open_invoices = load_open_invoices(conn, &student_id)?;
    let outcome = ledger::allocate(&open_invoices, amount);

    if policy == OverpaymentPolicy::Reject && outcome.leftover > 0.0 {
        return Err(HandlerErr::new(
            "payment_rejected",
            format!(
                "payment exceeds the open balance by {:.2}",
                outcome.leftover
            ),
        ));
    }
    let unallocated = match policy {
        OverpaymentPolicy::Credit => outcome.leftover,
        _ => 0.0,
    };

    let payment_id = new_id();
    let created_at = now_millis();
    let payment_date = Utc::now().to_rfc3339();

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "INSERT INTO payments(id, student_id, student_name, amount, method, reference,
            notes, send_receipt, unallocated_amount, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            payment_id,
            student_id,
            student_name,
            amount,
            method,
            reference,
            notes,
            send_receipt as i64,
            unallocated,
            created_at,
        ],
    )
    .map_err(HandlerErr::db_update)?;
    for credit in &outcome.credits {
        tx.execute(
            "UPDATE invoices SET status = ?, remaining_balance = ?,
                last_payment_date = ?, last_payment_id = ?
             WHERE id = ?",
            rusqlite::params![
                credit.status,
                credit.remaining_balance,
                payment_date,
                payment_id,
                credit.invoice_id,
            ],
        )
        .map_err(HandlerErr::db_update)?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    tracing::info!(
        student_id = %student_id,
        amount,
        credited = outcome.credited_total,
        invoices = outcome.credits.len(),
        "payment recorded"
    );
    Ok(json!({ "paymentId": payment_id }))
}

pub fn payment_json(row: &Row) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "studentId": row.get::<_, String>(1)?,
        "studentName": row.get::<_, String>(2)?,
        "amount": row.get::<_, f64>(3)?,
        "paymentMethod": row.get::<_, String>(4)?,
        "reference": row.get::<_, Option<String>>(5)?,
        "notes": row.get::<_, Option<String>>(6)?,
        "sendReceipt": row.get::<_, i64>(7)? != 0,
        "unallocatedAmount": row.get::<_, f64>(8)?,
        "createdAt": row.get::<_, i64>(9)?,
    }))
}

pub const PAYMENT_COLUMNS: &str = "id, student_id, student_name, amount, method, reference,
    notes, send_receipt, unallocated_amount, created_at";

fn payments_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let sql = format!(
        "SELECT {} FROM payments ORDER BY created_at DESC",
        PAYMENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let payments = stmt
        .query_map([], payment_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "payments": payments }))
}

fn payments_for_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let sql = format!(
        "SELECT {} FROM payments WHERE student_id = ? ORDER BY created_at DESC",
        PAYMENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let payments = stmt
        .query_map([&student_id], payment_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "payments": payments }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "payments.record" => Some(with_conn(state, req, payments_record)),
        "payments.list" => Some(with_conn(state, req, |c, _| payments_list(c))),
        "payments.forStudent" => Some(with_conn(state, req, payments_for_student)),
        _ => None,
    }
}
