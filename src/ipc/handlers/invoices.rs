use crate::ipc::helpers::{
    get_optional_str, get_required_array, get_required_f64, get_required_str, new_id, now_millis,
    require_iso_date, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::InvoiceStatus;
use rusqlite::Connection;
use serde_json::json;

#[derive(Debug, Clone)]
pub struct InvoiceItem {
    pub name: String,
    pub quantity: f64,
    pub amount: f64,
}

#[derive(Debug, Clone)]
pub struct InvoiceRecord {
    pub id: String,
    pub class_id: Option<String>,
    pub student_id: Option<String>,
    pub student_name: Option<String>,
    pub invoice_number: Option<String>,
    pub due_date: String,
    pub notes: String,
    pub status: InvoiceStatus,
    pub remaining_balance: Option<f64>,
    pub last_payment_date: Option<String>,
    pub last_payment_id: Option<String>,
    pub created_at: i64,
    pub items: Vec<InvoiceItem>,
}

impl InvoiceRecord {
    /// Total is always derived from the line items, never stored.
    pub fn total_amount(&self) -> f64 {
        self.items
            .iter()
            .map(|item| item.quantity * item.amount)
            .sum()
    }

    /// Stored remaining balance when a payment has touched the invoice,
    /// otherwise the full derived total.
    pub fn effective_remaining(&self) -> f64 {
        self.remaining_balance.unwrap_or_else(|| self.total_amount())
    }
}

/// Load invoices with their line items, optionally scoped to a student
/// and/or class.
pub fn load_invoices(
    conn: &Connection,
    student_id: Option<&str>,
    class_id: Option<&str>,
) -> Result<Vec<InvoiceRecord>, HandlerErr> {
    let mut sql = String::from(
        "SELECT id, class_id, student_id, student_name, invoice_number, due_date, notes,
                status, remaining_balance, last_payment_date, last_payment_id, created_at
         FROM invoices",
    );
    let mut clauses = Vec::new();
    let mut args: Vec<String> = Vec::new();
    if let Some(student_id) = student_id {
        clauses.push("student_id = ?");
        args.push(student_id.to_string());
    }
    if let Some(class_id) = class_id {
        clauses.push("class_id = ?");
        args.push(class_id.to_string());
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY created_at DESC");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let mut rows = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, Option<f64>>(8)?,
                row.get::<_, Option<String>>(9)?,
                row.get::<_, Option<String>>(10)?,
                row.get::<_, i64>(11)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let mut items_stmt = conn
        .prepare(
            "SELECT name, quantity, amount FROM invoice_items
             WHERE invoice_id = ? ORDER BY sort_order",
        )
        .map_err(HandlerErr::db_query)?;

    let mut invoices = Vec::with_capacity(rows.len());
    for (
        id,
        class_id,
        student_id,
        student_name,
        invoice_number,
        due_date,
        notes,
        status_raw,
        remaining_balance,
        last_payment_date,
        last_payment_id,
        created_at,
    ) in rows.drain(..)
    {
        let status = InvoiceStatus::parse(&status_raw).ok_or_else(|| {
            HandlerErr::new(
                "invalid_invoice_status",
                format!("invoice {} has status {}", id, status_raw),
            )
        })?;
        let items = items_stmt
            .query_map([&id], |row| {
                Ok(InvoiceItem {
                    name: row.get(0)?,
                    quantity: row.get(1)?,
                    amount: row.get(2)?,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db_query)?;
        invoices.push(InvoiceRecord {
            id,
            class_id,
            student_id,
            student_name,
            invoice_number,
            due_date,
            notes,
            status,
            remaining_balance,
            last_payment_date,
            last_payment_id,
            created_at,
            items,
        });
    }
    Ok(invoices)
}

pub fn invoice_json(invoice: &InvoiceRecord) -> serde_json::Value {
    json!({
        "id": invoice.id,
        "classId": invoice.class_id,
        "studentId": invoice.student_id,
        "studentName": invoice.student_name,
        "invoiceNumber": invoice.invoice_number,
        "dueDate": invoice.due_date,
        "notes": invoice.notes,
        "status": invoice.status.as_str(),
        "totalAmount": invoice.total_amount(),
        "remainingBalance": invoice.effective_remaining(),
        "lastPaymentDate": invoice.last_payment_date,
        "lastPaymentId": invoice.last_payment_id,
        "createdAt": invoice.created_at,
        "items": invoice.items.iter().map(|item| json!({
            "name": item.name,
            "quantity": item.quantity,
            "amount": item.amount,
        })).collect::<Vec<_>>(),
    })
}

fn parse_items(params: &serde_json::Value) -> Result<Vec<InvoiceItem>, HandlerErr> {
    let raw = get_required_array(params, "items")?;
    if raw.is_empty() {
        return Err(HandlerErr::bad_params("items must not be empty"));
    }
    let mut items = Vec::with_capacity(raw.len());
    for item in raw {
        items.push(InvoiceItem {
            name: get_required_str(item, "name")?,
            quantity: get_required_f64(item, "quantity")?,
            amount: get_required_f64(item, "amount")?,
        });
    }
    Ok(items)
}

/// Create one PENDING invoice per student currently in the class.
fn invoices_generate(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let items = parse_items(params)?;
    let due_date = get_required_str(params, "dueDate")?;
    require_iso_date(&due_date, "dueDate")?;
    let notes = get_optional_str(params, "notes").unwrap_or_default();

    let class_name: String = conn
        .query_row("SELECT name FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .map_err(|_| HandlerErr::not_found("class not found"))?;

    // Membership is by class name: students carry the form they sit in,
    // not a foreign key to the class row.
    let mut stmt = conn
        .prepare("SELECT id, full_name FROM students WHERE class_form = ? ORDER BY full_name")
        .map_err(HandlerErr::db_query)?;
    let students = stmt
        .query_map([&class_name], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    if students.is_empty() {
        return Err(HandlerErr::new(
            "no_students",
            format!("no students found in class: {}", class_name),
        ));
    }

    let created_at = now_millis();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let mut invoice_ids = Vec::with_capacity(students.len());
    for (index, (student_id, student_name)) in students.iter().enumerate() {
        let invoice_id = new_id();
        let invoice_number = format!("INV-{}-{}", created_at, index);
        tx.execute(
            "INSERT INTO invoices(id, class_id, student_id, student_name, invoice_number,
                due_date, notes, status, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                invoice_id,
                class_id,
                student_id,
                student_name,
                invoice_number,
                due_date,
                notes,
                InvoiceStatus::Pending.as_str(),
                created_at,
            ],
        )
        .map_err(HandlerErr::db_update)?;
        for (sort_order, item) in items.iter().enumerate() {
            tx.execute(
                "INSERT INTO invoice_items(id, invoice_id, name, quantity, amount, sort_order)
                 VALUES(?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    new_id(),
                    invoice_id,
                    item.name,
                    item.quantity,
                    item.amount,
                    sort_order as i64,
                ],
            )
            .map_err(HandlerErr::db_update)?;
        }
        invoice_ids.push(invoice_id);
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    tracing::info!(class = %class_name, count = invoice_ids.len(), "invoices generated");
    Ok(json!({ "invoiceIds": invoice_ids, "count": invoice_ids.len() }))
}

fn invoices_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let invoices = load_invoices(conn, None, None)?;
    Ok(json!({
        "invoices": invoices.iter().map(invoice_json).collect::<Vec<_>>()
    }))
}

fn invoices_for_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let invoices = load_invoices(conn, Some(&student_id), None)?;
    Ok(json!({
        "invoices": invoices.iter().map(invoice_json).collect::<Vec<_>>()
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "invoices.generate" => Some(with_conn(state, req, invoices_generate)),
        "invoices.list" => Some(with_conn(state, req, |c, _| invoices_list(c))),
        "invoices.forStudent" => Some(with_conn(state, req, invoices_for_student)),
        _ => None,
    }
}
