use crate::db;
use crate::ipc::handlers::invoices::{invoice_json, load_invoices};
use crate::ipc::handlers::payments::{
    overpayment_policy, payment_json, OVERPAYMENT_POLICY_KEY, PAYMENT_COLUMNS,
};
use crate::ipc::helpers::{
    get_optional_str, get_required_str, now_millis, require_iso_date, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, InvoiceStatus, InvoiceView, OverpaymentPolicy};
use chrono::{DateTime, NaiveDate, NaiveTime};
use rusqlite::Connection;
use serde_json::json;
use std::collections::BTreeMap;

/// Billed/paid/pending totals for one student, with the five most recent
/// payments and every invoice flattened with its derived amounts.
fn student_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let class_id = get_optional_str(params, "classId");

    let invoices = load_invoices(conn, Some(&student_id), class_id.as_deref())?;
    let views: Vec<InvoiceView> = invoices
        .iter()
        .map(|invoice| InvoiceView {
            total_amount: invoice.total_amount(),
            remaining_balance: invoice.remaining_balance,
            status: invoice.status,
        })
        .collect();
    let summary = ledger::summarize(&views);

    let credit_balance: f64 = conn
        .query_row(
            "SELECT COALESCE(SUM(unallocated_amount), 0) FROM payments WHERE student_id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;

    let sql = format!(
        "SELECT {} FROM payments WHERE student_id = ? ORDER BY created_at DESC LIMIT 5",
        PAYMENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let recent_payments = stmt
        .query_map([&student_id], payment_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({
        "totalFees": summary.total_fees,
        "paidAmount": summary.paid_amount,
        "pendingAmount": summary.pending_amount,
        "balance": summary.balance,
        "creditBalance": credit_balance,
        "recentPayments": recent_payments,
        "invoices": invoices.iter().map(invoice_json).collect::<Vec<_>>(),
    }))
}

fn date_to_millis(raw: &str, key: &str) -> Result<i64, HandlerErr> {
    require_iso_date(raw, key)?;
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))?;
    Ok(date.and_time(NaiveTime::MIN).and_utc().timestamp_millis())
}

fn millis_to_date(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

struct PaymentRow {
    student_name: String,
    amount: f64,
    method: String,
    notes: Option<String>,
    created_at: i64,
}

fn load_payment_rows(conn: &Connection) -> Result<Vec<PaymentRow>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT student_name, amount, method, notes, created_at FROM payments")
        .map_err(HandlerErr::db_query)?;
    stmt.query_map([], |row| {
        Ok(PaymentRow {
            student_name: row.get(0)?,
            amount: row.get(1)?,
            method: row.get(2)?,
            notes: row.get(3)?,
            created_at: row.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db_query)
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Report rows for the financial reports screen: an income statement from
/// payments, outstanding balances from open invoices, or per-method payment
/// totals.
fn report_data(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let report_type = get_required_str(params, "reportType")?;
    let start_date = get_optional_str(params, "startDate");
    let end_date = get_optional_str(params, "endDate");
    let category = get_optional_str(params, "category").filter(|c| c != "all");

    let start_ts = match start_date.as_deref() {
        Some(raw) => date_to_millis(raw, "startDate")?,
        None => 0,
    };
    let end_ts = match end_date.as_deref() {
        Some(raw) => date_to_millis(raw, "endDate")?,
        None => now_millis(),
    };

    let rows = match report_type.as_str() {
        "income" => load_payment_rows(conn)?
            .into_iter()
            .filter(|p| p.created_at >= start_ts && p.created_at <= end_ts)
            .filter(|p| match &category {
                Some(c) => p.notes.as_deref().is_some_and(|n| contains_ci(n, c)),
                None => true,
            })
            .map(|p| {
                json!({
                    "date": millis_to_date(p.created_at),
                    "description": format!("Payment from {}", p.student_name),
                    "category": p.method,
                    "amount": p.amount,
                    "type": "income",
                })
            })
            .collect::<Vec<_>>(),
        "balances" => load_invoices(conn, None, None)?
            .into_iter()
            .filter(|i| i.status != InvoiceStatus::Paid)
            .filter(|i| match &category {
                Some(c) => i
                    .student_name
                    .as_deref()
                    .is_some_and(|n| contains_ci(n, c)),
                None => true,
            })
            .map(|i| {
                let outstanding = i.effective_remaining();
                json!({
                    "date": i.due_date,
                    "description": format!(
                        "Invoice for {}",
                        i.student_name.as_deref().unwrap_or("Unknown Student")
                    ),
                    "category": "Outstanding",
                    "amount": outstanding,
                    "type": "balance",
                })
            })
            .collect::<Vec<_>>(),
        "summary" => {
            let mut by_method: BTreeMap<String, f64> = BTreeMap::new();
            for p in load_payment_rows(conn)? {
                if p.created_at < start_ts || p.created_at > end_ts {
                    continue;
                }
                if let Some(c) = &category {
                    if !contains_ci(&p.method, c) {
                        continue;
                    }
                }
                *by_method.entry(p.method).or_insert(0.0) += p.amount;
            }
            let date_label = start_date.clone().unwrap_or_else(|| "All time".to_string());
            by_method
                .into_iter()
                .map(|(method, amount)| {
                    json!({
                        "date": date_label,
                        "description": format!("Total payments via {}", method),
                        "category": "Summary",
                        "amount": amount,
                        "type": "summary",
                    })
                })
                .collect::<Vec<_>>()
        }
        other => {
            return Err(HandlerErr::bad_params(format!(
                "unknown reportType: {}",
                other
            )))
        }
    };

    Ok(json!({ "rows": rows }))
}

fn payment_categories(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT DISTINCT method FROM payments ORDER BY method")
        .map_err(HandlerErr::db_query)?;
    let categories = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "categories": categories }))
}

fn policy_get(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let policy = overpayment_policy(conn)?;
    Ok(json!({ "policy": policy.as_str() }))
}

fn policy_set(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let raw = get_required_str(params, "policy")?;
    let policy = OverpaymentPolicy::parse(&raw)
        .ok_or_else(|| HandlerErr::bad_params("policy must be ignore, reject or credit"))?;
    db::settings_set(conn, OVERPAYMENT_POLICY_KEY, policy.as_str())
        .map_err(HandlerErr::db_update)?;
    tracing::info!(policy = policy.as_str(), "overpayment policy changed");
    Ok(json!({ "policy": policy.as_str() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "finance.studentSummary" => Some(with_conn(state, req, student_summary)),
        "finance.reportData" => Some(with_conn(state, req, report_data)),
        "finance.categories" => Some(with_conn(state, req, |c, _| payment_categories(c))),
        "finance.policy.get" => Some(with_conn(state, req, |c, _| policy_get(c))),
        "finance.policy.set" => Some(with_conn(state, req, policy_set)),
        _ => None,
    }
}
