use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schooldeskd");
    let mut child = Command::new(exe)
        .env("SCHOOLDESK_AI_PROVIDER", "mock")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schooldeskd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn create_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    student_no: &str,
    full_name: &str,
    class_form: &str,
) -> String {
    let result = request_ok(
        stdin,
        reader,
        "student",
        "students.create",
        json!({
            "studentNo": student_no,
            "fullName": full_name,
            "dateOfBirth": "2010-05-14",
            "gender": "F",
            "address": "12 Harbor Road",
            "parentName": "A. Guardian",
            "parentPhone": "555-0101",
            "relationship": "mother",
            "academicYear": "2024",
            "classForm": class_form,
        }),
    );
    result
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string()
}

fn setup_class_and_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    class_name: &str,
) -> String {
    let workspace = temp_dir("schooldesk-alloc");
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "class",
        "classes.create",
        json!({ "name": class_name }),
    );
    create_student(stdin, reader, "S-001", "Amara Okafor", class_name)
}

fn generate_invoice(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    class_id: &str,
    amount: f64,
    due_date: &str,
) {
    let _ = request_ok(
        stdin,
        reader,
        "invoice",
        "invoices.generate",
        json!({
            "classId": class_id,
            "items": [{ "name": "Tuition", "quantity": 1.0, "amount": amount }],
            "dueDate": due_date,
        }),
    );
}

fn class_id_by_name(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    name: &str,
) -> String {
    let result = request_ok(stdin, reader, "classes", "classes.list", json!({}));
    result
        .get("classes")
        .and_then(|v| v.as_array())
        .expect("classes")
        .iter()
        .find(|c| c.get("name").and_then(|v| v.as_str()) == Some(name))
        .and_then(|c| c.get("id"))
        .and_then(|v| v.as_str())
        .expect("class id")
        .to_string()
}

fn student_invoices(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    student_id: &str,
) -> Vec<serde_json::Value> {
    let result = request_ok(
        stdin,
        reader,
        "invoices",
        "invoices.forStudent",
        json!({ "studentId": student_id }),
    );
    result
        .get("invoices")
        .and_then(|v| v.as_array())
        .expect("invoices")
        .clone()
}

fn record_payment(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    student_id: &str,
    amount: f64,
) -> String {
    let result = request_ok(
        stdin,
        reader,
        "payment",
        "payments.record",
        json!({
            "studentId": student_id,
            "studentName": "Amara Okafor",
            "amount": amount,
            "paymentMethod": "cash",
            "sendReceipt": false,
        }),
    );
    result
        .get("paymentId")
        .and_then(|v| v.as_str())
        .expect("paymentId")
        .to_string()
}

#[test]
fn partial_payment_marks_invoice_partial_with_reduced_balance() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let student_id = setup_class_and_student(&mut stdin, &mut reader, "Form 1A");
    let class_id = class_id_by_name(&mut stdin, &mut reader, "Form 1A");
    generate_invoice(&mut stdin, &mut reader, &class_id, 5300.0, "2024-03-01");

    let _ = record_payment(&mut stdin, &mut reader, &student_id, 1000.0);

    let invoices = student_invoices(&mut stdin, &mut reader, &student_id);
    assert_eq!(invoices.len(), 1);
    assert_eq!(
        invoices[0].get("status").and_then(|v| v.as_str()),
        Some("PARTIAL")
    );
    assert_eq!(
        invoices[0].get("remainingBalance").and_then(|v| v.as_f64()),
        Some(4300.0)
    );
    assert_eq!(
        invoices[0].get("totalAmount").and_then(|v| v.as_f64()),
        Some(5300.0)
    );
}

#[test]
fn exact_followup_payment_settles_partial_invoice() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let student_id = setup_class_and_student(&mut stdin, &mut reader, "Form 1B");
    let class_id = class_id_by_name(&mut stdin, &mut reader, "Form 1B");
    generate_invoice(&mut stdin, &mut reader, &class_id, 5300.0, "2024-03-01");

    let first_payment = record_payment(&mut stdin, &mut reader, &student_id, 1000.0);
    let second_payment = record_payment(&mut stdin, &mut reader, &student_id, 4300.0);

    let invoices = student_invoices(&mut stdin, &mut reader, &student_id);
    assert_eq!(invoices.len(), 1);
    assert_eq!(
        invoices[0].get("status").and_then(|v| v.as_str()),
        Some("PAID")
    );
    assert_eq!(
        invoices[0].get("remainingBalance").and_then(|v| v.as_f64()),
        Some(0.0)
    );
    // The last payment that touched the invoice is recorded on it.
    assert_eq!(
        invoices[0].get("lastPaymentId").and_then(|v| v.as_str()),
        Some(second_payment.as_str())
    );
    assert_ne!(first_payment, second_payment);
}

#[test]
fn payment_settles_earliest_due_invoice_first_then_spills_over() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let student_id = setup_class_and_student(&mut stdin, &mut reader, "Form 2A");
    let class_id = class_id_by_name(&mut stdin, &mut reader, "Form 2A");
    generate_invoice(&mut stdin, &mut reader, &class_id, 300.0, "2024-02-10");
    generate_invoice(&mut stdin, &mut reader, &class_id, 200.0, "2024-01-10");

    let _ = record_payment(&mut stdin, &mut reader, &student_id, 250.0);

    let invoices = student_invoices(&mut stdin, &mut reader, &student_id);
    assert_eq!(invoices.len(), 2);
    let by_due = |due: &str| {
        invoices
            .iter()
            .find(|i| i.get("dueDate").and_then(|v| v.as_str()) == Some(due))
            .expect("invoice by due date")
    };
    let january = by_due("2024-01-10");
    let february = by_due("2024-02-10");

    assert_eq!(january.get("status").and_then(|v| v.as_str()), Some("PAID"));
    assert_eq!(
        january.get("remainingBalance").and_then(|v| v.as_f64()),
        Some(0.0)
    );
    assert_eq!(
        february.get("status").and_then(|v| v.as_str()),
        Some("PARTIAL")
    );
    assert_eq!(
        february.get("remainingBalance").and_then(|v| v.as_f64()),
        Some(250.0)
    );
}

#[test]
fn small_payment_touches_only_the_earliest_due_invoice() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let student_id = setup_class_and_student(&mut stdin, &mut reader, "Form 2B");
    let class_id = class_id_by_name(&mut stdin, &mut reader, "Form 2B");
    generate_invoice(&mut stdin, &mut reader, &class_id, 200.0, "2024-01-10");
    generate_invoice(&mut stdin, &mut reader, &class_id, 300.0, "2024-02-10");

    let _ = record_payment(&mut stdin, &mut reader, &student_id, 150.0);

    let invoices = student_invoices(&mut stdin, &mut reader, &student_id);
    let by_due = |due: &str| {
        invoices
            .iter()
            .find(|i| i.get("dueDate").and_then(|v| v.as_str()) == Some(due))
            .expect("invoice by due date")
    };
    assert_eq!(
        by_due("2024-01-10").get("status").and_then(|v| v.as_str()),
        Some("PARTIAL")
    );
    // The later invoice is untouched: still pending with no payment stamp.
    let february = by_due("2024-02-10");
    assert_eq!(
        february.get("status").and_then(|v| v.as_str()),
        Some("PENDING")
    );
    assert!(february
        .get("lastPaymentId")
        .map(|v| v.is_null())
        .unwrap_or(true));
}

#[test]
fn payment_with_no_open_invoices_is_recorded_without_allocation() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let student_id = setup_class_and_student(&mut stdin, &mut reader, "Form 3A");

    let payment_id = record_payment(&mut stdin, &mut reader, &student_id, 100.0);
    assert!(!payment_id.is_empty());

    let payments = request_ok(
        &mut stdin,
        &mut reader,
        "payments",
        "payments.forStudent",
        json!({ "studentId": student_id }),
    );
    let payments = payments
        .get("payments")
        .and_then(|v| v.as_array())
        .expect("payments");
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].get("amount").and_then(|v| v.as_f64()), Some(100.0));

    let invoices = student_invoices(&mut stdin, &mut reader, &student_id);
    assert!(invoices.is_empty());

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "summary",
        "finance.studentSummary",
        json!({ "studentId": student_id }),
    );
    assert_eq!(summary.get("pendingAmount").and_then(|v| v.as_f64()), Some(0.0));
    assert_eq!(summary.get("totalFees").and_then(|v| v.as_f64()), Some(0.0));
    assert_eq!(summary.get("creditBalance").and_then(|v| v.as_f64()), Some(0.0));
}
