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
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn setup_two_students(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
) -> Vec<String> {
    let workspace = temp_dir("schooldesk-grades");
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
        json!({ "name": "Form 13" }),
    );
    let mut ids = Vec::new();
    for (no, name) in [("S-700", "Ines Costa"), ("S-701", "Jon Berg")] {
        let student = request_ok(
            stdin,
            reader,
            "student",
            "students.create",
            json!({
                "studentNo": no,
                "fullName": name,
                "dateOfBirth": "2009-12-01",
                "gender": "M",
                "address": "Street",
                "parentName": "Parent",
                "parentPhone": "555-0140",
                "relationship": "guardian",
                "academicYear": "2024",
                "classForm": "Form 13",
            }),
        );
        ids.push(
            student
                .get("studentId")
                .and_then(|v| v.as_str())
                .expect("studentId")
                .to_string(),
        );
    }
    ids
}

#[test]
fn bulk_set_inserts_then_updates_marks_in_place() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let student_ids = setup_two_students(&mut stdin, &mut reader);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "set1",
        "grades.set",
        json!({
            "academicYear": "2024",
            "subject": "Mathematics",
            "grades": [
                { "studentId": student_ids[0], "marks": 72.0 },
                { "studentId": student_ids[1], "marks": 64.5 },
            ],
        }),
    );
    assert_eq!(result.get("count").and_then(|v| v.as_u64()), Some(2));

    // Re-entering one student's mark updates, it does not duplicate.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "set2",
        "grades.set",
        json!({
            "academicYear": "2024",
            "subject": "Mathematics",
            "grades": [{ "studentId": student_ids[0], "marks": 78.0 }],
        }),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "class",
        "grades.forClass",
        json!({
            "academicYear": "2024",
            "subject": "Mathematics",
            "studentIds": [student_ids[0], student_ids[1]],
        }),
    );
    let grades = result
        .get("grades")
        .and_then(|v| v.as_array())
        .expect("grades");
    assert_eq!(grades.len(), 2);
    let for_student = |id: &str| {
        grades
            .iter()
            .find(|g| g.get("studentId").and_then(|v| v.as_str()) == Some(id))
            .expect("grade")
    };
    assert_eq!(
        for_student(&student_ids[0])
            .get("marks")
            .and_then(|v| v.as_f64()),
        Some(78.0)
    );
    assert!(for_student(&student_ids[0])
        .get("updatedAt")
        .and_then(|v| v.as_i64())
        .is_some());
    assert_eq!(
        for_student(&student_ids[1])
            .get("marks")
            .and_then(|v| v.as_f64()),
        Some(64.5)
    );
}

#[test]
fn grades_for_student_span_subjects_within_a_year() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let student_ids = setup_two_students(&mut stdin, &mut reader);

    for (subject, marks) in [("English", 81.0), ("Physics", 69.0)] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "set",
            "grades.set",
            json!({
                "academicYear": "2024",
                "subject": subject,
                "grades": [{ "studentId": student_ids[0], "marks": marks }],
            }),
        );
    }
    // A different year must not leak into the 2024 view.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "set-other-year",
        "grades.set",
        json!({
            "academicYear": "2023",
            "subject": "English",
            "grades": [{ "studentId": student_ids[0], "marks": 40.0 }],
        }),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "student",
        "grades.forStudent",
        json!({ "studentId": student_ids[0], "academicYear": "2024" }),
    );
    let grades = result
        .get("grades")
        .and_then(|v| v.as_array())
        .expect("grades");
    assert_eq!(grades.len(), 2);
    assert_eq!(
        grades[0].get("subject").and_then(|v| v.as_str()),
        Some("English")
    );
    assert_eq!(grades[0].get("marks").and_then(|v| v.as_f64()), Some(81.0));
    assert_eq!(
        grades[1].get("subject").and_then(|v| v.as_str()),
        Some("Physics")
    );
}
