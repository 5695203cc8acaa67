use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

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

fn request(
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
    serde_json::from_str(line.trim()).expect("parse response json")
}

#[test]
fn report_generation_returns_title_summary_and_details() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    // Report generation needs no workspace; it is an outbound provider call.
    let response = request(
        &mut stdin,
        &mut reader,
        "gen",
        "reports.generate",
        json!({
            "criteria": "student attendance",
            "timeframe": "last month",
            "additionalDetails": "focus on Form 2",
        }),
    );
    assert!(response.get("ok").and_then(|v| v.as_bool()).unwrap_or(false));
    let result = response.get("result").expect("result");
    let title = result
        .get("reportTitle")
        .and_then(|v| v.as_str())
        .expect("reportTitle");
    assert!(title.contains("student attendance"));
    assert!(result
        .get("reportSummary")
        .and_then(|v| v.as_str())
        .is_some_and(|s| !s.is_empty()));
    assert!(result
        .get("reportDetails")
        .and_then(|v| v.as_str())
        .is_some_and(|s| !s.is_empty()));
}

#[test]
fn blank_criteria_or_timeframe_are_rejected() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let response = request(
        &mut stdin,
        &mut reader,
        "no-criteria",
        "reports.generate",
        json!({ "criteria": "  ", "timeframe": "last month" }),
    );
    assert_eq!(response.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        response
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("bad_params")
    );

    let response = request(
        &mut stdin,
        &mut reader,
        "no-timeframe",
        "reports.generate",
        json!({ "criteria": "financial health" }),
    );
    assert_eq!(response.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        response
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("bad_params")
    );
}
