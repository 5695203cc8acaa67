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
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("schooldesk-router-smoke");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("ok").and_then(|v| v.as_bool()).unwrap_or(false));
    assert!(health
        .get("result")
        .and_then(|r| r.get("version"))
        .and_then(|v| v.as_str())
        .is_some());

    // Data methods refuse to run before a workspace is selected.
    let early = request(&mut stdin, &mut reader, "2", "students.list", json!({}));
    assert_eq!(error_code(&early), "no_workspace");

    let _ = request(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // One representative method per handler family; none may fall through
    // to not_implemented.
    let probes: Vec<(&str, serde_json::Value)> = vec![
        ("students.list", json!({})),
        ("classes.list", json!({})),
        ("subjects.list", json!({})),
        ("years.list", json!({})),
        ("fees.list", json!({})),
        ("invoices.list", json!({})),
        ("payments.list", json!({})),
        ("finance.categories", json!({})),
        ("finance.policy.get", json!({})),
        ("promotions.list", json!({})),
        (
            "reports.generate",
            json!({ "criteria": "smoke", "timeframe": "today" }),
        ),
        (
            "finance.reportData",
            json!({ "reportType": "income" }),
        ),
    ];
    for (index, (method, params)) in probes.into_iter().enumerate() {
        let id = format!("probe-{}", index);
        let response = request(&mut stdin, &mut reader, &id, method, params);
        assert_ne!(
            error_code(&response),
            "not_implemented",
            "method {} is not routed",
            method
        );
        assert!(
            response.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            response
        );
    }

    let unknown = request(&mut stdin, &mut reader, "99", "nope.method", json!({}));
    assert_eq!(error_code(&unknown), "not_implemented");
}
