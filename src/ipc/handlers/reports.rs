use crate::ai::ReportRequest;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

/// Free-text report generation through the configured model provider.
/// One opaque outbound call; failures surface verbatim.
fn handle_generate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let request: ReportRequest = match serde_json::from_value(req.params.clone()) {
        Ok(r) => r,
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };
    if request.criteria.trim().is_empty() {
        return err(&req.id, "bad_params", "criteria must not be empty", None);
    }
    if request.timeframe.trim().is_empty() {
        return err(&req.id, "bad_params", "timeframe must not be empty", None);
    }

    tracing::info!(provider = state.ai.name(), "generating report");
    match state.ai.generate(&request) {
        Ok(report) => ok(
            &req.id,
            json!({
                "reportTitle": report.report_title,
                "reportSummary": report.report_summary,
                "reportDetails": report.report_details,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "report generation failed");
            err(&req.id, "ai_failed", e.to_string(), None)
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.generate" => Some(handle_generate(state, req)),
        _ => None,
    }
}
