use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub criteria: String,
    pub timeframe: String,
    #[serde(default)]
    pub additional_details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedReport {
    pub report_title: String,
    pub report_summary: String,
    pub report_details: String,
}

/// Hosted-model report generation. One opaque call, no retry, no caching.
pub trait ReportProvider: Send {
    fn name(&self) -> &'static str;
    fn generate(&self, request: &ReportRequest) -> anyhow::Result<GeneratedReport>;
}

/// Pick a provider from the environment. An explicit
/// `SCHOOLDESK_AI_PROVIDER=mock`, or a missing API key, selects the mock so
/// the daemon stays usable offline.
pub fn provider_from_env() -> Box<dyn ReportProvider> {
    let choice = std::env::var("SCHOOLDESK_AI_PROVIDER").unwrap_or_default();
    if choice == "mock" {
        return Box::new(MockReportProvider);
    }
    match std::env::var("SCHOOLDESK_AI_API_KEY") {
        Ok(api_key) if !api_key.is_empty() => {
            let model = std::env::var("SCHOOLDESK_AI_MODEL")
                .unwrap_or_else(|_| DEFAULT_MODEL.to_string());
            Box::new(GeminiReportProvider::new(api_key, model))
        }
        _ => {
            tracing::warn!("no AI API key configured, using mock report provider");
            Box::new(MockReportProvider)
        }
    }
}

fn build_prompt(request: &ReportRequest) -> String {
    format!(
        "You are an AI-powered report generation tool for a school administration. \
Your goal is to create comprehensive reports based on specific criteria and \
timeframes provided by the admin.\n\n\
Criteria: {}\n\
Timeframe: {}\n\
Additional Details: {}\n\n\
Based on the given criteria, timeframe, and any additional details, generate a \
report with a title, a summary of key insights, and detailed information. The \
reportTitle should be concise and descriptive. The reportSummary should \
highlight the most important findings and trends. The reportDetails should \
provide comprehensive data and analysis to support the summary.\n\n\
Respond with a JSON object with exactly the keys reportTitle, reportSummary \
and reportDetails.",
        request.criteria,
        request.timeframe,
        request.additional_details.as_deref().unwrap_or("")
    )
}

pub struct GeminiReportProvider {
    api_key: String,
    model: String,
    client: reqwest::blocking::Client,
}

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

impl GeminiReportProvider {
    pub fn new(api_key: String, model: String) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self {
            api_key,
            model,
            client,
        }
    }

    fn api_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            GEMINI_API_BASE, self.model, self.api_key
        )
    }
}

impl ReportProvider for GeminiReportProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn generate(&self, request: &ReportRequest) -> anyhow::Result<GeneratedReport> {
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: build_prompt(request),
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
            },
        };

        let response = self
            .client
            .post(self.api_url())
            .json(&body)
            .send()
            .context("report generation request failed")?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(anyhow!("model API returned {}: {}", status, detail));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .context("model API returned invalid JSON")?;
        let text = parsed
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .ok_or_else(|| anyhow!("model API returned no candidates"))?;

        serde_json::from_str(&text).context("model output did not match the report shape")
    }
}

/// Deterministic stand-in used in tests and when no key is configured.
pub struct MockReportProvider;

impl ReportProvider for MockReportProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn generate(&self, request: &ReportRequest) -> anyhow::Result<GeneratedReport> {
        Ok(GeneratedReport {
            report_title: format!("Report: {}", request.criteria),
            report_summary: format!(
                "Key findings for {} over {}.",
                request.criteria, request.timeframe
            ),
            report_details: format!(
                "Generated from criteria '{}', timeframe '{}'{}.",
                request.criteria,
                request.timeframe,
                request
                    .additional_details
                    .as_deref()
                    .map(|d| format!(", details '{}'", d))
                    .unwrap_or_default()
            ),
        })
    }
}
