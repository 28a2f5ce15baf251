use crate::config::HintConfig;
use crate::error::ArcadeError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

// Embedded fields are clamped so a pathological submission cannot blow up
// the prompt.
const MAX_QUERY_LEN: usize = 2_000;
const MAX_DESCRIPTION_LEN: usize = 2_000;
const MAX_SCHEMA_LEN: usize = 4_000;
const MAX_ERROR_LEN: usize = 1_000;

/// Why the candidate failed. Exactly one of the two variants is embedded in
/// the prompt.
#[derive(Debug, Clone)]
pub enum HintFailure {
    ExecutionError(String),
    ResultMismatch,
}

#[derive(Debug, Clone)]
pub struct HintRequest {
    pub user_query: String,
    pub quest_description: String,
    pub schema_context: Option<String>,
    pub failure: HintFailure,
}

fn clamp(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Natural-language prompt sent to the text service. Never includes the
/// reference query: the model must nudge, not reveal.
pub fn build_hint_prompt(req: &HintRequest) -> String {
    let mut prompt = String::from("You are an expert SQL tutor for the COMPANY database.\n");
    if let Some(schema) = &req.schema_context {
        if !schema.is_empty() {
            prompt.push_str("SCHEMA CONTEXT: ");
            prompt.push_str(clamp(schema, MAX_SCHEMA_LEN));
            prompt.push('\n');
        }
    }
    prompt.push('\n');
    prompt.push_str("The user is trying to solve: ");
    prompt.push_str(clamp(&req.quest_description, MAX_DESCRIPTION_LEN));
    prompt.push('\n');
    prompt.push_str("The user wrote: ");
    prompt.push_str(clamp(&req.user_query, MAX_QUERY_LEN));
    prompt.push('\n');
    match &req.failure {
        HintFailure::ExecutionError(msg) => {
            prompt.push_str("The MySQL error was: ");
            prompt.push_str(clamp(msg, MAX_ERROR_LEN));
            prompt.push('\n');
        }
        HintFailure::ResultMismatch => {
            prompt.push_str("The query ran but results do not match the expected output.\n");
        }
    }
    prompt.push('\n');
    prompt.push_str("Provide a short, 1-2 sentence hint. DO NOT provide the final SQL code.");
    prompt
}

/// Black-box text generation: given a prompt, return plain text within a
/// bounded time, or fail.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ArcadeError>;
}

/// Build the hint for a failed attempt. A service failure propagates —
/// there is no canned fallback hint.
pub async fn generate_hint(
    model: &dyn TextModel,
    req: &HintRequest,
) -> Result<String, ArcadeError> {
    let prompt = build_hint_prompt(req);
    debug!(prompt_len = prompt.len(), "requesting hint");
    let text = model.generate(&prompt).await?;
    Ok(text.trim().to_string())
}

// ---------------------------------------------------------------------------
// Gemini-style HTTP client

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
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

/// `generateContent` client for a hosted Gemini-compatible endpoint.
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_output_tokens: u32,
}

impl GeminiClient {
    pub fn new(config: &HintConfig) -> Result<Self, ArcadeError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ArcadeError::HintService(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            max_output_tokens: config.max_output_tokens,
        })
    }
}

#[async_trait]
impl TextModel for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, ArcadeError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint, self.model
        );
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: self.max_output_tokens,
            },
        };

        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ArcadeError::HintService(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(ArcadeError::HintService(format!(
                "service returned {status}: {detail}"
            )));
        }

        let parsed: GenerateContentResponse = resp
            .json()
            .await
            .map_err(|e| ArcadeError::HintService(format!("malformed response: {e}")))?;

        let text: String = parsed
            .candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ArcadeError::HintService(
                "service returned no candidates".into(),
            ));
        }
        Ok(text)
    }
}
