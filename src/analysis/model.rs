use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

pub const SYSTEM_PROMPT: &str = "You are an intelligent screen assistant. Analyze the screenshot and determine what the user likely needs help with.

Guidelines:
- If it's a quiz/test question: Identify the question and provide the correct answer with brief explanation
- If it's code with an error: Explain the error and how to fix it
- If it's a form or application: Explain what needs to be filled in
- If it's a document: Summarize key points or answer implied questions
- If it's a chat/email: Suggest appropriate responses

Be concise and directly helpful. Start with the most important information.";

/// Used when the user asked nothing; the model works out the intent itself.
pub const AUTO_DEDUCE_PROMPT: &str = "Analyze this screen and help me with what I'm looking at.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelEndpoint {
    pub model: String,
}

impl ModelEndpoint {
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceRequest {
    pub system_instruction: String,
    pub prompt: String,
    /// Base64 JPEG.
    pub image: Option<String>,
}

impl InferenceRequest {
    pub fn new(question: &str, image: Option<String>) -> Self {
        let question = question.trim();
        let prompt = if question.is_empty() {
            AUTO_DEDUCE_PROMPT
        } else {
            question
        };

        Self {
            system_instruction: SYSTEM_PROMPT.to_string(),
            prompt: prompt.to_string(),
            image,
        }
    }
}

/// One remote vision-language backend.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn generate(
        &self,
        endpoint: &ModelEndpoint,
        credential: &str,
        request: &InferenceRequest,
    ) -> Result<String>;
}

/// Ordered endpoints, attempted one at a time until one answers.
#[derive(Debug, Clone)]
pub struct FallbackChain {
    endpoints: Vec<ModelEndpoint>,
    attempt_timeout: Option<Duration>,
}

impl FallbackChain {
    pub fn new(endpoints: Vec<ModelEndpoint>, attempt_timeout: Option<Duration>) -> Self {
        Self {
            endpoints,
            attempt_timeout,
        }
    }

    pub async fn ask(
        &self,
        client: &dyn InferenceClient,
        credential: &str,
        request: &InferenceRequest,
    ) -> Result<String, AnalysisError> {
        if credential.is_empty() {
            return Err(AnalysisError::NoCredential);
        }

        let mut last_failure = String::from("no model endpoints configured");

        for endpoint in &self.endpoints {
            let attempt = client.generate(endpoint, credential, request);
            let outcome = match self.attempt_timeout {
                Some(limit) => tokio::time::timeout(limit, attempt)
                    .await
                    .unwrap_or_else(|_| Err(anyhow!("timed out after {limit:?}"))),
                None => attempt.await,
            };

            match outcome {
                Ok(text) => {
                    log_info!("model {} answered ({} chars)", endpoint.model, text.len());
                    return Ok(text);
                }
                Err(err) => {
                    log_warn!("model {} failed, trying next: {err:#}", endpoint.model);
                    last_failure = format!("{}: {err:#}", endpoint.model);
                }
            }
        }

        Err(AnalysisError::AllModelsFailed { last: last_failure })
    }
}

/// Gemini `generateContent` over REST.
pub struct GeminiClient {
    http: Client,
    api_base: String,
}

impl GeminiClient {
    pub fn new(api_base: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            api_base: api_base.into(),
        })
    }
}

#[async_trait]
impl InferenceClient for GeminiClient {
    async fn generate(
        &self,
        endpoint: &ModelEndpoint,
        credential: &str,
        request: &InferenceRequest,
    ) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.api_base, endpoint.model);
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", credential)
            .json(&GenerateContentRequest::from(request))
            .send()
            .await
            .context("request failed")?;

        let status = response.status();
        let body = response.text().await.context("failed to read response body")?;
        if !status.is_success() {
            bail!("{}", api_error_message(status, &body));
        }

        let parsed: GenerateContentResponse =
            serde_json::from_str(&body).context("malformed generateContent response")?;
        extract_text(parsed)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData<'a>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

impl<'a> From<&'a InferenceRequest> for GenerateContentRequest<'a> {
    fn from(request: &'a InferenceRequest) -> Self {
        let mut parts = Vec::with_capacity(2);
        if let Some(image) = &request.image {
            parts.push(Part::Inline {
                inline_data: InlineData {
                    mime_type: "image/jpeg",
                    data: image,
                },
            });
        }
        parts.push(Part::Text {
            text: &request.prompt,
        });

        Self {
            system_instruction: Content {
                role: None,
                parts: vec![Part::Text {
                    text: &request.system_instruction,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts,
            }],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

fn extract_text(response: GenerateContentResponse) -> Result<String> {
    if let Some(reason) = response
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason)
    {
        bail!("request blocked: {reason}");
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .context("response contained no candidates")?;

    let text: String = candidate
        .content
        .map(|content| content.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|part| part.text)
        .collect();

    if text.trim().is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".into());
        bail!("model returned no text (finish reason: {reason})");
    }
    Ok(text)
}

fn api_error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ApiErrorEnvelope>(body) {
        Ok(envelope) => format!("{status}: {}", envelope.error.message),
        Err(_) if body.trim().is_empty() => status.to_string(),
        Err(_) => format!("{status}: {}", body.trim()),
    }
}
