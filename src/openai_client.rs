use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const SYSTEM_PROMPT: &str = "你是一個圖片文字辨識工具，將接收傳進來的base64，並且取出裡面的文字，\
不會有任何空格，以json格式回覆：\n{\n\"respond\": \"text_from_image_recognition\"\n}";

pub const USER_PROMPT: &str = "請辨識這張圖片中的文字，並嚴格按照系統提示的JSON格式回覆。";

#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    pub api_key: Option<String>,
    pub base_url: String, // any OpenAI-compatible endpoint
    pub model: String,
    pub timeout: Duration,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            model: "gemini-2.5-flash-preview-05-20".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl TranscriptionConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: env::var("GEMINI_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            base_url: env::var("TRANSCRIPTION_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            model: env::var("TRANSCRIPTION_MODEL").unwrap_or(defaults.model),
            timeout: env::var("TRANSCRIPTION_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }
}

#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("transcription API key is not configured")]
    MissingApiKey,
    #[error("no image data supplied")]
    EmptyImage,
    #[error("transcription request timed out")]
    Timeout,
    #[error("connection to transcription service failed: {0}")]
    Connection(String),
    #[error("transcription service returned HTTP {status}: {message}")]
    Api { status: u16, message: String },
    #[error("reply had no choices")]
    NoChoices,
    #[error("reply message had no content")]
    EmptyContent,
    #[error("reply is not valid JSON: {raw}")]
    NotJson { raw: String },
    #[error("reply JSON has no 'respond' field: {raw}")]
    MissingField { raw: String },
    #[error("unexpected transcription failure: {0}")]
    Unexpected(String),
}

impl From<reqwest::Error> for TranscribeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TranscribeError::Timeout
        } else if e.is_connect() || e.is_request() {
            TranscribeError::Connection(e.to_string())
        } else if let Some(status) = e.status() {
            TranscribeError::Api { status: status.as_u16(), message: e.to_string() }
        } else {
            TranscribeError::Unexpected(e.to_string())
        }
    }
}

/// Turns a captcha image into text. One call, one request; callers own retries.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// False when no credential is configured, so callers can skip the call entirely.
    fn is_configured(&self) -> bool;

    async fn transcribe(&self, image: &str) -> Result<String, TranscribeError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Serialize)]
#[serde(untagged)]
enum ChatContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: ChatContent,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize, Debug)]
struct ApiErrorDetail {
    message: String,
}

/// Vision transcription over an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiTranscriber {
    cfg: TranscriptionConfig,
    http: reqwest::Client,
}

impl OpenAiTranscriber {
    pub fn new(cfg: TranscriptionConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(cfg.timeout).build()?;
        Ok(Self { cfg, http })
    }

    pub fn model(&self) -> &str {
        &self.cfg.model
    }
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    fn is_configured(&self) -> bool {
        self.cfg.api_key.is_some()
    }

    async fn transcribe(&self, image: &str) -> Result<String, TranscribeError> {
        let api_key = self.cfg.api_key.as_deref().ok_or(TranscribeError::MissingApiKey)?;
        if image.trim().is_empty() {
            return Err(TranscribeError::EmptyImage);
        }

        let req_body = ChatRequest {
            model: &self.cfg.model,
            messages: build_messages(image),
        };

        let url = format!("{}/chat/completions", self.cfg.base_url);
        info!(model = %self.cfg.model, "sending captcha to transcription service");

        let resp = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&req_body)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(TranscribeError::Api {
                status: status.as_u16(),
                message: api_error_message(&body),
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| TranscribeError::Unexpected(format!("malformed completion body: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .ok_or(TranscribeError::NoChoices)?
            .message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or(TranscribeError::EmptyContent)?;

        debug!(raw = %content, "transcription reply");
        parse_reply(&content)
    }
}

/// Prefix bare base64 with a PNG data URI header.
pub fn normalize_image(image: &str) -> String {
    if image.starts_with("data:image") {
        image.to_string()
    } else {
        format!("data:image/png;base64,{image}")
    }
}

fn build_messages(image: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage {
            role: "system",
            content: ChatContent::Text(SYSTEM_PROMPT.to_string()),
        },
        ChatMessage {
            role: "user",
            content: ChatContent::Parts(vec![
                ContentPart::Text { text: USER_PROMPT.to_string() },
                ContentPart::ImageUrl { image_url: ImageUrl { url: normalize_image(image) } },
            ]),
        },
    ]
}

/// Extract `respond` from the model's message, tolerating Markdown fences.
pub fn parse_reply(content: &str) -> Result<String, TranscribeError> {
    let cleaned = strip_code_fences(content);
    let reply: serde_json::Value = serde_json::from_str(cleaned).map_err(|_| {
        warn!(raw = %content, "transcription reply is not JSON");
        TranscribeError::NotJson { raw: content.to_string() }
    })?;
    match reply.get("respond").and_then(|v| v.as_str()) {
        Some(text) => Ok(text.to_string()),
        None => {
            warn!(raw = %content, "transcription reply has no string `respond` field");
            Err(TranscribeError::MissingField { raw: content.to_string() })
        }
    }
}

fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Vec<ApiErrorBody>>(body)
        .ok()
        .and_then(|v| v.into_iter().next())
        .or_else(|| serde_json::from_str::<ApiErrorBody>(body).ok())
        .map(|b| b.error.message)
        .unwrap_or_else(|| body.chars().take(300).collect())
}

fn strip_code_fences(s: &str) -> &str {
    let s = s.trim();
    let s = s
        .strip_prefix("```json")
        .or_else(|| s.strip_prefix("```"))
        .unwrap_or(s)
        .trim();
    s.strip_suffix("```").unwrap_or(s).trim()
}
