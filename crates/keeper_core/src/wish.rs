//! Greeting drafts from a remote text-generation service.
//!
//! A draft is single-shot: one request, no retry. Any failure turns into a
//! fixed fallback greeting so callers always get text to show.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::record::{Category, Record};

pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub const EMPTY_RESPONSE_FALLBACK: &str = "祝你一切顺利！(AI 生成暂时不可用)";
pub const FAILURE_FALLBACK: &str = "祝你节日快乐，万事如意！\n(网络连接异常，使用了默认祝福)";

const PROMPT_OPENING: &str = "请用温暖、真诚的语气，用中文写一段简短的祝福语（100字以内）。";
const PROMPT_CLOSING: &str = "\n要求：不要包含任何标题，直接输出祝福内容。";
const DEFAULT_OCCASION: &str = "特别的日子";

/// Anything that turns a prompt into generated text.
#[async_trait]
pub trait WishGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WishOutcome {
    Generated(String),
    /// The service answered without any text.
    Empty,
    /// The request could not be completed.
    Failed,
}

impl WishOutcome {
    pub fn text(&self) -> &str {
        match self {
            WishOutcome::Generated(text) => text,
            WishOutcome::Empty => EMPTY_RESPONSE_FALLBACK,
            WishOutcome::Failed => FAILURE_FALLBACK,
        }
    }

    pub fn is_fallback(&self) -> bool {
        !matches!(self, WishOutcome::Generated(_))
    }
}

/// Prompt for `record`, worded per category.
pub fn build_prompt(record: &Record) -> String {
    let mut prompt = String::from(PROMPT_OPENING);
    prompt.push_str(&format!("\n对象：{}", record.title));
    match record.category {
        Category::Birthday => {
            prompt.push_str("\n类型：生日祝福");
            if let Some(notes) = record.notes() {
                prompt.push_str(&format!("\n备注信息：{notes}（请酌情结合这些信息）"));
            }
        }
        Category::Anniversary => {
            prompt.push_str("\n类型：纪念日祝福");
            if let Some(notes) = record.notes() {
                prompt.push_str(&format!("\n备注信息：{notes}"));
            }
        }
        Category::Other => {
            let occasion = record.notes().unwrap_or(DEFAULT_OCCASION);
            prompt.push_str(&format!("\n事件：{occasion}"));
        }
    }
    prompt.push_str(PROMPT_CLOSING);
    prompt
}

/// Drafts a greeting for `record`, never failing.
pub async fn draft_wish(generator: &dyn WishGenerator, record: &Record) -> WishOutcome {
    let prompt = build_prompt(record);
    match generator.generate(&prompt).await {
        Ok(text) if text.trim().is_empty() => {
            warn!(id = %record.id, "wish generator returned no text");
            WishOutcome::Empty
        }
        Ok(text) => {
            info!(id = %record.id, chars = text.chars().count(), "wish drafted");
            WishOutcome::Generated(text.trim().to_string())
        }
        Err(err) => {
            warn!(id = %record.id, err = %format!("{err:#}"), "wish generation failed");
            WishOutcome::Failed
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    thinking_config: ThinkingConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
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

impl GenerateResponse {
    /// Concatenated text of the first candidate, empty when there is none.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

/// Client for the Gemini `generateContent` endpoint.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl WishGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("API key not found"))?;

        let request = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config: GenerationConfig {
                thinking_config: ThinkingConfig { thinking_budget: 0 },
            },
        };

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await
            .context("failed to reach text generation service")?
            .error_for_status()
            .context("text generation service returned an error status")?;

        let body: GenerateResponse = response
            .json()
            .await
            .context("failed to decode text generation response")?;
        Ok(body.text())
    }
}
