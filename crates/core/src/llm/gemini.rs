use crate::credentials::{CachedKey, CredentialBus, CredentialStore, CredentialType, SubscriptionId};
use crate::domain::MediaType;
use crate::error::{EngineError, EngineResult};
use crate::llm::{request_error, status_error, LlmClient, Provider, SuggestionResponse};
use crate::prompt::{Message, Role};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-1.5-flash";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_TEMPERATURE: f32 = 0.9;

fn push(turns: &mut Vec<(&'static str, String)>, role: &'static str, text: String) {
    if let Some((last_role, last_text)) = turns.last_mut() {
        if *last_role == role {
            last_text.push_str("\n\n");
            last_text.push_str(&text);
            return;
        }
    }
    turns.push((role, text));
}

/// Gemini `generateContent` adapter.
///
/// Gemini has no system role: system text is folded into the first user turn, and consecutive
/// turns from the same speaker are merged.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: Arc<CachedKey>,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn from_env(credentials: Arc<dyn CredentialStore>) -> anyhow::Result<Self> {
        let base_url =
            std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let timeout_secs = std::env::var("GEMINI_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Self::new(base_url, model, credentials, Duration::from_secs(timeout_secs))
    }

    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        credentials: Arc<dyn CredentialStore>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key: Arc::new(CachedKey::new(CredentialType::Gemini, credentials)),
            base_url: base_url.into(),
            model: model.into(),
        })
    }

    pub fn watch_credentials(&self, bus: &CredentialBus) -> SubscriptionId {
        self.api_key.watch(bus)
    }

    pub fn refresh_credentials(&self) -> EngineResult<()> {
        self.api_key.refresh().map(|_| ())
    }

    fn to_contents(messages: &[Message]) -> Vec<Content> {
        let mut turns: Vec<(&'static str, String)> = Vec::new();
        let mut system = String::new();

        for message in messages {
            match message.role {
                Role::System => {
                    if !system.is_empty() {
                        system.push_str("\n\n");
                    }
                    system.push_str(&message.content);
                }
                Role::User => {
                    let text = if system.is_empty() {
                        message.content.clone()
                    } else {
                        format!("{}\n\n{}", std::mem::take(&mut system), message.content)
                    };
                    push(&mut turns, "user", text);
                }
                Role::Assistant => {
                    if !system.is_empty() {
                        push(&mut turns, "user", std::mem::take(&mut system));
                    }
                    push(&mut turns, "model", message.content.clone());
                }
            }
        }
        if !system.is_empty() {
            push(&mut turns, "user", system);
        }

        turns
            .into_iter()
            .map(|(role, text)| Content {
                role: role.to_string(),
                parts: vec![Part { text: Some(text) }],
            })
            .collect()
    }

    async fn generate_content(&self, req: &GenerateRequest) -> EngineResult<GenerateResponse> {
        let api_key = self.api_key.get()?;
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );

        let res = self
            .http
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(req)
            .send()
            .await
            .map_err(|e| request_error(Provider::Gemini, e))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| request_error(Provider::Gemini, e))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .ok()
                .map(|e| e.error.message);
            tracing::warn!(%status, body = %text, "Gemini returned an error status");
            return Err(status_error(
                Provider::Gemini,
                CredentialType::Gemini,
                status,
                message,
            ));
        }

        serde_json::from_str::<GenerateResponse>(&text).map_err(|e| {
            EngineError::transport(
                Provider::Gemini.as_str(),
                "decode",
                format!("unexpected generateContent body: {e}"),
            )
        })
    }

    fn first_candidate(res: GenerateResponse) -> EngineResult<String> {
        if res.candidates.is_empty() {
            if let Some(reason) = res.prompt_feedback.and_then(|f| f.block_reason) {
                tracing::warn!(block_reason = %reason, "Gemini blocked the prompt");
            }
        }

        res.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .filter(|text| !text.trim().is_empty())
            .ok_or(EngineError::NoCandidates {
                provider: Provider::Gemini.as_str(),
            })
    }
}

#[async_trait::async_trait]
impl LlmClient for GeminiClient {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    async fn send_messages(
        &self,
        media_type: MediaType,
        messages: &[Message],
    ) -> EngineResult<SuggestionResponse> {
        let contents = Self::to_contents(messages);
        if contents.is_empty() {
            return Err(EngineError::InvalidContent("no messages to send".to_string()));
        }
        let req = GenerateRequest {
            contents,
            generation_config: GenerationConfig {
                temperature: DEFAULT_TEMPERATURE,
            },
        };
        let res = self.generate_content(&req).await?;
        let text = Self::first_candidate(res)?;
        tracing::debug!(model = %self.model, %media_type, chars = text.len(), "Gemini reply received");
        Ok(SuggestionResponse::from_raw(media_type, text))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorBody {
    message: String,
}
