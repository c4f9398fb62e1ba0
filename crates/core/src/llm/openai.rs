use crate::credentials::{CachedKey, CredentialBus, CredentialStore, CredentialType, SubscriptionId};
use crate::domain::MediaType;
use crate::error::{EngineError, EngineResult};
use crate::llm::{request_error, status_error, LlmClient, Provider, SuggestionResponse};
use crate::prompt::{Message, Role};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_TEMPERATURE: f32 = 0.9;

/// OpenAI-style `/v1/chat/completions` adapter.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: Arc<CachedKey>,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn from_env(credentials: Arc<dyn CredentialStore>) -> anyhow::Result<Self> {
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let timeout_secs = std::env::var("OPENAI_TIMEOUT_SECS")
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
            api_key: Arc::new(CachedKey::new(CredentialType::OpenAi, credentials)),
            base_url: base_url.into(),
            model: model.into(),
        })
    }

    /// Re-reads the API key when the user edits it.
    pub fn watch_credentials(&self, bus: &CredentialBus) -> SubscriptionId {
        self.api_key.watch(bus)
    }

    pub fn refresh_credentials(&self) -> EngineResult<()> {
        self.api_key.refresh().map(|_| ())
    }

    fn to_request(&self, messages: &[Message]) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            temperature: DEFAULT_TEMPERATURE,
            messages: messages
                .iter()
                .map(|m| ChatMessage {
                    role: match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    content: m.content.clone(),
                })
                .collect(),
        }
    }

    async fn create_completion(&self, req: &ChatRequest) -> EngineResult<ChatResponse> {
        let api_key = self.api_key.get()?;
        let url = format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        );

        let res = self
            .http
            .post(url)
            .bearer_auth(api_key)
            .json(req)
            .send()
            .await
            .map_err(|e| request_error(Provider::OpenAi, e))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| request_error(Provider::OpenAi, e))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .ok()
                .map(|e| e.error.message);
            tracing::warn!(%status, body = %text, "OpenAI returned an error status");
            return Err(status_error(
                Provider::OpenAi,
                CredentialType::OpenAi,
                status,
                message,
            ));
        }

        serde_json::from_str::<ChatResponse>(&text).map_err(|e| {
            EngineError::transport(
                Provider::OpenAi.as_str(),
                "decode",
                format!("unexpected chat completion body: {e}"),
            )
        })
    }

    fn first_candidate(res: ChatResponse) -> EngineResult<String> {
        res.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(EngineError::NoCandidates {
                provider: Provider::OpenAi.as_str(),
            })
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiClient {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    async fn send_messages(
        &self,
        media_type: MediaType,
        messages: &[Message],
    ) -> EngineResult<SuggestionResponse> {
        if messages.is_empty() {
            return Err(EngineError::InvalidContent("no messages to send".to_string()));
        }
        let req = self.to_request(messages);
        let res = self.create_completion(&req).await?;
        let text = Self::first_candidate(res)?;
        tracing::debug!(model = %self.model, %media_type, chars = text.len(), "OpenAI reply received");
        Ok(SuggestionResponse::from_raw(media_type, text))
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorBody {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryCredentialStore;
    use serde_json::json;

    fn client() -> OpenAiClient {
        OpenAiClient::new(
            "http://localhost",
            "gpt-test",
            Arc::new(MemoryCredentialStore::new()),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn maps_roles_onto_chat_roles() {
        let req = client().to_request(&[
            Message::system("task"),
            Message::user("u"),
            Message::assistant("a"),
        ]);
        let body = serde_json::to_value(&req).unwrap();
        assert_eq!(body["model"], "gpt-test");
        assert_eq!(
            body["messages"],
            json!([
                {"role": "system", "content": "task"},
                {"role": "user", "content": "u"},
                {"role": "assistant", "content": "a"},
            ])
        );
    }

    #[test]
    fn first_choice_wins_and_empty_is_no_candidates() {
        let res: ChatResponse = serde_json::from_value(json!({
            "choices": [
                {"message": {"content": "first"}},
                {"message": {"content": "second"}},
            ]
        }))
        .unwrap();
        assert_eq!(OpenAiClient::first_candidate(res).unwrap(), "first");

        let empty: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(
            OpenAiClient::first_candidate(empty),
            Err(EngineError::NoCandidates { .. })
        ));
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let err = client()
            .send_messages(MediaType::Song, &[Message::system("task")])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidCredential { .. }));
    }
}
