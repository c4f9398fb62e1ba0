pub mod gemini;
pub mod json;
pub mod openai;
pub mod repair;

use crate::credentials::{CredentialBus, CredentialStore, CredentialType};
use crate::domain::{MediaType, Suggestion};
use crate::error::{EngineError, EngineResult};
use crate::prompt::{self, Content, Message};
use json::ParseFailure;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Gemini,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Gemini => "gemini",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "gemini" => Ok(Provider::Gemini),
            other => Err(format!("unknown LLM provider: {other}")),
        }
    }
}

/// Builds the configured adapter from `*_BASE_URL`/`*_MODEL`/`*_TIMEOUT_SECS` and keeps its key
/// in sync with `bus`.
pub fn client_from_env(
    provider: Provider,
    credentials: Arc<dyn CredentialStore>,
    bus: &CredentialBus,
) -> anyhow::Result<Arc<dyn LlmClient>> {
    Ok(match provider {
        Provider::OpenAi => {
            let client = openai::OpenAiClient::from_env(credentials)?;
            client.watch_credentials(bus);
            Arc::new(client)
        }
        Provider::Gemini => {
            let client = gemini::GeminiClient::from_env(credentials)?;
            client.watch_credentials(bus);
            Arc::new(client)
        }
    })
}

/// One round's reply: the raw text plus the attempt to parse it.
///
/// A failed parse still carries `raw_response`, so the caller can quote it back in a follow-up.
#[derive(Debug, Clone)]
pub struct SuggestionResponse {
    pub raw_response: String,
    pub parsed: Result<Suggestion, ParseFailure>,
}

impl SuggestionResponse {
    pub fn from_raw(media_type: MediaType, raw_response: impl Into<String>) -> Self {
        let raw_response = raw_response.into();
        let parsed = json::parse_reply(media_type, &raw_response);
        Self {
            raw_response,
            parsed,
        }
    }

    pub fn into_result(self) -> EngineResult<Suggestion> {
        self.parsed.map_err(|failure| EngineError::MalformedResponse {
            detail: failure.detail,
            raw_response: self.raw_response,
        })
    }
}

#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    fn provider(&self) -> Provider;

    fn compose_messages(&self, content: Option<&Content>) -> EngineResult<Vec<Message>> {
        prompt::compose(content)
    }

    /// Sends one round; exactly one outbound HTTP request, no state kept afterwards.
    async fn send_messages(
        &self,
        media_type: MediaType,
        messages: &[Message],
    ) -> EngineResult<SuggestionResponse>;

    /// Re-sends `original` followed by a correction request quoting `previous`.
    async fn error_followup(
        &self,
        media_type: MediaType,
        previous: &SuggestionResponse,
        original: &[Message],
    ) -> EngineResult<SuggestionResponse> {
        let messages = followup_messages(media_type, previous, original);
        self.send_messages(media_type, &messages).await
    }
}

/// `original` + "that was invalid" + the invalid reply as a model turn + the format reminder.
pub fn followup_messages(
    media_type: MediaType,
    previous: &SuggestionResponse,
    original: &[Message],
) -> Vec<Message> {
    let reason = match &previous.parsed {
        Err(failure) => failure.detail.as_str(),
        Ok(_) => "it could not be accepted",
    };

    let mut messages = original.to_vec();
    messages.push(Message::user(format!(
        "Your previous reply was invalid: {reason}. It is quoted next for reference; do not copy \
         it verbatim."
    )));
    messages.push(Message::assistant(previous.raw_response.clone()));
    messages.push(Message::user(prompt::format_reminder(media_type)));
    messages
}

/// Maps a non-2xx provider reply onto the error taxonomy.
pub(crate) fn status_error(
    provider: Provider,
    credential: CredentialType,
    status: reqwest::StatusCode,
    api_message: Option<String>,
) -> EngineError {
    let detail = match api_message {
        Some(message) => format!("status={status}: {message}"),
        None => format!("status={status}"),
    };
    let bad_key = matches!(status.as_u16(), 401 | 403)
        || (status.as_u16() == 400 && detail.to_ascii_lowercase().contains("api key"));
    if bad_key {
        EngineError::InvalidCredential { credential, detail }
    } else {
        EngineError::transport(provider.as_str(), "http", detail)
    }
}

pub(crate) fn request_error(provider: Provider, err: reqwest::Error) -> EngineError {
    let stage = if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connect"
    } else {
        "request"
    };
    EngineError::transport(provider.as_str(), stage, err)
}
