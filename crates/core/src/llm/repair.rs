use crate::domain::{MediaType, Suggestion};
use crate::error::{EngineError, EngineResult};
use crate::llm::json::ParseFailure;
use crate::llm::{LlmClient, SuggestionResponse};
use crate::prompt::Message;

/// Extra acceptance rules applied to a well-formed candidate (e.g. "not suggested before").
#[async_trait::async_trait]
pub trait CandidateCheck: Send + Sync {
    /// `Ok(Some(_))` rejects the candidate and drives a follow-up round.
    async fn check(&self, candidate: &Suggestion) -> EngineResult<Option<Rejection>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Duplicate { title: String },
}

impl Rejection {
    fn into_failure(self) -> (ParseFailure, Option<String>) {
        match self {
            Rejection::Duplicate { title } => (ParseFailure::duplicate(&title), Some(title)),
        }
    }
}

/// Accepts every well-formed candidate.
pub struct AcceptAll;

#[async_trait::async_trait]
impl CandidateCheck for AcceptAll {
    async fn check(&self, _candidate: &Suggestion) -> EngineResult<Option<Rejection>> {
        Ok(None)
    }
}

/// Sends `messages`, then drives at most `max_followups` correction rounds until a candidate
/// parses and passes `check`.
///
/// Transport failures and empty candidate lists are returned as-is without retrying.
pub async fn suggest_with_repair(
    client: &dyn LlmClient,
    media_type: MediaType,
    messages: &[Message],
    max_followups: u32,
    check: &dyn CandidateCheck,
) -> EngineResult<Suggestion> {
    let provider = client.provider();
    let mut response = client.send_messages(media_type, messages).await?;
    let mut attempt: u32 = 0;

    loop {
        let (failure, duplicate_of) = match response.parsed {
            Ok(candidate) => match check.check(&candidate).await? {
                None => return Ok(candidate),
                Some(rejection) => rejection.into_failure(),
            },
            Err(failure) => (failure, None),
        };

        if attempt >= max_followups {
            tracing::warn!(
                %provider,
                %media_type,
                attempts = attempt,
                error = %failure,
                "model reply still unusable after follow-ups"
            );
            return Err(match duplicate_of {
                Some(title) => EngineError::DuplicateSuggestion { title },
                None => EngineError::MalformedResponse {
                    detail: failure.detail,
                    raw_response: response.raw_response,
                },
            });
        }

        attempt += 1;
        tracing::warn!(
            %provider,
            %media_type,
            attempt,
            error = %failure,
            "model reply unusable; sending error follow-up"
        );

        let previous = SuggestionResponse {
            raw_response: response.raw_response,
            parsed: Err(failure),
        };
        response = client
            .error_followup(media_type, &previous, messages)
            .await?;
    }
}
