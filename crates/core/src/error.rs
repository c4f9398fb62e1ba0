use crate::credentials::CredentialType;
use crate::domain::{MediaType, Outcome};

/// Failures surfaced by the recommendation engine.
///
/// Transport and parse failures are converted into these variants at the LLM client boundary, so
/// the history store never sees a raw `reqwest` error.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("{service} request failed ({stage}): {detail}")]
    Transport {
        service: String,
        stage: &'static str,
        detail: String,
    },

    #[error("{provider} returned no usable candidates")]
    NoCandidates { provider: &'static str },

    #[error("malformed model response: {detail}")]
    MalformedResponse { detail: String, raw_response: String },

    #[error("\"{title}\" has already been suggested")]
    DuplicateSuggestion { title: String },

    #[error("no active {media_type} suggestion to update")]
    NoActiveSuggestion { media_type: MediaType },

    #[error("cannot move a suggestion from {from} to {to}")]
    InvalidTransition { from: Outcome, to: Outcome },

    #[error("invalid content: {0}")]
    InvalidContent(String),

    #[error("invalid credential for {credential}: {detail}")]
    InvalidCredential {
        credential: CredentialType,
        detail: String,
    },

    #[error("a {media_type} suggestion is already being generated for {user_id}")]
    RoundInFlight {
        user_id: String,
        media_type: MediaType,
    },

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub(crate) fn transport(
        service: impl Into<String>,
        stage: &'static str,
        detail: impl ToString,
    ) -> Self {
        EngineError::Transport {
            service: service.into(),
            stage,
            detail: detail.to_string(),
        }
    }

    /// Stable machine-readable tag, used in logs and API bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Transport { .. } => "transport_error",
            EngineError::NoCandidates { .. } => "no_candidates",
            EngineError::MalformedResponse { .. } => "malformed_response",
            EngineError::DuplicateSuggestion { .. } => "duplicate_suggestion",
            EngineError::NoActiveSuggestion { .. } => "no_active_suggestion",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::InvalidContent(_) => "invalid_content",
            EngineError::InvalidCredential { .. } => "invalid_credential",
            EngineError::RoundInFlight { .. } => "round_in_flight",
            EngineError::Storage(_) => "storage_error",
        }
    }

    /// Whether the UI should offer a "try again" action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Transport { .. }
                | EngineError::NoCandidates { .. }
                | EngineError::MalformedResponse { .. }
                | EngineError::DuplicateSuggestion { .. }
                | EngineError::RoundInFlight { .. }
                | EngineError::Storage(_)
        )
    }

    /// Short message suitable for direct display.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Transport { service, .. } => {
                format!("Couldn't reach {service}. Check your connection and try again.")
            }
            EngineError::NoCandidates { .. } => {
                "The model didn't return a suggestion. Try again.".to_string()
            }
            EngineError::MalformedResponse { .. } => {
                "The model's answer couldn't be understood. Try again.".to_string()
            }
            EngineError::DuplicateSuggestion { title } => {
                format!("The model suggested \"{title}\" again. Try again.")
            }
            EngineError::NoActiveSuggestion { .. } => {
                "There's no suggestion waiting for feedback. Request a new one.".to_string()
            }
            EngineError::InvalidTransition { .. } => {
                "That action isn't available for this suggestion.".to_string()
            }
            EngineError::InvalidContent(_) => {
                "Couldn't build a request for the model.".to_string()
            }
            EngineError::InvalidCredential { credential, .. } => {
                format!("The {credential} key is missing or invalid. Update it in settings.")
            }
            EngineError::RoundInFlight { .. } => {
                "A suggestion is already on its way.".to_string()
            }
            EngineError::Storage(_) => {
                "Couldn't save your suggestion history. Try again.".to_string()
            }
        }
    }
}
