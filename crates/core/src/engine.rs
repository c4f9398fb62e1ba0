//! Recommendation session engine: one suggestion per round, feedback bookkeeping, no repeats.
//!
//! The four UI operations are [`SessionEngine::request_suggestion`],
//! [`SessionEngine::provide_feedback`], [`SessionEngine::skip`] and
//! [`SessionEngine::add_to_library`].

use crate::catalog::MediaCatalog;
use crate::config::{Settings, DEFAULT_MAX_ERROR_FOLLOWUPS};
use crate::domain::{Outcome, SessionKey, Suggestion, SuggestionHistory};
use crate::error::{EngineError, EngineResult};
use crate::llm::repair::{self, CandidateCheck, Rejection};
use crate::llm::LlmClient;
use crate::prompt::{Content, Message, PrimeDirective};
use crate::storage::{HistoryStore, MemoryRoundLock, RoundLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Error follow-up rounds allowed after the first reply.
    pub max_error_followups: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_error_followups: DEFAULT_MAX_ERROR_FOLLOWUPS,
        }
    }
}

impl EngineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_error_followups: settings.max_error_followups,
        }
    }
}

/// Result of a feedback action.
#[derive(Debug, Clone, Serialize)]
pub struct Feedback {
    pub suggestion: Suggestion,
    /// The suggestion slot is consumed; the caller should start the next round.
    pub request_next: bool,
}

pub struct SessionEngine {
    llm: Arc<dyn LlmClient>,
    store: Arc<dyn HistoryStore>,
    catalog: Arc<dyn MediaCatalog>,
    constraints: RwLock<HashMap<SessionKey, Vec<String>>>,
    rounds: Arc<dyn RoundLock>,
    config: EngineConfig,
}

impl SessionEngine {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        store: Arc<dyn HistoryStore>,
        catalog: Arc<dyn MediaCatalog>,
        config: EngineConfig,
    ) -> Self {
        Self {
            llm,
            store,
            catalog,
            constraints: RwLock::new(HashMap::new()),
            rounds: Arc::new(MemoryRoundLock::new()),
            config,
        }
    }

    /// Replaces the process-local round lock, e.g. with a `PgRoundLock` when several processes
    /// share one history database.
    pub fn with_round_lock(mut self, rounds: Arc<dyn RoundLock>) -> Self {
        self.rounds = rounds;
        self
    }

    pub async fn history(&self, key: &SessionKey) -> EngineResult<SuggestionHistory> {
        self.store.history(key).await
    }

    pub async fn constraints(&self, key: &SessionKey) -> Vec<String> {
        self.constraints
            .read()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn set_constraints(&self, key: &SessionKey, constraints: Vec<String>) {
        let constraints: Vec<String> = constraints
            .into_iter()
            .filter(|c| !c.trim().is_empty())
            .collect();
        let mut all = self.constraints.write().await;
        if constraints.is_empty() {
            all.remove(key);
        } else {
            all.insert(key.clone(), constraints);
        }
    }

    pub async fn add_constraint(&self, key: &SessionKey, constraint: impl Into<String>) {
        let constraint = constraint.into();
        if constraint.trim().is_empty() {
            return;
        }
        self.constraints
            .write()
            .await
            .entry(key.clone())
            .or_default()
            .push(constraint);
    }

    pub async fn clear_constraints(&self, key: &SessionKey) {
        self.constraints.write().await.remove(key);
    }

    async fn build_content(&self, key: &SessionKey) -> EngineResult<(Content, SuggestionHistory)> {
        let favorites = self.catalog.favorites(&key.user_id, key.media_type).await?;
        let history = self.store.history(key).await?;
        let content = Content {
            directive: PrimeDirective::new(key.media_type, &favorites),
            suggestions: history.entries().to_vec(),
            user_constraints: self.constraints(key).await,
        };
        Ok((content, history))
    }

    /// The messages the next round would send, without contacting the provider.
    pub async fn preview_messages(&self, key: &SessionKey) -> EngineResult<Vec<Message>> {
        let (content, _) = self.build_content(key).await?;
        self.llm.compose_messages(Some(&content))
    }

    /// Runs one round and records the result as `pending`.
    ///
    /// A second request for the same session while one is in flight is rejected with
    /// `RoundInFlight`. Dropping the returned future before it resolves records nothing.
    pub async fn request_suggestion(&self, key: &SessionKey) -> EngineResult<Suggestion> {
        let Some(round) = self.rounds.try_acquire(key).await? else {
            tracing::warn!(session = %key, "suggestion already in flight; ignoring request");
            return Err(EngineError::RoundInFlight {
                user_id: key.user_id.clone(),
                media_type: key.media_type,
            });
        };

        let result = self.run_round(key).await;
        round.release().await;
        result
    }

    async fn run_round(&self, key: &SessionKey) -> EngineResult<Suggestion> {
        let (content, history) = self.build_content(key).await?;
        let messages = self.llm.compose_messages(Some(&content))?;
        tracing::info!(
            session = %key,
            provider = %self.llm.provider(),
            history_len = history.len(),
            constraints = content.user_constraints.len(),
            "requesting suggestion"
        );

        let check = NoRepeats {
            user_id: &key.user_id,
            history: &history,
            catalog: self.catalog.as_ref(),
        };
        let candidate = repair::suggest_with_repair(
            self.llm.as_ref(),
            key.media_type,
            &messages,
            self.config.max_error_followups,
            &check,
        )
        .await?;

        let recorded = self.store.record(key, candidate).await?;
        tracing::info!(
            session = %key,
            id = %recorded.id,
            title = %recorded.content.title(),
            "suggestion recorded"
        );
        Ok(recorded)
    }

    /// Applies explicit feedback to the active (most recent) suggestion.
    pub async fn provide_feedback(
        &self,
        key: &SessionKey,
        outcome: Outcome,
    ) -> EngineResult<Feedback> {
        let history = self.store.history(key).await?;
        let active = history
            .latest()
            .ok_or(EngineError::NoActiveSuggestion {
                media_type: key.media_type,
            })?;

        let (suggestion, changed) = self
            .store
            .update_outcome(key, active.content.title(), outcome)
            .await?;

        let request_next = changed && suggestion.user_outcome.is_terminal();
        tracing::info!(
            session = %key,
            title = %suggestion.content.title(),
            outcome = %suggestion.user_outcome,
            changed,
            request_next,
            "feedback applied"
        );
        Ok(Feedback {
            suggestion,
            request_next,
        })
    }

    /// Skips the active suggestion; a no-op if it was already liked or added.
    pub async fn skip(&self, key: &SessionKey) -> EngineResult<Feedback> {
        self.provide_feedback(key, Outcome::Skipped).await
    }

    pub async fn add_to_library(&self, key: &SessionKey) -> EngineResult<Feedback> {
        self.provide_feedback(key, Outcome::Added).await
    }
}

/// Rejects candidates already in this session's history or already in the user's library.
struct NoRepeats<'a> {
    user_id: &'a str,
    history: &'a SuggestionHistory,
    catalog: &'a dyn MediaCatalog,
}

#[async_trait::async_trait]
impl CandidateCheck for NoRepeats<'_> {
    async fn check(&self, candidate: &Suggestion) -> EngineResult<Option<Rejection>> {
        let title = candidate.content.title();
        if self.history.contains_title(title)
            || self.catalog.in_library(self.user_id, &candidate.content).await?
        {
            return Ok(Some(Rejection::Duplicate {
                title: title.to_string(),
            }));
        }
        Ok(None)
    }
}
