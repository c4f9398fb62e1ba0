use crate::domain::{Outcome, SessionKey, Suggestion, SuggestionHistory};
use crate::error::{EngineError, EngineResult};
use crate::storage::HistoryStore;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Process-local history store.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    histories: Mutex<HashMap<SessionKey, SuggestionHistory>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn history(&self, key: &SessionKey) -> EngineResult<SuggestionHistory> {
        Ok(self
            .histories
            .lock()
            .await
            .get(key)
            .cloned()
            .unwrap_or_else(|| SuggestionHistory::new(key.media_type)))
    }

    async fn record(&self, key: &SessionKey, suggestion: Suggestion) -> EngineResult<Suggestion> {
        let mut histories = self.histories.lock().await;
        histories
            .entry(key.clone())
            .or_insert_with(|| SuggestionHistory::new(key.media_type))
            .record(suggestion)
    }

    async fn update_outcome(
        &self,
        key: &SessionKey,
        identity: &str,
        outcome: Outcome,
    ) -> EngineResult<(Suggestion, bool)> {
        let mut histories = self.histories.lock().await;
        histories
            .get_mut(key)
            .ok_or(EngineError::NoActiveSuggestion {
                media_type: key.media_type,
            })?
            .update_outcome(identity, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::media::Song;
    use crate::domain::{MediaItem, MediaType};

    fn song(title: &str) -> Suggestion {
        Suggestion::new(
            MediaItem::Song(Song {
                title: title.to_string(),
                artist: "Artist".to_string(),
                genre: None,
            }),
            "",
            "",
        )
    }

    #[tokio::test]
    async fn histories_are_isolated_per_user() {
        let store = MemoryHistoryStore::new();
        let alice = SessionKey::new("alice", MediaType::Song);
        let bob = SessionKey::new("bob", MediaType::Song);

        store.record(&alice, song("A")).await.unwrap();
        store.record(&bob, song("A")).await.unwrap();
        assert!(matches!(
            store.record(&alice, song("a")).await,
            Err(EngineError::DuplicateSuggestion { .. })
        ));

        assert_eq!(store.history(&alice).await.unwrap().len(), 1);
        assert!(store
            .history(&SessionKey::new("carol", MediaType::Song))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn update_outcome_is_visible_in_history() {
        let store = MemoryHistoryStore::new();
        let key = SessionKey::new("u", MediaType::Song);
        store.record(&key, song("A")).await.unwrap();
        store.update_outcome(&key, "A", Outcome::Liked).await.unwrap();
        let history = store.history(&key).await.unwrap();
        assert_eq!(history.latest().unwrap().user_outcome, Outcome::Liked);
    }

    #[tokio::test]
    async fn feedback_for_unknown_session_leaves_no_trace() {
        let store = MemoryHistoryStore::new();
        let key = SessionKey::new("ghost", MediaType::Book);
        assert!(matches!(
            store.update_outcome(&key, "Dune", Outcome::Liked).await,
            Err(EngineError::NoActiveSuggestion { .. })
        ));
        assert!(store.histories.lock().await.is_empty());
    }
}
