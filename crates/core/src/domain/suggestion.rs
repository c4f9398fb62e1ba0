use crate::domain::media::{normalize_title, MediaItem, MediaType};
use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle of a single suggestion.
///
/// `pending` is the only state new suggestions start in. `liked` can still move to `added`;
/// `disliked`, `skipped` and `added` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pending,
    Liked,
    Disliked,
    Skipped,
    Added,
}

/// Result of applying a feedback target to the current outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Apply(Outcome),
    /// Skipping an already-endorsed suggestion leaves it untouched.
    Unchanged,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Pending => "pending",
            Outcome::Liked => "liked",
            Outcome::Disliked => "disliked",
            Outcome::Skipped => "skipped",
            Outcome::Added => "added",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Outcome::Disliked | Outcome::Skipped | Outcome::Added)
    }

    /// `None` means the entry is not awaiting this kind of feedback.
    pub fn transition(self, target: Outcome) -> Option<Transition> {
        match (self, target) {
            (_, Outcome::Pending) => None,
            (Outcome::Pending, target) => Some(Transition::Apply(target)),
            (Outcome::Liked, Outcome::Added) => Some(Transition::Apply(Outcome::Added)),
            (Outcome::Liked | Outcome::Added, Outcome::Skipped) => Some(Transition::Unchanged),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Outcome::Pending),
            "liked" => Ok(Outcome::Liked),
            "disliked" => Ok(Outcome::Disliked),
            "skipped" => Ok(Outcome::Skipped),
            "added" => Ok(Outcome::Added),
            other => Err(format!("unknown outcome: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: Uuid,
    pub content: MediaItem,
    pub reasoning: String,
    pub user_outcome: Outcome,
    /// Verbatim model reply, kept for diagnostics and follow-up rounds.
    pub raw_response: String,
    pub suggested_at: DateTime<Utc>,
}

impl Suggestion {
    pub fn new(content: MediaItem, reasoning: impl Into<String>, raw_response: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content,
            reasoning: reasoning.into(),
            user_outcome: Outcome::Pending,
            raw_response: raw_response.into(),
            suggested_at: Utc::now(),
        }
    }

    pub fn media_type(&self) -> MediaType {
        self.content.media_type()
    }

    pub fn title_key(&self) -> String {
        self.content.title_key()
    }

    /// One history line as replayed to the model.
    pub fn prompt_line(&self) -> String {
        format!(
            "Suggested {}: {}  User Outcome: {}",
            self.media_type().label(),
            self.content.describe(),
            self.user_outcome
        )
    }
}

/// Identifies one suggestion history: a user and a media type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub user_id: String,
    pub media_type: MediaType,
}

impl SessionKey {
    pub fn new(user_id: impl Into<String>, media_type: MediaType) -> Self {
        Self {
            user_id: user_id.into(),
            media_type,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.media_type)
    }
}

/// Append-only record of every suggestion made for one media type.
///
/// Titles are unique under [`normalize_title`]; only the outcome of an existing entry is ever
/// mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionHistory {
    media_type: MediaType,
    entries: Vec<Suggestion>,
}

impl SuggestionHistory {
    pub fn new(media_type: MediaType) -> Self {
        Self {
            media_type,
            entries: Vec::new(),
        }
    }

    /// Rebuilds a history from stored rows, oldest first.
    pub fn from_entries(media_type: MediaType, entries: Vec<Suggestion>) -> Self {
        Self { media_type, entries }
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn entries(&self) -> &[Suggestion] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Suggestion> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recent suggestion, whatever its outcome.
    pub fn latest(&self) -> Option<&Suggestion> {
        self.entries.last()
    }

    pub fn contains_title(&self, title: &str) -> bool {
        let key = normalize_title(title);
        self.entries.iter().any(|s| s.title_key() == key)
    }

    pub fn record(&mut self, mut suggestion: Suggestion) -> EngineResult<Suggestion> {
        if suggestion.media_type() != self.media_type {
            return Err(EngineError::InvalidContent(format!(
                "cannot record a {} suggestion in {} history",
                suggestion.media_type(),
                self.media_type
            )));
        }
        if self.contains_title(suggestion.content.title()) {
            return Err(EngineError::DuplicateSuggestion {
                title: suggestion.content.title().to_string(),
            });
        }

        suggestion.user_outcome = Outcome::Pending;
        self.entries.push(suggestion.clone());
        Ok(suggestion)
    }

    /// Applies feedback to the most recent entry whose title matches `identity`.
    ///
    /// Returns the entry after the update and whether its outcome actually changed.
    pub fn update_outcome(
        &mut self,
        identity: &str,
        target: Outcome,
    ) -> EngineResult<(Suggestion, bool)> {
        let key = normalize_title(identity);
        let entry = self
            .entries
            .iter_mut()
            .rev()
            .find(|s| s.title_key() == key)
            .ok_or(EngineError::NoActiveSuggestion {
                media_type: self.media_type,
            })?;

        if target == Outcome::Pending {
            return Err(EngineError::InvalidTransition {
                from: entry.user_outcome,
                to: target,
            });
        }

        match entry.user_outcome.transition(target) {
            Some(Transition::Apply(next)) => {
                entry.user_outcome = next;
                Ok((entry.clone(), true))
            }
            Some(Transition::Unchanged) => Ok((entry.clone(), false)),
            // A liked entry is still active; it just cannot take this target.
            None if entry.user_outcome == Outcome::Liked => Err(EngineError::InvalidTransition {
                from: entry.user_outcome,
                to: target,
            }),
            None => Err(EngineError::NoActiveSuggestion {
                media_type: self.media_type,
            }),
        }
    }

    /// History lines in chronological order, ready for the content assembler.
    pub fn render_for_prompt(&self) -> Vec<String> {
        self.entries.iter().map(Suggestion::prompt_line).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::media::{Book, Song};

    fn song(title: &str) -> Suggestion {
        Suggestion::new(
            MediaItem::Song(Song {
                title: title.to_string(),
                artist: "Artist".to_string(),
                genre: None,
            }),
            "because",
            "{}",
        )
    }

    #[test]
    fn record_starts_pending_and_rejects_case_insensitive_duplicates() {
        let mut history = SuggestionHistory::new(MediaType::Song);
        let mut liked = song("Song C");
        liked.user_outcome = Outcome::Liked;
        let recorded = history.record(liked).unwrap();
        assert_eq!(recorded.user_outcome, Outcome::Pending);

        let err = history.record(song("  song c ")).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateSuggestion { .. }));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn record_rejects_other_media_types() {
        let mut history = SuggestionHistory::new(MediaType::Song);
        let book = Suggestion::new(
            MediaItem::Book(Book {
                title: "Dune".to_string(),
                author: "Frank Herbert".to_string(),
                genre: None,
            }),
            "",
            "",
        );
        assert!(matches!(
            history.record(book),
            Err(EngineError::InvalidContent(_))
        ));
    }

    #[test]
    fn liked_can_still_be_added() {
        let mut history = SuggestionHistory::new(MediaType::Song);
        history.record(song("A")).unwrap();
        let (s, changed) = history.update_outcome("A", Outcome::Liked).unwrap();
        assert!(changed);
        assert_eq!(s.user_outcome, Outcome::Liked);
        let (s, _) = history.update_outcome("a", Outcome::Added).unwrap();
        assert_eq!(s.user_outcome, Outcome::Added);
    }

    #[test]
    fn terminal_outcomes_reject_further_feedback() {
        for terminal in [Outcome::Disliked, Outcome::Skipped] {
            let mut history = SuggestionHistory::new(MediaType::Song);
            history.record(song("A")).unwrap();
            history.update_outcome("A", terminal).unwrap();
            for target in [Outcome::Liked, Outcome::Disliked, Outcome::Added] {
                let err = history.update_outcome("A", target).unwrap_err();
                assert!(matches!(err, EngineError::NoActiveSuggestion { .. }));
            }
        }
    }

    #[test]
    fn liked_entry_rejects_repeat_or_reversed_feedback() {
        let mut history = SuggestionHistory::new(MediaType::Song);
        history.record(song("A")).unwrap();
        history.update_outcome("A", Outcome::Liked).unwrap();
        for target in [Outcome::Liked, Outcome::Disliked] {
            let err = history.update_outcome("A", target).unwrap_err();
            assert!(matches!(
                err,
                EngineError::InvalidTransition {
                    from: Outcome::Liked,
                    to,
                } if to == target
            ));
        }
        assert_eq!(history.latest().unwrap().user_outcome, Outcome::Liked);
    }

    #[test]
    fn skip_on_endorsed_entry_is_a_no_op() {
        let mut history = SuggestionHistory::new(MediaType::Song);
        history.record(song("A")).unwrap();
        history.update_outcome("A", Outcome::Liked).unwrap();
        let (s, changed) = history.update_outcome("A", Outcome::Skipped).unwrap();
        assert!(!changed);
        assert_eq!(s.user_outcome, Outcome::Liked);

        history.update_outcome("A", Outcome::Added).unwrap();
        let (s, changed) = history.update_outcome("A", Outcome::Skipped).unwrap();
        assert!(!changed);
        assert_eq!(s.user_outcome, Outcome::Added);
    }

    #[test]
    fn pending_is_never_a_valid_target() {
        let mut history = SuggestionHistory::new(MediaType::Song);
        history.record(song("A")).unwrap();
        assert!(matches!(
            history.update_outcome("A", Outcome::Pending),
            Err(EngineError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn unknown_identity_has_no_active_suggestion() {
        let mut history = SuggestionHistory::new(MediaType::Song);
        assert!(matches!(
            history.update_outcome("missing", Outcome::Liked),
            Err(EngineError::NoActiveSuggestion { .. })
        ));
    }

    #[test]
    fn render_for_prompt_lists_outcomes_in_order() {
        let mut history = SuggestionHistory::new(MediaType::Song);
        history.record(song("A")).unwrap();
        history.record(song("B")).unwrap();
        history.update_outcome("A", Outcome::Disliked).unwrap();
        assert_eq!(
            history.render_for_prompt(),
            vec![
                "Suggested song: \"A\" by Artist  User Outcome: disliked".to_string(),
                "Suggested song: \"B\" by Artist  User Outcome: pending".to_string(),
            ]
        );
    }
}
