pub mod media;
pub mod suggestion;

pub use media::{MediaItem, MediaType};
pub use suggestion::{Outcome, SessionKey, Suggestion, SuggestionHistory};
