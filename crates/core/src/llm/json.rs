use crate::domain::media::{Book, Movie, Song, TvShow, VideoGame};
use crate::domain::{MediaItem, MediaType, Suggestion};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;

const JSON_FENCE: &str = "```json";
const FENCE: &str = "```";

/// Isolates the JSON object in a raw model reply.
///
/// Best-effort string surgery: a ```json fenced block wins; otherwise the trimmed text is wrapped
/// in braces unless it already is one `{...}`. Decoding is the real validity check.
pub fn extract_json(raw: &str) -> String {
    if let Some(start) = find_ascii_case_insensitive(raw, JSON_FENCE) {
        let inner = &raw[start + JSON_FENCE.len()..];
        let inner = match inner.find(FENCE) {
            Some(end) => &inner[..end],
            None => inner,
        };
        return inner.trim().to_string();
    }

    let mut trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix(FENCE) {
        // Untagged fence: drop the opening line and the closing fence.
        let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
        trimmed = match rest.rfind(FENCE) {
            Some(end) => rest[..end].trim(),
            None => rest.trim(),
        };
    }

    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return trimmed.to_string();
    }

    format!("{{{trimmed}}}")
}

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .to_ascii_lowercase()
        .find(&needle.to_ascii_lowercase())
}

/// Why a reply could not be turned into a suggestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    pub detail: String,
}

impl ParseFailure {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }

    pub fn duplicate(title: &str) -> Self {
        Self::new(format!(
            "\"{title}\" was already suggested or is already in the user's library; \
             recommend a different title"
        ))
    }
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.detail)
    }
}

#[derive(Debug, Deserialize)]
struct Reply<T> {
    #[serde(flatten)]
    item: T,
    #[serde(default)]
    reasoning: Option<String>,
}

fn decode<T: DeserializeOwned>(json: &str) -> Result<(T, String), serde_json::Error> {
    let reply = serde_json::from_str::<Reply<T>>(json)?;
    Ok((reply.item, reply.reasoning.unwrap_or_default()))
}

/// Decodes extracted JSON into a pending suggestion of `media_type`.
pub fn parse_suggestion(
    media_type: MediaType,
    json_text: &str,
    raw_response: &str,
) -> Result<Suggestion, ParseFailure> {
    let decoded = match media_type {
        MediaType::Song => decode::<Song>(json_text).map(|(i, r)| (MediaItem::Song(i), r)),
        MediaType::Movie => decode::<Movie>(json_text).map(|(i, r)| (MediaItem::Movie(i), r)),
        MediaType::Book => decode::<Book>(json_text).map(|(i, r)| (MediaItem::Book(i), r)),
        MediaType::TvShow => decode::<TvShow>(json_text).map(|(i, r)| (MediaItem::TvShow(i), r)),
        MediaType::VideoGame => {
            decode::<VideoGame>(json_text).map(|(i, r)| (MediaItem::VideoGame(i), r))
        }
    };

    let (item, reasoning) = decoded.map_err(|e| {
        ParseFailure::new(format!(
            "reply is not valid JSON for the {} schema: {e}",
            media_type.label()
        ))
    })?;

    let item = item.normalized();
    if item.title().is_empty() {
        return Err(ParseFailure::new("title must be non-empty"));
    }
    if item.creator().is_empty() {
        return Err(ParseFailure::new(format!(
            "{} must be non-empty",
            media_type.creator_field()
        )));
    }

    Ok(Suggestion::new(item, reasoning.trim(), raw_response))
}

/// Extracts then decodes a raw reply in one step.
pub fn parse_reply(media_type: MediaType, raw: &str) -> Result<Suggestion, ParseFailure> {
    if raw.trim().is_empty() {
        return Err(ParseFailure::new("reply is empty"));
    }
    parse_suggestion(media_type, &extract_json(raw), raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Outcome;

    #[test]
    fn extract_json_returns_fenced_body_only() {
        let raw = "Sure! Here's my pick:\n```json\n  {\"title\":\"X\"}  \n```\nEnjoy the song.";
        assert_eq!(extract_json(raw), "{\"title\":\"X\"}");
    }

    #[test]
    fn extract_json_handles_unterminated_fence() {
        let raw = "```JSON\n{\"title\":\"X\"}";
        assert_eq!(extract_json(raw), "{\"title\":\"X\"}");
    }

    #[test]
    fn extract_json_handles_untagged_fence() {
        let raw = "```\n{\"a\":1}\n```";
        assert_eq!(extract_json(raw), "{\"a\":1}");
    }

    #[test]
    fn extract_json_wraps_prose_instead_of_slicing_it() {
        let raw = "prefix {\"a\":1} suffix";
        assert_eq!(extract_json(raw), "{prefix {\"a\":1} suffix}");
    }

    #[test]
    fn bare_fields_with_braces_in_a_value_still_parse() {
        let raw = r#""title": "X", "artist": "Y", "reasoning": "fans of {braces} will like it""#;
        assert_eq!(extract_json(raw), format!("{{{raw}}}"));

        let s = parse_reply(MediaType::Song, raw).unwrap();
        assert_eq!(s.content.title(), "X");
        assert_eq!(s.content.creator(), "Y");
        assert_eq!(s.reasoning, "fans of {braces} will like it");
    }

    #[test]
    fn extract_json_wraps_bare_fields() {
        let raw = "  \"title\": \"X\", \"artist\": \"Y\"\n";
        assert_eq!(extract_json(raw), "{\"title\": \"X\", \"artist\": \"Y\"}");
    }

    #[test]
    fn well_formed_reply_round_trips_fields() {
        let raw = r#"{"title":"Song C","artist":"Artist 3","genre":"dream pop","reasoning":"Similar textures."}"#;
        let s = parse_reply(MediaType::Song, raw).unwrap();
        assert_eq!(
            s.content,
            MediaItem::Song(Song {
                title: "Song C".to_string(),
                artist: "Artist 3".to_string(),
                genre: Some("dream pop".to_string()),
            })
        );
        assert_eq!(s.reasoning, "Similar textures.");
        assert_eq!(s.user_outcome, Outcome::Pending);
        assert_eq!(s.raw_response, raw);
    }

    #[test]
    fn each_media_type_uses_its_creator_field() {
        let cases = [
            (MediaType::Movie, r#"{"title":"Heat","director":"Michael Mann"}"#),
            (MediaType::Book, r#"{"title":"Dune","author":"Frank Herbert"}"#),
            (MediaType::TvShow, r#"{"title":"The Wire","creator":"David Simon"}"#),
            (MediaType::VideoGame, r#"{"title":"Hades","developer":"Supergiant"}"#),
        ];
        for (media_type, raw) in cases {
            let s = parse_reply(media_type, raw).unwrap();
            assert_eq!(s.media_type(), media_type);
            assert!(s.reasoning.is_empty());
        }
        assert!(parse_reply(MediaType::Movie, r#"{"title":"Heat","author":"x"}"#).is_err());
    }

    #[test]
    fn truncated_reply_fails_to_decode() {
        let err = parse_reply(MediaType::Song, "{\"title\":\"X\"").unwrap_err();
        assert!(err.detail.contains("not valid JSON"));
    }

    #[test]
    fn blank_fields_are_rejected() {
        let err = parse_reply(MediaType::Song, r#"{"title":"  ","artist":"A"}"#).unwrap_err();
        assert_eq!(err.detail, "title must be non-empty");
        let err = parse_reply(MediaType::Book, r#"{"title":"T","author":""}"#).unwrap_err();
        assert_eq!(err.detail, "author must be non-empty");
    }

    #[test]
    fn empty_reply_is_a_parse_failure() {
        assert!(parse_reply(MediaType::Song, "   ").is_err());
    }
}
