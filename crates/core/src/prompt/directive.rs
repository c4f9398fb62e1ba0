use crate::domain::{MediaItem, MediaType};

/// Static task text plus the rendered favorites for one media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimeDirective {
    pub media_type: MediaType,
    pub task: String,
    pub baseline: String,
}

impl PrimeDirective {
    pub fn new(media_type: MediaType, favorites: &[MediaItem]) -> Self {
        Self {
            media_type,
            task: directive(media_type),
            baseline: baseline(media_type, favorites),
        }
    }

    /// Re-renders the baseline after the favorites list changed.
    pub fn refresh_baseline(&mut self, favorites: &[MediaItem]) {
        self.baseline = baseline(self.media_type, favorites);
    }

    pub fn framing(&self) -> String {
        format!("{}\n{}", self.task, self.baseline)
    }
}

fn schema(media_type: MediaType) -> String {
    [
        "{".to_string(),
        "  \"title\": \"string\",".to_string(),
        format!("  \"{}\": \"string\",", media_type.creator_field()),
        "  \"genre\": \"string or null\",".to_string(),
        "  \"reasoning\": \"string\"".to_string(),
        "}".to_string(),
    ]
    .join("\n")
}

/// Instruction text priming the model for one media type, embedding the exact reply schema.
pub fn directive(media_type: MediaType) -> String {
    let label = media_type.label();
    let creator = media_type.creator_field();
    [
        format!("You are a {label} recommendation engine."),
        format!(
            "Recommend exactly ONE {label} the user has not seen in this conversation, based on \
             their favorites and on how they reacted to earlier suggestions."
        ),
        "Favor suggestions similar to what the user liked or added; steer away from what they \
         disliked or skipped."
            .to_string(),
        "Never repeat a title that was already suggested.".to_string(),
        "Return ONLY valid JSON. Do not wrap in markdown. Do not include any extra keys.".to_string(),
        "No trailing commas. No comments. Use double quotes for all JSON strings.".to_string(),
        "Output schema:".to_string(),
        schema(media_type),
        "Rules:".to_string(),
        format!("- title and {creator} must be non-empty"),
        "- genre may be null when unknown".to_string(),
        format!("- reasoning explains in one or two sentences why this {label} fits the user"),
    ]
    .join("\n")
}

/// Restated formatting requirement used by follow-up rounds.
pub fn format_reminder(media_type: MediaType) -> String {
    format!(
        "Respond with ONLY a single JSON object for one {} matching this schema. \
         No markdown, no code fences, no prose.\n{}",
        media_type.label(),
        schema(media_type)
    )
}

/// Renders favorites as compact `Title - Creator` lines followed by a count sentence.
///
/// An empty list yields an explicit "no data" instruction rather than an empty string, so the
/// model never mistakes a missing baseline for a truncated prompt.
pub fn baseline(media_type: MediaType, favorites: &[MediaItem]) -> String {
    let lines: Vec<String> = favorites
        .iter()
        .filter(|item| item.media_type() == media_type)
        .map(MediaItem::baseline_line)
        .collect();

    if lines.is_empty() {
        return format!(
            "No favorite {} are on record yet. Suggest a widely acclaimed {} to start building a \
             taste profile.",
            media_type.plural(),
            media_type.label()
        );
    }

    format!(
        "{}\nAnalyzed {} favorite {}. Introduce {} and styles that do not appear in this list.",
        lines.join("\n"),
        lines.len(),
        media_type.plural(),
        media_type.creator_plural()
    )
}
