use crate::error::{EngineError, EngineResult};
use crate::prompt::{Content, Message};

/// Orders a round's context as directive+baseline, then history, then user constraints.
///
/// Providers are stateless per call, so this sequence is the whole context window.
pub fn compose(content: Option<&Content>) -> EngineResult<Vec<Message>> {
    let content =
        content.ok_or_else(|| EngineError::InvalidContent("content is not set".to_string()))?;

    if content.directive.task.trim().is_empty() {
        return Err(EngineError::InvalidContent(
            "directive task text is empty".to_string(),
        ));
    }

    let mut messages =
        Vec::with_capacity(1 + content.suggestions.len() + content.user_constraints.len());
    messages.push(Message::system(content.directive.framing()));

    for suggestion in &content.suggestions {
        if suggestion.media_type() != content.directive.media_type {
            return Err(EngineError::InvalidContent(format!(
                "history entry \"{}\" is a {}, expected {}",
                suggestion.content.title(),
                suggestion.media_type(),
                content.directive.media_type
            )));
        }
        messages.push(Message::user(suggestion.prompt_line()));
    }

    messages.extend(
        content
            .user_constraints
            .iter()
            .filter(|c| !c.trim().is_empty())
            .map(|c| Message::user(c.clone())),
    );

    Ok(messages)
}
