pub mod assembler;
pub mod directive;

use crate::domain::Suggestion;
use serde::{Deserialize, Serialize};

pub use assembler::compose;
pub use directive::{baseline, directive, format_reminder, PrimeDirective};

/// Provider-neutral speaker of a message; adapters map it onto their own role names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Everything the assembler needs for one round.
#[derive(Debug, Clone)]
pub struct Content {
    pub directive: PrimeDirective,
    pub suggestions: Vec<Suggestion>,
    /// Free-text filters such as "no horror movies"; kept across rounds until cleared.
    pub user_constraints: Vec<String>,
}
