pub mod catalog;
pub mod credentials;
pub mod domain;
pub mod engine;
pub mod error;
pub mod llm;
pub mod prompt;
pub mod storage;

pub use error::{EngineError, EngineResult};

pub mod config {
    use anyhow::Context;

    pub const DEFAULT_MAX_ERROR_FOLLOWUPS: u32 = 1;
    const MAX_ERROR_FOLLOWUPS_CAP: u32 = 2;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub llm_provider: Option<String>,
        pub openai_api_key: Option<String>,
        pub gemini_api_key: Option<String>,
        pub tmdb_token: Option<String>,
        pub rawg_api_key: Option<String>,
        pub spotify_token: Option<String>,
        pub sentry_dsn: Option<String>,
        /// JSON list of tagged media items used as the favorites/library catalog.
        pub favorites_path: Option<String>,
        pub max_error_followups: u32,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let max_error_followups = match std::env::var("MAX_ERROR_FOLLOWUPS") {
                Ok(s) => s
                    .trim()
                    .parse::<u32>()
                    .with_context(|| format!("MAX_ERROR_FOLLOWUPS must be an integer (got {s})"))?,
                Err(_) => DEFAULT_MAX_ERROR_FOLLOWUPS,
            };

            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                llm_provider: std::env::var("LLM_PROVIDER").ok(),
                openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
                gemini_api_key: std::env::var("GEMINI_API_KEY").ok(),
                tmdb_token: std::env::var("TMDB_TOKEN").ok(),
                rawg_api_key: std::env::var("RAWG_API_KEY").ok(),
                spotify_token: std::env::var("SPOTIFY_TOKEN").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                favorites_path: std::env::var("FAVORITES_PATH").ok(),
                max_error_followups: max_error_followups.min(MAX_ERROR_FOLLOWUPS_CAP),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn provider(&self) -> anyhow::Result<crate::llm::Provider> {
            match self.llm_provider.as_deref() {
                None => Ok(crate::llm::Provider::OpenAi),
                Some(s) => s
                    .parse()
                    .map_err(|e: String| anyhow::anyhow!(e))
                    .context("LLM_PROVIDER is invalid"),
            }
        }
    }

    impl Default for Settings {
        fn default() -> Self {
            Self {
                database_url: None,
                llm_provider: None,
                openai_api_key: None,
                gemini_api_key: None,
                tmdb_token: None,
                rawg_api_key: None,
                spotify_token: None,
                sentry_dsn: None,
                favorites_path: None,
                max_error_followups: DEFAULT_MAX_ERROR_FOLLOWUPS,
            }
        }
    }
}
