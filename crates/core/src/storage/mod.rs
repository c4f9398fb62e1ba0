pub mod lock;
pub mod memory;
pub mod postgres;

use crate::domain::{Outcome, SessionKey, Suggestion, SuggestionHistory};
use crate::error::EngineResult;
use anyhow::Context;

pub use lock::{MemoryRoundLock, PgRoundLock, RoundGuard, RoundLock};
pub use memory::MemoryHistoryStore;
pub use postgres::PgHistoryStore;

/// Durable per-(user, media type) suggestion history. The only owner of outcome state.
#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    async fn history(&self, key: &SessionKey) -> EngineResult<SuggestionHistory>;

    /// Appends `suggestion` as `pending`; fails with `DuplicateSuggestion` on a known title.
    async fn record(&self, key: &SessionKey, suggestion: Suggestion) -> EngineResult<Suggestion>;

    /// Moves the latest entry titled `identity` to `outcome`; returns it and whether it changed.
    async fn update_outcome(
        &self,
        key: &SessionKey,
        identity: &str,
        outcome: Outcome,
    ) -> EngineResult<(Suggestion, bool)>;
}

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}
