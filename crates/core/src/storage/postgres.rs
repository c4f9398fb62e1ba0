use crate::domain::{MediaItem, Outcome, SessionKey, Suggestion, SuggestionHistory};
use crate::error::{EngineError, EngineResult};
use crate::storage::HistoryStore;
use chrono::{DateTime, Utc};
use uuid::Uuid;

type HistoryRow = (Uuid, serde_json::Value, String, String, String, DateTime<Utc>);

/// Postgres-backed history; the unique index on `(user_id, media_type, title_key)` is the durable
/// guard against repeats.
#[derive(Debug, Clone)]
pub struct PgHistoryStore {
    pool: sqlx::PgPool,
}

impl PgHistoryStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    async fn load<'e, E>(
        executor: E,
        key: &SessionKey,
        for_update: bool,
    ) -> EngineResult<SuggestionHistory>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let sql = if for_update {
            "SELECT id, content, reasoning, user_outcome, raw_response, suggested_at \
             FROM suggestion_history \
             WHERE user_id = $1 AND media_type = $2 \
             ORDER BY seq ASC \
             FOR UPDATE"
        } else {
            "SELECT id, content, reasoning, user_outcome, raw_response, suggested_at \
             FROM suggestion_history \
             WHERE user_id = $1 AND media_type = $2 \
             ORDER BY seq ASC"
        };

        let rows = sqlx::query_as::<_, HistoryRow>(sql)
            .persistent(false)
            .bind(&key.user_id)
            .bind(key.media_type.as_str())
            .fetch_all(executor)
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            entries.push(row_to_suggestion(row)?);
        }
        Ok(SuggestionHistory::from_entries(key.media_type, entries))
    }
}

fn row_to_suggestion(
    (id, content, reasoning, user_outcome, raw_response, suggested_at): HistoryRow,
) -> EngineResult<Suggestion> {
    let content = serde_json::from_value::<MediaItem>(content)
        .map_err(|e| EngineError::Storage(sqlx::Error::Decode(Box::new(e))))?;
    let user_outcome = user_outcome
        .parse::<Outcome>()
        .map_err(|e| EngineError::Storage(sqlx::Error::Decode(e.into())))?;

    Ok(Suggestion {
        id,
        content,
        reasoning,
        user_outcome,
        raw_response,
        suggested_at,
    })
}

#[async_trait::async_trait]
impl HistoryStore for PgHistoryStore {
    async fn history(&self, key: &SessionKey) -> EngineResult<SuggestionHistory> {
        Self::load(&self.pool, key, false).await
    }

    async fn record(&self, key: &SessionKey, suggestion: Suggestion) -> EngineResult<Suggestion> {
        let mut tx = self.pool.begin().await?;
        let mut history = Self::load(&mut *tx, key, true).await?;
        let recorded = history.record(suggestion)?;

        let content = serde_json::to_value(&recorded.content).map_err(|e| {
            EngineError::InvalidContent(format!("failed to encode suggestion content: {e}"))
        })?;

        let inserted = sqlx::query(
            "INSERT INTO suggestion_history \
             (id, user_id, media_type, title_key, content, reasoning, user_outcome, raw_response, suggested_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .persistent(false)
        .bind(recorded.id)
        .bind(&key.user_id)
        .bind(key.media_type.as_str())
        .bind(recorded.title_key())
        .bind(content)
        .bind(&recorded.reasoning)
        .bind(recorded.user_outcome.as_str())
        .bind(&recorded.raw_response)
        .bind(recorded.suggested_at)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(EngineError::DuplicateSuggestion {
                    title: recorded.content.title().to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        tx.commit().await?;
        tracing::debug!(session = %key, id = %recorded.id, "suggestion recorded");
        Ok(recorded)
    }

    async fn update_outcome(
        &self,
        key: &SessionKey,
        identity: &str,
        outcome: Outcome,
    ) -> EngineResult<(Suggestion, bool)> {
        let mut tx = self.pool.begin().await?;
        let mut history = Self::load(&mut *tx, key, true).await?;
        let (updated, changed) = history.update_outcome(identity, outcome)?;

        if changed {
            sqlx::query(
                "UPDATE suggestion_history \
                 SET user_outcome = $1, updated_at = now() \
                 WHERE id = $2",
            )
            .persistent(false)
            .bind(updated.user_outcome.as_str())
            .bind(updated.id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok((updated, changed))
    }
}
