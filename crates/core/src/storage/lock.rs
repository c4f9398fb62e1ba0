use crate::domain::SessionKey;
use crate::error::EngineResult;
use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Single-flight registry: at most one in-flight round per (user, media type).
#[async_trait::async_trait]
pub trait RoundLock: Send + Sync {
    /// `Ok(None)` when a round for `key` is already running; callers drop the request.
    async fn try_acquire(&self, key: &SessionKey) -> EngineResult<Option<RoundGuard>>;
}

/// Holds a round slot. Dropping it (including on cancellation) frees the slot; prefer
/// [`RoundGuard::release`] on the normal path so Postgres connections go back to the pool.
#[derive(Debug)]
pub struct RoundGuard {
    held: Held,
}

#[derive(Debug)]
enum Held {
    Memory {
        active: Arc<Mutex<HashSet<SessionKey>>>,
        key: SessionKey,
    },
    Postgres {
        conn: Option<PoolConnection<Postgres>>,
        key: String,
    },
    Released,
}

impl RoundGuard {
    pub async fn release(mut self) {
        if let Held::Postgres { conn, key } = &mut self.held {
            if let Some(mut conn) = conn.take() {
                let unlocked = sqlx::query("SELECT pg_advisory_unlock($1, hashtext($2))")
                    .persistent(false)
                    .bind(LOCK_NAMESPACE)
                    .bind(key.as_str())
                    .execute(&mut *conn)
                    .await;
                if let Err(err) = unlocked {
                    tracing::warn!(lock = %key, error = %err, "advisory unlock failed; closing connection");
                    drop(conn.detach());
                }
            }
        }
        // Drop releases the in-process slot.
    }
}

impl Drop for RoundGuard {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.held, Held::Released) {
            Held::Memory { active, key } => {
                active
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&key);
            }
            // Session-level advisory locks die with the session.
            Held::Postgres {
                conn: Some(conn), ..
            } => drop(conn.detach()),
            Held::Postgres { conn: None, .. } | Held::Released => {}
        }
    }
}

/// Process-local round lock.
#[derive(Debug, Default)]
pub struct MemoryRoundLock {
    active: Arc<Mutex<HashSet<SessionKey>>>,
}

impl MemoryRoundLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, key: &SessionKey) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }
}

#[async_trait::async_trait]
impl RoundLock for MemoryRoundLock {
    async fn try_acquire(&self, key: &SessionKey) -> EngineResult<Option<RoundGuard>> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(key.clone()) {
            return Ok(None);
        }
        Ok(Some(RoundGuard {
            held: Held::Memory {
                active: Arc::clone(&self.active),
                key: key.clone(),
            },
        }))
    }
}

// Advisory locks are scoped to the Postgres session, so the guard keeps its connection checked
// out for the whole round. Keys are (namespace, hashtext("user/media_type")).
const LOCK_NAMESPACE: i32 = 0x5442_5544; // "TBUD"

fn lock_key(key: &SessionKey) -> String {
    key.to_string()
}

/// Round lock shared by every process using the same database.
#[derive(Debug, Clone)]
pub struct PgRoundLock {
    pool: sqlx::PgPool,
}

impl PgRoundLock {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RoundLock for PgRoundLock {
    async fn try_acquire(&self, key: &SessionKey) -> EngineResult<Option<RoundGuard>> {
        let lock = lock_key(key);
        let mut conn = self.pool.acquire().await?;
        let (acquired,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1, hashtext($2))")
            .persistent(false)
            .bind(LOCK_NAMESPACE)
            .bind(lock.as_str())
            .fetch_one(&mut *conn)
            .await?;
        if !acquired {
            return Ok(None);
        }
        Ok(Some(RoundGuard {
            held: Held::Postgres {
                conn: Some(conn),
                key: lock,
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MediaType;

    #[tokio::test]
    async fn second_acquire_fails_until_release() {
        let locks = MemoryRoundLock::new();
        let key = SessionKey::new("u", MediaType::Song);

        let guard = locks.try_acquire(&key).await.unwrap().unwrap();
        assert!(locks.try_acquire(&key).await.unwrap().is_none());
        assert!(locks.is_active(&key));

        guard.release().await;
        assert!(!locks.is_active(&key));
        assert!(locks.try_acquire(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dropped_guard_frees_the_slot() {
        let locks = MemoryRoundLock::new();
        let key = SessionKey::new("u", MediaType::Book);
        drop(locks.try_acquire(&key).await.unwrap());
        assert!(!locks.is_active(&key));
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let locks = MemoryRoundLock::new();
        let _song = locks
            .try_acquire(&SessionKey::new("u", MediaType::Song))
            .await
            .unwrap()
            .unwrap();
        assert!(locks
            .try_acquire(&SessionKey::new("u", MediaType::Movie))
            .await
            .unwrap()
            .is_some());
        assert!(locks
            .try_acquire(&SessionKey::new("v", MediaType::Song))
            .await
            .unwrap()
            .is_some());
    }

    #[test]
    fn pg_lock_key_names_user_and_media_type() {
        assert_eq!(lock_key(&SessionKey::new("u1", MediaType::TvShow)), "u1/tv_show");
    }
}
