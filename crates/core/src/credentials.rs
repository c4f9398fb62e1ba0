use crate::config::Settings;
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    #[serde(rename = "openai")]
    OpenAi,
    Gemini,
    Tmdb,
    Rawg,
    Spotify,
}

impl CredentialType {
    pub fn as_str(self) -> &'static str {
        match self {
            CredentialType::OpenAi => "openai",
            CredentialType::Gemini => "gemini",
            CredentialType::Tmdb => "tmdb",
            CredentialType::Rawg => "rawg",
            CredentialType::Spotify => "spotify",
        }
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(CredentialType::OpenAi),
            "gemini" => Ok(CredentialType::Gemini),
            "tmdb" => Ok(CredentialType::Tmdb),
            "rawg" => Ok(CredentialType::Rawg),
            "spotify" => Ok(CredentialType::Spotify),
            other => Err(format!("unknown credential type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialAction {
    Updated,
    Removed,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Read side of the OS keyring (or whatever holds API keys).
pub trait CredentialStore: Send + Sync {
    fn get_key(&self, credential: CredentialType) -> EngineResult<String>;
}

fn missing(credential: CredentialType) -> EngineError {
    EngineError::InvalidCredential {
        credential,
        detail: "no key configured".to_string(),
    }
}

/// Keys captured from the environment at startup.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialStore {
    keys: HashMap<CredentialType, String>,
}

impl EnvCredentialStore {
    pub fn from_settings(settings: &Settings) -> Self {
        let pairs = [
            (CredentialType::OpenAi, &settings.openai_api_key),
            (CredentialType::Gemini, &settings.gemini_api_key),
            (CredentialType::Tmdb, &settings.tmdb_token),
            (CredentialType::Rawg, &settings.rawg_api_key),
            (CredentialType::Spotify, &settings.spotify_token),
        ];
        let keys = pairs
            .into_iter()
            .filter_map(|(credential, value)| {
                value
                    .as_deref()
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(|v| (credential, v.to_string()))
            })
            .collect();
        Self { keys }
    }
}

impl CredentialStore for EnvCredentialStore {
    fn get_key(&self, credential: CredentialType) -> EngineResult<String> {
        self.keys
            .get(&credential)
            .cloned()
            .ok_or_else(|| missing(credential))
    }
}

/// Keys edited at runtime, layered over an optional fallback store.
#[derive(Default)]
pub struct MemoryCredentialStore {
    keys: RwLock<HashMap<CredentialType, String>>,
    fallback: Option<Arc<dyn CredentialStore>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback(fallback: Arc<dyn CredentialStore>) -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            fallback: Some(fallback),
        }
    }

    pub fn set(&self, credential: CredentialType, key: impl Into<String>) -> EngineResult<()> {
        let key = key.into().trim().to_string();
        if key.is_empty() {
            return Err(EngineError::InvalidCredential {
                credential,
                detail: "key must be non-empty".to_string(),
            });
        }
        write(&self.keys).insert(credential, key);
        Ok(())
    }

    pub fn remove(&self, credential: CredentialType) -> bool {
        write(&self.keys).remove(&credential).is_some()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get_key(&self, credential: CredentialType) -> EngineResult<String> {
        if let Some(key) = read(&self.keys).get(&credential) {
            return Ok(key.clone());
        }
        match &self.fallback {
            Some(fallback) => fallback.get_key(credential),
            None => Err(missing(credential)),
        }
    }
}

pub type CredentialHandler = Arc<dyn Fn(CredentialType, CredentialAction) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Registration {
    id: SubscriptionId,
    credential: CredentialType,
    handler: CredentialHandler,
}

/// Publish/subscribe registry for credential edits, keyed by credential type.
///
/// Constructed once at startup and shared by reference. `publish` runs matching handlers
/// synchronously on the calling thread, in registration order.
#[derive(Default)]
pub struct CredentialBus {
    next_id: AtomicU64,
    handlers: RwLock<Vec<Registration>>,
}

impl CredentialBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_change<F>(&self, credential: CredentialType, handler: F) -> SubscriptionId
    where
        F: Fn(CredentialType, CredentialAction) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        write(&self.handlers).push(Registration {
            id,
            credential,
            handler: Arc::new(handler),
        });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = write(&self.handlers);
        let before = handlers.len();
        handlers.retain(|r| r.id != id);
        handlers.len() != before
    }

    /// Returns how many handlers ran.
    pub fn publish(&self, credential: CredentialType, action: CredentialAction) -> usize {
        // Snapshot first so handlers may (un)subscribe without deadlocking.
        let matching: Vec<CredentialHandler> = read(&self.handlers)
            .iter()
            .filter(|r| r.credential == credential)
            .map(|r| Arc::clone(&r.handler))
            .collect();

        tracing::debug!(%credential, ?action, handlers = matching.len(), "credential change published");
        for handler in &matching {
            handler(credential, action);
        }
        matching.len()
    }
}

/// An API key read from a [`CredentialStore`] and cached until the bus says it changed.
pub struct CachedKey {
    credential: CredentialType,
    store: Arc<dyn CredentialStore>,
    value: RwLock<Option<String>>,
}

impl CachedKey {
    pub fn new(credential: CredentialType, store: Arc<dyn CredentialStore>) -> Self {
        let value = store.get_key(credential).ok();
        Self {
            credential,
            store,
            value: RwLock::new(value),
        }
    }

    pub fn credential(&self) -> CredentialType {
        self.credential
    }

    /// Cached key, falling back to one store read when nothing is cached yet.
    pub fn get(&self) -> EngineResult<String> {
        if let Some(key) = read(&self.value).as_ref() {
            return Ok(key.clone());
        }
        self.refresh()
    }

    pub fn refresh(&self) -> EngineResult<String> {
        match self.store.get_key(self.credential) {
            Ok(key) => {
                *write(&self.value) = Some(key.clone());
                Ok(key)
            }
            Err(err) => {
                *write(&self.value) = None;
                Err(err)
            }
        }
    }

    /// Re-reads the key whenever its credential type is published on `bus`.
    pub fn watch(self: &Arc<Self>, bus: &CredentialBus) -> SubscriptionId {
        let weak: Weak<CachedKey> = Arc::downgrade(self);
        bus.on_change(self.credential, move |credential, action| {
            let Some(cached) = weak.upgrade() else {
                return;
            };
            match cached.refresh() {
                Ok(_) => tracing::info!(%credential, ?action, "api key refreshed"),
                Err(err) => tracing::warn!(%credential, ?action, error = %err, "api key unavailable after change"),
            }
        })
    }
}
