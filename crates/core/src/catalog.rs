use crate::domain::media::normalize_title;
use crate::domain::{MediaItem, MediaType};
use crate::error::EngineResult;
use anyhow::Context;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

/// Read-only view of the user's media library, as the engine needs it.
///
/// Real implementations wrap the Spotify/TMDB/RAWG/OpenLibrary clients; failures should be
/// reported as `EngineError::Transport`.
#[async_trait::async_trait]
pub trait MediaCatalog: Send + Sync {
    async fn favorites(&self, user_id: &str, media_type: MediaType) -> EngineResult<Vec<MediaItem>>;

    async fn in_library(&self, user_id: &str, item: &MediaItem) -> EngineResult<bool>;
}

/// In-memory library shared by every user of the process.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    items: RwLock<HashMap<MediaType, Vec<MediaItem>>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: impl IntoIterator<Item = MediaItem>) -> Self {
        let mut by_type: HashMap<MediaType, Vec<MediaItem>> = HashMap::new();
        for item in items {
            by_type.entry(item.media_type()).or_default().push(item);
        }
        Self {
            items: RwLock::new(by_type),
        }
    }

    /// Loads a JSON array of tagged media items, e.g.
    /// `[{"media_type":"song","title":"Song A","artist":"Artist 1"}]`.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read favorites file {}", path.display()))?;
        let items: Vec<MediaItem> = serde_json::from_str(&text)
            .with_context(|| format!("favorites file {} is not a media item list", path.display()))?;
        Ok(Self::from_items(items))
    }

    pub async fn set_favorites(&self, media_type: MediaType, favorites: Vec<MediaItem>) {
        let favorites = favorites
            .into_iter()
            .filter(|item| item.media_type() == media_type)
            .collect();
        self.items.write().await.insert(media_type, favorites);
    }
}

#[async_trait::async_trait]
impl MediaCatalog for StaticCatalog {
    async fn favorites(&self, _user_id: &str, media_type: MediaType) -> EngineResult<Vec<MediaItem>> {
        Ok(self
            .items
            .read()
            .await
            .get(&media_type)
            .cloned()
            .unwrap_or_default())
    }

    async fn in_library(&self, _user_id: &str, item: &MediaItem) -> EngineResult<bool> {
        let key = item.title_key();
        Ok(self
            .items
            .read()
            .await
            .get(&item.media_type())
            .is_some_and(|items| items.iter().any(|i| normalize_title(i.title()) == key)))
    }
}
