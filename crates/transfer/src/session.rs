use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;

/// Identity of a local file for session lookup.
///
/// Keyed by name *and* size: name alone would alias two different files that
/// happen to share a name, silently resuming one upload with the other's
/// chunks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn for_file(file_name: &str, file_size: u64) -> Self {
        Self(format!("{file_name}\u{1f}{file_size}"))
    }

    fn as_str(&self) -> &str {
        &self.0
    }
}

/// Durable persistence behind [`UploadSessionStore`].
///
/// The store serializes the whole session map to one JSON document; the
/// backend only moves that document to and from durable storage.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn load(&self) -> std::io::Result<Option<String>>;
    async fn persist(&self, raw: &str) -> std::io::Result<()>;
    async fn clear(&self) -> std::io::Result<()>;
}

/// JSON file in a state directory.
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SessionBackend for JsonFileBackend {
    async fn load(&self) -> std::io::Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn persist(&self, raw: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &self.path).await
    }

    async fn clear(&self) -> std::io::Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// In-memory backend for tests.
#[derive(Default)]
pub struct MemorySessionBackend {
    raw: Mutex<Option<String>>,
}

impl MemorySessionBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionBackend for MemorySessionBackend {
    async fn load(&self) -> std::io::Result<Option<String>> {
        Ok(self.raw.lock().await.clone())
    }

    async fn persist(&self, raw: &str) -> std::io::Result<()> {
        *self.raw.lock().await = Some(raw.to_string());
        Ok(())
    }

    async fn clear(&self) -> std::io::Result<()> {
        *self.raw.lock().await = None;
        Ok(())
    }
}

/// Maps file identity to the server-assigned upload id, surviving process
/// restarts.
///
/// Writes go through to the backend immediately; lookups hit the in-memory
/// cache first and fall back to the backend on a miss. Entries never expire
/// on their own — [`clear`](Self::clear) is the only way out. A corrupt
/// persisted document loads as "no sessions" rather than an error.
pub struct UploadSessionStore {
    backend: Box<dyn SessionBackend>,
    cache: Mutex<Option<HashMap<String, String>>>,
}

impl UploadSessionStore {
    pub fn new(backend: impl SessionBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            cache: Mutex::new(None),
        }
    }

    async fn load_from_backend(&self) -> HashMap<String, String> {
        match self.backend.load().await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!("corrupt session file, starting with no sessions: {e}");
                    HashMap::new()
                }
            },
            Ok(None) => HashMap::new(),
            Err(e) => {
                tracing::warn!("failed to read session file, starting with no sessions: {e}");
                HashMap::new()
            }
        }
    }

    /// Upserts a mapping and persists it immediately.
    pub async fn save(&self, key: &SessionKey, file_id: &str) -> std::io::Result<()> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = Some(self.load_from_backend().await);
        }
        let map = cache.as_mut().unwrap();
        map.insert(key.as_str().to_string(), file_id.to_string());
        let raw = serde_json::to_string(map).map_err(std::io::Error::other)?;
        self.backend.persist(&raw).await
    }

    /// The upload id previously saved for this file, if any.
    pub async fn lookup(&self, key: &SessionKey) -> Option<String> {
        let mut cache = self.cache.lock().await;
        if let Some(map) = cache.as_ref()
            && let Some(id) = map.get(key.as_str())
        {
            return Some(id.clone());
        }
        // Cache miss: repopulate from durable storage.
        let map = self.load_from_backend().await;
        let found = map.get(key.as_str()).cloned();
        *cache = Some(map);
        found
    }

    /// Removes every entry from memory and durable storage.
    pub async fn clear(&self) -> std::io::Result<()> {
        *self.cache.lock().await = Some(HashMap::new());
        self.backend.clear().await
    }
}
