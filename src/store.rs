use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::RwLock;
use ulid::Ulid;

use crate::session::Session;
use crate::types::SessionId;

pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// How long a session lives after its last save (31 days).
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(31 * 24 * 60 * 60);

/// Sessions kept before the least recently saved ones are evicted.
pub const DEFAULT_MAX_SESSIONS: usize = 500;

/// Session persistence keyed by the id carried in the session cookie.
///
/// # Example
///
/// ```rust,ignore
/// impl SessionStore for RedisSessions {
///     async fn load(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
///         let raw: Option<String> = self.conn().await?.get(id.to_string()).await?;
///         Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
///     }
///     // save / delete ...
/// }
/// ```
pub trait SessionStore: Send + Sync + 'static {
    /// Look up a session. `None` when the id is unknown or expired.
    fn load(
        &self,
        id: &SessionId,
    ) -> impl Future<Output = Result<Option<Session>, StoreError>> + Send;

    /// Insert or replace a session.
    fn save(
        &self,
        id: &SessionId,
        session: &Session,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove a session. Removing an unknown id is not an error.
    fn delete(&self, id: &SessionId) -> impl Future<Output = Result<(), StoreError>> + Send;
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    session: Session,
    saved_at: Instant,
}

/// Process-local session store. Sessions are lost on restart.
///
/// Entries expire `ttl` after their last save. Expired entries are dropped on
/// the next save, and the least recently saved entry is evicted when a new
/// session would exceed `max_entries`.
#[derive(Debug, Clone)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, MemoryEntry>>>,
    ttl: Duration,
    max_entries: usize,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self {
            sessions: Arc::default(),
            ttl: DEFAULT_SESSION_TTL,
            max_entries: DEFAULT_MAX_SESSIONS,
        }
    }
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Entries held, including expired ones not yet pruned.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drops expired entries, returning how many were removed.
    pub async fn prune(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| entry.saved_at.elapsed() < self.ttl);
        before - sessions.len()
    }
}

impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(id)
            .filter(|entry| entry.saved_at.elapsed() < self.ttl)
            .map(|entry| entry.session.clone()))
    }

    async fn save(&self, id: &SessionId, session: &Session) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, entry| entry.saved_at.elapsed() < self.ttl);

        if !sessions.contains_key(id) {
            while !sessions.is_empty() && sessions.len() >= self.max_entries {
                let oldest = sessions
                    .iter()
                    .min_by_key(|(_, entry)| entry.saved_at)
                    .map(|(key, _)| *key);
                let Some(oldest) = oldest else { break };
                sessions.remove(&oldest);
                tracing::debug!(session_id = %oldest, "Evicted session, store full");
            }
        }

        sessions.insert(
            *id,
            MemoryEntry {
                session: session.clone(),
                saved_at: Instant::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        self.sessions.write().await.remove(id);
        Ok(())
    }
}

/// One JSON document per session under a directory.
///
/// Writes go to a uniquely named temporary file first and are renamed into
/// place, so concurrent saves of one session never collide and a crash
/// mid-write never leaves a truncated session behind. A document's age is
/// its modification time: documents older than `ttl` load as `None`, and
/// saving a new session sweeps expired documents and evicts the oldest ones
/// beyond `max_entries`.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
    ttl: Duration,
    max_entries: usize,
}

impl FileSessionStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ttl: DEFAULT_SESSION_TTL,
            max_entries: DEFAULT_MAX_SESSIONS,
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Removes expired documents, returning how many were removed.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the directory cannot be read or a
    /// document cannot be removed.
    pub async fn prune(&self) -> Result<usize, StoreError> {
        self.sweep(usize::MAX).await
    }

    // SessionId is a ULID, so the file name is always a plain 26-char token.
    fn path(&self, id: &SessionId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn is_expired(&self, modified: SystemTime) -> bool {
        modified.elapsed().is_ok_and(|age| age >= self.ttl)
    }

    /// Drops expired documents, then the oldest ones until at most `capacity`
    /// remain.
    async fn sweep(&self, capacity: usize) -> Result<usize, StoreError> {
        let mut live = Vec::new();
        let mut removed = 0;

        for (path, modified) in self.documents().await? {
            if self.is_expired(modified) {
                remove_if_present(&path).await?;
                removed += 1;
            } else {
                live.push((path, modified));
            }
        }

        if live.len() > capacity {
            live.sort_by_key(|(_, modified)| *modified);
            let excess = live.len() - capacity;
            for (path, _) in live.into_iter().take(excess) {
                remove_if_present(&path).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::debug!(removed, dir = %self.dir.display(), "Pruned session documents");
        }
        Ok(removed)
    }

    async fn documents(&self) -> Result<Vec<(PathBuf, SystemTime)>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut documents = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            documents.push((path, metadata.modified()?));
        }
        Ok(documents)
    }
}

async fn remove_if_present(path: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

impl SessionStore for FileSessionStore {
    async fn load(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let path = self.path(id);
        let modified = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata.modified()?,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if self.is_expired(modified) {
            remove_if_present(&path).await?;
            return Ok(None);
        }

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, id: &SessionId, session: &Session) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path(id);
        if !tokio::fs::try_exists(&path).await? {
            self.sweep(self.max_entries.saturating_sub(1)).await?;
        }

        let tmp = self.dir.join(format!("{id}.{}.tmp", Ulid::new()));
        tokio::fs::write(&tmp, serde_json::to_vec(session)?).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        remove_if_present(&self.path(id)).await
    }
}
