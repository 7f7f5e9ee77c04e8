//! Persistence backends for sessions.
//!
//! A store persists whole [`Session`] records keyed by [`SessionId`] and hands
//! out per-session exclusive locks. Every load, save and delete takes the
//! [`SessionLock`] as proof the caller holds it.
//!
//! Two backends ship with the crate:
//!
//! - [`MemorySessionStore`]: records live in process memory
//! - [`FileSessionStore`]: one JSON file per session in a directory, written
//!   atomically through a temporary file and a rename
//!
//! Both backends lock within the process only. Several processes sharing one
//! session directory are not coordinated.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::OwnedMutexGuard;

use crate::error::StoreError;
use crate::mcp::session::{Session, SessionId};

/// Storage for session records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Waits for exclusive access to `id`. The session need not exist.
    async fn acquire(&self, id: &SessionId) -> Result<SessionLock, StoreError>;

    /// Reads the record for the locked session, if present.
    async fn load(&self, lock: &SessionLock) -> Result<Option<Session>, StoreError>;

    /// Writes the record for the locked session.
    async fn save(&self, lock: &SessionLock, session: &Session) -> Result<(), StoreError>;

    /// Removes the record for the locked session. Absent records are fine.
    async fn delete(&self, lock: &SessionLock) -> Result<(), StoreError>;

    /// Ids of sessions idle for longer than `timeout` as of `now`.
    ///
    /// Called without any lock held; callers re-check each id under its lock.
    async fn list_expired(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Vec<SessionId>, StoreError>;
}

type LockMap = HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>;

/// Per-session async mutexes, created on demand and pruned when unused.
#[derive(Debug, Clone, Default)]
pub struct LockTable {
    inner: Arc<Mutex<LockMap>>,
}

impl LockTable {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until `id` is free and takes it.
    pub async fn acquire(&self, id: &SessionId) -> SessionLock {
        let mutex = Arc::clone(
            self.inner
                .lock()
                .entry(id.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        );
        let guard = mutex.lock_owned().await;
        SessionLock {
            id: id.clone(),
            guard: Some(guard),
            table: self.clone(),
        }
    }

    /// Number of ids with a live lock entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether no lock entries are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    fn prune(&self, id: &SessionId) {
        let mut map = self.inner.lock();
        if map.get(id).is_some_and(|m| Arc::strong_count(m) == 1) {
            map.remove(id);
        }
    }
}

/// Exclusive access to one session, released on drop.
#[derive(Debug)]
pub struct SessionLock {
    id: SessionId,
    guard: Option<OwnedMutexGuard<()>>,
    table: LockTable,
}

impl SessionLock {
    /// The session this lock guards.
    #[must_use]
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    /// Releases the lock.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        // The guard holds a strong reference to the mutex; drop it before pruning.
        self.guard.take();
        self.table.prune(&self.id);
    }
}

fn check_lock(lock: &SessionLock, session: &Session) -> Result<(), StoreError> {
    if lock.id() == session.id() {
        Ok(())
    } else {
        Err(StoreError::LockMismatch {
            held: lock.id().clone(),
            record: session.id().clone(),
        })
    }
}

/// In-memory store. Records are kept serialised so a load never aliases a
/// previously returned value.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    records: RwLock<HashMap<SessionId, String>>,
    locks: LockTable,
}

impl MemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn acquire(&self, id: &SessionId) -> Result<SessionLock, StoreError> {
        Ok(self.locks.acquire(id).await)
    }

    async fn load(&self, lock: &SessionLock) -> Result<Option<Session>, StoreError> {
        let records = self.records.read();
        records
            .get(lock.id())
            .map(|raw| serde_json::from_str(raw))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn save(&self, lock: &SessionLock, session: &Session) -> Result<(), StoreError> {
        check_lock(lock, session)?;
        let raw = serde_json::to_string(session)?;
        self.records.write().insert(lock.id().clone(), raw);
        Ok(())
    }

    async fn delete(&self, lock: &SessionLock) -> Result<(), StoreError> {
        self.records.write().remove(lock.id());
        Ok(())
    }

    async fn list_expired(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Vec<SessionId>, StoreError> {
        let records = self.records.read();
        let mut expired = Vec::new();
        for (id, raw) in records.iter() {
            match serde_json::from_str::<Session>(raw) {
                Ok(session) if session.is_expired_at(now, timeout) => expired.push(id.clone()),
                Ok(_) => {}
                Err(e) => tracing::warn!(session_id = %id, error = %e, "Skipping corrupt session record"),
            }
        }
        Ok(expired)
    }
}

/// Directory-backed store: `<dir>/<session-id>.json` per session.
#[derive(Debug)]
pub struct FileSessionStore {
    dir: PathBuf,
    locks: LockTable,
}

const RECORD_EXTENSION: &str = "json";

impl FileSessionStore {
    /// Opens (creating if needed) a session directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        tracing::debug!(dir = %dir.display(), "Opened session directory");
        Ok(Self {
            dir,
            locks: LockTable::new(),
        })
    }

    /// The session directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &SessionId) -> PathBuf {
        self.dir.join(format!("{id}.{RECORD_EXTENSION}"))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn acquire(&self, id: &SessionId) -> Result<SessionLock, StoreError> {
        Ok(self.locks.acquire(id).await)
    }

    async fn load(&self, lock: &SessionLock) -> Result<Option<Session>, StoreError> {
        match tokio::fs::read(self.record_path(lock.id())).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, lock: &SessionLock, session: &Session) -> Result<(), StoreError> {
        check_lock(lock, session)?;
        let bytes = serde_json::to_vec(session)?;
        let path = self.record_path(lock.id());
        let tmp = path.with_extension(format!("{RECORD_EXTENSION}.tmp"));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, lock: &SessionLock) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.record_path(lock.id())).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_expired(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Vec<SessionId>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut expired = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| SessionId::parse(s).ok())
            else {
                continue;
            };

            // A record may vanish between listing and reading.
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match serde_json::from_slice::<Session>(&bytes) {
                Ok(session) if session.is_expired_at(now, timeout) => expired.push(id),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping corrupt session file");
                }
            }
        }

        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn exercise_store(store: &dyn SessionStore) {
        let id = SessionId::generate();
        let lock = store.acquire(&id).await.unwrap();
        assert!(store.load(&lock).await.unwrap().is_none());

        let session = Session::new(id.clone(), 5);
        store.save(&lock, &session).await.unwrap();
        assert_eq!(store.load(&lock).await.unwrap(), Some(session));

        store.delete(&lock).await.unwrap();
        store.delete(&lock).await.unwrap();
        assert!(store.load(&lock).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_store_crud() {
        exercise_store(&MemorySessionStore::new()).await;
    }

    #[tokio::test]
    async fn file_store_crud() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::open(dir.path().join("sessions")).await.unwrap();
        exercise_store(&store).await;
    }

    #[tokio::test]
    async fn save_under_wrong_lock_is_rejected() {
        let store = MemorySessionStore::new();
        let lock = store.acquire(&SessionId::generate()).await.unwrap();
        let other = Session::new(SessionId::generate(), 1);
        assert!(matches!(
            store.save(&lock, &other).await,
            Err(StoreError::LockMismatch { .. })
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let id = SessionId::generate();
        {
            let store = FileSessionStore::open(dir.path()).await.unwrap();
            let lock = store.acquire(&id).await.unwrap();
            store.save(&lock, &Session::new(id.clone(), 2)).await.unwrap();
        }

        let store = FileSessionStore::open(dir.path()).await.unwrap();
        let lock = store.acquire(&id).await.unwrap();
        let loaded = store.load(&lock).await.unwrap().unwrap();
        assert_eq!(loaded.id(), &id);
        assert!(dir.path().join(format!("{id}.json")).exists());
    }

    #[tokio::test]
    async fn list_expired_skips_corrupt_files() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::open(dir.path()).await.unwrap();

        let old = SessionId::generate();
        let lock = store.acquire(&old).await.unwrap();
        let stale = Session::new_at(old.clone(), 1, Utc::now() - chrono::Duration::hours(1));
        store.save(&lock, &stale).await.unwrap();
        lock.release();

        let fresh = SessionId::generate();
        let lock = store.acquire(&fresh).await.unwrap();
        store.save(&lock, &Session::new(fresh, 1)).await.unwrap();
        lock.release();

        std::fs::write(dir.path().join("broken.json"), b"{not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let expired = store
            .list_expired(Utc::now(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(expired, vec![old]);
    }

    #[tokio::test]
    async fn lock_entries_are_pruned() {
        let table = LockTable::new();
        let id = SessionId::generate();

        let lock = table.acquire(&id).await;
        assert_eq!(table.len(), 1);
        lock.release();
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn lock_is_exclusive() {
        let table = LockTable::new();
        let id = SessionId::generate();

        let first = table.acquire(&id).await;
        let waiter = {
            let table = table.clone();
            let id = id.clone();
            tokio::spawn(async move { table.acquire(&id).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        first.release();
        let second = waiter.await.unwrap();
        assert_eq!(second.id(), &id);
    }
}
