use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use pinsync_cas::Cid;

use crate::watcher::WatcherHandle;
use crate::Error;

pub(crate) type Checksum = [u8; 32];

/// A file tracked by the datastore.
///
/// The path is the immutable primary key. Contents, checksum and identifier
/// live behind a per-record lock: readers may observe the state before or
/// after a mutation, never a torn one. The watcher slot is a relation, not
/// ownership; the watcher task itself only holds a weak handle back to the
/// record.
#[derive(Debug)]
pub struct FileRecord {
    path: PathBuf,
    state: RwLock<State>,
    watcher: Mutex<Option<WatcherHandle>>,
}

#[derive(Debug, Default)]
struct State {
    cid: Option<Cid>,
    checksum: Checksum,
    data: Bytes,
}

/// The public pair exported for wire transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatus {
    pub cid: Option<Cid>,
    pub absolute_path: PathBuf,
}

impl FileRecord {
    /// Construct a record for the file at `path`, reading its current
    /// contents from disk. Expects an already-absolute path; normalization
    /// happens at admission.
    pub async fn new(path: impl Into<PathBuf>) -> Result<Arc<Self>, Error> {
        let record = Arc::new(Self {
            path: path.into(),
            state: RwLock::new(State::default()),
            watcher: Mutex::new(None),
        });
        record.read().await?;
        Ok(record)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file from disk, refreshing the cached bytes and checksum.
    pub async fn read(&self) -> Result<Bytes, Error> {
        let data = Bytes::from(tokio::fs::read(&self.path).await?);
        let checksum: Checksum = Sha256::digest(&data).into();
        let mut state = self.state.write().await;
        state.checksum = checksum;
        state.data = data.clone();
        drop(state);
        Ok(data)
    }

    /// Re-read the file and return the digest of its current contents.
    pub async fn checksum(&self) -> Result<Checksum, Error> {
        let data = self.read().await?;
        Ok(Sha256::digest(&data).into())
    }

    /// Record the identifier the store minted for the current contents.
    /// Assigning the same value twice is fine.
    pub async fn assign_cid(&self, cid: Cid) {
        self.state.write().await.cid = Some(cid);
    }

    pub async fn cid(&self) -> Option<Cid> {
        self.state.read().await.cid.clone()
    }

    pub(crate) async fn cached_checksum(&self) -> Checksum {
        self.state.read().await.checksum
    }

    pub async fn status(&self) -> FileStatus {
        FileStatus {
            cid: self.cid().await,
            absolute_path: self.path.clone(),
        }
    }

    /// Attach a watcher handle unless one is already present.
    pub(crate) fn ensure_watcher(&self, make: impl FnOnce() -> WatcherHandle) {
        let mut slot = self.watcher.lock().expect("watcher lock poisoned");
        if slot.is_none() {
            *slot = Some(make());
        }
    }

    pub(crate) fn detach_watcher(&self) {
        self.watcher.lock().expect("watcher lock poisoned").take();
    }

    /// Whether a watcher is currently attached to this record.
    pub fn has_watcher(&self) -> bool {
        self.watcher.lock().expect("watcher lock poisoned").is_some()
    }

    /// Tell the attached watcher, if any, to stop.
    pub(crate) fn stop_watcher(&self) {
        if let Some(handle) = self.watcher.lock().expect("watcher lock poisoned").take() {
            handle.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_reads_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, b"hello").await.unwrap();

        let record = FileRecord::new(path.clone()).await.unwrap();
        assert_eq!(record.path(), path);
        assert_eq!(
            record.cached_checksum().await,
            <Checksum>::from(Sha256::digest(b"hello"))
        );
        assert_eq!(record.cid().await, None);
    }

    #[tokio::test]
    async fn test_new_unreadable_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.txt");
        let err = FileRecord::new(missing).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn test_read_refreshes_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, b"one").await.unwrap();

        let record = FileRecord::new(path.clone()).await.unwrap();
        let before = record.cached_checksum().await;

        tokio::fs::write(&path, b"two").await.unwrap();
        let data = record.read().await.unwrap();
        assert_eq!(data, Bytes::from_static(b"two"));
        assert_ne!(record.cached_checksum().await, before);
    }

    #[tokio::test]
    async fn test_assign_cid_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, b"hello").await.unwrap();

        let record = FileRecord::new(path.clone()).await.unwrap();
        record.assign_cid(Cid::from("bafy-one")).await;
        record.assign_cid(Cid::from("bafy-one")).await;

        let status = record.status().await;
        assert_eq!(status.cid, Some(Cid::from("bafy-one")));
        assert_eq!(status.absolute_path, path);
    }
}
