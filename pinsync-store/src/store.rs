use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use pinsync_cas::{Cid, ContentStore};

use crate::file::{FileRecord, FileStatus};
use crate::watcher::{EventSenders, Watcher};
use crate::Error;

/// How long rehydration waits for the previous index to come back.
const REHYDRATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the event channels between watchers and the datastore.
const EVENT_BUFFER: usize = 64;

/// Datastore settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// How often each watched file is re-hashed.
    pub refresh_interval: Duration,
    /// Where the identifier of the last committed index is persisted.
    pub cid_cache: PathBuf,
}

type Index = BTreeMap<PathBuf, Arc<FileRecord>>;

/// Serialized form of one index entry.
#[derive(Debug, Serialize, Deserialize)]
struct IndexEntry {
    cid: String,
    absolute_path: PathBuf,
}

/// Wraps a distributed content-addressed store, keeping all watched files up
/// to date.
///
/// The index map is guarded by a readers-writer lock held only for the map
/// operation itself, never across store I/O. Watchers communicate with the
/// datastore exclusively over channels.
pub struct Datastore {
    cas: Arc<dyn ContentStore>,
    index: RwLock<Index>,
    cid: RwLock<Option<Cid>>,
    config: Config,
    errs_tx: mpsc::Sender<Error>,
    errs_rx: Mutex<Option<mpsc::Receiver<Error>>>,
    additions_tx: mpsc::Sender<PathBuf>,
    additions_rx: Mutex<Option<mpsc::Receiver<PathBuf>>>,
    removals_tx: mpsc::Sender<PathBuf>,
    removals_rx: Mutex<Option<mpsc::Receiver<PathBuf>>>,
    stop: CancellationToken,
}

/// Progress of one [`Datastore::add`] call.
///
/// Admitted files stream on [`AddProgress::next`]; the channel closing is
/// the completion signal. Failures arrive out-of-band on the dedicated error
/// channel.
#[derive(Debug)]
pub struct AddProgress {
    files: mpsc::Receiver<FileStatus>,
    errs: mpsc::Receiver<Error>,
}

impl AddProgress {
    /// Next admitted file; `None` once the batch is complete.
    pub async fn next(&mut self) -> Option<FileStatus> {
        self.files.recv().await
    }

    /// Drain the batch to completion, returning every admitted status or the
    /// first error.
    pub async fn drain(mut self) -> Result<Vec<FileStatus>, Error> {
        let mut statuses = Vec::new();
        loop {
            tokio::select! {
                status = self.files.recv() => match status {
                    Some(status) => statuses.push(status),
                    None => break,
                },
                Some(err) = self.errs.recv() => return Err(err),
            }
        }
        // the producer may have failed right as the files channel closed
        match self.errs.try_recv() {
            Ok(err) => Err(err),
            Err(_) => Ok(statuses),
        }
    }

    /// Fold both channels into a single stream: statuses as they come, then
    /// at most one trailing error.
    pub fn into_stream(self) -> impl futures::Stream<Item = Result<FileStatus, Error>> {
        let AddProgress {
            mut files,
            mut errs,
        } = self;
        async_stream::stream! {
            loop {
                tokio::select! {
                    status = files.recv() => match status {
                        Some(status) => yield Ok(status),
                        None => break,
                    },
                    Some(err) = errs.recv() => {
                        yield Err(err);
                        return;
                    }
                }
            }
            if let Ok(err) = errs.try_recv() {
                yield Err(err);
            }
        }
    }
}

impl Datastore {
    /// Construct a datastore with the given settings, rehydrating from the
    /// recovery pointer if one is present.
    ///
    /// A missing pointer, or a previous index that cannot be fetched in
    /// time, degrades to an empty datastore. A previous index that cannot be
    /// parsed, or that conflicts with already-tracked state, is an error.
    pub async fn new(cas: Arc<dyn ContentStore>, config: Config) -> Result<Arc<Self>, Error> {
        let (errs_tx, errs_rx) = mpsc::channel(EVENT_BUFFER);
        let (additions_tx, additions_rx) = mpsc::channel(EVENT_BUFFER);
        let (removals_tx, removals_rx) = mpsc::channel(EVENT_BUFFER);

        let store = Arc::new(Self {
            cas,
            index: RwLock::new(Index::new()),
            cid: RwLock::new(None),
            config,
            errs_tx,
            errs_rx: Mutex::new(Some(errs_rx)),
            additions_tx,
            additions_rx: Mutex::new(Some(additions_rx)),
            removals_tx,
            removals_rx: Mutex::new(Some(removals_rx)),
            stop: CancellationToken::new(),
        });

        store.rehydrate().await?;
        Ok(store)
    }

    /// Launch the event drainers for additions and removals, then block
    /// until the first surfaced error or an explicit stop.
    pub async fn start(self: &Arc<Self>) -> Result<(), Error> {
        let mut additions = self
            .additions_rx
            .lock()
            .await
            .take()
            .ok_or(Error::State("datastore already started"))?;
        let mut removals = self
            .removals_rx
            .lock()
            .await
            .take()
            .ok_or(Error::State("datastore already started"))?;
        let mut errs = self
            .errs_rx
            .lock()
            .await
            .take()
            .ok_or(Error::State("datastore already started"))?;

        let store = self.clone();
        let errs_tx = self.errs_tx.clone();
        let additions_task = tokio::spawn(async move {
            while let Some(path) = additions.recv().await {
                debug!("re-admitting changed file {}", path.display());
                if let Err(err) = store.add_file(&path).await {
                    if errs_tx.send(err).await.is_err() {
                        break;
                    }
                }
            }
        });

        let store = self.clone();
        let errs_tx = self.errs_tx.clone();
        let removals_task = tokio::spawn(async move {
            while let Some(path) = removals.recv().await {
                if let Err(err) = store.remove(&path).await {
                    if errs_tx.send(err).await.is_err() {
                        break;
                    }
                }
            }
        });

        let result = tokio::select! {
            Some(err) = errs.recv() => Err(err),
            _ = self.stop.cancelled() => Ok(()),
        };

        additions_task.abort();
        removals_task.abort();
        result
    }

    /// Stop every attached watcher under a read view of the index, then
    /// release [`Datastore::start`].
    pub async fn stop(&self) {
        let index = self.index.read().await;
        for record in index.values() {
            record.stop_watcher();
        }
        drop(index);
        self.stop.cancel();
    }

    /// Admit the single file at `path`: upload and pin its bytes, update the
    /// index, commit, and make sure a watcher is attached.
    ///
    /// Re-admitting a known path refreshes it in place; it never creates a
    /// second watcher, and unchanged content maps to the same identifier.
    pub async fn add_file(&self, path: impl AsRef<Path>) -> Result<Arc<FileRecord>, Error> {
        let path = tokio::fs::canonicalize(path.as_ref()).await?;

        let existing = self.index.read().await.get(&path).cloned();
        let record = match existing {
            Some(record) => record,
            None => FileRecord::new(path.clone()).await?,
        };

        let data = record.read().await?;
        let file_cid = self.cas.put(data).await?;
        record.assign_cid(file_cid.clone()).await;
        self.cas.pin(&file_cid).await?;

        self.index.write().await.insert(path, record.clone());

        self.commit().await?;

        record.ensure_watcher(|| {
            Watcher::spawn(&record, self.config.refresh_interval, self.senders())
        });

        Ok(record)
    }

    /// Admit the file at `path`, or recursively every file under it if it is
    /// a directory. Statuses stream on the returned progress handle as files
    /// are admitted.
    pub fn add(self: &Arc<Self>, path: impl Into<PathBuf>) -> AddProgress {
        let (files_tx, files_rx) = mpsc::channel(EVENT_BUFFER);
        let (errs_tx, errs_rx) = mpsc::channel(1);
        let store = self.clone();
        let path = path.into();
        tokio::spawn(async move {
            if let Err(err) = store.add_all(path, &files_tx).await {
                errs_tx.send(err).await.ok();
            }
        });
        AddProgress {
            files: files_rx,
            errs: errs_rx,
        }
    }

    async fn add_all(&self, path: PathBuf, files: &mpsc::Sender<FileStatus>) -> Result<(), Error> {
        let meta = tokio::fs::metadata(&path).await?;
        if meta.is_dir() {
            for entry in WalkDir::new(&path) {
                let entry = entry?;
                if entry.file_type().is_dir() {
                    continue;
                }
                let record = self.add_file(entry.path()).await?;
                files.send(record.status().await).await.ok();
            }
        } else {
            let record = self.add_file(&path).await?;
            files.send(record.status().await).await.ok();
        }
        Ok(())
    }

    /// Remove `path` from the index and commit. Removing an absent path is a
    /// no-op success.
    pub async fn remove(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let removed = {
            let mut index = self.index.write().await;
            index.remove(path.as_ref())
        };
        match removed {
            Some(record) => {
                info!("removing file {}", record.path().display());
                record.stop_watcher();
                self.commit().await
            }
            None => Ok(()),
        }
    }

    /// Visit every record under a read view of the index. Return `true` from
    /// the visitor to stop early.
    pub async fn range<F>(&self, mut visit: F)
    where
        F: FnMut(&Arc<FileRecord>) -> bool,
    {
        let index = self.index.read().await;
        for record in index.values() {
            if visit(record) {
                return;
            }
        }
    }

    /// The identifier of the most recently committed index, if any.
    pub async fn cid(&self) -> Option<Cid> {
        self.cid.read().await.clone()
    }

    /// Replace the current index identifier.
    pub async fn update_cid(&self, cid: Cid) {
        *self.cid.write().await = Some(cid);
    }

    /// The identifier currently recorded for `path`, if tracked.
    pub async fn find_cid(&self, path: impl AsRef<Path>) -> Option<Cid> {
        let record = self.index.read().await.get(path.as_ref()).cloned()?;
        record.cid().await
    }

    /// The tracked path whose record carries `cid`, if any.
    pub async fn find_path(&self, cid: &Cid) -> Option<PathBuf> {
        let index = self.index.read().await;
        for (path, record) in index.iter() {
            if record.cid().await.as_ref() == Some(cid) {
                return Some(path.clone());
            }
        }
        None
    }

    /// Serialize the index: a JSON object keyed by absolute path, each value
    /// carrying the record's identifier and path. Transient record state is
    /// not serialized.
    pub async fn to_json(&self) -> Result<Bytes, Error> {
        let index = self.index.read().await;
        let mut entries: BTreeMap<&Path, IndexEntry> = BTreeMap::new();
        for (path, record) in index.iter() {
            entries.insert(
                path.as_path(),
                IndexEntry {
                    cid: record
                        .cid()
                        .await
                        .map(Cid::into_string)
                        .unwrap_or_default(),
                    absolute_path: path.clone(),
                },
            );
        }
        let payload = serde_json::to_vec(&entries).map_err(Error::Parse)?;
        Ok(Bytes::from(payload))
    }

    /// Rebuild the index from its serialized form, re-admitting every path
    /// so the local disk stays authoritative. A tracked path whose current
    /// identifier disagrees with the incoming one aborts with a conflict.
    pub async fn from_json(self: &Arc<Self>, data: &[u8]) -> Result<(), Error> {
        self.readmit(data).await.map(|_| ())
    }

    /// Rehydrate from the index named by `cid`, re-admitting every path it
    /// contains, and return the statuses of the restored files.
    pub async fn restore(self: &Arc<Self>, cid: &Cid) -> Result<Vec<FileStatus>, Error> {
        let data = self.cas.cat(cid).await?;
        self.readmit(&data).await
    }

    async fn readmit(self: &Arc<Self>, data: &[u8]) -> Result<Vec<FileStatus>, Error> {
        let incoming: BTreeMap<PathBuf, IndexEntry> =
            serde_json::from_slice(data).map_err(Error::Parse)?;

        let mut admitted = Vec::new();
        for (path, entry) in incoming {
            let current = self.index.read().await.get(&path).cloned();
            if let Some(record) = current {
                let current_cid = record
                    .cid()
                    .await
                    .map(Cid::into_string)
                    .unwrap_or_default();
                if current_cid != entry.cid {
                    return Err(Error::Conflict {
                        path,
                        current: Cid::from(current_cid),
                        incoming: Cid::from(entry.cid),
                    });
                }
            }
            // drain this path's events to completion before the next one
            let statuses = self.add(path).drain().await?;
            admitted.extend(statuses);
        }
        Ok(admitted)
    }

    async fn rehydrate(self: &Arc<Self>) -> Result<(), Error> {
        let pointer = match tokio::fs::read_to_string(&self.config.cid_cache).await {
            Ok(contents) => contents.trim().to_string(),
            Err(_) => {
                debug!(
                    "no recovery pointer at {}",
                    self.config.cid_cache.display()
                );
                return Ok(());
            }
        };
        if pointer.is_empty() {
            return Ok(());
        }

        let prev = Cid::from(pointer);
        let data = match tokio::time::timeout(REHYDRATE_TIMEOUT, self.cas.cat(&prev)).await {
            Ok(Ok(data)) => data,
            Ok(Err(err)) => {
                warn!("could not retrieve previous index {}: {:#}", prev, err);
                info!("creating store from scratch");
                return Ok(());
            }
            Err(_) => {
                warn!("timed out retrieving previous index {}", prev);
                info!("creating store from scratch");
                return Ok(());
            }
        };

        self.from_json(&data).await
    }

    /// Upload the serialized index, pin it, and mirror the new identifier to
    /// the recovery pointer. Pin and pointer failures are collected rather
    /// than fatal; the in-memory identifier still moves forward because the
    /// upload succeeded and the object is reachable by it.
    async fn commit(&self) -> Result<(), Error> {
        let payload = self.to_json().await?;
        let index_cid = self.cas.put(payload).await?;

        let mut failures = Vec::new();
        if let Err(err) = self.cas.pin(&index_cid).await {
            failures.push(Error::from(err));
        }

        self.update_cid(index_cid).await;

        if let Err(err) = self.persist_cid().await {
            failures.push(err);
        }

        let mut failures = failures.into_iter();
        if let Some(first) = failures.next() {
            return Err(Error::Commit {
                first: Box::new(first),
                others: failures.collect(),
            });
        }
        Ok(())
    }

    /// Mirror the current index identifier to the recovery pointer file. The
    /// write goes through a temp file and a rename so a reader never sees a
    /// partial identifier.
    async fn persist_cid(&self) -> Result<(), Error> {
        let cid = self
            .cid()
            .await
            .ok_or(Error::State("cid is not set"))?;
        let path = &self.config.cid_cache;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, cid.as_str()).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o644)).await?;
        }
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    fn senders(&self) -> EventSenders {
        EventSenders {
            errs: self.errs_tx.clone(),
            removals: self.removals_tx.clone(),
            additions: self.additions_tx.clone(),
        }
    }
}
