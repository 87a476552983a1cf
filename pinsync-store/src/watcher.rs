use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::file::{Checksum, FileRecord};
use crate::Error;

/// The channels a watcher reports on. Re-admissions of changed files travel
/// on `additions`.
#[derive(Debug, Clone)]
pub(crate) struct EventSenders {
    pub errs: mpsc::Sender<Error>,
    pub removals: mpsc::Sender<PathBuf>,
    pub additions: mpsc::Sender<PathBuf>,
}

/// Handle used to stop a running watcher.
///
/// Stopping is idempotent; cancelling a watcher that already terminated is a
/// no-op.
#[derive(Debug)]
pub(crate) struct WatcherHandle {
    token: CancellationToken,
}

impl WatcherHandle {
    pub fn stop(&self) {
        self.token.cancel();
    }
}

/// Watches one file for changes by periodic checksum comparison.
///
/// On every tick the file is stat'ed; a missing file is reported as a
/// removal and ends the watcher, any other stat error ends it too. Otherwise
/// a helper task re-hashes the file off the main loop and reports a change
/// on `additions` before the baseline checksum is replaced, so a change is
/// delivered at least once as long as the datastore drains promptly.
pub(crate) struct Watcher {
    record: Weak<FileRecord>,
    path: PathBuf,
    interval: Duration,
    token: CancellationToken,
    out: EventSenders,
}

impl Watcher {
    /// Spawn the watcher task for `record`, returning the handle that stops
    /// it.
    pub fn spawn(
        record: &Arc<FileRecord>,
        interval: Duration,
        out: EventSenders,
    ) -> WatcherHandle {
        let token = CancellationToken::new();
        let watcher = Watcher {
            record: Arc::downgrade(record),
            path: record.path().to_path_buf(),
            interval,
            token: token.clone(),
            out,
        };
        tokio::spawn(watcher.run());
        WatcherHandle { token }
    }

    async fn run(self) {
        let mut checksum = match self.initial_checksum().await {
            Ok(checksum) => checksum,
            Err(err) => {
                warn!(
                    "watcher for {} failed to start: {:#}",
                    self.path.display(),
                    err
                );
                self.out.errs.send(err).await.ok();
                self.detach();
                return;
            }
        };

        let mut tick = tokio::time::interval_at(
            tokio::time::Instant::now() + self.interval,
            self.interval,
        );
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let (updates_tx, mut updates_rx) = mpsc::channel::<Checksum>(1);
        let (errs_tx, mut errs_rx) = mpsc::channel::<Error>(1);

        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                Some(err) = errs_rx.recv() => {
                    warn!("watcher for {} failed: {:#}", self.path.display(), err);
                    self.out.errs.send(err).await.ok();
                    break;
                }
                Some(next) = updates_rx.recv() => {
                    checksum = next;
                }
                _ = tick.tick() => {
                    match tokio::fs::metadata(&self.path).await {
                        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                            info!("file {} has been removed", self.path.display());
                            self.out.removals.send(self.path.clone()).await.ok();
                            break;
                        }
                        Err(err) => {
                            self.out.errs.send(err.into()).await.ok();
                            break;
                        }
                        Ok(_) => {
                            // hash off the main loop so ticks and stop stay
                            // responsive
                            let Some(record) = self.record.upgrade() else {
                                break;
                            };
                            tokio::spawn(check_updated(
                                record,
                                checksum,
                                errs_tx.clone(),
                                updates_tx.clone(),
                                self.out.additions.clone(),
                            ));
                        }
                    }
                }
            }
        }

        self.detach();
    }

    async fn initial_checksum(&self) -> Result<Checksum, Error> {
        match self.record.upgrade() {
            Some(record) => record.checksum().await,
            None => Err(Error::State("record dropped before watcher start")),
        }
    }

    fn detach(&self) {
        if let Some(record) = self.record.upgrade() {
            record.detach_watcher();
        }
    }
}

async fn check_updated(
    record: Arc<FileRecord>,
    checksum: Checksum,
    errs: mpsc::Sender<Error>,
    updates: mpsc::Sender<Checksum>,
    additions: mpsc::Sender<PathBuf>,
) {
    let current = match record.checksum().await {
        Ok(current) => current,
        Err(err) => {
            errs.send(err).await.ok();
            return;
        }
    };

    if current != checksum {
        info!("file {} changed", record.path().display());
        additions.send(record.path().to_path_buf()).await.ok();
        updates.send(current).await.ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::sync::mpsc;

    const TICK: Duration = Duration::from_millis(25);
    const PATIENCE: Duration = Duration::from_secs(2);

    struct Harness {
        record: Arc<FileRecord>,
        handle: WatcherHandle,
        errs: mpsc::Receiver<Error>,
        removals: mpsc::Receiver<PathBuf>,
        additions: mpsc::Receiver<PathBuf>,
    }

    async fn watch(path: &std::path::Path) -> Harness {
        let record = FileRecord::new(path).await.unwrap();
        let (errs_tx, errs) = mpsc::channel(8);
        let (removals_tx, removals) = mpsc::channel(8);
        let (additions_tx, additions) = mpsc::channel(8);
        let out = EventSenders {
            errs: errs_tx,
            removals: removals_tx,
            additions: additions_tx,
        };
        let handle = Watcher::spawn(&record, TICK, out);
        record.ensure_watcher(|| WatcherHandle {
            token: handle.token.clone(),
        });
        Harness {
            record,
            handle,
            errs,
            removals,
            additions,
        }
    }

    #[tokio::test]
    async fn test_reports_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, b"hello").await.unwrap();

        let mut h = watch(&path).await;
        // let the watcher settle on its baseline before changing the file
        tokio::time::sleep(TICK).await;
        tokio::fs::write(&path, b"hello world").await.unwrap();

        let changed = tokio::time::timeout(PATIENCE, h.additions.recv())
            .await
            .expect("change not reported in time")
            .unwrap();
        assert_eq!(changed, path);
        h.handle.stop();
    }

    #[tokio::test]
    async fn test_reports_removal_and_terminates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, b"hello").await.unwrap();

        let mut h = watch(&path).await;
        tokio::fs::remove_file(&path).await.unwrap();

        let removed = tokio::time::timeout(PATIENCE, h.removals.recv())
            .await
            .expect("removal not reported in time")
            .unwrap();
        assert_eq!(removed, path);

        // termination detaches the watcher from the record
        tokio::time::timeout(PATIENCE, async {
            while h.record.has_watcher() {
                tokio::time::sleep(TICK).await;
            }
        })
        .await
        .expect("watcher did not detach");
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, b"hello").await.unwrap();

        let mut h = watch(&path).await;
        h.handle.stop();
        h.handle.stop();

        // a change after stop goes unreported
        tokio::time::sleep(TICK * 3).await;
        tokio::fs::write(&path, b"changed").await.unwrap();
        let silent = tokio::time::timeout(TICK * 4, h.additions.recv()).await;
        assert!(silent.is_err() || silent.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_collapses_rapid_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, b"v0").await.unwrap();

        let mut h = watch(&path).await;
        tokio::time::sleep(TICK).await;
        tokio::fs::write(&path, b"v1").await.unwrap();
        tokio::fs::write(&path, b"v2").await.unwrap();

        let first = tokio::time::timeout(PATIENCE, h.additions.recv())
            .await
            .expect("change not reported in time")
            .unwrap();
        assert_eq!(first, path);
        h.handle.stop();
    }
}
