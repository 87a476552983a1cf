use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use regex::Regex;
use tonic::{Request, Response, Status};
use walkdir::WalkDir;

use pinsync_rpc_types as proto;
use pinsync_rpc_types::pinsync_server::Pinsync;
use pinsync_store::{Cid, Datastore, Error, FileRecord};

type FileStatusStream = BoxStream<'static, Result<proto::FileStatus, Status>>;

/// gRPC wrapper exposing a [`Datastore`] to clients.
pub struct PinsyncService {
    store: Arc<Datastore>,
}

impl PinsyncService {
    pub fn new(store: Arc<Datastore>) -> Self {
        Self { store }
    }

    /// Records whose absolute path matches `regex`, or all of them when no
    /// pattern was given, collected under one read view of the index.
    async fn matching_records(&self, regex: Option<&Regex>) -> Vec<Arc<FileRecord>> {
        let mut matched = Vec::new();
        self.store
            .range(|record| {
                let keep = regex
                    .map(|r| r.is_match(&record.path().to_string_lossy()))
                    .unwrap_or(true);
                if keep {
                    matched.push(record.clone());
                }
                false
            })
            .await;
        matched
    }
}

fn into_proto(status: pinsync_store::FileStatus) -> proto::FileStatus {
    proto::FileStatus {
        cid: status.cid.map(Cid::into_string).unwrap_or_default(),
        absolute_path: status.absolute_path.to_string_lossy().into_owned(),
    }
}

fn status_from_err(err: Error) -> Status {
    match &err {
        Error::Conflict { .. } => Status::failed_precondition(err.to_string()),
        Error::Parse(_) => Status::failed_precondition(err.to_string()),
        Error::Store(pinsync_cas::Error::NotFound(_)) => Status::not_found(err.to_string()),
        _ => Status::internal(err.to_string()),
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex, Status> {
    Regex::new(pattern).map_err(|err| Status::invalid_argument(format!("invalid pattern: {err}")))
}

/// A pattern naming an existing absolute filesystem entry is a literal
/// admission target rather than a regular expression.
async fn is_literal_path(pattern: &str) -> bool {
    let path = Path::new(pattern);
    path.is_absolute() && tokio::fs::metadata(path).await.is_ok()
}

/// Every file under `root` whose absolute path matches `regex`.
fn walk_matches(root: &Path, regex: &Regex) -> Result<Vec<PathBuf>, Status> {
    let mut matches = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|err| Status::internal(err.to_string()))?;
        if entry.file_type().is_dir() {
            continue;
        }
        if regex.is_match(&entry.path().to_string_lossy()) {
            matches.push(entry.path().to_path_buf());
        }
    }
    Ok(matches)
}

#[tonic::async_trait]
impl Pinsync for PinsyncService {
    type AddFilesStream = FileStatusStream;
    type ListFilesStream = FileStatusStream;
    type DeleteFilesStream = FileStatusStream;
    type RestoreStream = BoxStream<'static, Result<proto::RestoreUpdate, Status>>;

    async fn add_files(
        &self,
        request: Request<proto::PatternRequest>,
    ) -> Result<Response<Self::AddFilesStream>, Status> {
        let req = request.into_inner();
        if req.pattern.is_empty() {
            return Err(Status::invalid_argument("must provide pattern"));
        }

        if is_literal_path(&req.pattern).await {
            let progress = self.store.add(PathBuf::from(&req.pattern));
            let stream = progress
                .into_stream()
                .map(|res| res.map(into_proto).map_err(status_from_err));
            return Ok(Response::new(stream.boxed()));
        }

        let regex = compile_pattern(&req.pattern)?;
        let root = tokio::fs::canonicalize(&req.current_directory)
            .await
            .map_err(|err| {
                Status::invalid_argument(format!("bad current directory: {err}"))
            })?;
        let matches = walk_matches(&root, &regex)?;

        let store = self.store.clone();
        let stream = async_stream::try_stream! {
            for path in matches {
                let record = store.add_file(&path).await.map_err(status_from_err)?;
                yield into_proto(record.status().await);
            }
        };
        Ok(Response::new(stream.boxed()))
    }

    async fn list_files(
        &self,
        request: Request<proto::PatternRequest>,
    ) -> Result<Response<Self::ListFilesStream>, Status> {
        let req = request.into_inner();
        let regex = match req.pattern.as_str() {
            "" => None,
            pattern => Some(compile_pattern(pattern)?),
        };

        let matched = self.matching_records(regex.as_ref()).await;
        let stream = async_stream::stream! {
            for record in matched {
                yield Ok::<_, Status>(into_proto(record.status().await));
            }
        };
        Ok(Response::new(stream.boxed()))
    }

    async fn delete_files(
        &self,
        request: Request<proto::PatternRequest>,
    ) -> Result<Response<Self::DeleteFilesStream>, Status> {
        let req = request.into_inner();

        if is_literal_path(&req.pattern).await {
            let path = tokio::fs::canonicalize(&req.pattern)
                .await
                .map_err(|err| Status::invalid_argument(format!("bad path: {err}")))?;
            let cid = self.store.find_cid(&path).await;
            let store = self.store.clone();
            let stream = async_stream::try_stream! {
                store.remove(&path).await.map_err(status_from_err)?;
                yield proto::FileStatus {
                    cid: cid.map(Cid::into_string).unwrap_or_default(),
                    absolute_path: path.to_string_lossy().into_owned(),
                };
            };
            return Ok(Response::new(stream.boxed()));
        }

        let regex = match req.pattern.as_str() {
            "" => None,
            pattern => Some(compile_pattern(pattern)?),
        };

        let matched = self.matching_records(regex.as_ref()).await;
        let store = self.store.clone();
        let stream = async_stream::try_stream! {
            for record in matched {
                let status = record.status().await;
                store.remove(record.path()).await.map_err(status_from_err)?;
                yield into_proto(status);
            }
        };
        Ok(Response::new(stream.boxed()))
    }

    async fn backup(
        &self,
        _request: Request<proto::BackupRequest>,
    ) -> Result<Response<proto::BackupStatus>, Status> {
        match self.store.cid().await {
            Some(cid) => Ok(Response::new(proto::BackupStatus {
                cid: cid.into_string(),
            })),
            None => Err(Status::failed_precondition("no index committed yet")),
        }
    }

    async fn restore(
        &self,
        request: Request<proto::RestoreRequest>,
    ) -> Result<Response<Self::RestoreStream>, Status> {
        let req = request.into_inner();
        if req.cid.is_empty() {
            return Err(Status::invalid_argument("must provide cid"));
        }

        let restored = self
            .store
            .restore(&Cid::from(req.cid))
            .await
            .map_err(status_from_err)?;
        let stream = futures::stream::iter(restored.into_iter().map(|status| {
            Ok(proto::RestoreUpdate {
                file: Some(into_proto(status)),
            })
        }));
        Ok(Response::new(stream.boxed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use pinsync_cas::MemStore;
    use pinsync_store::Config;
    use tonic::Code;

    async fn service(dir: &Path) -> PinsyncService {
        let store = Datastore::new(
            Arc::new(MemStore::new()),
            Config {
                refresh_interval: Duration::from_millis(50),
                cid_cache: dir.join("cid_cache"),
            },
        )
        .await
        .unwrap();
        PinsyncService::new(store)
    }

    async fn collect(stream: FileStatusStream) -> Vec<proto::FileStatus> {
        stream
            .map(|res| res.unwrap())
            .collect::<Vec<_>>()
            .await
    }

    fn pattern(pattern: &str, cwd: &Path) -> Request<proto::PatternRequest> {
        Request::new(proto::PatternRequest {
            pattern: pattern.to_string(),
            current_directory: cwd.to_string_lossy().into_owned(),
        })
    }

    #[tokio::test]
    async fn test_add_files_with_regex() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.log"), b"a").await.unwrap();
        tokio::fs::write(dir.path().join("b.log"), b"b").await.unwrap();
        tokio::fs::write(dir.path().join("c.txt"), b"c").await.unwrap();

        let service = service(dir.path()).await;
        let resp = service
            .add_files(pattern(r".*\.log$", dir.path()))
            .await
            .unwrap();
        let mut added = collect(resp.into_inner()).await;
        added.sort_by(|a, b| a.absolute_path.cmp(&b.absolute_path));

        assert_eq!(added.len(), 2);
        assert!(added[0].absolute_path.ends_with("a.log"));
        assert!(added[1].absolute_path.ends_with("b.log"));
        assert!(added.iter().all(|status| !status.cid.is_empty()));

        // the txt file never made it into the index
        let listed = collect(
            service
                .list_files(pattern("", dir.path()))
                .await
                .unwrap()
                .into_inner(),
        )
        .await;
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|status| !status.absolute_path.ends_with("c.txt")));
    }

    #[tokio::test]
    async fn test_add_files_literal_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        tokio::fs::write(&file, b"hello").await.unwrap();

        let service = service(dir.path()).await;
        let resp = service
            .add_files(pattern(&file.to_string_lossy(), dir.path()))
            .await
            .unwrap();
        let added = collect(resp.into_inner()).await;
        assert_eq!(added.len(), 1);
        assert!(added[0].absolute_path.ends_with("a.txt"));
    }

    #[tokio::test]
    async fn test_invalid_pattern_rejected_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path()).await;

        let err = match service.add_files(pattern("([", dir.path())).await {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert_eq!(err.code(), Code::InvalidArgument);

        let err = match service.add_files(pattern("", dir.path())).await {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_delete_files() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.log"), b"a").await.unwrap();
        tokio::fs::write(dir.path().join("keep.txt"), b"k").await.unwrap();

        let service = service(dir.path()).await;
        collect(
            service
                .add_files(pattern(r".*", dir.path()))
                .await
                .unwrap()
                .into_inner(),
        )
        .await;

        let deleted = collect(
            service
                .delete_files(pattern(r".*\.log$", dir.path()))
                .await
                .unwrap()
                .into_inner(),
        )
        .await;
        assert_eq!(deleted.len(), 1);

        let listed = collect(
            service
                .list_files(pattern("", dir.path()))
                .await
                .unwrap()
                .into_inner(),
        )
        .await;
        assert_eq!(listed.len(), 1);
        assert!(listed[0].absolute_path.ends_with("keep.txt"));
    }

    #[tokio::test]
    async fn test_backup_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        tokio::fs::write(&file, b"hello").await.unwrap();

        let service = service(dir.path()).await;

        // nothing committed yet
        let err = service
            .backup(Request::new(proto::BackupRequest {}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::FailedPrecondition);

        collect(
            service
                .add_files(pattern(&file.to_string_lossy(), dir.path()))
                .await
                .unwrap()
                .into_inner(),
        )
        .await;

        let backup = service
            .backup(Request::new(proto::BackupRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert!(!backup.cid.is_empty());

        let restored: Vec<_> = service
            .restore(Request::new(proto::RestoreRequest {
                cid: backup.cid,
            }))
            .await
            .unwrap()
            .into_inner()
            .map(|res| res.unwrap())
            .collect()
            .await;
        assert_eq!(restored.len(), 1);
    }
}
