use anyhow::Result;
use tonic::transport::Channel;
use tonic::Streaming;

use pinsync_rpc_types::pinsync_client::PinsyncClient;
use pinsync_rpc_types::{
    BackupRequest, FileStatus, PatternRequest, RestoreRequest, RestoreUpdate,
};

/// Thin wrapper over the daemon's gRPC client.
#[derive(Debug, Clone)]
pub struct Client {
    inner: PinsyncClient<Channel>,
}

impl Client {
    /// Connect to the daemon listening at `addr`, e.g.
    /// `http://127.0.0.1:8081`.
    pub async fn connect(addr: String) -> Result<Self> {
        let inner = PinsyncClient::connect(addr).await?;
        Ok(Self { inner })
    }

    #[tracing::instrument(skip(self))]
    pub async fn add_files(
        &mut self,
        pattern: String,
        cwd: String,
    ) -> Result<Streaming<FileStatus>> {
        let res = self
            .inner
            .add_files(PatternRequest {
                pattern,
                current_directory: cwd,
            })
            .await?;
        Ok(res.into_inner())
    }

    #[tracing::instrument(skip(self))]
    pub async fn list_files(
        &mut self,
        pattern: String,
        cwd: String,
    ) -> Result<Streaming<FileStatus>> {
        let res = self
            .inner
            .list_files(PatternRequest {
                pattern,
                current_directory: cwd,
            })
            .await?;
        Ok(res.into_inner())
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_files(
        &mut self,
        pattern: String,
        cwd: String,
    ) -> Result<Streaming<FileStatus>> {
        let res = self
            .inner
            .delete_files(PatternRequest {
                pattern,
                current_directory: cwd,
            })
            .await?;
        Ok(res.into_inner())
    }

    #[tracing::instrument(skip(self))]
    pub async fn backup(&mut self) -> Result<String> {
        let res = self.inner.backup(BackupRequest {}).await?;
        Ok(res.into_inner().cid)
    }

    #[tracing::instrument(skip(self))]
    pub async fn restore(&mut self, cid: String) -> Result<Streaming<RestoreUpdate>> {
        let res = self.inner.restore(RestoreRequest { cid }).await?;
        Ok(res.into_inner())
    }
}
