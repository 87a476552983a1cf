use std::sync::Arc;

use anyhow::{Context, Result};
use tonic::transport::Server;
use tracing::info;

use pinsync_cas::ContentStore;
use pinsync_rpc_types::pinsync_server::PinsyncServer;
use pinsync_store::Datastore;

use crate::config::Config;
use crate::rpc::PinsyncService;

pub async fn run(config: Config) -> Result<()> {
    let version = env!("CARGO_PKG_VERSION");
    println!("Starting pinsyncd, version {version}");

    if let Some(parent) = config.cid_cache.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let cas: Arc<dyn ContentStore> = Arc::new(config.cas()?);
    let store = Datastore::new(cas, config.store_config())
        .await
        .context("failed to construct datastore")?;

    let events = tokio::spawn({
        let store = store.clone();
        async move { store.start().await }
    });

    let addr = config.server_addr();
    info!("grpc server listening on {}", addr);
    let server = Server::builder()
        .add_service(PinsyncServer::new(PinsyncService::new(store.clone())))
        .serve_with_shutdown(addr, pinsync_util::shutdown_signal());

    tokio::select! {
        res = server => res.context("grpc server failed")?,
        res = events => res.context("event loop panicked")??,
    }

    store.stop().await;
    info!("pinsyncd stopped");
    Ok(())
}
