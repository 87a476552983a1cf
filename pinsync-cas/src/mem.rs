use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use multihash_codetable::{Code, MultihashDigest};
use tokio::sync::RwLock;

use crate::{Cid, ContentStore, Error};

const RAW_CODEC: u64 = 0x55;

/// An in-memory [`ContentStore`].
///
/// Content-addressed like the real thing: identical bytes always yield the
/// same identifier (a CIDv1 over the raw codec and a SHA-2-256 digest). Not
/// optimised at all; meant for tests.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    blocks: HashMap<Cid, Bytes>,
    pins: HashSet<Cid>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The identifier this store mints for `data`.
    pub fn cid_for(data: &[u8]) -> Cid {
        let mh = Code::Sha2_256.digest(data);
        Cid::from(cid::Cid::new_v1(RAW_CODEC, mh).to_string())
    }

    pub async fn contains(&self, cid: &Cid) -> bool {
        self.inner.read().await.blocks.contains_key(cid)
    }

    pub async fn is_pinned(&self, cid: &Cid) -> bool {
        self.inner.read().await.pins.contains(cid)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.blocks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ContentStore for MemStore {
    async fn put(&self, data: Bytes) -> Result<Cid, Error> {
        let cid = Self::cid_for(&data);
        self.inner.write().await.blocks.insert(cid.clone(), data);
        Ok(cid)
    }

    async fn pin(&self, cid: &Cid) -> Result<(), Error> {
        let mut inner = self.inner.write().await;
        if !inner.blocks.contains_key(cid) {
            return Err(Error::NotFound(cid.clone()));
        }
        inner.pins.insert(cid.clone());
        Ok(())
    }

    async fn cat(&self, cid: &Cid) -> Result<Bytes, Error> {
        self.inner
            .read()
            .await
            .blocks
            .get(cid)
            .cloned()
            .ok_or_else(|| Error::NotFound(cid.clone()))
    }
}
