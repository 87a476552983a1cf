//! Client for a content-addressed store.
//!
//! The store is consumed through the small [`ContentStore`] capability:
//! upload bytes, pin an object by identifier, fetch bytes by identifier.
//! [`HttpStore`] talks to a remote store over its HTTP API, optionally
//! authenticating every request with basic auth. [`MemStore`] is a
//! content-addressed stand-in used by tests across the workspace.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

mod http;
mod mem;

pub use crate::http::{Auth, HttpStore};
pub use crate::mem::MemStore;

/// Content identifier minted by the store for an uploaded byte sequence.
///
/// Identifiers are opaque printable tokens; equality is byte-exact. The same
/// bytes always yield the same identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cid(String);

impl Cid {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Cid {
    fn from(s: String) -> Self {
        Cid(s)
    }
}

impl From<&str> for Cid {
    fn from(s: &str) -> Self {
        Cid(s.to_string())
    }
}

/// Errors returned by a [`ContentStore`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The store could not be reached, or the request failed in transit.
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),

    /// The store does not know the given identifier.
    #[error("not found: {0}")]
    NotFound(Cid),

    /// The store answered with something we could not interpret.
    #[error("invalid store response: {0}")]
    InvalidResponse(String),
}

/// The capability the rest of pinsync consumes from the store.
#[async_trait]
pub trait ContentStore: Send + Sync + 'static {
    /// Upload a blob, returning the identifier the store minted for it.
    async fn put(&self, data: Bytes) -> Result<Cid, Error>;

    /// Mark the object named by `cid` as pinned so it stays retrievable.
    async fn pin(&self, cid: &Cid) -> Result<(), Error>;

    /// Fetch the bytes named by `cid`.
    async fn cat(&self, cid: &Cid) -> Result<Bytes, Error>;
}
