//! The pinsync core.
//!
//! A [`Datastore`] keeps an index of watched local files mirrored into a
//! content-addressed store. Every admitted file gets a [`FileRecord`] and a
//! watcher that re-hashes it on a fixed interval; changes flow back into the
//! datastore as re-admissions, removals as index deletions. Each mutation
//! ends in a commit: the serialized index is uploaded, pinned, and its
//! identifier mirrored to a local recovery pointer so the index can be
//! rehydrated after a restart.

mod error;
mod file;
mod store;
mod watcher;

pub use crate::error::Error;
pub use crate::file::{FileRecord, FileStatus};
pub use crate::store::{AddProgress, Config, Datastore};
pub use pinsync_cas::{Cid, ContentStore};
