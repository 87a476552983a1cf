use std::path::PathBuf;

use pinsync_cas::Cid;

/// Errors produced by the datastore and its watchers.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] pinsync_cas::Error),

    #[error(transparent)]
    Walk(#[from] walkdir::Error),

    #[error("failed to parse index: {0}")]
    Parse(#[source] serde_json::Error),

    #[error(
        "conflict for file {}: current cid is {current}, cid from store is {incoming}",
        path.display()
    )]
    Conflict {
        path: PathBuf,
        current: Cid,
        incoming: Cid,
    },

    #[error("{0}")]
    State(&'static str),

    /// A commit that uploaded its index but failed one or more of the
    /// follow-up steps. The first failure is the chain head; the rest ride
    /// along.
    #[error("errors encountered while committing changes: {first}")]
    Commit {
        #[source]
        first: Box<Error>,
        others: Vec<Error>,
    },
}
