//! Domain types: source snapshots and the error taxonomy.

pub mod error;
pub mod snapshot;

pub use error::{DockhandError, Result};
pub use snapshot::{
    normalize_dir_path, SnapshotDigest, SnapshotError, SnapshotResult, SourceSnapshot,
};
