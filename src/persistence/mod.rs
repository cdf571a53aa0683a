pub mod autosave;
pub mod flat;
pub mod record;
pub mod snapshot;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use uuid::Uuid;

use crate::lands::ApproveList;

pub use autosave::{drain_changes, persist_change, resync, spawn_autosave};
pub use flat::FlatFileStore;
pub use record::{capture_records, load_lands, LandRecord, LoadReport};
pub use snapshot::{
    list_snapshots, load_latest_valid_snapshot, load_snapshot, prune_snapshots, save_snapshot,
    LandsSnapshot, SnapshotError, SnapshotMetadata,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Durable storage for land records, keyed by land uuid.
pub trait LandStore: Send + Sync {
    fn load_all_lands(&self) -> Result<Vec<LandRecord>, StoreError>;
    fn save_land(&self, record: &LandRecord) -> Result<(), StoreError>;
    fn remove_land(&self, uuid: Uuid) -> Result<(), StoreError>;
    fn load_approvals(&self) -> Result<ApproveList, StoreError>;
    fn save_approvals(&self, approvals: &ApproveList) -> Result<(), StoreError>;
}

/// Write through a temporary file and rename it into place, so a failed
/// write never leaves a truncated file behind.
pub(crate) fn write_atomic(target: &Path, data: &[u8]) -> io::Result<()> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let filename = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("data");
    let tmp = dir.join(format!(".{}.tmp", filename));

    if let Err(e) = fs::write(&tmp, data) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    if let Err(e) = fs::rename(&tmp, target) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}
