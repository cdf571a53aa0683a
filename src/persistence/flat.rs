use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use super::record::LandRecord;
use super::{write_atomic, LandStore, StoreError};
use crate::lands::ApproveList;

const APPROVALS_FILE: &str = "approvals.json";
const ACCOUNTS_FILE: &str = "accounts.json";

/// One pretty-printed JSON file per land (`<uuid>.json`) plus
/// `approvals.json` and the `accounts.json` balance ledger, all in one
/// directory.
#[derive(Debug, Clone)]
pub struct FlatFileStore {
    dir: PathBuf,
}

impl FlatFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn land_path(&self, uuid: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", uuid))
    }

    fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
        move |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn write_json<T: serde::Serialize>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(value).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        write_atomic(path, json.as_bytes()).map_err(Self::io_error(path))
    }

    /// Player balances, empty when the ledger does not exist yet.
    pub fn load_accounts(&self) -> Result<BTreeMap<Uuid, f64>, StoreError> {
        let path = self.dir.join(ACCOUNTS_FILE);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = fs::read_to_string(&path).map_err(Self::io_error(&path))?;
        serde_json::from_str(&text).map_err(|source| StoreError::Json { path, source })
    }

    pub fn save_accounts(&self, accounts: &BTreeMap<Uuid, f64>) -> Result<(), StoreError> {
        self.write_json(&self.dir.join(ACCOUNTS_FILE), accounts)
    }
}

impl LandStore for FlatFileStore {
    /// Unreadable land files are logged and skipped.
    fn load_all_lands(&self) -> Result<Vec<LandRecord>, StoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(Self::io_error(&self.dir))? {
            let path = entry.map_err(Self::io_error(&self.dir))?.path();
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if filename.starts_with('.')
                || filename == APPROVALS_FILE
                || filename == ACCOUNTS_FILE
                || !filename.ends_with(".json")
            {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|text| {
                    serde_json::from_str::<LandRecord>(&text).map_err(|e| e.to_string())
                });
            match parsed {
                Ok(record) => records.push(record),
                Err(error) => warn!(path = %path.display(), %error, "unreadable land file skipped"),
            }
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(dir = %self.dir.display(), count = records.len(), "land files read");
        Ok(records)
    }

    fn save_land(&self, record: &LandRecord) -> Result<(), StoreError> {
        self.write_json(&self.land_path(record.uuid), record)
    }

    fn remove_land(&self, uuid: Uuid) -> Result<(), StoreError> {
        let path = self.land_path(uuid);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io { path, source: e }),
        }
    }

    fn load_approvals(&self) -> Result<ApproveList, StoreError> {
        let path = self.dir.join(APPROVALS_FILE);
        if !path.exists() {
            return Ok(ApproveList::default());
        }
        let text = fs::read_to_string(&path).map_err(Self::io_error(&path))?;
        serde_json::from_str(&text).map_err(|source| StoreError::Json { path, source })
    }

    fn save_approvals(&self, approvals: &ApproveList) -> Result<(), StoreError> {
        self.write_json(&self.dir.join(APPROVALS_FILE), approvals)
    }
}
