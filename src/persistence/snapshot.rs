use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::record::{capture_records, load_lands, LandRecord, LoadReport, RECORD_VERSION};
use super::write_atomic;
use crate::lands::{ApproveList, Lands};

/// Every land and pending approval at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandsSnapshot {
    pub version: u32,
    pub land_count: u32,
    pub records: Vec<LandRecord>,
    pub approvals: ApproveList,
}

impl LandsSnapshot {
    pub fn capture(lands: &Lands) -> Self {
        let records = capture_records(lands);
        Self {
            version: RECORD_VERSION,
            land_count: records.len() as u32,
            records,
            approvals: lands.approvals().clone(),
        }
    }

    /// Replace every land and approval in `lands` with the snapshot content.
    pub fn restore(&self, lands: &mut Lands) -> LoadReport {
        let roots: Vec<_> = lands
            .lands()
            .filter(|land| land.parent().is_none())
            .map(|land| land.uuid())
            .collect();
        for root in roots {
            if let Err(error) = lands.remove_land(root, true) {
                warn!(land = %root, %error, "land not cleared before restore");
            }
        }
        let report = load_lands(lands, &self.records);
        *lands.approvals_mut() = self.approvals.clone();
        report
    }
}

/// Metadata about a snapshot file on disk.
#[derive(Debug, Clone)]
pub struct SnapshotMetadata {
    pub path: PathBuf,
    pub land_count: u32,
    pub timestamp: u64,
    pub file_size: u64,
}

#[derive(Debug)]
pub enum SnapshotError {
    Io(io::Error),
    Serialize(String),
    Deserialize(String),
    Corrupt(PathBuf),
    NoValidSnapshots,
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotError::Io(e) => write!(f, "I/O error: {}", e),
            SnapshotError::Serialize(e) => write!(f, "Serialization error: {}", e),
            SnapshotError::Deserialize(e) => write!(f, "Deserialization error: {}", e),
            SnapshotError::Corrupt(path) => {
                write!(f, "Corrupt snapshot: {}", path.display())
            }
            SnapshotError::NoValidSnapshots => {
                write!(f, "No valid snapshots found. Save one with: claimguard snapshots save")
            }
        }
    }
}

impl std::error::Error for SnapshotError {}

impl From<io::Error> for SnapshotError {
    fn from(e: io::Error) -> Self {
        SnapshotError::Io(e)
    }
}

fn snapshot_filename(land_count: u32, timestamp: u64) -> String {
    format!("lands-{}-{}.bin", land_count, timestamp)
}

/// Expected format: `lands-{count}-{timestamp}.bin`
fn parse_snapshot_filename(filename: &str) -> Option<(u32, u64)> {
    let stem = filename.strip_suffix(".bin")?;
    let rest = stem.strip_prefix("lands-")?;
    let (count_str, ts_str) = rest.split_once('-')?;
    let count = count_str.parse::<u32>().ok()?;
    let ts = ts_str.parse::<u64>().ok()?;
    Some((count, ts))
}

fn unix_timestamp_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Save a snapshot of all lands. The file appears atomically.
pub fn save_snapshot(lands: &Lands, snapshot_dir: &Path) -> Result<PathBuf, SnapshotError> {
    let snapshot = LandsSnapshot::capture(lands);
    let target = snapshot_dir.join(snapshot_filename(snapshot.land_count, unix_timestamp_now()));

    let encoded =
        bincode::serialize(&snapshot).map_err(|e| SnapshotError::Serialize(e.to_string()))?;
    write_atomic(&target, &encoded)?;

    info!(path = %target.display(), lands = snapshot.land_count, "snapshot saved");
    Ok(target)
}

/// Load a snapshot file, checking that the record count matches its header.
pub fn load_snapshot(path: &Path) -> Result<LandsSnapshot, SnapshotError> {
    let data = fs::read(path)?;
    let snapshot: LandsSnapshot =
        bincode::deserialize(&data).map_err(|e| SnapshotError::Deserialize(e.to_string()))?;

    if snapshot.records.len() as u32 != snapshot.land_count || snapshot.version > RECORD_VERSION {
        return Err(SnapshotError::Corrupt(path.to_path_buf()));
    }

    Ok(snapshot)
}

/// List snapshots in a directory, newest first.
pub fn list_snapshots(snapshot_dir: &Path) -> Result<Vec<SnapshotMetadata>, SnapshotError> {
    if !snapshot_dir.exists() {
        return Ok(Vec::new());
    }

    let mut snapshots = Vec::new();

    for entry in fs::read_dir(snapshot_dir)? {
        let entry = entry?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }

        let filename = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };

        if filename.starts_with('.') {
            continue;
        }

        if let Some((land_count, timestamp)) = parse_snapshot_filename(&filename) {
            let file_size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            snapshots.push(SnapshotMetadata {
                path: path.clone(),
                land_count,
                timestamp,
                file_size,
            });
        }
    }

    snapshots.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then(b.land_count.cmp(&a.land_count))
    });

    Ok(snapshots)
}

/// Keep only the `max_snapshots` most recent snapshots. Returns the deleted paths.
pub fn prune_snapshots(
    snapshot_dir: &Path,
    max_snapshots: usize,
) -> Result<Vec<PathBuf>, SnapshotError> {
    let snapshots = list_snapshots(snapshot_dir)?;

    let mut deleted = Vec::new();
    if snapshots.len() > max_snapshots {
        for snapshot in &snapshots[max_snapshots..] {
            fs::remove_file(&snapshot.path)?;
            deleted.push(snapshot.path.clone());
        }
    }

    Ok(deleted)
}

/// Load the most recent readable snapshot, falling back to older ones.
pub fn load_latest_valid_snapshot(snapshot_dir: &Path) -> Result<LandsSnapshot, SnapshotError> {
    let snapshots = list_snapshots(snapshot_dir)?;

    for snapshot in &snapshots {
        match load_snapshot(&snapshot.path) {
            Ok(loaded) => return Ok(loaded),
            Err(e) => {
                warn!(
                    path = %snapshot.path.display(),
                    error = %e,
                    "Corrupt snapshot, trying next"
                );
            }
        }
    }

    Err(SnapshotError::NoValidSnapshots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collisions::CollisionRequest;
    use crate::geometry::Area;
    use crate::lands::{Approve, NewLand};
    use crate::players::PlayerContainer;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn cuboid(x1: i32, z1: i32, x2: i32, z2: i32) -> Area {
        Area::cuboid("world", x1, 0, z1, x2, 255, z2).unwrap()
    }

    fn make_lands(count: u32) -> Lands {
        let mut lands = Lands::default();
        let owner = PlayerContainer::player(Uuid::from_u128(7));
        for i in 0..count as i32 {
            let id = lands
                .create_land(NewLand::new(
                    &format!("land{}", i),
                    owner.clone(),
                    cuboid(i * 100, 0, i * 100 + 50, 50),
                ))
                .unwrap();
            lands
                .create_land(
                    NewLand::new(
                        &format!("plot{}", i),
                        owner.clone(),
                        cuboid(i * 100 + 5, 5, i * 100 + 10, 10),
                    )
                    .with_parent(id),
                )
                .unwrap();
        }
        let request = CollisionRequest::land_add("waiting", owner, cuboid(-50, -50, -10, -10));
        lands.approvals_mut().add(Approve::new(request, 3.0));
        lands
    }

    fn write_raw(dir: &Path, name: &str, lands: &Lands) {
        let data = bincode::serialize(&LandsSnapshot::capture(lands)).unwrap();
        fs::write(dir.join(name), data).unwrap();
    }

    #[test]
    fn save_and_load_round_trip_identical() {
        let dir = TempDir::new().unwrap();
        let lands = make_lands(3);

        let path = save_snapshot(&lands, dir.path()).unwrap();
        let loaded = load_snapshot(&path).unwrap();

        assert_eq!(loaded, LandsSnapshot::capture(&lands));
        assert_eq!(loaded.land_count, 6);
        assert_eq!(loaded.approvals.len(), 1);
    }

    #[test]
    fn restore_replaces_current_lands() {
        let dir = TempDir::new().unwrap();
        let lands = make_lands(2);
        let path = save_snapshot(&lands, dir.path()).unwrap();

        let mut other = make_lands(4);
        other.approvals_mut().remove("waiting");
        let report = load_snapshot(&path).unwrap().restore(&mut other);

        assert_eq!(report.loaded, 4);
        assert_eq!(other.len(), 4);
        assert!(other.get_land_by_name("land3").is_none());
        assert!(other.approvals().is_in_approve("waiting"));
        assert_eq!(capture_records(&other), capture_records(&lands));
    }

    #[test]
    fn snapshot_filename_parse_round_trip() {
        let filename = snapshot_filename(500, 1708300000);
        assert_eq!(filename, "lands-500-1708300000.bin");

        let (count, ts) = parse_snapshot_filename(&filename).unwrap();
        assert_eq!(count, 500);
        assert_eq!(ts, 1708300000);
    }

    #[test]
    fn parse_invalid_filename_returns_none() {
        assert!(parse_snapshot_filename("random.bin").is_none());
        assert!(parse_snapshot_filename("lands-.bin").is_none());
        assert!(parse_snapshot_filename("lands-abc-123.bin").is_none());
        assert!(parse_snapshot_filename("lands-100-abc.bin").is_none());
        assert!(parse_snapshot_filename("not-a-snapshot.txt").is_none());
    }

    #[test]
    fn list_snapshots_returns_sorted_newest_first() {
        let dir = TempDir::new().unwrap();
        let lands = make_lands(1);

        write_raw(dir.path(), "lands-10-1000.bin", &lands);
        write_raw(dir.path(), "lands-20-2000.bin", &lands);
        write_raw(dir.path(), "lands-30-3000.bin", &lands);
        fs::write(dir.path().join("notes.txt"), "not a snapshot").unwrap();
        fs::write(dir.path().join(".lands-99-9999.bin.tmp"), "temp file").unwrap();

        let snapshots = list_snapshots(dir.path()).unwrap();
        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[0].land_count, 30);
        assert_eq!(snapshots[1].land_count, 20);
        assert_eq!(snapshots[2].land_count, 10);
    }

    #[test]
    fn list_snapshots_nonexistent_dir() {
        let dir = TempDir::new().unwrap();
        let snapshots = list_snapshots(&dir.path().join("missing")).unwrap();
        assert!(snapshots.is_empty());
    }

    #[test]
    fn prune_keeps_max_snapshots() {
        let dir = TempDir::new().unwrap();
        let lands = make_lands(1);

        for i in 0..6u64 {
            write_raw(dir.path(), &format!("lands-2-{}.bin", 1000 + i), &lands);
        }

        let deleted = prune_snapshots(dir.path(), 3).unwrap();
        assert_eq!(deleted.len(), 3);

        let remaining = list_snapshots(dir.path()).unwrap();
        assert_eq!(remaining.len(), 3);
        assert_eq!(remaining[0].timestamp, 1005);
        assert_eq!(remaining[1].timestamp, 1004);
        assert_eq!(remaining[2].timestamp, 1003);

        assert!(prune_snapshots(dir.path(), 5).unwrap().is_empty());
    }

    #[test]
    fn load_truncated_snapshot_returns_error() {
        let dir = TempDir::new().unwrap();
        let data = bincode::serialize(&LandsSnapshot::capture(&make_lands(2))).unwrap();

        let path = dir.path().join("lands-4-1000.bin");
        fs::write(&path, &data[..data.len() / 2]).unwrap();

        assert!(load_snapshot(&path).is_err());
    }

    #[test]
    fn mismatched_count_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let mut snapshot = LandsSnapshot::capture(&make_lands(2));
        snapshot.land_count = 9;
        let path = dir.path().join("lands-9-1000.bin");
        fs::write(&path, bincode::serialize(&snapshot).unwrap()).unwrap();

        assert!(matches!(load_snapshot(&path), Err(SnapshotError::Corrupt(_))));
    }

    #[test]
    fn load_latest_valid_falls_back_on_corrupt() {
        let dir = TempDir::new().unwrap();
        let lands = make_lands(2);

        write_raw(dir.path(), "lands-4-1000.bin", &lands);
        fs::write(dir.path().join("lands-4-2000.bin"), b"corrupt data here").unwrap();

        let loaded = load_latest_valid_snapshot(dir.path()).unwrap();
        assert_eq!(loaded.land_count, 4);
    }

    #[test]
    fn load_latest_valid_all_corrupt_returns_error() {
        let dir = TempDir::new().unwrap();

        fs::write(dir.path().join("lands-1-1000.bin"), b"corrupt1").unwrap();
        fs::write(dir.path().join("lands-1-2000.bin"), b"corrupt2").unwrap();

        assert!(matches!(
            load_latest_valid_snapshot(dir.path()),
            Err(SnapshotError::NoValidSnapshots)
        ));
        let empty = TempDir::new().unwrap();
        assert!(matches!(
            load_latest_valid_snapshot(empty.path()),
            Err(SnapshotError::NoValidSnapshots)
        ));
    }

    #[test]
    fn save_creates_directory_and_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("deep").join("snapshots");

        let path = save_snapshot(&make_lands(1), &nested).unwrap();
        assert!(path.exists());

        let temp_files = fs::read_dir(&nested)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_str().is_some_and(|n| n.starts_with('.')))
            .count();
        assert_eq!(temp_files, 0);
    }
}
