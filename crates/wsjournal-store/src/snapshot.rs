// ABOUTME: Atomic snapshot save and load for a collection's index.
// ABOUTME: Writes snapshot.json through a temp file, fsync and rename so a crash never leaves a partial file.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use wsjournal_core::Index;

use crate::journal::sync_parent_dir;

pub const SNAPSHOT_FILE: &str = "snapshot.json";

/// Errors that can occur during snapshot operations.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A materialized index together with the sequence number of the last
/// journal record folded into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotData {
    pub last_seq: u64,
    pub saved_at: DateTime<Utc>,
    pub index: Index,
}

pub fn snapshot_path(dir: &Path) -> PathBuf {
    dir.join(SNAPSHOT_FILE)
}

fn snapshot_tmp_path(dir: &Path) -> PathBuf {
    dir.join(format!("{}.tmp", SNAPSHOT_FILE))
}

/// Save a snapshot into `dir`, replacing any previous one atomically.
pub fn save_snapshot(dir: &Path, data: &SnapshotData) -> Result<(), SnapshotError> {
    let tmp_path = snapshot_tmp_path(dir);
    let final_path = snapshot_path(dir);

    let json = serde_json::to_string(data)?;

    let mut file = File::create(&tmp_path)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, &final_path)?;
    sync_parent_dir(&final_path);

    Ok(())
}

/// Load the snapshot from `dir`. Returns None if there is none.
pub fn load_snapshot(dir: &Path) -> Result<Option<SnapshotData>, SnapshotError> {
    let contents = match fs::read_to_string(snapshot_path(dir)) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let data: SnapshotData = serde_json::from_str(&contents)?;
    Ok(Some(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_snapshot(last_seq: u64) -> SnapshotData {
        let index: Index = [("/fred", r#"{"name":"fred"}"#), ("/wilma", "{}")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        SnapshotData {
            last_seq,
            saved_at: Utc::now(),
            index,
        }
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = TempDir::new().unwrap();
        let snap = make_snapshot(42);

        save_snapshot(dir.path(), &snap).unwrap();

        let loaded = load_snapshot(dir.path())
            .unwrap()
            .expect("should find snapshot");

        assert_eq!(loaded.last_seq, 42);
        assert_eq!(loaded.index, snap.index);
        assert_eq!(loaded.saved_at, snap.saved_at);
        assert!(!snapshot_tmp_path(dir.path()).exists());
    }

    #[test]
    fn save_replaces_previous_snapshot() {
        let dir = TempDir::new().unwrap();

        save_snapshot(dir.path(), &make_snapshot(10)).unwrap();
        save_snapshot(dir.path(), &make_snapshot(20)).unwrap();

        let loaded = load_snapshot(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.last_seq, 20);
    }

    #[test]
    fn load_returns_none_when_missing() {
        let dir = TempDir::new().unwrap();
        assert!(load_snapshot(dir.path()).unwrap().is_none());
    }

    #[test]
    fn load_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        fs::write(snapshot_path(dir.path()), "{not json").unwrap();

        assert!(matches!(
            load_snapshot(dir.path()),
            Err(SnapshotError::Json(_))
        ));
    }

    #[test]
    fn file_layout_is_plain_json() {
        let dir = TempDir::new().unwrap();
        save_snapshot(dir.path(), &make_snapshot(3)).unwrap();

        let raw = fs::read_to_string(snapshot_path(dir.path())).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["last_seq"], 3);
        assert_eq!(value["index"]["/wilma"], "{}");
    }
}
