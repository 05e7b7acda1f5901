// ABOUTME: Collection, the public journaled key/value store backing route handlers.
// ABOUTME: Every mutation is durably appended to the journal before the in-memory index changes.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use wsjournal_core::{Action, Index, Item};

use crate::journal::{Journal, JournalError};
use crate::replay::{ReplayError, ReplayPolicy, ReplayReport, replay};
use crate::snapshot::{SNAPSHOT_FILE, SnapshotData, SnapshotError, load_snapshot, save_snapshot};

pub const JOURNAL_FILE: &str = "journal.log";
const COMPACT_LOCK: &str = "compact.lock";

/// Errors returned by collection operations.
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("replay error: {0}")]
    Replay(#[from] ReplayError),

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("invalid collection name: {0:?}")]
    InvalidName(String),

    #[error("key must not be empty")]
    EmptyKey,

    #[error("collection is closed")]
    Closed,

    #[error("compaction already in progress")]
    AlreadyCompacting,
}

impl CollectionError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CollectionError::NotFound(_))
    }
}

/// Options applied when opening a collection.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectionOptions {
    pub replay_policy: ReplayPolicy,
}

/// What a compaction did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotStats {
    pub last_seq: u64,
    pub keys: usize,
    pub records_compacted: u64,
    pub bytes_reclaimed: u64,
}

/// The key set of a collection at the moment `keys()` was called. Iterate
/// it as often as needed; later mutations do not show up in it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keys {
    keys: Vec<String>,
}

impl Keys {
    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.keys
    }
}

impl IntoIterator for Keys {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.into_iter()
    }
}

impl<'a> IntoIterator for &'a Keys {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}

/// Check that `name` can be used as a single directory component.
pub fn validate_name(name: &str) -> Result<(), CollectionError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.contains('\0');
    if bad {
        return Err(CollectionError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// A named, journaled key/value collection. Not internally synchronized:
/// mutations take `&mut self`, and sharing goes through
/// [`crate::actor`] or an external lock.
pub struct Collection {
    name: String,
    path: PathBuf,
    index: Index,
    journal: Option<Journal>,
    next_seq: u64,
    last_timestamp: Option<DateTime<Utc>>,
    report: ReplayReport,
}

impl Collection {
    /// Open the collection `name` under `base` with default options.
    pub fn open(base: &Path, name: &str) -> Result<Self, CollectionError> {
        Self::open_with(base, name, CollectionOptions::default())
    }

    /// Open (creating if needed) the collection `name` under `base`:
    /// clean up after an interrupted compaction, cut off a torn journal
    /// tail, replay snapshot plus journal, then attach the journal writer.
    pub fn open_with(
        base: &Path,
        name: &str,
        options: CollectionOptions,
    ) -> Result<Self, CollectionError> {
        validate_name(name)?;
        let path = base.join(name);

        match fs::metadata(&path) {
            Ok(meta) if !meta.is_dir() => return Err(CollectionError::NotADirectory(path)),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir_all(&path)?,
            Err(e) => return Err(e.into()),
        }

        remove_compaction_leftovers(&path)?;

        let journal_path = path.join(JOURNAL_FILE);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&journal_path)?;

        let torn_bytes = Journal::repair_torn_tail(&journal_path)?;
        if torn_bytes > 0 {
            tracing::warn!(
                "truncated {} byte torn record from {}",
                torn_bytes,
                journal_path.display()
            );
        }

        let snapshot = load_snapshot(&path)?;
        let mut replayed = replay(&journal_path, snapshot, options.replay_policy)?;
        replayed.report.torn_tail |= torn_bytes > 0;

        let journal = Journal::open(&journal_path, replayed.report.lines)?;

        tracing::info!(
            "opened collection {} with {} keys ({} records replayed, {} corrupt, snapshot: {})",
            name,
            replayed.index.len(),
            replayed.report.applied,
            replayed.report.corrupt(),
            replayed.report.from_snapshot
        );

        Ok(Self {
            name: name.to_string(),
            path,
            index: replayed.index,
            journal: Some(journal),
            next_seq: replayed.report.last_seq + 1,
            last_timestamp: replayed.report.last_timestamp,
            report: replayed.report,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The collection directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn journal_path(&self) -> PathBuf {
        self.path.join(JOURNAL_FILE)
    }

    pub fn is_open(&self) -> bool {
        self.journal.is_some()
    }

    /// How the index was rebuilt when the collection was opened.
    pub fn replay_report(&self) -> &ReplayReport {
        &self.report
    }

    /// Current journal size in bytes; zero once closed.
    pub fn journal_len(&self) -> u64 {
        self.journal.as_ref().map_or(0, Journal::len)
    }

    /// Sequence number of the last committed mutation.
    pub fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }

    /// Create-or-replace `key`.
    pub fn push(&mut self, key: &str, value: impl Into<String>) -> Result<(), CollectionError> {
        self.ensure_open()?;
        if key.is_empty() {
            return Err(CollectionError::EmptyKey);
        }
        self.commit(Action::Push, key, value.into())?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<String, CollectionError> {
        self.ensure_open()?;
        self.index
            .get(key)
            .map(str::to_string)
            .ok_or_else(|| CollectionError::NotFound(key.to_string()))
    }

    /// Update an existing key. Missing keys fail before anything is
    /// journaled.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> Result<(), CollectionError> {
        self.ensure_open()?;
        if !self.index.contains_key(key) {
            return Err(CollectionError::NotFound(key.to_string()));
        }
        self.commit(Action::Set, key, value.into())?;
        Ok(())
    }

    /// Remove `key` and return its value. The journal record keeps the
    /// removed value for audit.
    pub fn pop(&mut self, key: &str) -> Result<String, CollectionError> {
        self.ensure_open()?;
        let value = self
            .index
            .get(key)
            .map(str::to_string)
            .ok_or_else(|| CollectionError::NotFound(key.to_string()))?;
        self.commit(Action::Pop, key, value.clone())?;
        Ok(value)
    }

    pub fn count(&self) -> usize {
        self.index.len()
    }

    pub fn keys(&self) -> Keys {
        Keys {
            keys: self.index.keys().cloned().collect(),
        }
    }

    /// Keys in positions `from..to` of the ordered key set.
    pub fn keys_range(&self, from: usize, to: usize) -> Vec<String> {
        self.index
            .keys()
            .skip(from)
            .take(to.saturating_sub(from))
            .cloned()
            .collect()
    }

    /// A fresh identifier suitable for use as a new key.
    pub fn object_id(&self) -> String {
        wsjournal_core::object_id()
    }

    /// Snapshot the index and empty the journal. The snapshot is in place
    /// before the journal is replaced, so a crash in between only costs a
    /// longer replay.
    pub fn snapshot(&mut self) -> Result<SnapshotStats, CollectionError> {
        self.ensure_open()?;
        let _guard = CompactionGuard::acquire(&self.path)?;

        let last_seq = self.next_seq - 1;
        let journal = self.journal.as_mut().ok_or(CollectionError::Closed)?;
        journal.sync()?;
        let records_compacted = journal.records();
        let bytes_reclaimed = journal.len();

        let data = SnapshotData {
            last_seq,
            saved_at: Utc::now(),
            index: self.index.clone(),
        };
        save_snapshot(&self.path, &data)?;
        journal.reset()?;

        tracing::info!(
            "compacted collection {}: {} keys at seq {}, {} records dropped",
            self.name,
            self.index.len(),
            last_seq,
            records_compacted
        );

        Ok(SnapshotStats {
            last_seq,
            keys: self.index.len(),
            records_compacted,
            bytes_reclaimed,
        })
    }

    /// Flush and release the journal. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<(), CollectionError> {
        if let Some(mut journal) = self.journal.take() {
            journal.sync()?;
            tracing::info!("closed collection {}", self.name);
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), CollectionError> {
        if self.journal.is_none() {
            return Err(CollectionError::Closed);
        }
        Ok(())
    }

    /// Append the record, then apply it. A failed append leaves the index,
    /// the sequence counter and the clock untouched.
    fn commit(&mut self, action: Action, key: &str, value: String) -> Result<(), CollectionError> {
        let timestamp = self.next_timestamp();
        let item = Item::new(self.next_seq, action, key, value, timestamp);

        let journal = self.journal.as_mut().ok_or(CollectionError::Closed)?;
        journal.append(&item)?;

        self.next_seq += 1;
        self.last_timestamp = Some(timestamp);
        self.index.apply(&item);
        tracing::debug!("{} {} {} (seq {})", self.name, action, key, item.seq);
        Ok(())
    }

    /// Wall-clock time, held back from going below the last recorded one.
    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        }
    }
}

/// Exclusive marker file held for the duration of a compaction.
struct CompactionGuard {
    path: PathBuf,
}

impl CompactionGuard {
    fn acquire(dir: &Path) -> Result<Self, CollectionError> {
        let path = dir.join(COMPACT_LOCK);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Self { path }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(CollectionError::AlreadyCompacting)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for CompactionGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Remove temp files and the compaction marker left behind by a crash.
/// The collection has a single owner, so at open time nothing else can be
/// compacting it.
fn remove_compaction_leftovers(dir: &Path) -> Result<(), CollectionError> {
    let leftovers = [
        COMPACT_LOCK.to_string(),
        format!("{}.tmp", SNAPSHOT_FILE),
        format!("{}.tmp", JOURNAL_FILE),
    ];
    for name in &leftovers {
        let path = dir.join(name);
        match fs::remove_file(&path) {
            Ok(()) => tracing::warn!("removed stale {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
