// ABOUTME: Replay engine that rebuilds a collection's Index from its journal and optional snapshot.
// ABOUTME: Skips records covered by the snapshot, ignores torn tails, and skips or rejects corrupt lines.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use chrono::{DateTime, Utc};
use thiserror::Error;
use wsjournal_core::{Index, decode};

use crate::snapshot::SnapshotData;

/// Errors that can occur during replay.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt record at line {line}: {reason}")]
    Corrupt { line: u64, reason: String },
}

/// What to do with a complete journal line that does not decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReplayPolicy {
    /// Skip the line, count it, and keep going.
    #[default]
    Skip,
    /// Fail the whole replay.
    Abort,
}

/// Summary of a replay, for logging and for operators checking a journal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Complete (newline-terminated, non-blank) lines in the journal.
    pub lines: u64,
    /// Records folded into the index.
    pub applied: u64,
    /// Records skipped because the snapshot already contains them.
    pub covered_by_snapshot: u64,
    /// 1-based line numbers of records that failed to decode.
    pub corrupt_lines: Vec<u64>,
    /// Whether the journal ended in a partial record.
    pub torn_tail: bool,
    /// Highest sequence number seen in the snapshot or the journal.
    pub last_seq: u64,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub from_snapshot: bool,
}

impl ReplayReport {
    pub fn corrupt(&self) -> usize {
        self.corrupt_lines.len()
    }
}

/// The rebuilt index and the report describing how it was built.
#[derive(Debug, Clone)]
pub struct Replay {
    pub index: Index,
    pub report: ReplayReport,
}

/// Rebuild an index by folding the journal at `journal_path` on top of
/// `snapshot` (or an empty index). A missing journal replays as empty.
pub fn replay(
    journal_path: &Path,
    snapshot: Option<SnapshotData>,
    policy: ReplayPolicy,
) -> Result<Replay, ReplayError> {
    let mut report = ReplayReport::default();
    let (mut index, cut) = match snapshot {
        Some(snap) => {
            report.from_snapshot = true;
            report.last_seq = snap.last_seq;
            (snap.index, snap.last_seq)
        }
        None => (Index::new(), 0),
    };

    let file = match File::open(journal_path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(Replay { index, report });
        }
        Err(e) => return Err(e.into()),
    };

    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let mut line_no = 0u64;

    loop {
        buf.clear();
        let read = reader.read_until(b'\n', &mut buf)?;
        if read == 0 {
            break;
        }
        line_no += 1;

        // Only newline-terminated lines were fully appended.
        if buf.last() != Some(&b'\n') {
            tracing::warn!(
                "ignoring torn record at line {} of {}",
                line_no,
                journal_path.display()
            );
            report.torn_tail = true;
            break;
        }

        let decoded = std::str::from_utf8(&buf)
            .map_err(|e| e.to_string())
            .and_then(|line| {
                if line.trim().is_empty() {
                    Ok(None)
                } else {
                    decode(line).map(Some).map_err(|e| e.to_string())
                }
            });

        let item = match decoded {
            Ok(Some(item)) => item,
            Ok(None) => continue,
            Err(reason) => {
                report.lines += 1;
                match policy {
                    ReplayPolicy::Skip => {
                        tracing::warn!("skipping corrupt record at line {}: {}", line_no, reason);
                        report.corrupt_lines.push(line_no);
                        continue;
                    }
                    ReplayPolicy::Abort => {
                        return Err(ReplayError::Corrupt {
                            line: line_no,
                            reason,
                        });
                    }
                }
            }
        };

        report.lines += 1;
        report.last_seq = report.last_seq.max(item.seq);
        report.last_timestamp = Some(match report.last_timestamp {
            Some(ts) if ts > item.timestamp => ts,
            _ => item.timestamp,
        });

        if cut > 0 && item.seq <= cut {
            report.covered_by_snapshot += 1;
            continue;
        }

        index.apply(&item);
        report.applied += 1;
    }

    if !report.corrupt_lines.is_empty() {
        tracing::warn!(
            "{} corrupt record(s) skipped while replaying {}",
            report.corrupt_lines.len(),
            journal_path.display()
        );
    }

    Ok(Replay { index, report })
}
