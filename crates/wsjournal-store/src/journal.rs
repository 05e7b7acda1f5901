// ABOUTME: Append-only journal file holding one encoded Item per line.
// ABOUTME: Provides fsynced appends, torn-tail repair at open, and atomic reset after compaction.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use wsjournal_core::{CodecError, Item, encode};

/// Errors that can occur during journal operations.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("journal could not be restored after a failed append")]
    Poisoned,
}

/// The append side of a collection's journal. Every append is written and
/// fsynced before it returns, so a successful append is durable.
pub struct Journal {
    path: PathBuf,
    file: File,
    len: u64,
    records: u64,
    poisoned: bool,
    /// Make the next record write stop after this many bytes and fail.
    #[cfg(test)]
    pub(crate) fail_after: Option<usize>,
}

impl Journal {
    /// Open (or create) the journal at `path` in append mode. `records` is
    /// the number of complete records already in the file, as counted by
    /// replay.
    pub fn open(path: &Path, records: u64) -> Result<Self, JournalError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            len,
            records,
            poisoned: false,
            #[cfg(test)]
            fail_after: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the journal in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of records in the journal.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Append a single item. The line and its newline go out in one write,
    /// followed by an fsync. If either fails, the file is cut back to its
    /// last committed length so no partial or unacknowledged record stays
    /// behind; if that is impossible the journal refuses further appends.
    pub fn append(&mut self, item: &Item) -> Result<(), JournalError> {
        if self.poisoned {
            return Err(JournalError::Poisoned);
        }
        let mut line = encode(item)?;
        line.push('\n');

        if let Err(e) = self.write_record(line.as_bytes()) {
            self.rollback();
            return Err(e.into());
        }

        self.len += line.len() as u64;
        self.records += 1;
        Ok(())
    }

    fn write_record(&mut self, bytes: &[u8]) -> io::Result<()> {
        #[cfg(test)]
        if let Some(limit) = self.fail_after.take() {
            self.file.write_all(&bytes[..limit.min(bytes.len())])?;
            return Err(io::Error::other("injected write failure"));
        }
        self.file.write_all(bytes)?;
        self.file.sync_all()
    }

    /// Truncate back to the last committed length after a failed append.
    fn rollback(&mut self) {
        let restored = self
            .file
            .set_len(self.len)
            .and_then(|()| self.file.sync_all());
        if let Err(e) = restored {
            tracing::error!(
                "cannot restore {} after failed append, refusing further writes: {}",
                self.path.display(),
                e
            );
            self.poisoned = true;
        }
    }

    /// Flush everything to disk.
    pub fn sync(&mut self) -> Result<(), JournalError> {
        if self.poisoned {
            return Err(JournalError::Poisoned);
        }
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Replace the journal with an empty file and reattach to it. The new
    /// file is opened before the rename so the handle follows it; nothing
    /// after the rename can leave us appending to the old inode.
    pub fn reset(&mut self) -> Result<(), JournalError> {
        let tmp_path = self.path.with_extension("log.tmp");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.sync_all()?;
        drop(file);
        let file = OpenOptions::new().append(true).open(&tmp_path)?;

        fs::rename(&tmp_path, &self.path)?;
        sync_parent_dir(&self.path);

        self.file = file;
        self.len = 0;
        self.records = 0;
        self.poisoned = false;
        Ok(())
    }

    /// Truncate a journal whose last line has no terminating newline back to
    /// the end of its last complete line. Returns the number of bytes
    /// removed; zero means the file was already clean.
    pub fn repair_torn_tail(path: &Path) -> Result<u64, JournalError> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(0);
        }

        let keep = complete_prefix_len(&mut file, len)?;
        if keep == len {
            return Ok(0);
        }

        file.set_len(keep)?;
        file.sync_all()?;
        Ok(len - keep)
    }
}

/// Find the length of the file up to and including its last newline,
/// scanning backwards in fixed-size chunks.
fn complete_prefix_len(file: &mut File, len: u64) -> io::Result<u64> {
    const CHUNK: u64 = 4096;
    let mut end = len;
    let mut buf = vec![0u8; CHUNK as usize];

    while end > 0 {
        let start = end.saturating_sub(CHUNK);
        let size = (end - start) as usize;
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut buf[..size])?;

        if let Some(pos) = buf[..size].iter().rposition(|b| *b == b'\n') {
            return Ok(start + pos as u64 + 1);
        }
        end = start;
    }

    Ok(0)
}

/// Fsync the directory holding `path` so a rename inside it is durable.
/// Best-effort: the rename itself already succeeded.
pub(crate) fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }
}
