use std::{
    fs::{self, File, OpenOptions},
    io::{Read, Write},
    path::Path,
};

use log::debug;
use xxhash_rust::xxh3::xxh3_64;

use crate::{Codec, Error, Result, StoreMeta};

const JOURNAL_MAGIC: &[u8; 8] = b"pagedbJ\x01";
const ENTRY_SIZE: usize = 24;

/// One staged update to the `pages` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalEntry {
    pub page_id: u64,
    pub offset: u64,
    pub len: u32,
    pub codec: Codec,
}

/// Commit journal: the staged `pages`-table updates plus the new `meta`
/// block, checksummed as a unit.
///
/// Payload bytes are already durable in the data heap (in fresh extents)
/// before the journal is written, so redo-applying the journal after a
/// crash is idempotent: either the whole commit becomes visible or none
/// of it does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitJournal {
    pub entries: Vec<JournalEntry>,
    pub meta: StoreMeta,
}

impl CommitJournal {
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(24 + self.entries.len() * ENTRY_SIZE + StoreMeta::SIZE);
        bytes.extend_from_slice(JOURNAL_MAGIC);
        bytes.extend_from_slice(&(self.entries.len() as u64).to_le_bytes());
        for entry in &self.entries {
            bytes.extend_from_slice(&entry.page_id.to_le_bytes());
            bytes.extend_from_slice(&entry.offset.to_le_bytes());
            bytes.extend_from_slice(&entry.len.to_le_bytes());
            bytes.extend_from_slice(&(entry.codec as u32).to_le_bytes());
        }
        bytes.extend_from_slice(&self.meta.to_bytes());
        let digest = xxh3_64(&bytes);
        bytes.extend_from_slice(&digest.to_le_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 24 || &bytes[0..8] != JOURNAL_MAGIC {
            return Err(Error::CorruptMeta("bad journal header".to_string()));
        }
        let digest = u64::from_le_bytes(bytes[bytes.len() - 8..].try_into().unwrap());
        if xxh3_64(&bytes[..bytes.len() - 8]) != digest {
            return Err(Error::CorruptMeta("journal checksum mismatch".to_string()));
        }

        let count = u64::from_le_bytes(bytes[8..16].try_into().unwrap()) as usize;
        let expected = 16 + count * ENTRY_SIZE + StoreMeta::SIZE + 8;
        if bytes.len() != expected {
            return Err(Error::CorruptMeta(format!(
                "journal is {} bytes, expected {expected}",
                bytes.len()
            )));
        }

        let mut entries = Vec::with_capacity(count);
        let mut pos = 16;
        for _ in 0..count {
            entries.push(JournalEntry {
                page_id: u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap()),
                offset: u64::from_le_bytes(bytes[pos + 8..pos + 16].try_into().unwrap()),
                len: u32::from_le_bytes(bytes[pos + 16..pos + 20].try_into().unwrap()),
                codec: Codec::from_u32(u32::from_le_bytes(
                    bytes[pos + 20..pos + 24].try_into().unwrap(),
                ))?,
            });
            pos += ENTRY_SIZE;
        }

        let meta = StoreMeta::from_bytes(&bytes[pos..pos + StoreMeta::SIZE])?;
        Ok(Self { entries, meta })
    }

    /// Writes and (unless `unsafe_commits`) syncs the journal file.
    pub fn write(&self, path: &Path, sync: bool) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&self.to_bytes())?;
        if sync {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Loads a journal left behind by an interrupted commit.
    ///
    /// Returns `Ok(None)` when there is no journal or when the file is
    /// incomplete (the commit never reached its atomic point and is
    /// discarded).
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        match Self::from_bytes(&bytes) {
            Ok(journal) => Ok(Some(journal)),
            Err(e) => {
                debug!("discarding incomplete commit journal: {e}");
                Ok(None)
            }
        }
    }

    /// Removes a retired (or discarded) journal.
    pub fn remove(path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CommitJournal {
        let mut meta = StoreMeta::empty(32 * 1024, 6).unwrap();
        meta.inner_page_size = 16 * 1024;
        meta.page_count = 3;
        meta.change_counter = 1;
        CommitJournal {
            entries: vec![
                JournalEntry {
                    page_id: 1,
                    offset: 0,
                    len: 512,
                    codec: Codec::Zstd,
                },
                JournalEntry {
                    page_id: 3,
                    offset: 4096,
                    len: 16_384,
                    codec: Codec::Raw,
                },
            ],
            meta,
        }
    }

    #[test]
    fn journal_round_trip() {
        let journal = sample();
        assert_eq!(
            CommitJournal::from_bytes(&journal.to_bytes()).unwrap(),
            journal
        );
    }

    #[test]
    fn truncated_journal_is_discarded() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("commit");
        let journal = sample();
        journal.write(&path, true).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();
        assert!(CommitJournal::load(&path).unwrap().is_none());

        std::fs::write(&path, &bytes).unwrap();
        assert_eq!(CommitJournal::load(&path).unwrap(), Some(journal));
    }

    #[test]
    fn missing_journal_is_none() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(CommitJournal::load(&dir.path().join("commit")).unwrap().is_none());
        CommitJournal::remove(&dir.path().join("commit")).unwrap();
    }
}
