use std::{
    fmt,
    fs::{File, OpenOptions},
    io::ErrorKind,
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, trace};
use memmap2::Mmap;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use crate::{
    Codec, CommitJournal, DEFAULT_ZSTD_LEVEL, Error, JournalEntry, Layout, Result, StoreMeta,
    codec, valid_page_size,
};

const RECORD_SIZE: usize = 16;

/// One record of the `pages` table: where a page's payload lives in the
/// data heap. `len == 0` means the page has no payload and reads as zeros.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageRecord {
    pub offset: u64,
    pub len: u32,
    pub codec: u32,
}

impl PageRecord {
    #[inline]
    fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn to_bytes(self) -> [u8; RECORD_SIZE] {
        let mut bytes = [0u8; RECORD_SIZE];
        bytes[0..8].copy_from_slice(&self.offset.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.len.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.codec.to_le_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            offset: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            len: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            codec: u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
        }
    }
}

/// Options for opening a [`PageStore`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub read_only: bool,
    /// Skip the OS file lock entirely (web-served or snapshot stores).
    pub nolock: bool,
    /// Allocation and growth quantum of the data heap.
    pub outer_page_size: usize,
    /// zstd level for payloads written by this handle.
    pub zstd_level: i32,
    /// Skip all fsyncs during commit. A crash may corrupt the store.
    pub unsafe_commits: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            nolock: false,
            outer_page_size: 32 * 1024,
            zstd_level: DEFAULT_ZSTD_LEVEL,
            unsafe_commits: false,
        }
    }
}

/// One page rewrite within a [`CommitBatch`], already encoded.
#[derive(Debug)]
pub struct PageWrite {
    pub page_id: u64,
    pub codec: Codec,
    pub payload: Vec<u8>,
}

/// An atomic update of the store: full-page rewrites plus the new logical
/// page count (growth and truncation are both just a different count).
#[derive(Debug)]
pub struct CommitBatch {
    pub inner_page_size: usize,
    pub page_count: u64,
    pub writes: Vec<PageWrite>,
}

/// Compressed page store: the "outer database" beneath a host engine.
///
/// A store is a directory holding the payload heap (`data`), the `pages`
/// table (`table`), the `meta` block (`meta`) and, transiently, a commit
/// journal (`commit`). All mutation goes through [`PageStore::commit`],
/// whose journal makes each batch atomic across crashes.
#[derive(Debug, Clone)]
#[must_use = "PageStore should be stored to keep the store open"]
pub struct PageStore(Arc<StoreInner>);

/// # Lock Ordering
///
/// To prevent deadlocks, locks must always be acquired in this order:
///
/// ```text
/// 1. layout      (heap allocation)
/// 2. table       (in-memory pages table)
/// 3. mmap        (read mapping of the data heap)
/// 4. data        (data file handle)
/// 5. meta        (store metadata)
/// ```
#[derive(Debug)]
struct StoreInner {
    path: PathBuf,
    name: String,
    read_only: bool,
    unsafe_commits: bool,
    layout: Mutex<Layout>,
    table: RwLock<Vec<PageRecord>>,
    mmap: RwLock<Mmap>,
    data: RwLock<File>,
    meta: RwLock<StoreMeta>,
}

impl PageStore {
    /// Opens or creates a store at the given directory.
    pub fn open(path: &Path, opts: &StoreOptions) -> Result<Self> {
        if !valid_page_size(opts.outer_page_size) {
            return Err(Error::BadPageSize {
                bytes: opts.outer_page_size,
            });
        }

        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        if !opts.read_only {
            std::fs::create_dir_all(path)?;
        }

        let data = OpenOptions::new()
            .read(true)
            .write(!opts.read_only)
            .create(!opts.read_only)
            .truncate(false)
            .open(Self::data_path_from(path))?;

        if !opts.nolock {
            if opts.read_only {
                data.try_lock_shared()?;
            } else {
                data.try_lock()?;
            }
        }

        let journal_path = Self::journal_path_from(path);
        let journal = CommitJournal::load(&journal_path)?;
        if !opts.read_only {
            if let Some(journal) = &journal {
                debug!(
                    "{name}: recovering interrupted commit ({} pages)",
                    journal.entries.len()
                );
                Self::apply_journal_files(path, journal, true)?;
            }
            // Valid journals are retired after replay; torn ones are dead
            // weight either way.
            CommitJournal::remove(&journal_path)?;
        }

        let mut meta = match std::fs::read(Self::meta_path_from(path)) {
            Ok(bytes) => StoreMeta::from_bytes(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound && !opts.read_only => {
                let meta = StoreMeta::empty(opts.outer_page_size, opts.zstd_level)?;
                Self::write_meta_file(path, &meta, true)?;
                meta
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::CorruptMeta("store has no meta block".to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        // The stored geometry wins; the level applies to this handle's writes.
        meta.zstd_level = opts.zstd_level;

        let mut table = Self::load_table(path, meta.page_count)?;

        // A read-only handle cannot retire a pending journal, but its
        // staged state is durable; overlay it in memory instead.
        if opts.read_only
            && let Some(journal) = journal
        {
            meta = journal.meta;
            table.resize(meta.page_count as usize, PageRecord::default());
            for entry in &journal.entries {
                table[entry.page_id as usize - 1] = PageRecord {
                    offset: entry.offset,
                    len: entry.len,
                    codec: entry.codec as u32,
                };
            }
        }

        if !opts.read_only {
            let min_len = opts.outer_page_size as u64;
            if data.metadata()?.len() < min_len {
                data.set_len(min_len)?;
                data.sync_all()?;
            }
        }

        let layout = Layout::from_extents(
            table
                .iter()
                .filter(|r| !r.is_empty())
                .map(|r| (r.offset, r.len as u64))
                .collect(),
        );

        let mmap = unsafe { Mmap::map(&data)? };

        let store = Self(Arc::new(StoreInner {
            path: path.to_owned(),
            name,
            read_only: opts.read_only,
            unsafe_commits: opts.unsafe_commits,
            layout: Mutex::new(layout),
            table: RwLock::new(table),
            mmap: RwLock::new(mmap),
            data: RwLock::new(data),
            meta: RwLock::new(meta),
        }));

        debug!("{store}: opened with {} pages", store.page_count());
        Ok(store)
    }

    /// Reads and decodes one page into `buf` (exactly the inner page size).
    pub fn read_page(&self, page_id: u64, buf: &mut Vec<u8>) -> Result<()> {
        let (page_count, page_size) = {
            let meta = self.meta();
            (meta.page_count, meta.inner_page_size)
        };
        if page_id == 0 || page_id > page_count {
            return Err(Error::PageOutOfBounds {
                page_id,
                page_count,
            });
        }

        let record = self.0.table.read()[page_id as usize - 1];
        if record.is_empty() {
            buf.clear();
            buf.resize(page_size, 0);
            return Ok(());
        }

        let mmap = self.0.mmap.read();
        let start = record.offset as usize;
        let end = start + record.len as usize;
        if end > mmap.len() {
            return Err(Error::CorruptMeta(format!(
                "page {page_id} extent {start}..{end} beyond heap of {} bytes",
                mmap.len()
            )));
        }

        *buf = codec::decode_page(
            page_id,
            Codec::from_u32(record.codec)?,
            &mmap[start..end],
            page_size,
        )?;
        Ok(())
    }

    /// Reads and decodes one page into an owned buffer without touching the
    /// mmap lock; safe to call from background workers.
    pub fn read_page_owned(&self, page_id: u64) -> Result<Vec<u8>> {
        let (page_count, page_size) = {
            let meta = self.meta();
            (meta.page_count, meta.inner_page_size)
        };
        if page_id == 0 || page_id > page_count {
            return Err(Error::PageOutOfBounds {
                page_id,
                page_count,
            });
        }

        let record = self.0.table.read()[page_id as usize - 1];
        if record.is_empty() {
            return Ok(vec![0; page_size]);
        }

        let mut payload = vec![0u8; record.len as usize];
        self.0.data.read().read_exact_at(&mut payload, record.offset)?;
        codec::decode_page(page_id, Codec::from_u32(record.codec)?, &payload, page_size)
    }

    /// Applies one atomic batch: payloads go to fresh heap extents, then a
    /// checksummed journal flips the `pages` table and `meta` together.
    pub fn commit(&self, batch: CommitBatch) -> Result<()> {
        if self.0.read_only {
            return Err(Error::ReadOnly(self.0.name.clone()));
        }
        if !valid_page_size(batch.inner_page_size) {
            return Err(Error::BadPageSize {
                bytes: batch.inner_page_size,
            });
        }

        let result = self.commit_inner(batch);
        if result.is_err() {
            // Allocation state may be ahead of the (unchanged) table;
            // rebuild it from the live records.
            let mut layout = self.0.layout.lock();
            *layout = Layout::from_extents(
                self.0
                    .table
                    .read()
                    .iter()
                    .filter(|r| !r.is_empty())
                    .map(|r| (r.offset, r.len as u64))
                    .collect(),
            );
        }
        result
    }

    fn commit_inner(&self, mut batch: CommitBatch) -> Result<()> {
        let mut meta = *self.meta();
        if meta.inner_page_size == 0 {
            meta.inner_page_size = batch.inner_page_size;
        } else if meta.inner_page_size != batch.inner_page_size {
            return Err(Error::Internal(format!(
                "commit with page size {} against a {}-byte-page store",
                batch.inner_page_size, meta.inner_page_size
            )));
        }

        batch.writes.sort_by_key(|w| w.page_id);
        for pair in batch.writes.windows(2) {
            if pair[0].page_id == pair[1].page_id {
                return Err(Error::Internal(format!(
                    "duplicate page {} in commit batch",
                    pair[0].page_id
                )));
            }
        }
        if let Some(last) = batch.writes.last()
            && last.page_id > batch.page_count
        {
            return Err(Error::PageOutOfBounds {
                page_id: last.page_id,
                page_count: batch.page_count,
            });
        }
        if batch.writes.iter().any(|w| w.page_id == 0) {
            return Err(Error::Internal("page ids are 1-based".to_string()));
        }

        trace!(
            "{self}: commit of {} pages, count {} -> {}",
            batch.writes.len(),
            meta.page_count,
            batch.page_count
        );

        // Phase 1: allocate fresh extents; free replaced and truncated ones
        // (pending until the journal is retired).
        let mut layout = self.0.layout.lock();
        let entries: Vec<JournalEntry> = {
            let table = self.0.table.read();
            for write in &batch.writes {
                if let Some(old) = table.get(write.page_id as usize - 1)
                    && !old.is_empty()
                {
                    layout.free(old.offset, old.len as u64);
                }
            }
            for old in table.iter().skip(batch.page_count as usize) {
                if !old.is_empty() {
                    layout.free(old.offset, old.len as u64);
                }
            }
            batch
                .writes
                .iter()
                .map(|w| JournalEntry {
                    page_id: w.page_id,
                    offset: layout.alloc(w.payload.len() as u64),
                    len: w.payload.len() as u32,
                    codec: w.codec,
                })
                .collect()
        };

        // Phase 2: grow the heap if needed (quantized to the outer page
        // size), remapping for readers.
        let need = layout.end();
        {
            let data = self.0.data.read();
            let current = data.metadata()?.len();
            if need > current {
                let quantum = meta.outer_page_size as u64;
                let target = need.div_ceil(quantum) * quantum;
                drop(data);
                let mut mmap = self.0.mmap.write();
                let data = self.0.data.write();
                data.set_len(target)?;
                *mmap = unsafe { Mmap::map(&*data)? };
            }
        }

        // Phase 3: payloads into their extents, then make them durable.
        {
            let data = self.0.data.read();
            for (write, entry) in batch.writes.iter().zip(&entries) {
                data.write_all_at(&write.payload, entry.offset)?;
            }
            if !self.0.unsafe_commits {
                data.sync_data()?;
            }
        }

        // Phase 4: the journal write is the commit point. The in-memory
        // view flips immediately after; everything later is housekeeping
        // that recovery would redo from the journal anyway.
        meta.page_count = batch.page_count;
        meta.change_counter += 1;
        let journal = CommitJournal { entries, meta };
        let journal_path = self.journal_path();
        journal.write(&journal_path, !self.0.unsafe_commits)?;

        {
            let mut table = self.0.table.write();
            table.resize(batch.page_count as usize, PageRecord::default());
            for entry in &journal.entries {
                table[entry.page_id as usize - 1] = PageRecord {
                    offset: entry.offset,
                    len: entry.len,
                    codec: entry.codec as u32,
                };
            }
        }
        *self.0.meta.write() = meta;

        // Phase 5: apply to the pages table and meta block, retire the
        // journal, and only then recycle freed extents.
        Self::apply_journal_files(&self.0.path, &journal, !self.0.unsafe_commits)?;
        CommitJournal::remove(&journal_path)?;
        layout.promote_pending();

        debug!(
            "{self}: committed {} pages, count {}, change {}",
            batch.writes.len(),
            meta.page_count,
            meta.change_counter
        );
        Ok(())
    }

    fn apply_journal_files(path: &Path, journal: &CommitJournal, sync: bool) -> Result<()> {
        let table_file = Self::open_table_file(path, false)?;
        for entry in &journal.entries {
            let record = PageRecord {
                offset: entry.offset,
                len: entry.len,
                codec: entry.codec as u32,
            };
            table_file.write_all_at(&record.to_bytes(), (entry.page_id - 1) * RECORD_SIZE as u64)?;
        }
        table_file.set_len(journal.meta.page_count * RECORD_SIZE as u64)?;
        if sync {
            table_file.sync_all()?;
        }
        Self::write_meta_file(path, &journal.meta, sync)
    }

    fn write_meta_file(path: &Path, meta: &StoreMeta, sync: bool) -> Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(Self::meta_path_from(path))?;
        file.write_all_at(&meta.to_bytes(), 0)?;
        file.set_len(StoreMeta::SIZE as u64)?;
        if sync {
            file.sync_all()?;
        }
        Ok(())
    }

    fn open_table_file(path: &Path, read_only: bool) -> Result<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(!read_only)
            .truncate(false)
            .open(Self::table_path_from(path))?)
    }

    fn load_table(path: &Path, page_count: u64) -> Result<Vec<PageRecord>> {
        let bytes = match std::fs::read(Self::table_path_from(path)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        if bytes.len() < page_count as usize * RECORD_SIZE {
            return Err(Error::CorruptMeta(format!(
                "pages table holds {} records, meta says {page_count}",
                bytes.len() / RECORD_SIZE
            )));
        }
        Ok(bytes[..page_count as usize * RECORD_SIZE]
            .chunks_exact(RECORD_SIZE)
            .map(PageRecord::from_bytes)
            .collect())
    }

    /// Current logical page count.
    #[inline]
    pub fn page_count(&self) -> u64 {
        self.meta().page_count
    }

    /// Inner page size, or 0 for a store that has never committed.
    #[inline]
    pub fn inner_page_size(&self) -> usize {
        self.meta().inner_page_size
    }

    #[inline]
    pub fn outer_page_size(&self) -> usize {
        self.meta().outer_page_size
    }

    #[inline]
    pub fn zstd_level(&self) -> i32 {
        self.meta().zstd_level
    }

    /// Bumped by every commit; cache-invalidation key for layers above.
    #[inline]
    pub fn change_counter(&self) -> u64 {
        self.meta().change_counter
    }

    #[inline]
    pub fn read_only(&self) -> bool {
        self.0.read_only
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.0.path
    }

    /// Inspection view of the `pages` table, one record per page id.
    pub fn pages_dump(&self) -> Vec<(u64, PageRecord)> {
        self.0
            .table
            .read()
            .iter()
            .enumerate()
            .map(|(i, r)| (i as u64 + 1, *r))
            .collect()
    }

    #[inline]
    fn meta(&self) -> RwLockReadGuard<'_, StoreMeta> {
        self.0.meta.read()
    }

    #[inline]
    fn journal_path(&self) -> PathBuf {
        Self::journal_path_from(&self.0.path)
    }

    fn data_path_from(path: &Path) -> PathBuf {
        path.join("data")
    }
    fn table_path_from(path: &Path) -> PathBuf {
        path.join("table")
    }
    fn meta_path_from(path: &Path) -> PathBuf {
        path.join("meta")
    }
    pub(crate) fn journal_path_from(path: &Path) -> PathBuf {
        path.join("commit")
    }
}

impl fmt::Display for PageStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.name)
    }
}
