use std::{collections::BTreeMap, path::Path, sync::Arc};

use log::{debug, trace};

use crate::{
    CommitBatch, Error, MAX_THREADS, PageCache, PageStore, PageWrite, PrefetchSlots, Result,
    ScanDetector, StoreOptions, Task, Uri, WorkerPool, codec, default_threads, valid_page_size,
};

/// Name a host engine registers this VFS under.
pub const VFS_NAME: &str = "compressed";

/// Below this inner page size, read-ahead costs more than it saves and is
/// disabled unless forced.
pub const MIN_PREFETCH_PAGE_SIZE: usize = 16 * 1024;

const DEFAULT_CACHE_MIB: usize = 64;

/// File lock levels, in the host engine's escalation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockLevel {
    None,
    Shared,
    Reserved,
    Exclusive,
}

/// The file half of the VFS contract: page I/O at byte offsets, with
/// `sync` as the host transaction's commit point.
pub trait DatabaseFile: Send {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()>;
    fn truncate(&mut self, size: u64) -> Result<()>;
    fn sync(&mut self) -> Result<()>;
    fn file_size(&mut self) -> Result<u64>;
    fn lock(&mut self, level: LockLevel) -> Result<()>;
    fn unlock(&mut self, level: LockLevel) -> Result<()>;
}

/// The filesystem half of the VFS contract.
pub trait Vfs {
    type File: DatabaseFile;

    fn name(&self) -> &str;
    fn open(&self, uri: &str) -> Result<Self::File>;
    fn delete(&self, path: &Path) -> Result<()>;
    fn exists(&self, path: &Path) -> bool;
}

/// Options decoded from the connection URI's query parameters.
#[derive(Debug, Clone)]
pub struct VfsOptions {
    pub outer_page_size: usize,
    pub zstd_level: i32,
    /// Resolved worker count; 1 disables all background work.
    pub threads: usize,
    pub outer_unsafe: bool,
    pub immutable: bool,
    pub nolock: bool,
    pub noprefetch: bool,
    pub force_prefetch: bool,
    pub read_only: bool,
    pub cache_bytes: usize,
}

impl Default for VfsOptions {
    fn default() -> Self {
        Self {
            outer_page_size: 32 * 1024,
            zstd_level: codec::DEFAULT_ZSTD_LEVEL,
            threads: default_threads(),
            outer_unsafe: false,
            immutable: false,
            nolock: false,
            noprefetch: false,
            force_prefetch: false,
            read_only: false,
            cache_bytes: DEFAULT_CACHE_MIB << 20,
        }
    }
}

impl VfsOptions {
    pub fn from_uri(uri: &Uri) -> Result<Self> {
        let defaults = Self::default();
        let threads = match uri.get_i32("threads", -1)? {
            n @ 1.. => (n as usize).min(MAX_THREADS),
            _ => default_threads(),
        };
        let immutable = uri.get_bool("immutable", false)?;
        Ok(Self {
            outer_page_size: uri.get_usize("outer_page_size", defaults.outer_page_size)?,
            zstd_level: uri.get_i32("level", defaults.zstd_level)?,
            threads,
            outer_unsafe: uri.get_bool("outer_unsafe", false)?,
            immutable,
            nolock: uri.get_bool("nolock", false)? || immutable,
            noprefetch: uri.get_bool("noprefetch", false)?,
            force_prefetch: uri.get_bool("force_prefetch", false)?,
            read_only: immutable || uri.get("mode") == Some("ro"),
            cache_bytes: uri.get_usize("outer_cache_MiB", DEFAULT_CACHE_MIB)? << 20,
        })
    }
}

/// The compressed-store VFS: yields [`CompressedFile`] handles backed by a
/// [`PageStore`] directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompressedVfs;

impl Vfs for CompressedVfs {
    type File = CompressedFile;

    fn name(&self) -> &str {
        VFS_NAME
    }

    fn open(&self, uri: &str) -> Result<CompressedFile> {
        let uri = Uri::parse(uri)?;
        let opts = VfsOptions::from_uri(&uri)?;
        CompressedFile::open(uri.path(), &opts)
    }

    fn delete(&self, path: &Path) -> Result<()> {
        match std::fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        path.join("meta").exists()
    }
}

/// One open handle on a compressed database file.
///
/// Reads resolve dirty pages, then the hot cache, then prefetch slots,
/// then the store itself. Writes gather in the dirty set; `sync` encodes
/// them (on the worker pool when one exists) and commits a single outer
/// batch, which is the only durability mechanism the inner database has.
pub struct CompressedFile {
    store: PageStore,
    opts: VfsOptions,
    /// Fixed by `meta`, or inferred from the first full-page write.
    page_size: Option<usize>,
    /// Logical page count including uncommitted growth and truncation.
    page_count: u64,
    dirty: BTreeMap<u64, Vec<u8>>,
    cache: PageCache,
    pool: Option<WorkerPool>,
    slots: PrefetchSlots,
    scan: ScanDetector,
    lock_level: LockLevel,
}

impl CompressedFile {
    pub fn open(path: &Path, opts: &VfsOptions) -> Result<Self> {
        let store = PageStore::open(
            path,
            &StoreOptions {
                read_only: opts.read_only,
                nolock: opts.nolock,
                outer_page_size: opts.outer_page_size,
                zstd_level: opts.zstd_level,
                unsafe_commits: opts.outer_unsafe,
            },
        )?;

        let page_size = match store.inner_page_size() {
            0 => None,
            size => Some(size),
        };
        let page_count = store.page_count();
        let cache = PageCache::new(
            opts.cache_bytes,
            page_size.unwrap_or(MIN_PREFETCH_PAGE_SIZE),
        );
        let pool = (opts.threads >= 2).then(|| WorkerPool::new(opts.threads));

        debug!(
            "{store}: handle opened ({page_count} pages, {} threads)",
            opts.threads
        );
        Ok(Self {
            store,
            opts: opts.clone(),
            page_size,
            page_count,
            dirty: BTreeMap::new(),
            cache,
            pool,
            slots: PrefetchSlots::new(),
            scan: ScanDetector::default(),
            lock_level: LockLevel::None,
        })
    }

    /// Borrow of the backing store, for inspection tooling.
    pub fn store(&self) -> &PageStore {
        &self.store
    }

    fn prefetch_active(&self) -> bool {
        if self.pool.is_none() || self.opts.noprefetch {
            return false;
        }
        self.page_size
            .is_some_and(|pi| pi >= MIN_PREFETCH_PAGE_SIZE || self.opts.force_prefetch)
    }

    /// Copies `buf.len()` bytes out of one page, starting `k` bytes in.
    fn read_span(&mut self, page_id: u64, k: usize, buf: &mut [u8]) -> Result<()> {
        if let Some(plain) = self.dirty.get(&page_id) {
            buf.copy_from_slice(&plain[k..k + buf.len()]);
            return Ok(());
        }
        if page_id > self.page_count || page_id > self.store.page_count() {
            // Past the (possibly uncommitted) logical end, or a logical
            // page the host never wrote: reads as zeros, like a sparse
            // file. An uncommitted truncate must never surface stale
            // store pages.
            buf.fill(0);
            return Ok(());
        }

        let ahead = self.scan.observe(page_id);

        let page = if let Some(page) = self.cache.get(page_id) {
            page
        } else if let Some(result) = self.slots.await_page(page_id) {
            let page = result?;
            self.cache.insert(page_id, Arc::clone(&page));
            page
        } else {
            let mut plain = Vec::new();
            self.store.read_page(page_id, &mut plain)?;
            let page: Arc<[u8]> = Arc::from(plain.into_boxed_slice());
            self.cache.insert(page_id, Arc::clone(&page));
            page
        };

        buf.copy_from_slice(&page[k..k + buf.len()]);
        self.schedule_prefetch(page_id, ahead);
        Ok(())
    }

    fn schedule_prefetch(&mut self, page_id: u64, ahead: usize) {
        if ahead == 0 || !self.prefetch_active() {
            return;
        }
        let Some(pool) = &self.pool else { return };

        let limit = self.store.page_count().min(self.page_count);
        let mut scheduled = 0;
        for next in page_id + 1..=(page_id + ahead as u64).min(limit) {
            if self.dirty.contains_key(&next) || self.cache.contains(next) {
                continue;
            }
            let Some(generation) = self.slots.begin(next) else {
                continue;
            };
            let task = Task::Prefetch {
                page_id: next,
                generation,
                store: self.store.clone(),
                slots: self.slots.clone(),
            };
            if let Err(task) = pool.try_submit(task) {
                // Queue saturated; the workers are already busy enough.
                task.discard();
                break;
            }
            scheduled += 1;
        }
        if scheduled > 0 {
            trace!("{}: prefetching {scheduled} pages after {page_id}", self.store);
        }
    }
}

impl DatabaseFile for CompressedFile {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let Some(page_size) = self.page_size else {
            // Nothing was ever written; the host is probing an empty file.
            buf.fill(0);
            return Ok(());
        };

        let mut pos = 0usize;
        while pos < buf.len() {
            let at = offset as usize + pos;
            let page_id = (at / page_size) as u64 + 1;
            let k = at % page_size;
            let n = (page_size - k).min(buf.len() - pos);
            self.read_span(page_id, k, &mut buf[pos..pos + n])?;
            pos += n;
        }
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        if self.opts.read_only {
            return Err(Error::ReadOnly(self.store.to_string()));
        }

        let page_size = match self.page_size {
            Some(size) => size,
            None => {
                // The first write fixes the inner page size: host engines
                // write page 1 in full before anything else.
                if offset != 0 || !valid_page_size(data.len()) {
                    return Err(Error::UnalignedWrite {
                        offset,
                        page_size: data.len(),
                    });
                }
                self.page_size = Some(data.len());
                data.len()
            }
        };

        let mut pos = 0usize;
        while pos < data.len() {
            let at = offset as usize + pos;
            let page_id = (at / page_size) as u64 + 1;
            let k = at % page_size;
            let n = (page_size - k).min(data.len() - pos);

            if k == 0 && n == page_size {
                self.dirty.insert(page_id, data[pos..pos + n].to_vec());
            } else {
                // Sub-page write: read-modify-write against current content.
                let mut page = vec![0u8; page_size];
                let grown = page_id > self.page_count;
                if !grown {
                    self.read_span(page_id, 0, &mut page)?;
                }
                page[k..k + n].copy_from_slice(&data[pos..pos + n]);
                self.dirty.insert(page_id, page);
            }
            self.cache.remove(page_id);
            self.page_count = self.page_count.max(page_id);
            pos += n;
        }
        Ok(())
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        if self.opts.read_only {
            return Err(Error::ReadOnly(self.store.to_string()));
        }
        let Some(page_size) = self.page_size else {
            return Ok(());
        };
        if size % page_size as u64 != 0 {
            return Err(Error::UnalignedWrite {
                offset: size,
                page_size,
            });
        }

        let count = size / page_size as u64;
        trace!("{}: truncate to {count} pages", self.store);
        self.page_count = count;
        self.dirty.retain(|&page_id, _| page_id <= count);
        self.cache.truncate_beyond(count);
        self.slots.invalidate();
        self.scan.reset();
        Ok(())
    }

    /// The host engine's commit point: encode every dirty page and apply
    /// one atomic batch to the outer store.
    fn sync(&mut self) -> Result<()> {
        let Some(page_size) = self.page_size else {
            return Ok(());
        };
        if self.dirty.is_empty() && self.page_count == self.store.page_count() {
            return Ok(());
        }

        let level = self.opts.zstd_level;
        let pages: Vec<(u64, Vec<u8>)> = std::mem::take(&mut self.dirty).into_iter().collect();
        let encoded = match &self.pool {
            Some(pool) => pool.compress_batch(pages, level)?,
            None => {
                let mut encoded = Vec::with_capacity(pages.len());
                for (page_id, plain) in pages {
                    let (codec, payload) = codec::encode_page(&plain, level)?;
                    encoded.push((page_id, codec, payload));
                }
                encoded
            }
        };

        let writes = encoded
            .into_iter()
            .map(|(page_id, codec, payload)| PageWrite {
                page_id,
                codec,
                payload,
            })
            .collect();

        self.store.commit(CommitBatch {
            inner_page_size: page_size,
            page_count: self.page_count,
            writes,
        })?;

        // Read-ahead fetched before the commit must never surface now.
        self.slots.invalidate();
        Ok(())
    }

    fn file_size(&mut self) -> Result<u64> {
        match self.page_size {
            Some(page_size) => Ok(self.page_count * page_size as u64),
            None => Ok(0),
        }
    }

    fn lock(&mut self, level: LockLevel) -> Result<()> {
        if level >= LockLevel::Reserved && self.opts.read_only {
            return Err(Error::ReadOnly(self.store.to_string()));
        }
        // Cross-process exclusion is held by the store's file lock for the
        // whole handle lifetime; levels only track the host's state machine.
        if level > self.lock_level {
            self.lock_level = level;
        }
        Ok(())
    }

    fn unlock(&mut self, level: LockLevel) -> Result<()> {
        if level < self.lock_level {
            self.lock_level = level;
        }
        Ok(())
    }
}

impl Drop for CompressedFile {
    fn drop(&mut self) {
        // Dropping the pool sets its stop flag and joins the workers;
        // anything still queued is discarded at their next check.
        self.pool.take();
        if !self.dirty.is_empty() {
            debug!(
                "{}: handle closed with {} uncommitted pages (rolled back)",
                self.store,
                self.dirty.len()
            );
        }
    }
}

/// Resolves the effective worker-thread count the way the facade's
/// `threads` option documents: explicit positive counts are capped, and
/// anything else means "auto".
pub fn resolve_threads(threads: i32) -> usize {
    match threads {
        n @ 1.. => (n as usize).min(MAX_THREADS),
        _ => default_threads(),
    }
}
