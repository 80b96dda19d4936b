use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use crossbeam_channel::{Receiver, Sender, bounded};
use log::{debug, trace};

use crate::{Codec, Error, PageStore, PrefetchSlots, Result, codec};

/// Hard cap on worker threads, matching the facade's `threads` option.
pub const MAX_THREADS: usize = 8;

/// Default worker count: available parallelism, capped at [`MAX_THREADS`].
pub fn default_threads() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_THREADS)
}

/// A unit of background work. Both kinds are pure computation over owned
/// buffers; all store state transitions stay on the main thread.
pub enum Task {
    Compress {
        page_id: u64,
        plain: Vec<u8>,
        level: i32,
        reply: Sender<(u64, Result<(Codec, Vec<u8>)>)>,
    },
    Prefetch {
        page_id: u64,
        generation: u64,
        store: PageStore,
        slots: PrefetchSlots,
    },
}

impl Task {
    fn run(self) {
        match self {
            Self::Compress {
                page_id,
                plain,
                level,
                reply,
            } => {
                let result = codec::encode_page(&plain, level);
                let _ = reply.send((page_id, result));
            }
            Self::Prefetch {
                page_id,
                generation,
                store,
                slots,
            } => match store.read_page_owned(page_id) {
                Ok(buf) => slots.fulfill(page_id, generation, Arc::from(buf.into_boxed_slice())),
                Err(error) => slots.fail(page_id, generation, error),
            },
        }
    }

    /// Observed-stop path: unblock whoever is waiting on this task.
    pub(crate) fn discard(self) {
        match self {
            Self::Compress { reply, .. } => drop(reply),
            Self::Prefetch {
                page_id, generation, slots, ..
            } => slots.discard(page_id, generation),
        }
    }
}

/// Fixed pool of compression/prefetch workers fed by one bounded queue.
///
/// Workers check the shared stop flag between tasks and discard whatever
/// is still queued once it is set, so closing a handle never waits for
/// read-ahead it no longer wants.
pub struct WorkerPool {
    tx: Sender<Task>,
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Self {
        debug_assert!(threads >= 2, "a 1-thread configuration disables the pool");
        let (tx, rx) = bounded::<Task>(threads * 4);
        let stop = Arc::new(AtomicBool::new(false));

        let handles = (0..threads)
            .map(|i| {
                let rx = rx.clone();
                let stop = Arc::clone(&stop);
                thread::Builder::new()
                    .name(format!("pagedb-worker-{i}"))
                    .spawn(move || worker_loop(rx, stop))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        debug!("worker pool started with {threads} threads");
        Self { tx, stop, handles }
    }

    pub fn submit(&self, task: Task) -> Result<()> {
        self.tx
            .send(task)
            .map_err(|_| Error::Internal("worker pool is shut down".to_string()))
    }

    /// Non-blocking submit for read-ahead; a full queue just means the
    /// workers are saturated and the caller should stop scheduling.
    pub fn try_submit(&self, task: Task) -> std::result::Result<(), Task> {
        self.tx.try_send(task).map_err(|e| e.into_inner())
    }

    /// Fans a commit's dirty pages out to the workers and gathers the
    /// encoded payloads. Incomplete results (shutdown raced the batch)
    /// surface as `Cancelled`.
    pub fn compress_batch(
        &self,
        pages: Vec<(u64, Vec<u8>)>,
        level: i32,
    ) -> Result<Vec<(u64, Codec, Vec<u8>)>> {
        let n = pages.len();
        // Replies are buffered to the batch size so workers never block.
        let (reply, results) = bounded(n);
        for (page_id, plain) in pages {
            self.submit(Task::Compress {
                page_id,
                plain,
                level,
                reply: reply.clone(),
            })?;
        }
        drop(reply);

        let mut out = Vec::with_capacity(n);
        for (page_id, result) in results.iter() {
            let (codec, payload) = result?;
            out.push((page_id, codec, payload));
        }
        if out.len() != n {
            return Err(Error::Cancelled);
        }
        Ok(out)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // Hang up the queue; workers drain, discarding remaining tasks.
        let (tx, _) = bounded(0);
        drop(std::mem::replace(&mut self.tx, tx));
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        trace!("worker pool shut down");
    }
}

fn worker_loop(rx: Receiver<Task>, stop: Arc<AtomicBool>) {
    while let Ok(task) = rx.recv() {
        if stop.load(Ordering::Relaxed) {
            task.discard();
            continue;
        }
        task.run();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compress_batch_round_trips() {
        let pool = WorkerPool::new(4);
        let pages: Vec<(u64, Vec<u8>)> = (1..=32u64)
            .map(|id| (id, vec![id as u8; 4096]))
            .collect();

        let mut encoded = pool.compress_batch(pages, 3).unwrap();
        encoded.sort_by_key(|(id, _, _)| *id);
        assert_eq!(encoded.len(), 32);
        for (id, codec, payload) in encoded {
            let plain = codec::decode_page(id, codec, &payload, 4096).unwrap();
            assert_eq!(plain, vec![id as u8; 4096]);
        }
    }

    #[test]
    fn shutdown_joins_workers() {
        let pool = WorkerPool::new(2);
        drop(pool);
    }
}
