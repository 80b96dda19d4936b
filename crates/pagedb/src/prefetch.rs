use std::{collections::HashMap, sync::Arc};

use log::trace;
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;

use crate::{Error, Result};

/// Reads observed before the handle is considered to be scanning.
const SEQ_WINDOW: usize = 4;
/// Read-ahead batch bounds (pages).
const MIN_BATCH: usize = 4;
const MAX_BATCH: usize = 64;

/// Detects sequential scans from the stream of page reads.
///
/// A monotone run of contiguous page ids marks the handle as scanning;
/// the read-ahead batch doubles while the run continues and collapses on
/// the first random access.
#[derive(Debug, Default)]
pub struct ScanDetector {
    window: SmallVec<[u64; SEQ_WINDOW]>,
    batch: usize,
}

impl ScanDetector {
    /// Records a read of `page_id`; returns how many pages to read ahead.
    pub fn observe(&mut self, page_id: u64) -> usize {
        if self.window.len() == SEQ_WINDOW {
            self.window.remove(0);
        }
        self.window.push(page_id);

        let sequential = self.window.len() == SEQ_WINDOW
            && self.window.windows(2).all(|pair| pair[1] == pair[0] + 1);

        if sequential {
            self.batch = (self.batch * 2).clamp(MIN_BATCH, MAX_BATCH);
            self.batch
        } else {
            let warming =
                self.window.len() >= 2 && self.window[self.window.len() - 2] + 1 == page_id;
            if !warming {
                self.batch = 0;
            }
            0
        }
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.batch = 0;
    }
}

#[derive(Debug)]
enum SlotState {
    Pending,
    Ready(Arc<[u8]>),
    Failed(Error),
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    state: SlotState,
}

#[derive(Debug, Default)]
struct SlotsMap {
    current_gen: u64,
    map: HashMap<u64, Slot>,
}

/// Slots the prefetch workers decompress into.
///
/// Every slot carries the generation it was claimed under. A commit or
/// truncate bumps the generation, so a worker that fetched a payload
/// before the store changed can never hand its stale buffer to a reader:
/// its fulfill lands on a mismatched generation and evaporates.
#[derive(Debug, Default, Clone)]
pub struct PrefetchSlots(Arc<SlotsInner>);

#[derive(Debug, Default)]
struct SlotsInner {
    state: Mutex<SlotsMap>,
    ready: Condvar,
}

impl PrefetchSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the page id for a worker, returning the generation token the
    /// worker must present back. `None` if the page is already in flight.
    pub fn begin(&self, page_id: u64) -> Option<u64> {
        let mut slots = self.0.state.lock();
        if slots.map.contains_key(&page_id) {
            return None;
        }
        let generation = slots.current_gen;
        slots.map.insert(
            page_id,
            Slot {
                generation,
                state: SlotState::Pending,
            },
        );
        Some(generation)
    }

    pub fn fulfill(&self, page_id: u64, generation: u64, buf: Arc<[u8]>) {
        self.finish(page_id, generation, SlotState::Ready(buf));
    }

    pub fn fail(&self, page_id: u64, generation: u64, error: Error) {
        self.finish(page_id, generation, SlotState::Failed(error));
    }

    fn finish(&self, page_id: u64, generation: u64, state: SlotState) {
        let mut slots = self.0.state.lock();
        let current_gen = slots.current_gen;
        match slots.map.get_mut(&page_id) {
            Some(slot) if slot.generation == generation => {
                if generation == current_gen {
                    slot.state = state;
                } else {
                    slots.map.remove(&page_id);
                }
            }
            _ => return,
        }
        self.0.ready.notify_all();
    }

    /// A worker dropped the task unprocessed (shutdown); wake any waiter so
    /// it can fall back to a direct read.
    pub fn discard(&self, page_id: u64, generation: u64) {
        let mut slots = self.0.state.lock();
        if let Some(slot) = slots.map.get(&page_id)
            && slot.generation == generation
        {
            slots.map.remove(&page_id);
            self.0.ready.notify_all();
        }
    }

    /// True if the page is in flight or ready under the current generation.
    pub fn knows(&self, page_id: u64) -> bool {
        let slots = self.0.state.lock();
        slots
            .map
            .get(&page_id)
            .is_some_and(|slot| slot.generation == slots.current_gen)
    }

    /// Takes the finished buffer for `page_id`, blocking while a worker is
    /// still on it. `None` means nobody (any longer) works on the page and
    /// the caller should read directly.
    pub fn await_page(&self, page_id: u64) -> Option<Result<Arc<[u8]>>> {
        let mut slots = self.0.state.lock();
        loop {
            match slots.map.get(&page_id) {
                Some(slot) if slot.generation != slots.current_gen => return None,
                Some(Slot {
                    state: SlotState::Pending,
                    ..
                }) => {}
                Some(_) => break,
                None => return None,
            }
            trace!("waiting on prefetch of page {page_id}");
            self.0.ready.wait(&mut slots);
        }
        match slots.map.remove(&page_id) {
            Some(Slot {
                state: SlotState::Ready(buf),
                ..
            }) => Some(Ok(buf)),
            Some(Slot {
                state: SlotState::Failed(error),
                ..
            }) => Some(Err(error)),
            _ => None,
        }
    }

    /// Invalidates every slot: finished buffers are dropped, and workers
    /// still pending will find their generation stale when they report in.
    pub fn invalidate(&self) {
        let mut slots = self.0.state.lock();
        slots.current_gen += 1;
        slots
            .map
            .retain(|_, slot| matches!(slot.state, SlotState::Pending));
        self.0.ready.notify_all();
    }
}
