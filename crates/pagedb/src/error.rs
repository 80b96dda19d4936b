use std::{fs, io, result};

use thiserror::Error;

pub type Result<T, E = Error> = result::Result<T, E>;

/// Error types for pagedb operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("Store is locked by another process")]
    TryLock(#[from] fs::TryLockError),

    #[error("Unsupported page size {bytes} (expected 1/2/4/8/16/32/64 KiB)")]
    BadPageSize { bytes: usize },

    #[error("Page {page_id} failed to decode: {detail}")]
    CorruptPage { page_id: u64, detail: String },

    #[error("Page {page_id} decoded to {actual} bytes, expected {expected}")]
    PageLengthMismatch {
        page_id: u64,
        expected: usize,
        actual: usize,
    },

    #[error("Page {page_id} is beyond the store's page count {page_count}")]
    PageOutOfBounds { page_id: u64, page_count: u64 },

    #[error("Write at offset {offset} does not fit the {page_size}-byte page grid")]
    UnalignedWrite { offset: u64, page_size: usize },

    #[error("Store '{0}' is read-only")]
    ReadOnly(String),

    #[error("Corrupted store metadata: {0}")]
    CorruptMeta(String),

    #[error("Invalid URI: {0}")]
    BadUri(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal invariant violated: {0}")]
    Internal(String),
}
