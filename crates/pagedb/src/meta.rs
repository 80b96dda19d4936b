use xxhash_rust::xxh3::xxh3_64;

use crate::{Error, Result};

const META_MAGIC: &[u8; 8] = b"pagedb\x00\x01";
const SIZE_OF_U32: usize = size_of::<u32>();
const SIZE_OF_U64: usize = size_of::<u64>();

/// Smallest and largest accepted page sizes (1 KiB and 64 KiB).
pub const MIN_PAGE_SIZE: usize = 1024;
pub const MAX_PAGE_SIZE: usize = 64 * 1024;

/// Returns true for the supported power-of-two page sizes, 1 KiB to 64 KiB.
#[inline]
pub fn valid_page_size(bytes: usize) -> bool {
    bytes.is_power_of_two() && (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&bytes)
}

/// The store's `meta` table: one fixed little-endian block.
///
/// `inner_page_size == 0` marks a store that exists but has never
/// committed a page; the size is fixed by the first commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreMeta {
    pub format_version: u32,
    pub inner_page_size: usize,
    pub outer_page_size: usize,
    pub zstd_level: i32,
    pub page_count: u64,
    pub change_counter: u64,
}

impl StoreMeta {
    pub const FORMAT_VERSION: u32 = 1;
    pub const SIZE: usize = 48;

    pub fn empty(outer_page_size: usize, zstd_level: i32) -> Result<Self> {
        if !valid_page_size(outer_page_size) {
            return Err(Error::BadPageSize {
                bytes: outer_page_size,
            });
        }
        Ok(Self {
            format_version: Self::FORMAT_VERSION,
            inner_page_size: 0,
            outer_page_size,
            zstd_level,
            page_count: 0,
            change_counter: 0,
        })
    }

    /// Serialize to bytes using little endian encoding; trailing xxh3 guards
    /// against torn metadata writes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        let mut pos = 0;

        bytes[pos..pos + 8].copy_from_slice(META_MAGIC);
        pos += 8;
        bytes[pos..pos + SIZE_OF_U32].copy_from_slice(&self.format_version.to_le_bytes());
        pos += SIZE_OF_U32;
        bytes[pos..pos + SIZE_OF_U32].copy_from_slice(&(self.inner_page_size as u32).to_le_bytes());
        pos += SIZE_OF_U32;
        bytes[pos..pos + SIZE_OF_U32].copy_from_slice(&(self.outer_page_size as u32).to_le_bytes());
        pos += SIZE_OF_U32;
        bytes[pos..pos + SIZE_OF_U32].copy_from_slice(&self.zstd_level.to_le_bytes());
        pos += SIZE_OF_U32;
        bytes[pos..pos + SIZE_OF_U64].copy_from_slice(&self.page_count.to_le_bytes());
        pos += SIZE_OF_U64;
        bytes[pos..pos + SIZE_OF_U64].copy_from_slice(&self.change_counter.to_le_bytes());
        pos += SIZE_OF_U64;

        let digest = xxh3_64(&bytes[..pos]);
        bytes[pos..pos + SIZE_OF_U64].copy_from_slice(&digest.to_le_bytes());

        bytes
    }

    /// Deserialize from bytes using little endian encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::SIZE {
            return Err(Error::CorruptMeta(format!(
                "meta block is {} bytes, expected {}",
                bytes.len(),
                Self::SIZE
            )));
        }
        if &bytes[0..8] != META_MAGIC {
            return Err(Error::CorruptMeta("bad magic".to_string()));
        }

        let stored = u64::from_le_bytes(bytes[40..48].try_into().unwrap());
        if xxh3_64(&bytes[..40]) != stored {
            return Err(Error::CorruptMeta("checksum mismatch".to_string()));
        }

        let format_version = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        if format_version != Self::FORMAT_VERSION {
            return Err(Error::CorruptMeta(format!(
                "format version {format_version}, expected {}",
                Self::FORMAT_VERSION
            )));
        }

        let inner_page_size = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;
        let outer_page_size = u32::from_le_bytes(bytes[16..20].try_into().unwrap()) as usize;
        if inner_page_size != 0 && !valid_page_size(inner_page_size) {
            return Err(Error::BadPageSize {
                bytes: inner_page_size,
            });
        }
        if !valid_page_size(outer_page_size) {
            return Err(Error::BadPageSize {
                bytes: outer_page_size,
            });
        }

        Ok(Self {
            format_version,
            inner_page_size,
            outer_page_size,
            zstd_level: i32::from_le_bytes(bytes[20..24].try_into().unwrap()),
            page_count: u64::from_le_bytes(bytes[24..32].try_into().unwrap()),
            change_counter: u64::from_le_bytes(bytes[32..40].try_into().unwrap()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_round_trip() {
        let mut meta = StoreMeta::empty(32 * 1024, 6).unwrap();
        meta.inner_page_size = 16 * 1024;
        meta.page_count = 12_345;
        meta.change_counter = 7;
        assert_eq!(StoreMeta::from_bytes(&meta.to_bytes()).unwrap(), meta);
    }

    #[test]
    fn flipped_bit_fails_checksum() {
        let meta = StoreMeta::empty(4096, 3).unwrap();
        let mut bytes = meta.to_bytes();
        bytes[25] ^= 0x40;
        assert!(matches!(
            StoreMeta::from_bytes(&bytes),
            Err(Error::CorruptMeta(_))
        ));
    }

    #[test]
    fn page_size_set_is_closed() {
        for kib in [1usize, 2, 4, 8, 16, 32, 64] {
            assert!(valid_page_size(kib * 1024));
        }
        for bytes in [0usize, 512, 3 * 1024, 128 * 1024] {
            assert!(!valid_page_size(bytes));
        }
    }
}
