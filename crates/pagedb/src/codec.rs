use crate::{Error, Result};

/// Default zstd level for newly written pages.
pub const DEFAULT_ZSTD_LEVEL: i32 = 6;

/// Encoding of a stored page payload.
///
/// `Raw` is kept for pages that zstd cannot shrink (already-compressed
/// BLOBs, random bytes), so a stored record is never larger than the
/// plain page plus its table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Codec {
    Raw = 0,
    Zstd = 1,
}

impl Codec {
    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::Raw),
            1 => Ok(Self::Zstd),
            other => Err(Error::CorruptMeta(format!("unknown codec tag {other}"))),
        }
    }
}

/// Compresses one plain page, falling back to `Raw` when zstd does not help.
pub fn encode_page(plain: &[u8], level: i32) -> Result<(Codec, Vec<u8>)> {
    let compressed = zstd::encode_all(plain, level)?;
    if compressed.len() < plain.len() {
        Ok((Codec::Zstd, compressed))
    } else {
        Ok((Codec::Raw, plain.to_vec()))
    }
}

/// Decodes a stored payload back into exactly one plain page.
///
/// Any decoder failure, and any output whose length differs from the
/// store's inner page size, is reported as page corruption.
pub fn decode_page(page_id: u64, codec: Codec, payload: &[u8], page_size: usize) -> Result<Vec<u8>> {
    let plain = match codec {
        Codec::Raw => payload.to_vec(),
        Codec::Zstd => zstd::decode_all(payload).map_err(|e| Error::CorruptPage {
            page_id,
            detail: e.to_string(),
        })?,
    };

    if plain.len() != page_size {
        return Err(Error::PageLengthMismatch {
            page_id,
            expected: page_size,
            actual: plain.len(),
        });
    }

    Ok(plain)
}
