use crate::{Error, Result};

/// Powers of 16 up to 16^15: the length buckets behind feature levels.
pub const POW16: [i64; 16] = {
    let mut table = [1i64; 16];
    let mut i = 1;
    while i < 16 {
        table[i] = table[i - 1] * 16;
        i += 1;
    }
    table
};

/// Deepest level a feature can occupy.
pub const MAX_LEVEL: u8 = 15;

/// Stored level for a feature of length `len`, given the index floor:
/// the smallest `L >= floor` with `len <= 16^L`, negated so that small
/// (frequent) features sort to the right of the B-tree.
///
/// `None` for invalid lengths (negative, or past the deepest bucket),
/// matching the NULL branch of the generated-column CASE ladder.
pub fn level_for_len(len: i64, floor: u8) -> Option<i8> {
    if len < 0 || floor > MAX_LEVEL {
        return None;
    }
    let mut level = floor as usize;
    while level <= MAX_LEVEL as usize {
        if len <= POW16[level] {
            return Some(-(level as i8));
        }
        level += 1;
    }
    None
}

/// Occupied level bounds of an indexed table: every stored feature has
/// `-ceiling <= lvl <= -floor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LevelBounds {
    pub ceiling: u8,
    pub floor: u8,
}

impl LevelBounds {
    /// The widest bounds: scan every level.
    pub const FULL: Self = Self {
        ceiling: MAX_LEVEL,
        floor: 0,
    };

    pub fn new(ceiling: i64, floor: i64) -> Result<Self> {
        if floor < 0 || ceiling > MAX_LEVEL as i64 || ceiling < floor {
            return Err(Error::QueryPlan(format!(
                "inconsistent level bounds (ceiling {ceiling}, floor {floor})"
            )));
        }
        Ok(Self {
            ceiling: ceiling as u8,
            floor: floor as u8,
        })
    }

    /// Levels to scan, deepest first (the index's storage order).
    pub fn levels(&self) -> impl Iterator<Item = u8> {
        (self.floor..=self.ceiling).rev()
    }
}
