//! Genomic Range Index: a (rid, lvl, beg, len) B-tree plus the query
//! protocol that turns it into a 1-D interval overlap index with no bound
//! on feature or chromosome length.

pub mod cursor;
pub mod detect;
pub mod level;
pub mod plan;
pub mod refseq;
pub mod sql;

pub use cursor::RowidCursor;
pub use detect::{DetectCache, detect_levels};
pub use level::{LevelBounds, MAX_LEVEL, POW16, level_for_len};
pub use plan::GriStatement;
pub use refseq::{RefSeq, put_assembly_sql, put_refseq_sql, refseq_ddl};
pub use sql::{GRI_COLUMNS, create_gri_sql, overlap_sql};
