//! Genomic-scale storage extensions for embedded database engines:
//! transparent page-level compression (via the [`pagedb`] VFS layer) and
//! the Genomic Range Index, a query protocol that turns an ordinary
//! multi-column B-tree into an interval overlap index.
//!
//! The host engine stays external: [`engine`] declares the boundary
//! traits a binding implements, [`gri`] generates the SQL shapes and runs
//! the query protocol through them, and [`facade`] assembles connection
//! URIs and tuning scripts from a JSON configuration.

pub use pagedb::{
    CompressedFile, CompressedVfs, DatabaseFile, LockLevel, PageStore, Uri, VFS_NAME, Vfs,
};

pub mod config;
pub mod engine;
mod error;
pub mod facade;
pub mod functions;
pub mod gri;
mod session;

pub use config::Config;
pub use engine::{
    ChangeStamp, Connection, Rowid, ScalarFunction, Statement, TableFunction, TableInfo, Value,
    ensure_gri_table,
};
pub use error::*;
pub use facade::{EngineOpener, attach_sql, build_uri, open, tuning_sql, vacuum_into_sql};
pub use functions::{scalar_functions, table_functions, version};
pub use gri::{GriStatement, LevelBounds, RowidCursor, create_gri_sql, overlap_sql};
pub use session::Session;
