//! Transparent page-level compression beneath an embedded database engine.
//!
//! The host engine sees an ordinary file of fixed-size pages through the
//! [`Vfs`]/[`DatabaseFile`] traits. Underneath, every page lives as one
//! zstd-compressed record in a [`PageStore`], the "outer database", whose
//! commit journal makes each inner transaction atomic across crashes. A
//! worker pool keeps compression and sequential-scan read-ahead off the
//! host's thread.

mod cache;
pub mod codec;
mod error;
mod journal;
mod layout;
mod meta;
mod pool;
mod prefetch;
mod store;
mod uri;
mod vfs;

pub use cache::*;
pub use codec::{Codec, DEFAULT_ZSTD_LEVEL};
pub use error::*;
pub use journal::*;
use layout::*;
pub use meta::*;
pub use pool::*;
pub use prefetch::*;
pub use store::*;
pub use uri::*;
pub use vfs::*;
