//! Synchronized, buffered output for many search workers.
//!
//! Every worker owns an [`OutputBuffer`]; all writers of one search
//! invocation share an [`OutputSync`] that commits their output either
//! unordered (mutual exclusion only) or ordered by slot ticket. The
//! [`TruncateFilter`] optionally width-limits flushed lines and the
//! [`HexDump`] scratch renders binary matches.

pub mod hex;
pub mod sync;
pub mod truncate;
pub mod writer;

pub use hex::{HexClass, HexDump, MAX_HEX_COLUMNS};
pub use sync::{OutputSync, SyncHandle, SyncMode};
pub use truncate::TruncateFilter;
pub use writer::{OutputBuffer, BUFFER_SIZE};
