//! # Sift
//!
//! The interactive query engine and synchronized output subsystem of a
//! recursive, high-throughput grep-style search tool.
//!
//! Sift does two jobs:
//!
//! - **Output pipeline**: while a search runs, many worker threads funnel
//!   formatted results through per-worker [`OutputBuffer`]s into a single
//!   sink, committed either unordered (mutual exclusion only) or in strict
//!   slot order, without workers ever blocking each other while producing.
//! - **Interactive query loop**: a live terminal UI in which edits to the
//!   query relaunch the search, results stream into the view as they
//!   arrive, and selections survive to an exit print pass.
//!
//! The search engine itself is external: anything implementing
//! [`Searcher`] plugs in.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sift::{QueryUi, SearchOptions, UiConfig};
//! # use sift::{SearchContext, SearchError, Searcher};
//! # struct MySearcher;
//! # impl Searcher for MySearcher {
//! #     fn search(&self, _ctx: &mut SearchContext) -> Result<(), SearchError> { Ok(()) }
//! # }
//!
//! let ui = QueryUi::new(Arc::new(MySearcher), SearchOptions::default(), UiConfig::default())?;
//! let outcome = ui.run()?;
//! std::process::exit(outcome.status.code());
//! # Ok::<(), std::io::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod output;
pub mod query;
pub mod screen;
pub mod search;

// Re-exports for convenience
pub use output::{HexClass, HexDump, OutputBuffer, OutputSync, SyncHandle, SyncMode};
pub use query::{QueryLine, QueryOutcome, QueryUi, ResultFeed, RowView, UiConfig};
pub use search::{
    CancelToken, ExitStatus, SearchContext, SearchError, SearchOptions, Searcher, SortKey,
};
