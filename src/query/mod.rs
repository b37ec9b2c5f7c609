//! The interactive query loop and its collaborators.
//!
//! Keystrokes mutate the [`QueryLine`]; after a quiescence delay the
//! [`QueryUi`] event loop tears down the running search and spawns a new
//! one writing into a [`pipe`]; the [`ResultFeed`] ingests the pipe into
//! the [`RowView`] between key polls; the [`FlagRegistry`] maps meta-key
//! toggles onto the next search's options.

pub mod editor;
pub mod flags;
pub mod ingest;
pub mod pipe;
pub mod ui;
pub mod view;

pub use editor::{QueryLine, QUERY_MAX_LEN};
pub use flags::{FlagRegistry, QueryFlag, Toggled};
pub use ingest::{ResultFeed, FEED_BUFFER_SIZE};
pub use pipe::{search_pipe, PipeReader, PipeWriter, TryRead};
pub use ui::{QueryOutcome, QueryUi, UiConfig};
pub use view::{is_filename, RowView};
