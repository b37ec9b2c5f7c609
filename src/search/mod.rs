//! The search invocation contract.
//!
//! The grep engine itself is an external collaborator: anything implementing
//! [`Searcher`] can be driven by the query UI or the batch pipeline. A
//! search runs against an explicit [`SearchContext`] (options snapshot,
//! output sink, cancel token) instead of process-wide state, so re-searches
//! are plain teardown-and-rebuild.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

/// Errors surfaced by a [`Searcher`].
#[derive(Debug, Error)]
pub enum SearchError {
    /// The pattern failed to compile. `position` is a byte offset into the
    /// pattern text as the user typed it.
    #[error("{message}")]
    Pattern {
        /// Human-readable compile error.
        message: String,
        /// Byte offset of the error in the pattern.
        position: usize,
    },
    /// An I/O failure while searching or writing results.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Any other engine failure.
    #[error("{0}")]
    Other(String),
}

/// Cooperative cancellation flag shared between the UI and a running search.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// True once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// File sort order for recursive traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    /// By pathname.
    #[default]
    Name,
    /// By file size.
    Size,
    /// By last-changed time.
    Changed,
    /// By creation time.
    Created,
}

/// The option snapshot handed to a search invocation.
///
/// The event loop builds one per search from the interactive flag registry;
/// the engine treats it as read-only.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// The pattern as typed.
    pub pattern: String,
    /// Lines of context after a match.
    pub after_context: usize,
    /// Lines of context before a match.
    pub before_context: usize,
    /// Report byte offsets.
    pub byte_offset: bool,
    /// Count matching lines per file instead of printing them.
    pub count: bool,
    /// Pattern is a set of fixed strings.
    pub fixed_strings: bool,
    /// Pattern is a basic (obsolete) regular expression.
    pub basic_regexp: bool,
    /// Always print the filename.
    pub with_filename: bool,
    /// Never print the filename.
    pub no_filename: bool,
    /// Skip binary files entirely.
    pub binary_without_match: bool,
    /// Case-insensitive matching.
    pub ignore_case: bool,
    /// Case-insensitive unless the pattern has an upper-case letter.
    pub smart_case: bool,
    /// Report column numbers.
    pub column_number: bool,
    /// Only list files that match.
    pub files_with_matches: bool,
    /// Report line numbers.
    pub line_number: bool,
    /// Print only the matching part.
    pub only_matching: bool,
    /// Pattern uses Perl syntax.
    pub perl_regexp: bool,
    /// Recurse into directories.
    pub recurse: bool,
    /// Follow symbolic links while recursing.
    pub dereference: bool,
    /// Tab-align the output after the header.
    pub initial_tab: bool,
    /// Search binary files as if they were text.
    pub binary: bool,
    /// Do not group matches per file.
    pub ungroup: bool,
    /// Select non-matching lines.
    pub invert_match: bool,
    /// Print a hex dump of matching lines in binary files.
    pub with_hex: bool,
    /// Match whole words.
    pub word_regexp: bool,
    /// Print a hex dump of only the matches in binary files.
    pub hex: bool,
    /// Match whole lines.
    pub line_regexp: bool,
    /// Allow empty matches.
    pub empty: bool,
    /// Print every line, matching or not.
    pub any_line: bool,
    /// Decompress archives while searching.
    pub decompress: bool,
    /// NUL-terminate printed filenames.
    pub null: bool,
    /// Maximum directory depth; zero means unlimited.
    pub max_depth: usize,
    /// Skip hidden files and directories.
    pub no_hidden: bool,
    /// Group matches under a filename heading.
    pub heading: bool,
    /// Raw text output (no filename framing).
    pub text: bool,
    /// A `--format` template is active.
    pub format: Option<String>,
    /// Sort key for traversal.
    pub sort: SortKey,
    /// Reverse the sort order.
    pub sort_reverse: bool,
    /// Emit color escape sequences.
    pub color: bool,
    /// Width-limit output lines to this many columns; zero disables.
    pub width: usize,
    /// Commit worker output in slot order.
    pub ordered: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            after_context: 0,
            before_context: 0,
            byte_offset: false,
            count: false,
            fixed_strings: false,
            basic_regexp: false,
            with_filename: false,
            no_filename: false,
            binary_without_match: false,
            ignore_case: false,
            smart_case: false,
            column_number: false,
            files_with_matches: false,
            line_number: false,
            only_matching: false,
            perl_regexp: false,
            recurse: true,
            dereference: false,
            initial_tab: false,
            binary: false,
            ungroup: false,
            invert_match: false,
            with_hex: false,
            word_regexp: false,
            hex: false,
            line_regexp: false,
            empty: false,
            any_line: false,
            decompress: false,
            null: false,
            max_depth: 0,
            no_hidden: false,
            heading: false,
            text: false,
            format: None,
            sort: SortKey::Name,
            sort_reverse: false,
            color: true,
            width: 0,
            ordered: false,
        }
    }
}

impl SearchOptions {
    /// True when result rows carry filename runs the view can scroll by.
    /// Text, format, and count output do not; `back`/`next` then degrade
    /// to page scrolling.
    pub fn carries_filenames(&self) -> bool {
        !self.text && self.format.is_none() && !self.count
    }
}

/// Everything a search invocation needs, created by the event loop before
/// the worker is spawned and dropped after it is joined.
pub struct SearchContext {
    /// Read-only option snapshot.
    pub options: SearchOptions,
    /// Cancellation flag the engine polls between units of work.
    pub cancel: CancelToken,
    /// Destination for formatted result bytes.
    pub sink: Box<dyn Write + Send>,
    /// Replayed standard input, when input is piped.
    pub stdin: Option<Box<dyn Read + Send>>,
}

impl SearchContext {
    /// Create a context over a sink with default options.
    pub fn new(sink: Box<dyn Write + Send>) -> Self {
        Self {
            options: SearchOptions::default(),
            cancel: CancelToken::new(),
            sink,
            stdin: None,
        }
    }
}

/// The search engine contract.
///
/// Implementations write newline-terminated result rows to `ctx.sink`
/// (optionally with ANSI coloring and NUL filename framing), periodically
/// check `ctx.cancel`, and report pattern errors with a byte offset into
/// the pattern as the user typed it.
pub trait Searcher: Send + Sync {
    /// Run one search to completion or cancellation.
    fn search(&self, ctx: &mut SearchContext) -> Result<(), SearchError>;
}

/// Process exit status of a query session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Results were printed.
    Match,
    /// No results were printed.
    NoMatch,
    /// The pattern failed to compile at exit time.
    PatternError,
}

impl ExitStatus {
    /// Conventional grep exit code.
    pub const fn code(self) -> i32 {
        match self {
            Self::Match => 0,
            Self::NoMatch => 1,
            Self::PatternError => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_filename_carrying_formats() {
        let mut opts = SearchOptions::default();
        assert!(opts.carries_filenames());
        opts.count = true;
        assert!(!opts.carries_filenames());
        opts.count = false;
        opts.format = Some("%f".into());
        assert!(!opts.carries_filenames());
        opts.format = None;
        opts.text = true;
        assert!(!opts.carries_filenames());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitStatus::Match.code(), 0);
        assert_eq!(ExitStatus::NoMatch.code(), 1);
        assert_eq!(ExitStatus::PatternError.code(), 2);
    }
}
