//! Interactive demo: the full query UI over a scripted searcher.
//!
//! An in-memory corpus stands in for the filesystem and a substring
//! matcher stands in for the regex engine, so the demo exercises the
//! interesting parts: streaming ingestion, re-search on edit, selection,
//! filename runs, pattern errors with an error underline.
//!
//! Type to search; Enter focuses the results; F1 shows all bindings.

use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use sift::{
    OutputBuffer, QueryUi, SearchContext, SearchError, SearchOptions, Searcher, UiConfig,
};

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "sift-interactive", about = "Interactive query demo")]
struct Args {
    /// Initial pattern to search for.
    pattern: Option<String>,
    /// Quiescence delay in hundredths of a second before a re-search.
    #[arg(long, default_value_t = 30)]
    delay: u32,
    /// Exit without a confirmation prompt.
    #[arg(long)]
    no_confirm: bool,
    /// Start with colors off.
    #[arg(long)]
    mono: bool,
    /// Write a trace log to this file.
    #[arg(long)]
    log: Option<std::path::PathBuf>,
}

/// The demo corpus: (path, contents).
const CORPUS: &[(&str, &str)] = &[
    (
        "src/main.rs",
        "fn main() {\n    let args = Args::parse();\n    run(args).unwrap();\n}\n",
    ),
    (
        "src/run.rs",
        "pub fn run(args: Args) -> Result<()> {\n    let pool = Pool::new(args.jobs);\n    \
         for path in walk(&args.root) {\n        pool.submit(path);\n    }\n    pool.join()\n}\n",
    ),
    (
        "src/pool.rs",
        "pub struct Pool {\n    workers: Vec<Worker>,\n}\n\nimpl Pool {\n    \
         pub fn new(jobs: usize) -> Self {\n        let workers = (0..jobs).map(Worker::spawn).collect();\n        \
         Self { workers }\n    }\n\n    pub fn join(self) -> Result<()> {\n        \
         for w in self.workers {\n            w.join()?;\n        }\n        Ok(())\n    }\n}\n",
    ),
    (
        "docs/README.md",
        "# demo corpus\n\nA handful of files to search through.\n\
         Every run of this demo searches the same text.\n",
    ),
];

/// Substring searcher over the embedded corpus, streaming rows slowly
/// enough that re-search cancellation is observable.
struct DemoSearcher;

impl DemoSearcher {
    /// Reject patterns with an unbalanced `(` or a trailing `\`, with the
    /// byte offset of the offending character.
    fn check_pattern(pattern: &str) -> Result<(), SearchError> {
        let mut depth = 0usize;
        let mut open_at = 0usize;
        for (i, c) in pattern.char_indices() {
            match c {
                '(' => {
                    depth += 1;
                    open_at = i;
                }
                ')' => {
                    depth = depth.checked_sub(1).ok_or(SearchError::Pattern {
                        message: "unbalanced )".to_owned(),
                        position: i,
                    })?;
                }
                _ => {}
            }
        }
        if depth > 0 {
            return Err(SearchError::Pattern {
                message: "missing )".to_owned(),
                position: open_at,
            });
        }
        if pattern.ends_with('\\') && !pattern.ends_with("\\\\") {
            return Err(SearchError::Pattern {
                message: "trailing \\".to_owned(),
                position: pattern.len() - 1,
            });
        }
        Ok(())
    }
}

impl Searcher for DemoSearcher {
    fn search(&self, ctx: &mut SearchContext) -> Result<(), SearchError> {
        let opts = ctx.options.clone();
        Self::check_pattern(&opts.pattern)?;

        let mut out = OutputBuffer::new(ctx.sink.as_mut());
        out.set_line_buffered();

        if opts.pattern.is_empty() {
            return Ok(());
        }
        let needle = if opts.ignore_case {
            opts.pattern.to_lowercase()
        } else {
            opts.pattern.clone()
        };

        for (path, contents) in CORPUS {
            if ctx.cancel.is_cancelled() {
                break;
            }

            let mut count = 0usize;
            let mut named = false;
            for (lineno, line) in contents.lines().enumerate() {
                if ctx.cancel.is_cancelled() {
                    break;
                }
                let haystack = if opts.ignore_case {
                    line.to_lowercase()
                } else {
                    line.to_owned()
                };
                let hit = haystack.contains(&needle) != opts.invert_match;
                if !hit {
                    continue;
                }
                count += 1;
                if opts.count || opts.files_with_matches {
                    continue;
                }

                if !named && !opts.no_filename {
                    // Tri-NUL filename framing on the run's first row.
                    out.put_byte(0);
                    out.put_byte(0);
                    out.put_str(path);
                    out.put_byte(0);
                    named = true;
                } else if !opts.no_filename && opts.ungroup {
                    out.put_str(path);
                    out.put_byte(b':');
                }
                if opts.line_number {
                    out.put_uint(lineno as u64 + 1, 4);
                    out.put_byte(b':');
                }
                // Highlight only when byte offsets line up with the
                // original text (case folding may change lengths).
                let highlight = if opts.color && !opts.invert_match && !opts.ignore_case {
                    line.find(&needle)
                } else {
                    None
                };
                if let Some(at) = highlight {
                    out.put_str(&line[..at]);
                    out.put_str("\x1b[1;31m");
                    out.put_str(&line[at..at + needle.len()]);
                    out.put_str("\x1b[m");
                    out.put_str(&line[at + needle.len()..]);
                } else {
                    out.put_str(line);
                }
                out.put_newline(true);

                // Stream slowly so searching feels live.
                thread::sleep(Duration::from_millis(30));
            }

            if count > 0 {
                if opts.count {
                    out.put_str(path);
                    out.put_byte(b':');
                    out.put_uint(count as u64, 1);
                    out.put_newline(true);
                } else if opts.files_with_matches {
                    out.put_str("\x1b[35m");
                    out.put_str(path);
                    out.put_str("\x1b[m");
                    out.put_newline(true);
                }
            }
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let _guard = args.log.as_ref().map(|path| {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let file = path.file_name().map_or("sift.log".into(), |f| f.to_owned());
        let appender = tracing_appender::rolling::never(dir, file);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(writer)
            .init();
        guard
    });

    let mut options = SearchOptions {
        line_number: true,
        heading: true,
        ..SearchOptions::default()
    };
    if let Some(pattern) = args.pattern {
        options.pattern = pattern;
    }

    let config = UiConfig {
        prompt: "Q>".to_owned(),
        // One tick per 100 ms; round the hundredths up to a full tick.
        delay: args.delay.div_ceil(10).max(1),
        no_confirm: args.no_confirm,
        read_stdin: false,
        mono: args.mono,
    };

    let ui = QueryUi::new(Arc::new(DemoSearcher), options, config)?;
    let outcome = ui.run()?;

    let mut err = std::io::stderr();
    let _ = writeln!(err, "printed {} row(s)", outcome.printed);
    std::process::exit(outcome.status.code());
}
