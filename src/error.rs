//! Error and diagnostic types for thread reconstruction.
//!
//! `ThreadError` is fatal for the file being processed. `Diagnostic` values are
//! recovered locally: the pipeline records them on the resulting `Thread` and
//! keeps going.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

use crate::extract::QuoteFormat;

/// Errors that abort processing of a single input.
#[derive(Error, Debug)]
pub enum ThreadError {
    /// The input could not be read as an internet message at all.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Deduplication threshold outside 0..=64.
    #[error("Invalid dedup threshold {0}: must be between 0 and 64")]
    InvalidThreshold(u32),

    /// I/O failure while reading input or committing output.
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Processing was aborted before output was committed.
    #[error("Processing cancelled")]
    Cancelled,
}

impl ThreadError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, ThreadError>;

/// Non-fatal conditions raised while building a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// A quote boundary was found but its sender or date could not be recovered.
    /// The boundary text stays in the parent's content.
    PatternAmbiguity {
        position: usize,
        format: QuoteFormat,
        offset: usize,
    },

    /// A date string was present but could not be interpreted.
    DateParse { position: usize, raw: String },

    /// Nesting reached the depth limit; expansion stopped at this point.
    DepthLimitExceeded { position: usize, depth: usize },
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Diagnostic::PatternAmbiguity {
                position,
                format,
                offset,
            } => write!(
                f,
                "message {}: {:?} quote boundary at offset {} has no recoverable sender/date",
                position, format, offset
            ),
            Diagnostic::DateParse { position, raw } => {
                write!(f, "message {}: unparseable date '{}'", position, raw)
            }
            Diagnostic::DepthLimitExceeded { position, depth } => write!(
                f,
                "message {}: nesting depth limit {} reached, not expanding further",
                position, depth
            ),
        }
    }
}
