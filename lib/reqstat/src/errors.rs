//! Typed errors raised by the ingestion pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for reqstat operations.
pub type Result<T> = std::result::Result<T, ReqstatError>;

/// Error type for reqstat operations.
#[derive(Error, Debug)]
pub enum ReqstatError {
    /// Invalid parameter value provided.
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// The parameter name
        parameter: String,
        /// Explanation of why it's invalid
        reason: String,
    },

    /// An input file does not exist or is not a regular file.
    #[error("Input file not found: {}", path.display())]
    MissingInput {
        /// Path that was looked up
        path: PathBuf,
    },

    /// An input file name is not an accepted access log name.
    #[error("Unsupported input file '{}': {reason}", path.display())]
    UnsupportedInput {
        /// The rejected path
        path: PathBuf,
        /// Why it was rejected
        reason: String,
    },

    /// One line could not be turned into a record.
    #[error("Malformed line '{line}': {reason}")]
    MalformedLine {
        /// The offending line, lossily decoded
        line: String,
        /// What was wrong with it
        reason: String,
    },

    /// Reading a producer's byte range failed part way through.
    #[error("Failed reading {} [{begin}, {end}): {source}", path.display())]
    RangeRead {
        /// The file being read
        path: PathBuf,
        /// First byte of the range
        begin: u64,
        /// One past the last byte of the range
        end: u64,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// Every receiver of a work queue went away while a producer was still emitting.
    #[error("Work queue closed while producing from {}", path.display())]
    QueueClosed {
        /// The file whose lines could not be delivered
        path: PathBuf,
    },

    /// A report could not be written.
    #[error("Failed writing report {}: {reason}", path.display())]
    ReportWrite {
        /// Destination of the report
        path: PathBuf,
        /// What went wrong
        reason: String,
    },
}

impl ReqstatError {
    pub fn invalid(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter { parameter: parameter.into(), reason: reason.into() }
    }

    pub fn malformed(line: &[u8], reason: impl Into<String>) -> Self {
        Self::MalformedLine { line: String::from_utf8_lossy(line).into_owned(), reason: reason.into() }
    }
}
