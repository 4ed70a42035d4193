//! Error and Result types for round robin archive operations.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A convenience `Result` type for archive operations.
pub type Result<T> = std::result::Result<T, RrdError>;

/// The error type for archive operations.
#[derive(Debug, Error)]
pub enum RrdError {
    /// Invalid cookie bytes at the start of the file.
    #[error("Invalid cookie: expected RRD\\0, got {0:?}")]
    InvalidCookie([u8; 4]),

    /// Unsupported on-disk format version.
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(String),

    /// The float sanity marker does not match, the file was written by a
    /// host with a different float representation or byte order.
    #[error("Float cookie mismatch: got {0:e}")]
    FloatCookieMismatch(f64),

    /// The file length does not match the size implied by the header counts.
    #[error("Size mismatch: header implies {expected} bytes, file has {actual}")]
    SizeMismatch {
        /// Size derived from the header counts.
        expected: u64,
        /// Actual number of bytes available.
        actual: u64,
    },

    /// A data source type name that this engine does not know.
    #[error("Unknown data source type: {0}")]
    UnknownDataSourceType(String),

    /// A consolidation function name that this engine does not know.
    #[error("Unknown consolidation function: {0}")]
    UnknownConsolidationFunction(String),

    /// Structural inconsistency in the definitions (bad dependency index,
    /// zero step, Holt-Winters archive with more than one step per row).
    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    /// Update timestamp is not strictly after the last update.
    #[error("Illegal update time {time}.{usec:06}: not after last update {last}.{last_usec:06}")]
    TimestampNotMonotonic {
        /// Rejected update time (seconds).
        time: i64,
        /// Rejected update time (microseconds).
        usec: i64,
        /// Last update time stored in the file (seconds).
        last: i64,
        /// Last update time stored in the file (microseconds).
        last_usec: i64,
    },

    /// A reading could not be interpreted for its data source type.
    #[error("Invalid reading '{value}' for data source {ds}: {reason}")]
    InvalidReading {
        /// Data source name.
        ds: String,
        /// Raw reading text.
        value: String,
        /// Why the reading was rejected.
        reason: String,
    },

    /// A malformed update sample string.
    #[error("Invalid sample '{0}'")]
    InvalidSample(String),

    /// A sample carries a different number of values than expected.
    #[error("Expected {expected} values, got {actual}")]
    ValueCountMismatch {
        /// Number of values expected from the template or definitions.
        expected: usize,
        /// Number of values supplied.
        actual: usize,
    },

    /// A definition or consolidation parameter outside its valid domain.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Evaluation of a computed data source failed.
    #[error("Compute failed for data source {ds}: {reason}")]
    ComputeFailed {
        /// Data source name.
        ds: String,
        /// Evaluator message.
        reason: String,
    },

    /// Referenced data source does not exist.
    #[error("Unknown data source: {0}")]
    UnknownDataSource(String),

    /// Referenced archive index does not exist.
    #[error("Unknown archive: {0}")]
    UnknownArchive(usize),

    /// No archive matches the requested consolidation function.
    #[error("No archive with consolidation function {0}")]
    NoMatchingArchive(String),

    /// Another process holds the file lock.
    #[error("File is locked by another process: {0}")]
    Locked(PathBuf),

    /// Refusing to overwrite an existing file.
    #[error("File already exists: {0}")]
    AlreadyExists(PathBuf),

    /// Allocation of decoded structures failed.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

/// Coarse classification of [`RrdError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// File fails cookie, version, float cookie or size checks.
    Format,
    /// Update time not strictly greater than the last update.
    Ordering,
    /// Reading or parameter outside its declared domain.
    Range,
    /// Referenced data source or archive does not exist.
    UnknownName,
    /// Read, write, seek or lock failure.
    Io,
    /// Allocation failure.
    Resource,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Format => "format",
            ErrorKind::Ordering => "ordering",
            ErrorKind::Range => "range",
            ErrorKind::UnknownName => "unknown name",
            ErrorKind::Io => "io",
            ErrorKind::Resource => "resource",
        };
        f.write_str(name)
    }
}

impl RrdError {
    /// Returns the taxonomy bucket for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RrdError::InvalidCookie(_)
            | RrdError::UnsupportedVersion(_)
            | RrdError::FloatCookieMismatch(_)
            | RrdError::SizeMismatch { .. }
            | RrdError::UnknownDataSourceType(_)
            | RrdError::UnknownConsolidationFunction(_)
            | RrdError::InvalidLayout(_) => ErrorKind::Format,
            RrdError::TimestampNotMonotonic { .. } => ErrorKind::Ordering,
            RrdError::InvalidReading { .. }
            | RrdError::InvalidSample(_)
            | RrdError::ValueCountMismatch { .. }
            | RrdError::InvalidParameter(_)
            | RrdError::ComputeFailed { .. } => ErrorKind::Range,
            RrdError::UnknownDataSource(_)
            | RrdError::UnknownArchive(_)
            | RrdError::NoMatchingArchive(_) => ErrorKind::UnknownName,
            RrdError::Locked(_) | RrdError::AlreadyExists(_) | RrdError::IoError(_) => {
                ErrorKind::Io
            }
            RrdError::ResourceExhausted(_) => ErrorKind::Resource,
        }
    }
}

/// Caller-owned slot holding the message of the most recent failure.
///
/// Nothing in this crate keeps error state in globals. An embedding that
/// wants "last error" semantics keeps one `ErrorContext` per session (or
/// per thread) and passes it to the `*_with_context` entry points, which
/// clear it before starting and record any failure.
#[derive(Debug, Default, Clone)]
pub struct ErrorContext {
    message: Option<String>,
    kind: Option<ErrorKind>,
}

impl ErrorContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the message and kind of `err`, replacing any previous one.
    pub fn set(&mut self, err: &RrdError) {
        self.message = Some(err.to_string());
        self.kind = Some(err.kind());
    }

    /// Records the error of `result`, if any, and passes it through.
    pub fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.set(err);
        }
        result
    }

    /// Returns the last recorded message.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the kind of the last recorded error.
    pub fn kind(&self) -> Option<ErrorKind> {
        self.kind
    }

    /// Returns true if an error has been recorded since the last clear.
    pub fn is_set(&self) -> bool {
        self.message.is_some()
    }

    /// Forgets the recorded error.
    pub fn clear(&mut self) {
        self.message = None;
        self.kind = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(RrdError::InvalidCookie(*b"XYZ\0").kind(), ErrorKind::Format);
        assert_eq!(
            RrdError::TimestampNotMonotonic {
                time: 1,
                usec: 0,
                last: 2,
                last_usec: 0
            }
            .kind(),
            ErrorKind::Ordering
        );
        assert_eq!(
            RrdError::InvalidParameter("xff".into()).kind(),
            ErrorKind::Range
        );
        assert_eq!(
            RrdError::UnknownDataSource("x".into()).kind(),
            ErrorKind::UnknownName
        );
        let io = RrdError::from(io::Error::new(io::ErrorKind::Other, "boom"));
        assert_eq!(io.kind(), ErrorKind::Io);
        assert_eq!(
            RrdError::ResourceExhausted("values".into()).kind(),
            ErrorKind::Resource
        );
    }

    #[test]
    fn test_context_record_and_clear() {
        let mut ctx = ErrorContext::new();
        assert!(!ctx.is_set());

        let ok: Result<u32> = Ok(3);
        assert_eq!(ctx.record(ok).unwrap(), 3);
        assert!(!ctx.is_set());

        let err: Result<u32> = Err(RrdError::UnknownArchive(7));
        assert!(ctx.record(err).is_err());
        assert_eq!(ctx.message(), Some("Unknown archive: 7"));
        assert_eq!(ctx.kind(), Some(ErrorKind::UnknownName));

        ctx.clear();
        assert!(ctx.message().is_none());
        assert!(ctx.kind().is_none());
    }
}
