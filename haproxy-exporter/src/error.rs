//! Error types for the exporter.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using [`ExporterError`].
pub type Result<T> = std::result::Result<T, ExporterError>;

/// Errors raised while building an exporter.
///
/// These are configuration errors: they surface at construction time and are
/// never produced by a scrape.
#[derive(Error, Debug)]
pub enum ExporterError {
    /// The scrape URI uses a scheme we cannot fetch from.
    #[error("unsupported scheme: {0:?}")]
    UnsupportedScheme(String),

    /// The scrape URI could not be parsed.
    #[error("invalid scrape URI {uri:?}: {message}")]
    InvalidUri { uri: String, message: String },

    /// An entry of the server metric field list is not a column number.
    #[error("invalid server metric field number: {0}")]
    InvalidMetricField(String),

    /// Two entries of the same field table share a column.
    #[error("duplicate column {column} in {table} field table")]
    DuplicateColumn { table: &'static str, column: usize },

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    /// Unix sockets are not available on this platform.
    #[error("unix socket scrape targets are not supported on this platform")]
    UnixUnsupported,
}

/// Errors raised while fetching the statistics payload.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The deadline expired before the exchange completed.
    #[error("deadline of {0:?} exceeded")]
    Timeout(Duration),

    /// The HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("HTTP status {0}")]
    Status(u16),

    /// Socket or file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A malformed record in the statistics payload.
///
/// Each variant carries the 1-based line on which the record started.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CsvError {
    /// A `"` appeared inside an unquoted field.
    #[error("line {line}: bare \" in non-quoted field")]
    BareQuote { line: usize },

    /// A quoted field was not closed, or was followed by garbage.
    #[error("line {line}: extraneous or missing \" in quoted field")]
    Quote { line: usize },

    /// The record has a different number of fields than the first record.
    #[error("line {line}: wrong number of fields (expected {expected}, got {got})")]
    FieldCount {
        line: usize,
        expected: usize,
        got: usize,
    },

    /// The record is not valid UTF-8.
    #[error("line {line}: record is not valid UTF-8")]
    Utf8 { line: usize },

    /// The record is too short to be classified.
    #[error("line {line}: expected at least {min} fields, got {got}")]
    TooShort { line: usize, min: usize, got: usize },
}

impl CsvError {
    /// Line on which the offending record started.
    pub fn line(&self) -> usize {
        match self {
            Self::BareQuote { line }
            | Self::Quote { line }
            | Self::FieldCount { line, .. }
            | Self::Utf8 { line }
            | Self::TooShort { line, .. } => *line,
        }
    }
}
