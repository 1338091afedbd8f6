//! Error Handling Module
//!
//! This module defines the error types for dmarc-intake using the `thiserror` crate.
//! Report decoding, semantic validation, storage and per-file ingestion each get
//! their own enum so callers can match on the stage that failed.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to turn raw bytes into a validated report.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("report is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("malformed report: {0}")]
    Decode(#[from] quick_xml::de::DeError),

    #[error("rejected XML: {0}")]
    Rejected(String),

    #[error("could not encode report: {0}")]
    Encode(String),

    #[error("invalid report: {0}")]
    Validation(#[from] ValidationError),
}

impl ReportError {
    /// True when the document could not be decoded at all (as opposed to decoding
    /// fine and then failing a semantic rule).
    pub fn is_parse(&self) -> bool {
        !matches!(self, ReportError::Validation(_))
    }
}

/// First semantic rule a decoded report violates. `field` is the XML path of the
/// offending element, e.g. `record[2].row.source_ip`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} is required")]
    Missing { field: String },

    #[error("{field} must be one of [{}], got: {got}", .allowed.join(", "))]
    NotAllowed {
        field: String,
        allowed: &'static [&'static str],
        got: String,
    },

    #[error("{field} must be between {min} and {max}, got: {got}")]
    OutOfRange {
        field: String,
        min: i64,
        max: i64,
        got: i64,
    },

    #[error("{field} must be at least {min}, got: {got}")]
    TooSmall { field: String, min: i64, got: i64 },

    #[error("{field} is not a valid IP address, got: {got}")]
    InvalidIp { field: String, got: String },
}

impl ValidationError {
    pub fn field(&self) -> &str {
        match self {
            ValidationError::Missing { field }
            | ValidationError::NotAllowed { field, .. }
            | ValidationError::OutOfRange { field, .. }
            | ValidationError::TooSmall { field, .. }
            | ValidationError::InvalidIp { field, .. } => field,
        }
    }
}

/// Failure reported by a storage backend. A duplicate key is not an error; see
/// [`crate::storage::WriteOutcome`].
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Backend(String),
}

/// Terminal outcome of a single file that did not make it to `processed/`.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file too large: {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("parse error: {0}")]
    Parse(ReportError),

    #[error("validation error: {0}")]
    Validation(ValidationError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("report {report_id} stored but record {ordinal} was not: {source}")]
    PartialWrite {
        report_id: String,
        ordinal: usize,
        #[source]
        source: Box<IngestError>,
    },

    #[error("could not move file to {}: {source}", .to.display())]
    Relocate {
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<ReportError> for IngestError {
    fn from(err: ReportError) -> Self {
        match err {
            ReportError::Validation(v) => IngestError::Validation(v),
            other => IngestError::Parse(other),
        }
    }
}

/// Refusal to unpack a compressed report bundle.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("{what} too large: limit is {limit} bytes")]
    TooLarge { what: &'static str, limit: u64 },

    #[error("Too many files in archive: {count} (limit {limit})")]
    TooManyEntries { count: usize, limit: usize },

    #[error("Path traversal attempt detected: {0}")]
    PathTraversal(String),

    #[error("Filename too long: {0} bytes")]
    NameTooLong(usize),

    #[error("Suspicious compression ratio: {0:.2}")]
    CompressionRatio(f64),

    #[error("Unsupported file type: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, ReportError>;
