//! dmarc-intake Library
//!
//! This library provides the core functionality for dmarc-intake: parsing and validating
//! DMARC aggregate reports, storing them, and the file ingestor that moves report files
//! through an intake directory. Configuration, archive extraction, webhook notification
//! and the query server are built on top of that core.

pub mod archive;
pub mod config;
pub mod error;
pub mod ingest;
pub mod models;
pub mod parser;
pub mod server;
pub mod storage;
pub mod validate;
pub mod webhook;

pub use archive::extract_reports;
pub use config::Config;
pub use error::{ArchiveError, IngestError, ReportError, StorageError, ValidationError};
pub use ingest::{FileIngestor, IngestOptions, IngestPaths, Ingestor, SweepSummary};
pub use models::Report;
pub use parser::{encode_report, parse_report};
pub use storage::{MemoryStorage, PgStorage, Storage, WriteOutcome};
pub use validate::validate_report;
pub use webhook::WebhookNotifier;
