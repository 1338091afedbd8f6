//! Storage Module
//!
//! Persistence for ingested reports. The ingestor and the HTTP server share one
//! `Arc<dyn Storage>`; implementations must be safe for concurrent writers.
//!
//! Writes report a [`WriteOutcome`] instead of failing on an existing key, so
//! re-submitting a report is an explicit, matchable success.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::models::{Record, Report};

pub use memory::MemoryStorage;
pub use postgres::PgStorage;

/// Result of an insert keyed on a natural key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    /// The key already existed; nothing was written.
    Duplicate,
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Stores the report header (everything but its records), keyed by `report_id`.
    async fn create_report(&self, report: &Report) -> Result<WriteOutcome, StorageError>;

    /// Stores one record of an already stored report. `ordinal` is the position of the
    /// record in its source document and, together with `report_id`, its key.
    async fn create_record(
        &self,
        report_id: &str,
        ordinal: usize,
        record: &Record,
    ) -> Result<WriteOutcome, StorageError>;

    /// The report with its records attached in ordinal order.
    async fn find_report_by_id(&self, report_id: &str) -> Result<Report, StorageError>;

    /// All report headers (records left empty), oldest reporting window first.
    async fn find_reports(&self) -> Result<Vec<Report>, StorageError>;

    async fn find_records_by_report_id(&self, report_id: &str) -> Result<Vec<Record>, StorageError>;
}
