//! In-memory storage, used by tests and when no database is configured.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{Storage, WriteOutcome};
use crate::error::StorageError;
use crate::models::{Record, Report};

/// Thread-safe map-backed storage. Records are keyed by `(report_id, ordinal)`, so a
/// BTreeMap range over one report id yields its records in document order.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    reports: RwLock<BTreeMap<String, Report>>,
    records: RwLock<BTreeMap<(String, usize), Record>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn report_count(&self) -> usize {
        self.reports.read().await.len()
    }

    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create_report(&self, report: &Report) -> Result<WriteOutcome, StorageError> {
        let mut reports = self.reports.write().await;
        let id = report.report_id();
        if reports.contains_key(id) {
            return Ok(WriteOutcome::Duplicate);
        }
        reports.insert(id.to_string(), report.header());
        Ok(WriteOutcome::Created)
    }

    async fn create_record(
        &self,
        report_id: &str,
        ordinal: usize,
        record: &Record,
    ) -> Result<WriteOutcome, StorageError> {
        if !self.reports.read().await.contains_key(report_id) {
            return Err(StorageError::Backend(format!(
                "record {} references unknown report {}",
                ordinal, report_id
            )));
        }
        let mut records = self.records.write().await;
        let key = (report_id.to_string(), ordinal);
        if records.contains_key(&key) {
            return Ok(WriteOutcome::Duplicate);
        }
        records.insert(key, record.clone());
        Ok(WriteOutcome::Created)
    }

    async fn find_report_by_id(&self, report_id: &str) -> Result<Report, StorageError> {
        let mut report = self
            .reports
            .read()
            .await
            .get(report_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("report {}", report_id)))?;
        report.records = self.find_records_by_report_id(report_id).await?;
        Ok(report)
    }

    async fn find_reports(&self) -> Result<Vec<Report>, StorageError> {
        let mut reports: Vec<Report> = self.reports.read().await.values().cloned().collect();
        reports.sort_by(|a, b| {
            a.report_metadata
                .date_range
                .begin
                .cmp(&b.report_metadata.date_range.begin)
                .then_with(|| a.report_id().cmp(b.report_id()))
        });
        Ok(reports)
    }

    async fn find_records_by_report_id(&self, report_id: &str) -> Result<Vec<Record>, StorageError> {
        let records = self.records.read().await;
        let start = (report_id.to_string(), 0);
        let end = (report_id.to_string(), usize::MAX);
        Ok(records.range(start..=end).map(|(_, record)| record.clone()).collect())
    }
}
