//! Ingest Module
//!
//! File-based report intake. An [`IngestPaths`] root holds unprocessed `*.xml`
//! reports; [`FileIngestor`] sweeps it, parses and stores every report, and renames each
//! file into `failed/` or `processed/` depending on the outcome.
//!
//! Sweeps on one ingestor are serialized: a sweep that starts while another is running
//! waits for it and then runs over whatever is left in the intake directory. Within a
//! sweep files are independent and up to `concurrency` of them are in flight at once.
//! Every failure stays at file granularity; nothing is returned from a sweep except a
//! [`SweepSummary`].

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::IngestError;
use crate::models::Report;
use crate::parser::parse_report;
use crate::storage::{Storage, WriteOutcome};

pub const FAILED_DIR: &str = "failed";
pub const PROCESSED_DIR: &str = "processed";
const REPORT_EXTENSION: &str = "xml";
const SIDECAR_EXTENSION: &str = "error";

/// Directory layout for one intake root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestPaths {
    intake: PathBuf,
    failed: PathBuf,
    processed: PathBuf,
}

impl IngestPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let intake = root.into();
        Self {
            failed: intake.join(FAILED_DIR),
            processed: intake.join(PROCESSED_DIR),
            intake,
        }
    }

    pub fn intake(&self) -> &Path {
        &self.intake
    }

    pub fn failed(&self) -> &Path {
        &self.failed
    }

    pub fn processed(&self) -> &Path {
        &self.processed
    }

    /// Creates the three directories if they are missing. Safe to call repeatedly.
    pub async fn ensure(&self) -> io::Result<()> {
        for dir in [&self.intake, &self.failed, &self.processed] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                log::error!("Failed to create directory {}: {}", dir.display(), e);
                e
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub max_file_size: u64,
    pub concurrency: usize,
    /// Bound on each file read and each storage call.
    pub operation_timeout: Duration,
    /// Write `failed/<name>.error` with the failure reason next to a failed file.
    pub failure_sidecar: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            concurrency: 4,
            operation_timeout: Duration::from_secs(30),
            failure_sidecar: false,
        }
    }
}

impl From<&Config> for IngestOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_file_size: config.max_file_size as u64,
            concurrency: config.sweep_concurrency,
            operation_timeout: config.operation_timeout,
            failure_sidecar: config.failure_sidecar,
        }
    }
}

/// What a successfully ingested file wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingested {
    pub report_id: String,
    pub report: WriteOutcome,
    pub records_created: usize,
    pub records_duplicate: usize,
}

impl Ingested {
    /// Nothing new was written: the report and every record were already stored.
    pub fn is_duplicate(&self) -> bool {
        self.report == WriteOutcome::Duplicate && self.records_created == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub seen: usize,
    pub stored: usize,
    pub duplicates: usize,
    pub failed: usize,
}

impl SweepSummary {
    fn add(&mut self, result: &Result<Ingested, IngestError>) {
        self.seen += 1;
        match result {
            Ok(ingested) if ingested.is_duplicate() => self.duplicates += 1,
            Ok(_) => self.stored += 1,
            Err(_) => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOutcome {
    Stored,
    Duplicate,
    Failed,
}

/// Per-file notification handed to every [`IngestObserver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEvent {
    pub file: String,
    pub outcome: FileOutcome,
    pub report_id: Option<String>,
    pub error: Option<String>,
}

impl FileEvent {
    fn new(file: &str, result: &Result<Ingested, IngestError>) -> Self {
        match result {
            Ok(ingested) => FileEvent {
                file: file.to_string(),
                outcome: if ingested.is_duplicate() {
                    FileOutcome::Duplicate
                } else {
                    FileOutcome::Stored
                },
                report_id: Some(ingested.report_id.clone()),
                error: None,
            },
            Err(err) => FileEvent {
                file: file.to_string(),
                outcome: FileOutcome::Failed,
                report_id: match err {
                    IngestError::PartialWrite { report_id, .. } => Some(report_id.clone()),
                    _ => None,
                },
                error: Some(err.to_string()),
            },
        }
    }
}

/// Side channel for per-file outcomes. Observers must not fail the ingest; they log
/// their own errors.
#[async_trait]
pub trait IngestObserver: Send + Sync {
    async fn on_file(&self, event: &FileEvent);
}

/// A source of reports that can be swept once, fed a single item, or polled forever.
#[async_trait]
pub trait Ingestor: Send + Sync {
    async fn sweep_once(&self) -> SweepSummary;

    async fn process_one(&self, path: &Path) -> Result<Ingested, IngestError>;

    /// Sweeps, sleeps `interval`, repeats. Never returns; stop it by dropping or
    /// aborting the task that runs it.
    async fn run_periodic(&self, interval: Duration) {
        loop {
            self.sweep_once().await;
            tokio::time::sleep(interval).await;
        }
    }
}

pub struct FileIngestor {
    paths: IngestPaths,
    store: Arc<dyn Storage>,
    options: IngestOptions,
    observers: Vec<Arc<dyn IngestObserver>>,
    sweep_lock: Mutex<()>,
}

impl FileIngestor {
    /// Builds an ingestor over existing directories; see [`IngestPaths::ensure`].
    pub fn new(paths: IngestPaths, store: Arc<dyn Storage>) -> Self {
        Self {
            paths,
            store,
            options: IngestOptions::default(),
            observers: Vec::new(),
            sweep_lock: Mutex::new(()),
        }
    }

    pub fn with_options(mut self, options: IngestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn IngestObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn paths(&self) -> &IngestPaths {
        &self.paths
    }

    /// `*.xml` regular files directly under the intake directory, sorted by name.
    async fn candidates(&self) -> io::Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(self.paths.intake()).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(REPORT_EXTENSION) {
                continue;
            }
            if is_regular_file(&path, entry.file_type().await) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    async fn bounded<T, E, F>(&self, operation: &'static str, fut: F) -> Result<T, IngestError>
    where
        F: Future<Output = Result<T, E>>,
        IngestError: From<E>,
    {
        match tokio::time::timeout(self.options.operation_timeout, fut).await {
            Ok(result) => result.map_err(IngestError::from),
            Err(_) => Err(IngestError::Timeout { operation }),
        }
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>, IngestError> {
        let size = self.bounded("read metadata", tokio::fs::metadata(path)).await?.len();
        if size > self.options.max_file_size {
            return Err(IngestError::FileTooLarge {
                size,
                limit: self.options.max_file_size,
            });
        }
        self.bounded("read file", tokio::fs::read(path)).await
    }

    /// Stores the report, then every record. Duplicates at either level count as
    /// success so a resubmitted file, or one that previously failed half way, completes.
    async fn store(&self, report: &Report) -> Result<Ingested, IngestError> {
        let report_id = report.report_id();
        log::info!("Saving report {}", report_id);
        let outcome = self
            .bounded("create report", self.store.create_report(report))
            .await?;
        if outcome == WriteOutcome::Duplicate {
            log::info!("Report with ID {} already exists", report_id);
        }

        let mut ingested = Ingested {
            report_id: report_id.to_string(),
            report: outcome,
            records_created: 0,
            records_duplicate: 0,
        };
        for (ordinal, record) in report.records.iter().enumerate() {
            let written = self
                .bounded(
                    "create record",
                    self.store.create_record(report_id, ordinal, record),
                )
                .await;
            match written {
                Ok(WriteOutcome::Created) => ingested.records_created += 1,
                Ok(WriteOutcome::Duplicate) => ingested.records_duplicate += 1,
                Err(err) => {
                    return Err(IngestError::PartialWrite {
                        report_id: report_id.to_string(),
                        ordinal,
                        source: Box::new(err),
                    })
                }
            }
        }
        log::info!(
            "Saved report {} ({} records new, {} already stored)",
            report_id,
            ingested.records_created,
            ingested.records_duplicate
        );
        Ok(ingested)
    }

    async fn ingest(&self, path: &Path) -> Result<Ingested, IngestError> {
        let data = self.read(path).await?;
        let report = parse_report(&data)?;
        self.store(&report).await
    }

    async fn relocate(&self, path: &Path, name: &str, dir: &Path) -> Result<(), IngestError> {
        let to = dir.join(name);
        tokio::fs::rename(path, &to)
            .await
            .map_err(|source| IngestError::Relocate { to, source })
    }

    fn sidecar_path(&self, name: &str) -> PathBuf {
        self.paths
            .failed()
            .join(format!("{}.{}", name, SIDECAR_EXTENSION))
    }

    async fn write_sidecar(&self, name: &str, err: &IngestError) {
        let path = self.sidecar_path(name);
        if let Err(e) = tokio::fs::write(&path, format!("{}\n", err)).await {
            log::warn!("Failed to write failure reason {}: {}", path.display(), e);
        }
    }

    /// Drops the failure reason left by an earlier attempt at the same file.
    async fn clear_sidecar(&self, name: &str) {
        let path = self.sidecar_path(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => log::debug!("Removed stale failure reason {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove failure reason {}: {}", path.display(), e),
        }
    }
}

/// An entry whose type cannot be read is logged and skipped so the rest of the
/// listing still gets swept.
fn is_regular_file(path: &Path, file_type: io::Result<std::fs::FileType>) -> bool {
    match file_type {
        Ok(file_type) => file_type.is_file(),
        Err(e) => {
            log::warn!("Skipping {}: {}", path.display(), e);
            false
        }
    }
}

#[async_trait]
impl Ingestor for FileIngestor {
    async fn sweep_once(&self) -> SweepSummary {
        let _guard = self.sweep_lock.lock().await;

        let files = match self.candidates().await {
            Ok(files) => files,
            Err(e) => {
                log::error!(
                    "Failed to list reports path {}: {}",
                    self.paths.intake().display(),
                    e
                );
                return SweepSummary::default();
            }
        };
        let total = files.len();
        if total == 0 {
            log::debug!("No reports waiting in {}", self.paths.intake().display());
            return SweepSummary::default();
        }

        let mut results = stream::iter(files.into_iter().enumerate())
            .map(|(idx, file)| async move {
                log::info!("[{}/{}] Processing file {}", idx + 1, total, file.display());
                self.process_one(&file).await
            })
            .buffer_unordered(self.options.concurrency.max(1));

        let mut summary = SweepSummary::default();
        while let Some(result) = results.next().await {
            summary.add(&result);
        }
        log::info!(
            "Sweep finished: {} files, {} stored, {} duplicates, {} failed",
            summary.seen,
            summary.stored,
            summary.duplicates,
            summary.failed
        );
        summary
    }

    async fn process_one(&self, path: &Path) -> Result<Ingested, IngestError> {
        let name = match path.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => {
                return Err(IngestError::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} does not name a file", path.display()),
                )))
            }
        };

        let mut result = self.ingest(path).await;
        let destination = match result {
            Ok(_) => self.paths.processed(),
            Err(_) => self.paths.failed(),
        };
        if let Err(e) = self.relocate(path, &name, destination).await {
            log::error!("Failed to move file {}: {}", name, e);
            if result.is_ok() {
                result = Err(e);
            }
        }

        match &result {
            Ok(ingested) => {
                if ingested.is_duplicate() {
                    log::info!("File {} holds already stored report {}", name, ingested.report_id);
                } else {
                    log::info!("File {} stored as report {}", name, ingested.report_id);
                }
                self.clear_sidecar(&name).await;
            }
            Err(err) => {
                log::error!("Failed to process file {}: {}", name, err);
                if self.options.failure_sidecar {
                    self.write_sidecar(&name, err).await;
                }
            }
        }

        let event = FileEvent::new(&name, &result);
        for observer in &self.observers {
            observer.on_file(&event).await;
        }
        result
    }
}
