//! dmarc-intake - DMARC aggregate report intake
//!
//! Watches a reports directory, parses and validates every aggregate report dropped
//! into it, stores the result and files the source away under `processed/` or
//! `failed/`. A small HTTP API exposes what has been stored.
//!
//! `inspect` parses a single report, archive or gzip file without storing anything and
//! prints it as a table, CSV, JSON or normalized XML.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use dmarc_intake::models::{DkimAuthResult, Record, Report, SpfAuthResult};
use dmarc_intake::{
    encode_report, extract_reports, parse_report, server, Config, FileIngestor, IngestOptions,
    IngestPaths, Ingestor, MemoryStorage, PgStorage, Storage, SweepSummary, WebhookNotifier,
};
use prettytable::{row, Cell, Row, Table};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// CLI arguments for dmarc-intake.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "DMARC aggregate report intake service",
    long_about = "dmarc-intake parses, validates and stores DMARC aggregate reports dropped \
                  into a reports directory, and serves them over a small HTTP API.\n\n\
                  Configuration is read from DMARC_* environment variables and DATABASE_URL."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sweep the reports directory periodically and serve the HTTP API (default)
    Serve,
    /// Sweep the reports directory once and exit
    Sweep,
    /// Parse and validate a report file without storing it
    Inspect {
        /// Path to a DMARC report (.xml, .gz or .zip)
        #[arg(value_parser)]
        file: PathBuf,

        /// Output format: table, csv, json, xml
        #[arg(short, long, default_value = "table")]
        output: OutputFormat,
    },
}

/// Supported output formats.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum OutputFormat {
    Table,
    Csv,
    Json,
    Xml,
}

impl FromStr for OutputFormat {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "csv" => Ok(OutputFormat::Csv),
            "json" => Ok(OutputFormat::Json),
            "xml" => Ok(OutputFormat::Xml),
            _ => Err(format!("Invalid output format: {}", s)),
        }
    }
}

/// One CSV line per record.
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    report_id: &'a str,
    org_name: &'a str,
    source_ip: &'a str,
    count: i64,
    disposition: &'a str,
    policy_dkim: &'a str,
    policy_spf: &'a str,
    header_from: &'a str,
    envelope_from: &'a str,
    dkim: String,
    spf: String,
}

impl<'a> CsvRow<'a> {
    fn new(report: &'a Report, record: &'a Record) -> Self {
        CsvRow {
            report_id: report.report_id(),
            org_name: &report.report_metadata.org_name,
            source_ip: &record.row.source_ip,
            count: record.row.count,
            disposition: &record.row.policy_evaluated.disposition,
            policy_dkim: &record.row.policy_evaluated.dkim,
            policy_spf: &record.row.policy_evaluated.spf,
            header_from: &record.identifiers.header_from,
            envelope_from: &record.identifiers.envelope_from,
            dkim: format_dkim_results(&record.auth_results.dkim),
            spf: format_spf_results(&record.auth_results.spf),
        }
    }
}

/// Formats a DKIM result into a clear, human-readable string.
fn format_dkim(d: &DkimAuthResult) -> String {
    if d.selector.trim().is_empty() {
        format!("{}:{}", d.domain, d.result)
    } else {
        format!("{} (selector: {}): {}", d.domain, d.selector, d.result)
    }
}

fn format_dkim_results(results: &[DkimAuthResult]) -> String {
    let formatted: Vec<String> = results
        .iter()
        .filter(|d| !d.is_empty())
        .map(format_dkim)
        .collect();
    if formatted.is_empty() {
        "No DKIM signature".to_string()
    } else {
        formatted.join(", ")
    }
}

/// Formats an SPF result into a clear, human-readable string.
fn format_spf(spf: &SpfAuthResult) -> String {
    if spf.scope.trim().is_empty() {
        format!("{}:{}", spf.domain, spf.result)
    } else {
        format!("{} ({}): {}", spf.domain, spf.scope, spf.result)
    }
}

fn format_spf_results(results: &[SpfAuthResult]) -> String {
    let formatted: Vec<String> = results
        .iter()
        .filter(|spf| !spf.domain.trim().is_empty())
        .map(format_spf)
        .collect();
    if formatted.is_empty() {
        "No SPF record".to_string()
    } else {
        formatted.join(", ")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity.
    env_logger::Builder::from_env(env_logger::Env::default())
        .filter_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    let config = Config::new().context("Failed to load configuration")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config).await,
        Command::Sweep => {
            let summary = sweep(&config).await?;
            if summary.failed > 0 {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Inspect { file, output } => inspect(&file, output, &config),
    }
}

async fn open_storage(config: &Config) -> Result<Arc<dyn Storage>> {
    match &config.database_url {
        Some(url) => {
            let store = PgStorage::connect(url)
                .await
                .context("Failed to connect to database")?;
            log::info!("Using PostgreSQL storage");
            Ok(Arc::new(store))
        }
        None => {
            log::warn!("DATABASE_URL not set, reports are kept in memory only");
            Ok(Arc::new(MemoryStorage::new()))
        }
    }
}

async fn build_ingestor(config: &Config, store: Arc<dyn Storage>) -> Result<FileIngestor> {
    let paths = IngestPaths::new(&config.reports_dir);
    paths
        .ensure()
        .await
        .with_context(|| format!("Failed to prepare {}", config.reports_dir.display()))?;

    let mut ingestor = FileIngestor::new(paths, store).with_options(IngestOptions::from(config));
    if let Some(url) = &config.webhook_url {
        log::info!("Sending ingest outcomes to webhook: {}", url);
        let notifier = WebhookNotifier::new(url, config.webhook_timeout, config.webhook_retries)?;
        ingestor = ingestor.with_observer(Arc::new(notifier));
    }
    Ok(ingestor)
}

async fn serve(config: &Config) -> Result<()> {
    let store = open_storage(config).await?;
    let ingestor = build_ingestor(config, store.clone()).await?;

    println!(
        "{}\n{}\n",
        "dmarc-intake".bold().green(),
        format!(
            "Watching {} every {:?}",
            config.reports_dir.display(),
            config.poll_interval
        )
        .dimmed()
    );

    let interval = config.poll_interval;
    let intake = tokio::spawn(async move { ingestor.run_periodic(interval).await });

    tokio::select! {
        result = server::run(config.http_addr, store) => {
            intake.abort();
            result
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("Shutting down");
            intake.abort();
            Ok(())
        }
    }
}

async fn sweep(config: &Config) -> Result<SweepSummary> {
    let store = open_storage(config).await?;
    let ingestor = build_ingestor(config, store).await?;
    let summary = ingestor.sweep_once().await;

    println!("{}", "Sweep Summary".bold().blue());
    println!("{}", "----------------------------".dimmed());
    println!("{}: {}", "Files seen".bold(), summary.seen);
    println!("{}: {}", "Stored".bold(), summary.stored.to_string().green());
    println!("{}: {}", "Duplicates".bold(), summary.duplicates.to_string().yellow());
    let failed = summary.failed.to_string();
    println!(
        "{}: {}",
        "Failed".bold(),
        if summary.failed > 0 { failed.red() } else { failed.normal() }
    );
    Ok(summary)
}

fn inspect(file: &Path, output: OutputFormat, config: &Config) -> Result<()> {
    log::info!("Processing file: {}", file.display());
    let documents = extract_reports(file, config).context("Failed to extract file")?;

    let mut reports = Vec::with_capacity(documents.len());
    for (idx, document) in documents.iter().enumerate() {
        let report = parse_report(document)
            .with_context(|| format!("Failed to parse report {} of {}", idx + 1, documents.len()))?;
        reports.push(report);
    }

    match output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        OutputFormat::Xml => {
            for report in &reports {
                println!("{}", encode_report(report)?);
            }
        }
        OutputFormat::Csv => {
            let mut wtr = csv::Writer::from_writer(std::io::stdout());
            for report in &reports {
                for record in &report.records {
                    wtr.serialize(CsvRow::new(report, record))?;
                }
            }
            wtr.flush()?;
        }
        OutputFormat::Table => {
            for report in &reports {
                print_table(report);
            }
        }
    }
    Ok(())
}

fn print_table(report: &Report) {
    let meta = &report.report_metadata;
    let policy = &report.policy_published;
    println!("{}", "DMARC Report".bold().blue());
    println!("{}", "----------------------------".dimmed());
    println!("{}: {}", "Report ID".bold(), meta.report_id);
    println!("{}: {} <{}>", "Reporter".bold(), meta.org_name, meta.email);
    println!("{}: {} - {}", "Window".bold(), format_epoch(meta.date_range.begin), format_epoch(meta.date_range.end));
    println!("{}: {}", "Domain".bold(), policy.domain);
    println!("{}: {}", "SPF Alignment".bold(), policy.alignment_spf);
    println!("{}: {}", "DKIM Alignment".bold(), policy.alignment_dkim);
    println!("{}: {}", "Policy".bold(), policy.policy);
    println!("{}: {}\n", "Percentage Applied".bold(), policy.percentage);

    if report.records.is_empty() {
        println!("{}", "No DMARC records found.".yellow());
        return;
    }

    let mut table = Table::new();
    table.add_row(row!["Source IP", "Count", "Disposition", "SPF", "DKIM"]);
    for record in &report.records {
        table.add_row(Row::new(vec![
            Cell::new(&record.row.source_ip),
            Cell::new(&record.row.count.to_string()),
            Cell::new(&record.row.policy_evaluated.disposition),
            Cell::new(&format_spf_results(&record.auth_results.spf)),
            Cell::new(&format_dkim_results(&record.auth_results.dkim)),
        ]));
    }
    table.printstd();
}

fn format_epoch(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| secs.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parsing() {
        assert!(matches!(OutputFormat::from_str("table"), Ok(OutputFormat::Table)));
        assert!(matches!(OutputFormat::from_str("csv"), Ok(OutputFormat::Csv)));
        assert!(matches!(OutputFormat::from_str("JSON"), Ok(OutputFormat::Json)));
        assert!(matches!(OutputFormat::from_str("xml"), Ok(OutputFormat::Xml)));
        assert!(OutputFormat::from_str("invalid").is_err());
    }

    #[test]
    fn test_dkim_formatting_skips_empty_entries() {
        let results = vec![
            DkimAuthResult::default(),
            DkimAuthResult {
                domain: "example.com".into(),
                selector: "s1".into(),
                result: "pass".into(),
                human_result: String::new(),
            },
        ];
        assert_eq!(format_dkim_results(&results), "example.com (selector: s1): pass");
        assert_eq!(format_dkim_results(&[]), "No DKIM signature");
    }

    #[test]
    fn test_spf_formatting_lists_every_check() {
        let results = vec![
            SpfAuthResult {
                domain: "mx.example.com".into(),
                scope: "helo".into(),
                result: "none".into(),
                human_result: String::new(),
            },
            SpfAuthResult {
                domain: "example.com".into(),
                scope: String::new(),
                result: "pass".into(),
                human_result: String::new(),
            },
        ];
        assert_eq!(
            format_spf_results(&results),
            "mx.example.com (helo): none, example.com:pass"
        );
        assert_eq!(format_spf_results(&[]), "No SPF record");
    }

    #[test]
    fn test_format_epoch() {
        assert_eq!(format_epoch(0), "1970-01-01 00:00:00 UTC");
    }
}
