//! PostgreSQL storage via SQLx.
//!
//! Reports and records live in two tables (see `migrations/`). Inserts use
//! `ON CONFLICT DO NOTHING`, and zero affected rows is reported as
//! [`WriteOutcome::Duplicate`]; this stays correct when several writers race on the
//! same key. DKIM and SPF results are kept as JSON arrays in text columns since a
//! record may carry any number of either.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use super::{Storage, WriteOutcome};
use crate::error::StorageError;
use crate::models::{
    AuthResults, DateRange, DkimAuthResult, Identifiers, PolicyEvaluated, PolicyPublished, Record,
    Report, ReportMetadata, Row, SpfAuthResult,
};

#[derive(Debug, Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `url` and applies the embedded migrations.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await?;
        log::info!("Connected to PostgreSQL");
        sqlx::migrate!("./migrations").run(&pool).await?;
        log::info!("Database migrations applied");
        Ok(Self::new(pool))
    }
}

#[derive(sqlx::FromRow)]
struct ReportRow {
    report_id: String,
    version: String,
    org_name: String,
    email: String,
    extra_contact_info: String,
    date_range_begin: i64,
    date_range_end: i64,
    domain: String,
    adkim: String,
    aspf: String,
    p: String,
    sp: String,
    pct: i64,
    fo: String,
}

impl From<ReportRow> for Report {
    fn from(row: ReportRow) -> Self {
        Report {
            version: row.version,
            report_metadata: ReportMetadata {
                org_name: row.org_name,
                email: row.email,
                extra_contact_info: row.extra_contact_info,
                report_id: row.report_id,
                date_range: DateRange {
                    begin: row.date_range_begin,
                    end: row.date_range_end,
                },
            },
            policy_published: PolicyPublished {
                domain: row.domain,
                alignment_dkim: row.adkim,
                alignment_spf: row.aspf,
                policy: row.p,
                subdomain_policy: row.sp,
                percentage: row.pct,
                failure_options: row.fo,
            },
            records: Vec::new(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    source_ip: String,
    count: i64,
    disposition: String,
    policy_dkim: String,
    policy_spf: String,
    envelope_to: String,
    envelope_from: String,
    header_from: String,
    dkim_results: String,
    spf_results: String,
}

impl RecordRow {
    fn into_record(self) -> Result<Record, StorageError> {
        let dkim: Vec<DkimAuthResult> = serde_json::from_str(&self.dkim_results)?;
        let spf: Vec<SpfAuthResult> = serde_json::from_str(&self.spf_results)?;
        Ok(Record {
            row: Row {
                source_ip: self.source_ip,
                count: self.count,
                policy_evaluated: PolicyEvaluated {
                    disposition: self.disposition,
                    dkim: self.policy_dkim,
                    spf: self.policy_spf,
                },
            },
            identifiers: Identifiers {
                envelope_to: self.envelope_to,
                envelope_from: self.envelope_from,
                header_from: self.header_from,
            },
            auth_results: AuthResults { dkim, spf },
        })
    }
}

const REPORT_COLUMNS: &str = "report_id, version, org_name, email, extra_contact_info, \
     date_range_begin, date_range_end, domain, adkim, aspf, p, sp, pct, fo";

fn outcome(rows_affected: u64) -> WriteOutcome {
    if rows_affected == 0 {
        WriteOutcome::Duplicate
    } else {
        WriteOutcome::Created
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn create_report(&self, report: &Report) -> Result<WriteOutcome, StorageError> {
        let meta = &report.report_metadata;
        let policy = &report.policy_published;
        let result = sqlx::query(
            "INSERT INTO reports (report_id, version, org_name, email, extra_contact_info,
                date_range_begin, date_range_end, domain, adkim, aspf, p, sp, pct, fo)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
             ON CONFLICT (report_id) DO NOTHING",
        )
        .bind(&meta.report_id)
        .bind(&report.version)
        .bind(&meta.org_name)
        .bind(&meta.email)
        .bind(&meta.extra_contact_info)
        .bind(meta.date_range.begin)
        .bind(meta.date_range.end)
        .bind(&policy.domain)
        .bind(&policy.alignment_dkim)
        .bind(&policy.alignment_spf)
        .bind(&policy.policy)
        .bind(&policy.subdomain_policy)
        .bind(policy.percentage)
        .bind(&policy.failure_options)
        .execute(&self.pool)
        .await?;
        Ok(outcome(result.rows_affected()))
    }

    async fn create_record(
        &self,
        report_id: &str,
        ordinal: usize,
        record: &Record,
    ) -> Result<WriteOutcome, StorageError> {
        let ordinal = i32::try_from(ordinal)
            .map_err(|_| StorageError::Backend(format!("record ordinal {} out of range", ordinal)))?;
        let dkim_results = serde_json::to_string(&record.auth_results.dkim)?;
        let spf_results = serde_json::to_string(&record.auth_results.spf)?;
        let row = &record.row;
        let ids = &record.identifiers;
        let result = sqlx::query(
            "INSERT INTO report_records (report_id, ordinal, source_ip, count, disposition,
                policy_dkim, policy_spf, envelope_to, envelope_from, header_from, dkim_results,
                spf_results)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT (report_id, ordinal) DO NOTHING",
        )
        .bind(report_id)
        .bind(ordinal)
        .bind(&row.source_ip)
        .bind(row.count)
        .bind(&row.policy_evaluated.disposition)
        .bind(&row.policy_evaluated.dkim)
        .bind(&row.policy_evaluated.spf)
        .bind(&ids.envelope_to)
        .bind(&ids.envelope_from)
        .bind(&ids.header_from)
        .bind(&dkim_results)
        .bind(&spf_results)
        .execute(&self.pool)
        .await?;
        Ok(outcome(result.rows_affected()))
    }

    async fn find_report_by_id(&self, report_id: &str) -> Result<Report, StorageError> {
        let row = sqlx::query_as::<_, ReportRow>(&format!(
            "SELECT {} FROM reports WHERE report_id = $1",
            REPORT_COLUMNS
        ))
        .bind(report_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StorageError::NotFound(format!("report {}", report_id)))?;

        let mut report = Report::from(row);
        report.records = self.find_records_by_report_id(report_id).await?;
        Ok(report)
    }

    async fn find_reports(&self) -> Result<Vec<Report>, StorageError> {
        let rows = sqlx::query_as::<_, ReportRow>(&format!(
            "SELECT {} FROM reports ORDER BY date_range_begin, report_id",
            REPORT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Report::from).collect())
    }

    async fn find_records_by_report_id(&self, report_id: &str) -> Result<Vec<Record>, StorageError> {
        let rows = sqlx::query_as::<_, RecordRow>(
            "SELECT source_ip, count, disposition, policy_dkim, policy_spf, envelope_to,
                envelope_from, header_from, dkim_results, spf_results
             FROM report_records WHERE report_id = $1 ORDER BY ordinal",
        )
        .bind(report_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(RecordRow::into_record).collect()
    }
}
