//! HTTP Server Module
//!
//! Read-only query API over the report store, plus a health probe.
use crate::error::StorageError;
use crate::storage::Storage;
use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;

pub type AppState = Arc<dyn Storage>;

pub fn create_app(store: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/reports", get(list_reports))
        .route("/reports/{report_id}", get(get_report))
        .with_state(store)
}

/// Serves the API until the listener fails.
pub async fn run(addr: SocketAddr, store: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    log::info!("HTTP server listening on {}", addr);
    axum::serve(listener, create_app(store))
        .await
        .context("HTTP server error")
}

async fn health() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "OK" })))
}

async fn list_reports(State(store): State<AppState>) -> (StatusCode, Json<Value>) {
    match store.find_reports().await {
        Ok(reports) => (StatusCode::OK, Json(json!(reports))),
        Err(e) => storage_failure(e),
    }
}

async fn get_report(
    State(store): State<AppState>,
    Path(report_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    match store.find_report_by_id(&report_id).await {
        Ok(report) => (StatusCode::OK, Json(json!(report))),
        Err(StorageError::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("report {} not found", report_id) })),
        ),
        Err(e) => storage_failure(e),
    }
}

fn storage_failure(e: StorageError) -> (StatusCode, Json<Value>) {
    log::error!("Query failed: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Record, Report};
    use crate::storage::{MemoryStorage, WriteOutcome};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn report(id: &str, begin: i64) -> Report {
        let mut report = Report::default();
        report.report_metadata.report_id = id.into();
        report.report_metadata.org_name = "receiver.example".into();
        report.report_metadata.date_range.begin = begin;
        report.report_metadata.date_range.end = begin + 86399;
        report.policy_published.domain = "example.com".into();
        report
    }

    struct Broken;

    #[async_trait]
    impl Storage for Broken {
        async fn create_report(&self, _: &Report) -> Result<WriteOutcome, StorageError> {
            Err(StorageError::Backend("connection refused".into()))
        }
        async fn create_record(&self, _: &str, _: usize, _: &Record) -> Result<WriteOutcome, StorageError> {
            Err(StorageError::Backend("connection refused".into()))
        }
        async fn find_report_by_id(&self, _: &str) -> Result<Report, StorageError> {
            Err(StorageError::Backend("connection refused".into()))
        }
        async fn find_reports(&self) -> Result<Vec<Report>, StorageError> {
            Err(StorageError::Backend("connection refused".into()))
        }
        async fn find_records_by_report_id(&self, _: &str) -> Result<Vec<Record>, StorageError> {
            Err(StorageError::Backend("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_app(Arc::new(MemoryStorage::new()));
        let (status, body) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "OK" }));
    }

    #[tokio::test]
    async fn test_list_and_fetch_reports() {
        let store = Arc::new(MemoryStorage::new());
        store.create_report(&report("b", 200)).await.unwrap();
        store.create_report(&report("a", 100)).await.unwrap();
        let mut record = Record::default();
        record.row.source_ip = "192.0.2.1".into();
        record.row.count = 4;
        store.create_record("b", 0, &record).await.unwrap();

        let (status, body) = get_json(create_app(store.clone()), "/reports").await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["report_metadata"]["report_id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);

        let (status, body) = get_json(create_app(store), "/reports/b").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["report_metadata"]["report_id"], "b");
        assert_eq!(body["record"][0]["row"]["source_ip"], "192.0.2.1");
        assert_eq!(body["record"][0]["row"]["count"], 4);
    }

    #[tokio::test]
    async fn test_unknown_report_is_404() {
        let app = create_app(Arc::new(MemoryStorage::new()));
        let (status, body) = get_json(app, "/reports/missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn test_storage_failure_is_500() {
        let (status, body) = get_json(create_app(Arc::new(Broken)), "/reports").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "storage error: connection refused");

        let (status, _) = get_json(create_app(Arc::new(Broken)), "/reports/x").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
