use axum::extract::{Path, Query, State};
use axum::Json;
use logpipe_core::{DurableQueue, LogStore};
use logpipe_model::{validate_batch_len, LogRecord, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::app_state::AppState;

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub status: &'static str,
    pub ingest_id: i64,
}

/// `POST /api/log` (spec §6): validate, enqueue, return immediately. Never
/// waits for worker processing.
pub async fn submit_log(
    State(state): State<AppState>,
    Json(record): Json<LogRecord>,
) -> Result<Json<SubmitResponse>> {
    record.validate()?;

    let ingest_id = enqueue(&state, &record).await?;
    state.metrics.ingest_total.with_label_values(&[&record.log_level.to_string()]).inc();

    Ok(Json(SubmitResponse {
        status: "queued",
        ingest_id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub logs: Vec<LogRecord>,
}

#[derive(Debug, Serialize)]
pub struct BatchOutcome {
    pub ingest_id: Option<i64>,
    pub status: &'static str,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub accepted: usize,
    pub rejected: usize,
    pub results: Vec<BatchOutcome>,
}

/// `POST /api/logs/batch` (spec §6): `1 <= len <= 1000`. Each record is
/// validated and enqueued independently; one bad record does not fail the
/// rest of the batch.
pub async fn submit_batch(
    State(state): State<AppState>,
    Json(batch): Json<BatchRequest>,
) -> Result<Json<BatchResponse>> {
    validate_batch_len(batch.logs.len())?;

    let mut results = Vec::with_capacity(batch.logs.len());
    let mut accepted = 0usize;
    let mut rejected = 0usize;

    for record in &batch.logs {
        match record.validate() {
            Ok(()) => match enqueue(&state, record).await {
                Ok(ingest_id) => {
                    accepted += 1;
                    state
                        .metrics
                        .ingest_total
                        .with_label_values(&[&record.log_level.to_string()])
                        .inc();
                    results.push(BatchOutcome {
                        ingest_id: Some(ingest_id),
                        status: "queued",
                        error: None,
                    });
                }
                Err(e) => {
                    rejected += 1;
                    results.push(BatchOutcome {
                        ingest_id: None,
                        status: "rejected",
                        error: Some(e.to_string()),
                    });
                }
            },
            Err(e) => {
                rejected += 1;
                results.push(BatchOutcome {
                    ingest_id: None,
                    status: "rejected",
                    error: Some(e.to_string()),
                });
            }
        }
    }

    info!(accepted, rejected, batch_len = batch.logs.len(), "batch submission processed");
    Ok(Json(BatchResponse {
        accepted,
        rejected,
        results,
    }))
}

async fn enqueue(state: &AppState, record: &LogRecord) -> Result<i64> {
    match state.dmq.append(record).await {
        Ok(id) => Ok(id),
        Err(e) => {
            warn!(error = %e, device_id = %record.device_id, "DMQ append failed");
            Err(e)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    100
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub source: &'static str,
    pub records: Vec<LogRecord>,
}

/// `GET /api/logs/{device_id}?limit=...` (spec §6): read-through cache over
/// the PLS. `limit` is clamped to `query_limit_max`.
pub async fn query_logs(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(params): Query<QueryParams>,
) -> Result<Json<QueryResponse>> {
    let limit = effective_limit(params.limit, state.config.query_limit_max);
    let (source, records) = state.cache.query_recent(&device_id, limit).await?;

    Ok(Json(QueryResponse {
        source: source.as_str(),
        records,
    }))
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub source: &'static str,
    pub total_records: u64,
    pub dmq_length: u64,
}

/// `GET /api/stats` (spec §6): aggregates, cached 60s.
pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let (source, total_records) = state.cache.stats().await?;
    let dmq_length = state.dmq.length().await.unwrap_or(0);

    Ok(Json(StatsResponse {
        source: source.as_str(),
        total_records,
        dmq_length,
    }))
}

/// `GET /health` (spec §6): 200 iff DMQ and PLS are both reachable.
pub async fn health(State(state): State<AppState>) -> (axum::http::StatusCode, Json<Value>) {
    use axum::http::StatusCode;

    let dmq_ok = state.dmq.ping().await.is_ok();
    let pls_ok = state.pls.ping().await.is_ok();
    let pool_stats = state.pool.stats();

    let body = json!({
        "dmq": if dmq_ok { "ok" } else { "unreachable" },
        "pls": if pls_ok { "ok" } else { "unreachable" },
        "pool": {
            "size": pool_stats.size,
            "idle": pool_stats.idle,
            "max_size": pool_stats.max_size,
        },
    });

    let status = if dmq_ok && pls_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(body))
}

/// `GET /metrics` (spec §6): the only part of the observability contract
/// implemented here — the scrape/dashboard/alerting stack remains external.
pub async fn metrics(State(state): State<AppState>) -> impl axum::response::IntoResponse {
    let _ = state.dmq.length().await;
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}


/// Extracted so the clamping rule (spec §6 `query_limit_max`) is unit
/// testable without constructing a full `AppState`.
fn effective_limit(requested: u32, max: u32) -> u32 {
    requested.min(max)
}
