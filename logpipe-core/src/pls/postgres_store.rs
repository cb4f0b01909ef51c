use async_trait::async_trait;
use logpipe_model::{LogLevel, LogRecord, PipelineError, Result};
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, warn};

use crate::metrics::Metrics;
use crate::ports::{InsertOutcome, LogStore};
use crate::pool::TrackedPool;

/// Postgres-backed implementation of the PLS contract (spec §4.4), built on
/// a leak-tracked connection pool. Every operation runs inside a single
/// acquired session and an explicit transaction bounded to that session.
#[derive(Clone)]
pub struct PostgresLogStore {
    pool: TrackedPool,
    metrics: Metrics,
}

impl std::fmt::Debug for PostgresLogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresLogStore").finish_non_exhaustive()
    }
}

impl PostgresLogStore {
    pub fn new(pool: TrackedPool, metrics: Metrics) -> Self {
        Self { pool, metrics }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(self.pool.raw())
            .await
            .map_err(|e| PipelineError::Fatal(format!("PLS migration failed: {e}")))
    }

    pub fn pool(&self) -> &TrackedPool {
        &self.pool
    }
}

#[async_trait]
impl LogStore for PostgresLogStore {
    async fn batch_insert(&self, records: &[LogRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let _lease = self.pool.acquire().await?;
        let start = Instant::now();

        let mut tx = self.pool.raw().begin().await.map_err(PipelineError::from)?;
        let mut inserted = 0u64;

        for record in records {
            let ingest_id = record.ingest_id.ok_or_else(|| {
                PipelineError::Fatal("batch_insert requires an assigned ingest_id".into())
            })?;

            let result = sqlx::query!(
                r#"
                INSERT INTO log_records (ingest_id, device_id, log_level, message, timestamp, log_data)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (ingest_id) DO NOTHING
                "#,
                ingest_id,
                record.device_id,
                record.log_level.to_string(),
                record.message,
                record.timestamp,
                record.log_data,
            )
            .execute(&mut *tx)
            .await
            .map_err(PipelineError::from)?;

            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(PipelineError::from)?;

        let elapsed = start.elapsed();
        self.metrics
            .pls_insert_duration
            .with_label_values(&["batch"])
            .observe(elapsed.as_secs_f64());
        debug!(
            batch_len = records.len(),
            inserted,
            elapsed_ms = elapsed.as_millis(),
            "batch_insert committed"
        );

        Ok(inserted)
    }

    async fn insert_one(&self, record: &LogRecord) -> Result<InsertOutcome> {
        let _lease = self.pool.acquire().await?;

        let ingest_id = record.ingest_id.ok_or_else(|| {
            PipelineError::Fatal("insert_one requires an assigned ingest_id".into())
        })?;

        let mut tx = self.pool.raw().begin().await.map_err(PipelineError::from)?;

        let result = sqlx::query!(
            r#"
            INSERT INTO log_records (ingest_id, device_id, log_level, message, timestamp, log_data)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (ingest_id) DO NOTHING
            "#,
            ingest_id,
            record.device_id,
            record.log_level.to_string(),
            record.message,
            record.timestamp,
            record.log_data,
        )
        .execute(&mut *tx)
        .await;

        let outcome = match result {
            Ok(r) if r.rows_affected() > 0 => {
                tx.commit().await.map_err(PipelineError::from)?;
                InsertOutcome::Inserted
            }
            Ok(_) => {
                tx.commit().await.map_err(PipelineError::from)?;
                InsertOutcome::DuplicateIgnored
            }
            Err(e) => {
                tx.rollback().await.ok();
                warn!(ingest_id, error = %e, "quarantining record: insert_one failed");
                return Err(PipelineError::from(e));
            }
        };

        Ok(outcome)
    }

    async fn query_recent(&self, device_id: &str, limit: u32) -> Result<Vec<LogRecord>> {
        let _lease = self.pool.acquire().await?;
        let start = Instant::now();

        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query!(
            r#"
            SELECT ingest_id, device_id, log_level, message, timestamp, log_data
            FROM log_records
            WHERE device_id = $1
            ORDER BY timestamp DESC
            LIMIT $2
            "#,
            device_id,
            limit as i64,
        )
        .fetch_all(self.pool.raw())
        .await
        .map_err(PipelineError::from)?;

        let records = rows
            .into_iter()
            .map(|row| {
                Ok(LogRecord {
                    device_id: row.device_id,
                    log_level: LogLevel::from_str(&row.log_level)?,
                    message: row.message,
                    timestamp: row.timestamp,
                    log_data: row.log_data,
                    ingest_id: Some(row.ingest_id),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.metrics
            .pls_query_duration
            .with_label_values(&["query_recent"])
            .observe(start.elapsed().as_secs_f64());

        Ok(records)
    }

    async fn count(&self) -> Result<u64> {
        let _lease = self.pool.acquire().await?;
        let start = Instant::now();

        let row = sqlx::query!(r#"SELECT COUNT(*) AS "count!" FROM log_records"#)
            .fetch_one(self.pool.raw())
            .await
            .map_err(PipelineError::from)?;

        self.metrics
            .pls_query_duration
            .with_label_values(&["count"])
            .observe(start.elapsed().as_secs_f64());

        Ok(row.count as u64)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(self.pool.raw())
            .await
            .map_err(PipelineError::from)?;
        Ok(())
    }
}
