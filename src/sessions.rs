//! Session and metrics recording for mapping runs.
//!
//! A mapping session groups the work done between a source and target
//! endpoint; execution metrics hang off the session as numeric or
//! categorical recordings for later analysis. Per-job aggregates live in
//! `PersistenceService::get_job_metrics`; this recorder covers everything
//! that outlives a single job.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use crate::cache::CacheError;
use crate::types::PathStatus;

/// One recorded metric.
#[derive(Clone, Debug)]
pub struct MetricRow {
    pub id: i64,
    pub session_id: i64,
    pub metric_name: String,
    pub numeric_value: Option<f64>,
    pub string_value: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// A `mapping_sessions` row.
#[derive(Clone, Debug)]
pub struct SessionRow {
    pub id: i64,
    pub source_endpoint: String,
    pub target_endpoint: String,
    pub parameters: Option<Value>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: String,
    pub results_count: i64,
    pub error_message: Option<String>,
}

pub struct SessionRecorder {
    pool: SqlitePool,
}

impl SessionRecorder {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a mapping session; returns its id.
    #[instrument(skip(self, parameters), err)]
    pub async fn create_session(
        &self,
        source_endpoint: &str,
        target_endpoint: &str,
        parameters: &Value,
    ) -> Result<i64, CacheError> {
        let result = sqlx::query(
            r#"
            INSERT INTO mapping_sessions (
                source_endpoint, target_endpoint, parameters, start_time, status
            ) VALUES (?1, ?2, ?3, ?4, 'running')
            "#,
        )
        .bind(source_endpoint)
        .bind(target_endpoint)
        .bind(parameters.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::Storage {
            message: e.to_string(),
        })?;
        Ok(result.last_insert_rowid())
    }

    /// Close a session with its final status and result count.
    #[instrument(skip(self), err)]
    pub async fn complete_session(
        &self,
        session_id: i64,
        status: PathStatus,
        results_count: i64,
        error_message: Option<&str>,
    ) -> Result<(), CacheError> {
        sqlx::query(
            r#"
            UPDATE mapping_sessions
            SET status = ?2, end_time = ?3, results_count = ?4, error_message = ?5
            WHERE id = ?1
            "#,
        )
        .bind(session_id)
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(results_count)
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::Storage {
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Record one metric against a session. Either a numeric value, a
    /// categorical string, or both.
    pub async fn record_metric(
        &self,
        session_id: i64,
        metric_name: &str,
        numeric_value: Option<f64>,
        string_value: Option<&str>,
    ) -> Result<(), CacheError> {
        sqlx::query(
            r#"
            INSERT INTO execution_metrics (
                session_id, metric_name, numeric_value, string_value, recorded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(session_id)
        .bind(metric_name)
        .bind(numeric_value)
        .bind(string_value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::Storage {
            message: e.to_string(),
        })?;
        Ok(())
    }

    pub async fn get_session(&self, session_id: i64) -> Result<Option<SessionRow>, CacheError> {
        let row = sqlx::query("SELECT * FROM mapping_sessions WHERE id = ?1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CacheError::Retrieval {
                message: e.to_string(),
            })?;
        Ok(row.map(|row| SessionRow {
            id: row.get("id"),
            source_endpoint: row.get("source_endpoint"),
            target_endpoint: row.get("target_endpoint"),
            parameters: row
                .get::<Option<String>, _>("parameters")
                .and_then(|raw| serde_json::from_str(&raw).ok()),
            start_time: row.get("start_time"),
            end_time: row.get("end_time"),
            status: row.get("status"),
            results_count: row.get("results_count"),
            error_message: row.get("error_message"),
        }))
    }

    pub async fn session_metrics(&self, session_id: i64) -> Result<Vec<MetricRow>, CacheError> {
        let rows = sqlx::query(
            "SELECT * FROM execution_metrics WHERE session_id = ?1 ORDER BY recorded_at",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CacheError::Retrieval {
            message: e.to_string(),
        })?;
        Ok(rows
            .into_iter()
            .map(|row| MetricRow {
                id: row.get("id"),
                session_id: row.get("session_id"),
                metric_name: row.get("metric_name"),
                numeric_value: row.get("numeric_value"),
                string_value: row.get("string_value"),
                recorded_at: row.get("recorded_at"),
            })
            .collect())
    }
}
