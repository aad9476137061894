//! Cache manager over the `entity_mappings` and `path_execution_logs`
//! tables.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use crate::paths::{PathResult, PathView};
use crate::types::{MappingDirection, MappingSource, PathStatus};

use super::confidence::derive_confidence;
use super::{determine_mapping_source, CacheError, Result};

/// One decoded `entity_mappings` row, before materialization into a
/// [`PathResult`].
#[derive(Clone, Debug)]
pub struct CachedMapping {
    pub source_id: String,
    pub target_identifiers: Vec<String>,
    pub confidence_score: Option<f64>,
    pub hop_count: Option<u32>,
    pub mapping_direction: Option<MappingDirection>,
    pub mapping_path_details: Option<Value>,
}

pub struct CacheManager {
    pool: SqlitePool,
}

impl CacheManager {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Look up cached mappings for `ids`.
    ///
    /// Returns `(cached, uncached)`: hits materialized into the same result
    /// shape the path runner produces (with `cached: true`), and the ids
    /// that still need computing. When `path_id` is given, rows whose
    /// `mapping_path_details.path_id` differs are dropped after the query —
    /// the path id lives inside the JSON detail blob, not in a column.
    /// When `expiry_time` is given, only rows updated at or after it count.
    #[instrument(skip(self, ids), fields(requested = ids.len()), err)]
    pub async fn check_cache(
        &self,
        ids: &[String],
        source_type: &str,
        target_type: &str,
        path_id: Option<i64>,
        expiry_time: Option<DateTime<Utc>>,
    ) -> Result<(FxHashMap<String, PathResult>, Vec<String>)> {
        if ids.is_empty() {
            return Ok((FxHashMap::default(), Vec::new()));
        }

        let placeholders: Vec<String> = (0..ids.len()).map(|i| format!("?{}", i + 3)).collect();
        let mut sql = format!(
            "SELECT * FROM entity_mappings \
             WHERE source_type = ?1 AND target_type = ?2 \
               AND source_id IN ({})",
            placeholders.join(", ")
        );
        if expiry_time.is_some() {
            sql.push_str(&format!(" AND last_updated >= ?{}", ids.len() + 3));
        }

        let mut query = sqlx::query(&sql).bind(source_type).bind(target_type);
        for id in ids {
            query = query.bind(id);
        }
        if let Some(expiry) = expiry_time {
            query = query.bind(expiry);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CacheError::Retrieval {
                message: e.to_string(),
            })?;

        let mut cached: FxHashMap<String, PathResult> = FxHashMap::default();
        for row in rows {
            let details_raw: Option<String> = row.get("mapping_path_details");
            let details: Option<Value> =
                details_raw.and_then(|raw| serde_json::from_str(&raw).ok());

            if let Some(wanted) = path_id {
                let stored = details
                    .as_ref()
                    .and_then(|d| d.get("path_id"))
                    .and_then(Value::as_i64);
                if stored != Some(wanted) {
                    continue;
                }
            }

            let source_id: String = row.get("source_id");
            let target_id: String = row.get("target_id");
            let targets = decode_target_id(&target_id);
            let confidence: Option<f64> = row.get("confidence_score");
            let hop_count = row
                .get::<Option<i64>, _>("hop_count")
                .map(|h| h as u32);
            let direction = row
                .get::<Option<String>, _>("mapping_direction")
                .and_then(|d| MappingDirection::parse(&d))
                .unwrap_or(MappingDirection::Forward);
            let mapping_source = row
                .get::<Option<String>, _>("mapping_source")
                .and_then(|s| MappingSource::parse(&s));

            // A source id may hold several rows (one per target); merge the
            // target lists into a single result.
            match cached.get_mut(&source_id) {
                Some(existing) => {
                    if let Some(list) = existing.target_identifiers.as_mut() {
                        for target in targets {
                            if !list.contains(&target) {
                                list.push(target);
                            }
                        }
                    }
                }
                None => {
                    cached.insert(
                        source_id.clone(),
                        PathResult {
                            source_identifier: source_id.clone(),
                            mapped_value: targets.first().cloned(),
                            target_identifiers: Some(targets),
                            status: PathStatus::Success,
                            message: "Found in cache.".to_string(),
                            // Stored value when present; 0.8 only when the
                            // column is null.
                            confidence_score: confidence.unwrap_or(0.8),
                            hop_count,
                            mapping_direction: direction,
                            mapping_path_details: details,
                            mapping_source,
                            error_details: None,
                            provenance: Vec::new(),
                            cached: true,
                            explicit_confidence: confidence,
                            additional_metadata: None,
                        },
                    );
                }
            }
        }

        if !cached.is_empty() {
            let hit_ids: Vec<String> = cached.keys().cloned().collect();
            let placeholders: Vec<String> =
                (0..hit_ids.len()).map(|i| format!("?{}", i + 3)).collect();
            let bump = format!(
                "UPDATE entity_mappings SET usage_count = usage_count + 1 \
                 WHERE source_type = ?1 AND target_type = ?2 AND source_id IN ({})",
                placeholders.join(", ")
            );
            let mut query = sqlx::query(&bump).bind(source_type).bind(target_type);
            for id in &hit_ids {
                query = query.bind(id);
            }
            let _ = query.execute(&self.pool).await;
        }

        let uncached: Vec<String> = ids
            .iter()
            .filter(|id| !cached.contains_key(*id))
            .cloned()
            .collect();

        tracing::debug!(
            hits = cached.len(),
            misses = uncached.len(),
            "cache check complete"
        );
        Ok((cached, uncached))
    }

    /// Store path results in the cache: one `entity_mappings` row per
    /// non-null target, plus one `path_execution_logs` row for the attempt.
    ///
    /// Duplicate rows (same four-tuple) are absorbed silently — a second
    /// writer producing the same mapping is acceptable. Returns the path
    /// log id, or `None` when there was nothing to store.
    #[instrument(skip(self, results, view), fields(path = view.name()), err)]
    pub async fn store_mapping_results(
        &self,
        results: &FxHashMap<String, PathResult>,
        view: &PathView,
        source_type: &str,
        target_type: &str,
    ) -> Result<Option<i64>> {
        if results.is_empty() {
            tracing::debug!("no results to cache");
            return Ok(None);
        }

        let representative = results.keys().next().cloned().unwrap_or_default();
        let log_id = self
            .create_path_execution_log(view.id(), PathStatus::Pending, &representative, source_type)
            .await?;

        let hop_count = view.hop_count();
        let direction = view.direction();
        let resources = view.step_resources();
        let mapping_source = determine_mapping_source(&resources);
        let now = Utc::now();

        let mut stored = 0usize;
        for (source_id, result) in results {
            let Some(targets) = &result.target_identifiers else {
                continue;
            };
            let valid: Vec<&String> = targets.iter().filter(|t| !t.is_empty()).collect();
            if valid.is_empty() {
                continue;
            }

            let confidence = derive_confidence(
                result.explicit_confidence,
                Some(hop_count),
                view.is_reverse(),
                &resources,
            );
            let details = result
                .mapping_path_details
                .clone()
                .unwrap_or_else(|| {
                    PathResult::build_path_details(view, result.additional_metadata.as_ref())
                });
            let details_json = details.to_string();

            for target_id in valid {
                let outcome = sqlx::query(
                    r#"
                    INSERT INTO entity_mappings (
                        source_id, source_type, target_id, target_type,
                        confidence_score, mapping_source, hop_count,
                        mapping_direction, mapping_path_details, last_updated
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                    ON CONFLICT (source_id, source_type, target_id, target_type)
                    DO NOTHING
                    "#,
                )
                .bind(source_id)
                .bind(source_type)
                .bind(target_id)
                .bind(target_type)
                .bind(confidence)
                .bind(mapping_source.as_str())
                .bind(i64::from(hop_count))
                .bind(direction.as_str())
                .bind(&details_json)
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(|e| CacheError::Storage {
                    message: e.to_string(),
                })?;
                if outcome.rows_affected() == 0 {
                    tracing::warn!(
                        source_id = %source_id,
                        target_id = %target_id,
                        "duplicate entity mapping absorbed"
                    );
                } else {
                    stored += 1;
                }
            }
        }

        let final_status = if stored > 0 {
            PathStatus::Success
        } else {
            PathStatus::NoMappingFound
        };
        self.finish_path_execution_log(log_id, final_status, None)
            .await?;

        tracing::info!(
            stored,
            path_id = view.id(),
            log_id,
            "cached mapping results"
        );
        Ok(Some(log_id))
    }

    /// Record that a path execution was attempted.
    pub async fn create_path_execution_log(
        &self,
        path_id: i64,
        status: PathStatus,
        representative_source_id: &str,
        source_entity_type: &str,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO path_execution_logs (
                relationship_mapping_path_id, representative_source_id,
                source_entity_type, start_time, status
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(path_id)
        .bind(representative_source_id)
        .bind(source_entity_type)
        .bind(Utc::now())
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::Transaction {
            message: e.to_string(),
        })?;
        Ok(result.last_insert_rowid())
    }

    /// Stamp the end of a path execution log.
    pub async fn finish_path_execution_log(
        &self,
        log_id: i64,
        status: PathStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE path_execution_logs
            SET status = ?2,
                end_time = ?3,
                duration_ms = CAST(
                    (julianday(?3) - julianday(start_time)) * 86400000 AS INTEGER
                ),
                error_message = ?4
            WHERE id = ?1
            "#,
        )
        .bind(log_id)
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::Transaction {
            message: e.to_string(),
        })?;
        Ok(())
    }
}

/// A stored `target_id` is either a plain identifier or a JSON array of
/// identifiers.
fn decode_target_id(raw: &str) -> Vec<String> {
    if raw.starts_with('[') && raw.ends_with(']') {
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(raw) {
            return items
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    other => Some(other.to_string()),
                })
                .collect();
        }
    }
    vec![raw.to_string()]
}
