//! Agent-work rows and deduplicated agent definitions.

use pgvector::Vector;
use serde_json::{Map, Value as JsonValue};
use sha2::{Digest, Sha256};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::store::schema::*;

#[derive(Clone)]
pub struct AgentStore {
    pool: PgPool,
}

impl AgentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // -----------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------

    /// Find or create the definition matching this blueprint.
    ///
    /// Identical configurations collapse onto one row via
    /// `(agent_type, config_hash)`; a genuinely new configuration gets
    /// `version = max(version) + 1` for its type, assigned inside the
    /// same transaction so versions stay strictly increasing.
    pub async fn get_or_create_definition(
        &self,
        spec: &AgentDefinitionSpec,
    ) -> Result<i64, sqlx::Error> {
        let hash = config_hash(spec);

        // Two attempts: a lost insert race (same blueprint, or a
        // competing version number for the same type) re-reads and
        // retries once.
        for attempt in 0..2 {
            let mut tx = self.pool.begin().await?;

            let existing: Option<i64> = sqlx::query_scalar(
                "SELECT id FROM agent_definitions WHERE agent_type = $1 AND config_hash = $2",
            )
            .bind(&spec.agent_type)
            .bind(&hash)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(id) = existing {
                debug!(id, agent_type = %spec.agent_type, "agent definition already known");
                return Ok(id);
            }

            let previous: Option<(i64, i32)> = sqlx::query_as(
                r#"
                SELECT id, version FROM agent_definitions
                WHERE agent_type = $1
                ORDER BY version DESC
                LIMIT 1
                FOR UPDATE
                "#,
            )
            .bind(&spec.agent_type)
            .fetch_optional(&mut *tx)
            .await?;
            let (parent_id, next_version) = match previous {
                Some((id, version)) => (Some(id), version + 1),
                None => (None, 1),
            };

            let insert = sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO agent_definitions (
                    agent_type, agent_name, system_message, configuration_params,
                    tools_available, model_used, version, parent_definition_id,
                    description, created_by, config_hash
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                RETURNING id
                "#,
            )
            .bind(&spec.agent_type)
            .bind(&spec.agent_name)
            .bind(&spec.system_message)
            .bind(Json(&spec.configuration_params))
            .bind(sorted_tools(&spec.tools_available))
            .bind(&spec.model_used)
            .bind(next_version)
            .bind(parent_id)
            .bind(&spec.description)
            .bind(spec.created_by.as_deref().unwrap_or("system"))
            .bind(&hash)
            .fetch_one(&mut *tx)
            .await;

            match insert {
                Ok(id) => {
                    tx.commit().await?;
                    info!(id, agent_type = %spec.agent_type, version = next_version,
                          "new agent definition stored");
                    return Ok(id);
                }
                Err(sqlx::Error::Database(db_err))
                    if db_err.is_unique_violation() && attempt == 0 =>
                {
                    debug!(agent_type = %spec.agent_type,
                           "definition insert raced a concurrent writer, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(sqlx::Error::RowNotFound)
    }

    // -----------------------------------------------------------------
    // Work rows
    // -----------------------------------------------------------------

    /// Store one agent execution, idempotent on
    /// `(agent_id, parent_session_id)`.
    pub async fn store_work(
        &self,
        record: &AgentWorkRecord,
        definition_id: i64,
        embedding: Option<Vec<f32>>,
    ) -> Result<i64, sqlx::Error> {
        let request_id = record
            .request_id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", record.parent_session_id, record.agent_id));

        let inserted: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO agent_work (
                request_id, parent_snapshot_id, parent_session_id,
                agent_definition_id, agent_id, agent_type, agent_request,
                agent_transcript_path, work_context, tools_used,
                files_examined, urls_fetched, result_summary,
                started_at, completed_at, embedding
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (agent_id, parent_session_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&request_id)
        .bind(record.parent_snapshot_id)
        .bind(&record.parent_session_id)
        .bind(definition_id)
        .bind(&record.agent_id)
        .bind(&record.agent_type)
        .bind(&record.agent_request)
        .bind(&record.agent_transcript_path)
        .bind(Json(&record.work_context))
        .bind(Json(&record.tools_used))
        .bind(&record.files_examined)
        .bind(&record.urls_fetched)
        .bind(&record.result_summary)
        .bind(record.started_at)
        .bind(record.completed_at)
        .bind(embedding.map(Vector::from))
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(id) => Ok(id),
            None => {
                sqlx::query_scalar(
                    "SELECT id FROM agent_work WHERE agent_id = $1 AND parent_session_id = $2",
                )
                .bind(&record.agent_id)
                .bind(&record.parent_session_id)
                .fetch_one(&self.pool)
                .await
            }
        }
    }

    pub async fn recent_work(
        &self,
        parent_session_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<AgentWorkListing>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, agent_id, agent_type, parent_session_id, agent_request,
                   result_summary, started_at, completed_at,
                   EXTRACT(EPOCH FROM (completed_at - started_at))::float8 AS duration_seconds
            FROM agent_work
            WHERE ($1::text IS NULL OR parent_session_id = $1)
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(parent_session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(AgentWorkListing {
                    id: r.try_get("id")?,
                    agent_id: r.try_get("agent_id")?,
                    agent_type: r.try_get("agent_type")?,
                    parent_session_id: r.try_get("parent_session_id")?,
                    agent_request: r.try_get("agent_request")?,
                    result_summary: r.try_get("result_summary")?,
                    started_at: r.try_get("started_at")?,
                    completed_at: r.try_get("completed_at")?,
                    duration_seconds: r.try_get("duration_seconds")?,
                })
            })
            .collect()
    }

    /// Semantic search over agent work embeddings; lexical fallback over
    /// the request and result text.
    pub async fn search_work(
        &self,
        query_embedding: Option<Vec<f32>>,
        query_text: &str,
        limit: i64,
    ) -> Result<Vec<AgentWorkListing>, sqlx::Error> {
        if let Some(embedding) = query_embedding {
            let rows = sqlx::query(
                r#"
                SELECT id, agent_id, agent_type, parent_session_id, agent_request,
                       result_summary, started_at, completed_at,
                       EXTRACT(EPOCH FROM (completed_at - started_at))::float8 AS duration_seconds
                FROM agent_work
                WHERE embedding IS NOT NULL
                ORDER BY embedding <=> $1
                LIMIT $2
                "#,
            )
            .bind(Vector::from(embedding))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            return rows.into_iter().map(map_work_listing).collect();
        }

        let pattern = format!("%{}%", query_text.replace('%', "\\%").replace('_', "\\_"));
        let rows = sqlx::query(
            r#"
            SELECT id, agent_id, agent_type, parent_session_id, agent_request,
                   result_summary, started_at, completed_at,
                   EXTRACT(EPOCH FROM (completed_at - started_at))::float8 AS duration_seconds
            FROM agent_work
            WHERE agent_request ILIKE $1 OR result_summary ILIKE $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(map_work_listing).collect()
    }

    // -----------------------------------------------------------------
    // Analytics
    // -----------------------------------------------------------------

    pub async fn performance(&self) -> Result<Vec<AgentPerformanceRow>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT agent_definition_id, agent_type, version, times_used,
                   avg_duration_seconds::float8 AS avg_duration_seconds,
                   avg_message_count::float8    AS avg_message_count,
                   success_rate::float8         AS success_rate
            FROM agent_performance
            ORDER BY agent_type, version
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(AgentPerformanceRow {
                    agent_definition_id: r.try_get("agent_definition_id")?,
                    agent_type: r.try_get("agent_type")?,
                    version: r.try_get("version")?,
                    times_used: r.try_get("times_used")?,
                    avg_duration_seconds: r.try_get("avg_duration_seconds")?,
                    avg_message_count: r.try_get("avg_message_count")?,
                    success_rate: r.try_get("success_rate")?,
                })
            })
            .collect()
    }

    pub async fn tool_usage(&self) -> Result<Vec<ToolUsageRow>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT coalesce(w.agent_type, 'unknown') AS agent_type,
                   t.key AS tool,
                   sum((t.value)::bigint) AS total_calls
            FROM agent_work w
            CROSS JOIN LATERAL jsonb_each_text(w.tools_used) AS t(key, value)
            GROUP BY coalesce(w.agent_type, 'unknown'), t.key
            ORDER BY total_calls DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(ToolUsageRow {
                    agent_type: r.try_get("agent_type")?,
                    tool: r.try_get("tool")?,
                    total_calls: r.try_get("total_calls")?,
                })
            })
            .collect()
    }

    /// Version-over-version change in average duration per agent type.
    pub async fn compare_versions(
        &self,
        agent_type: Option<&str>,
    ) -> Result<Vec<VersionComparisonRow>, sqlx::Error> {
        let rows = self.performance().await?;
        let filtered: Vec<AgentPerformanceRow> = rows
            .into_iter()
            .filter(|r| agent_type.map_or(true, |t| r.agent_type == t))
            .collect();
        Ok(version_deltas(&filtered))
    }

    pub async fn work_count(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT count(*) FROM agent_work")
            .fetch_one(&self.pool)
            .await
    }
}

fn map_work_listing(r: sqlx::postgres::PgRow) -> Result<AgentWorkListing, sqlx::Error> {
    Ok(AgentWorkListing {
        id: r.try_get("id")?,
        agent_id: r.try_get("agent_id")?,
        agent_type: r.try_get("agent_type")?,
        parent_session_id: r.try_get("parent_session_id")?,
        agent_request: r.try_get("agent_request")?,
        result_summary: r.try_get("result_summary")?,
        started_at: r.try_get("started_at")?,
        completed_at: r.try_get("completed_at")?,
        duration_seconds: r.try_get("duration_seconds")?,
    })
}

/// Percent change in average duration relative to the previous version
/// of the same type. Input must be ordered by `(agent_type, version)`.
fn version_deltas(rows: &[AgentPerformanceRow]) -> Vec<VersionComparisonRow> {
    let mut out = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let previous = i
            .checked_sub(1)
            .and_then(|j| rows.get(j))
            .filter(|p| p.agent_type == row.agent_type);

        let change = match (previous.and_then(|p| p.avg_duration_seconds), row.avg_duration_seconds)
        {
            (Some(prev), Some(cur)) if prev > 0.0 => Some((cur - prev) / prev * 100.0),
            _ => None,
        };

        out.push(VersionComparisonRow {
            agent_type: row.agent_type.clone(),
            version: row.version,
            avg_duration_seconds: row.avg_duration_seconds,
            duration_change_pct: change,
        });
    }
    out
}

fn sorted_tools(tools: &[String]) -> Vec<String> {
    let mut sorted = tools.to_vec();
    sorted.sort();
    sorted.dedup();
    sorted
}

/// Content-addressed digest over the blueprint.
///
/// Tools are sorted and configuration keys are recursively ordered
/// before hashing, so logically identical blueprints always collide.
pub fn config_hash(spec: &AgentDefinitionSpec) -> String {
    let canonical = serde_json::json!({
        "agent_type": spec.agent_type,
        "model_used": spec.model_used,
        "system_message": spec.system_message,
        "configuration_params": canonicalize(&spec.configuration_params),
        "tools_available": sorted_tools(&spec.tools_available),
    });

    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Rebuild every object with key-sorted maps so serialization order is
/// independent of how the value was constructed.
fn canonicalize(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let sorted: BTreeMap<&String, JsonValue> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), v);
            }
            JsonValue::Object(out)
        }
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(tools: &[&str], config: JsonValue) -> AgentDefinitionSpec {
        AgentDefinitionSpec {
            agent_type: "Explore".into(),
            agent_name: None,
            system_message: Some("read-only explorer".into()),
            configuration_params: config,
            tools_available: tools.iter().map(|t| t.to_string()).collect(),
            model_used: Some("local-llm".into()),
            description: None,
            created_by: None,
        }
    }

    // ===== Config Hash Tests =====

    #[test]
    fn test_config_hash_is_deterministic() {
        let a = spec(&["Read", "Grep"], json!({"max_turns": 5}));
        assert_eq!(config_hash(&a), config_hash(&a));
    }

    #[test]
    fn test_config_hash_ignores_tool_order() {
        let a = spec(&["Read", "Grep", "Glob"], json!({}));
        let b = spec(&["Glob", "Read", "Grep"], json!({}));
        assert_eq!(config_hash(&a), config_hash(&b));
    }

    #[test]
    fn test_config_hash_ignores_config_key_order() {
        let a = spec(&["Read"], json!({"a": 1, "b": {"y": 2, "x": 3}}));
        let b = spec(&["Read"], json!({"b": {"x": 3, "y": 2}, "a": 1}));
        assert_eq!(config_hash(&a), config_hash(&b));
    }

    #[test]
    fn test_config_hash_differs_on_model() {
        let a = spec(&["Read"], json!({}));
        let mut b = spec(&["Read"], json!({}));
        b.model_used = Some("other-model".into());
        assert_ne!(config_hash(&a), config_hash(&b));
    }

    #[test]
    fn test_config_hash_differs_on_tools() {
        let a = spec(&["Read"], json!({}));
        let b = spec(&["Read", "Bash"], json!({}));
        assert_ne!(config_hash(&a), config_hash(&b));
    }

    // ===== Version Delta Tests =====

    fn perf(agent_type: &str, version: i32, avg: Option<f64>) -> AgentPerformanceRow {
        AgentPerformanceRow {
            agent_definition_id: version as i64,
            agent_type: agent_type.into(),
            version,
            times_used: 3,
            avg_duration_seconds: avg,
            avg_message_count: Some(10.0),
            success_rate: Some(1.0),
        }
    }

    #[test]
    fn test_version_deltas_first_version_has_no_change() {
        let deltas = version_deltas(&[perf("Explore", 1, Some(10.0))]);
        assert_eq!(deltas[0].duration_change_pct, None);
    }

    #[test]
    fn test_version_deltas_computes_percentage() {
        let deltas = version_deltas(&[
            perf("Explore", 1, Some(10.0)),
            perf("Explore", 2, Some(15.0)),
        ]);
        assert_eq!(deltas[1].duration_change_pct, Some(50.0));
    }

    #[test]
    fn test_version_deltas_reset_across_types() {
        let deltas = version_deltas(&[
            perf("Explore", 1, Some(10.0)),
            perf("Plan", 1, Some(20.0)),
        ]);
        assert_eq!(deltas[1].duration_change_pct, None);
    }

    #[test]
    fn test_version_deltas_skip_missing_durations() {
        let deltas = version_deltas(&[
            perf("Explore", 1, None),
            perf("Explore", 2, Some(5.0)),
        ]);
        assert_eq!(deltas[1].duration_change_pct, None);
    }
}
