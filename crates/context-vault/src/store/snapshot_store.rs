//! Snapshot persistence: the single-shot upsert plus every read view the
//! retrieval surface is built on.

use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};

use crate::error::CaptureError;
use crate::store::schema::*;
use crate::utils::excerpt;

/// Most recent prior snapshot for a project, as fed into the
/// summarization prompt.
#[derive(Debug, Clone)]
pub struct PreviousSnapshot {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub summary: Option<String>,
    pub tags: Vec<String>,
}

/// Aggregate counts for the status endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreOverview {
    pub snapshot_count: i64,
    pub project_count: i64,
    pub last_capture: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct SnapshotStore {
    pool: PgPool,
}

impl SnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // -----------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------

    /// Upsert one capture in a single transaction.
    ///
    /// A row matching `session_id` **or** `transcript_path` is locked and
    /// updated in place; otherwise a fresh row is inserted. An insert that
    /// races another pipeline for the same session loses the unique check,
    /// is logged as a conflict, and retries once as an update. The row is
    /// read back before commit; a missing read-back is fatal.
    pub async fn persist(&self, record: &CaptureRecord) -> Result<PersistOutcome, CaptureError> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM context_snapshots
            WHERE ($1::text IS NOT NULL AND session_id = $1)
               OR ($2::text IS NOT NULL AND transcript_path = $2)
            ORDER BY id
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(&record.session_id)
        .bind(&record.transcript_path)
        .fetch_optional(&mut *tx)
        .await?;

        let (id, timestamp, action) = match existing {
            Some(id) => {
                let ts = self.update_row(&mut tx, id, record).await?;
                (id, ts, PersistAction::Updated)
            }
            None => match self.insert_row(&mut tx, record).await {
                Ok((id, ts)) => (id, ts, PersistAction::Inserted),
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                    // Lost the insert race; the winner's row is now
                    // visible and becomes our update target.
                    warn!(
                        session_id = ?record.session_id,
                        "insert conflicted with a concurrent capture, retrying as update"
                    );
                    drop(tx);
                    return self.persist_as_update(record).await;
                }
                Err(e) => return Err(e.into()),
            },
        };

        // Same-transaction verification of the row we just wrote.
        let verified: Option<i64> =
            sqlx::query_scalar("SELECT id FROM context_snapshots WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        if verified.is_none() {
            return Err(CaptureError::StoreFatal(sqlx::Error::RowNotFound));
        }

        tx.commit().await?;
        debug!(id, ?action, "snapshot persisted");
        Ok(PersistOutcome { id, timestamp, action })
    }

    /// Conflict recovery path: the matching row must exist now.
    async fn persist_as_update(&self, record: &CaptureRecord) -> Result<PersistOutcome, CaptureError> {
        let mut tx = self.pool.begin().await?;

        let id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM context_snapshots
            WHERE ($1::text IS NOT NULL AND session_id = $1)
               OR ($2::text IS NOT NULL AND transcript_path = $2)
            ORDER BY id
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(&record.session_id)
        .bind(&record.transcript_path)
        .fetch_optional(&mut *tx)
        .await?;

        let id = id.ok_or(CaptureError::StoreConflict(
            "conflicting row vanished before retry".into(),
        ))?;
        let timestamp = self.update_row(&mut tx, id, record).await?;
        tx.commit().await?;
        Ok(PersistOutcome {
            id,
            timestamp,
            action: PersistAction::Updated,
        })
    }

    async fn insert_row(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        record: &CaptureRecord,
    ) -> Result<(i64, DateTime<Utc>), sqlx::Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO context_snapshots (
                project_path, session_id, transcript_path, trigger_event,
                message_count, raw_context, summary, embedding, tags,
                mentioned_files, key_decisions, bugs_fixed,
                git_commit_hash, git_branch, context_window_size
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING id, timestamp
            "#,
        )
        .bind(&record.project_path)
        .bind(&record.session_id)
        .bind(&record.transcript_path)
        .bind(&record.trigger_event)
        .bind(record.message_count)
        .bind(Json(&record.raw_context))
        .bind(&record.summary)
        .bind(Vector::from(record.embedding.clone()))
        .bind(&record.tags)
        .bind(&record.mentioned_files)
        .bind(&record.key_decisions)
        .bind(&record.bugs_fixed)
        .bind(&record.git_commit_hash)
        .bind(&record.git_branch)
        .bind(record.raw_context.byte_size())
        .fetch_one(&mut **tx)
        .await?;
        Ok((row.try_get("id")?, row.try_get("timestamp")?))
    }

    async fn update_row(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: i64,
        record: &CaptureRecord,
    ) -> Result<DateTime<Utc>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            UPDATE context_snapshots SET
                project_path = $2,
                session_id = COALESCE($3, session_id),
                transcript_path = COALESCE($4, transcript_path),
                timestamp = now(),
                trigger_event = $5,
                message_count = $6,
                raw_context = $7,
                summary = $8,
                embedding = $9,
                tags = $10,
                mentioned_files = $11,
                key_decisions = $12,
                bugs_fixed = $13,
                git_commit_hash = $14,
                git_branch = $15,
                context_window_size = $16
            WHERE id = $1
            RETURNING timestamp
            "#,
        )
        .bind(id)
        .bind(&record.project_path)
        .bind(&record.session_id)
        .bind(&record.transcript_path)
        .bind(&record.trigger_event)
        .bind(record.message_count)
        .bind(Json(&record.raw_context))
        .bind(&record.summary)
        .bind(Vector::from(record.embedding.clone()))
        .bind(&record.tags)
        .bind(&record.mentioned_files)
        .bind(&record.key_decisions)
        .bind(&record.bugs_fixed)
        .bind(&record.git_commit_hash)
        .bind(&record.git_branch)
        .bind(record.raw_context.byte_size())
        .fetch_one(&mut **tx)
        .await?;
        row.try_get("timestamp")
    }

    /// Replace a snapshot's summary (and its embedding) in place.
    ///
    /// First-class hook for the out-of-band enhanced-summary utility, so
    /// it never has to issue ad-hoc SQL.
    pub async fn rewrite_summary(
        &self,
        id: i64,
        summary: &str,
        embedding: Vec<f32>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE context_snapshots SET summary = $2, embedding = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(summary)
        .bind(Vector::from(embedding))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() > 0 {
            info!(id, "snapshot summary rewritten");
            Ok(true)
        } else {
            Ok(false)
        }
    }

    // -----------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------

    /// Most recent snapshot for a project, for the session-aware prompt.
    pub async fn latest_for_project(
        &self,
        project_path: &str,
    ) -> Result<Option<PreviousSnapshot>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, timestamp, summary, tags
            FROM context_snapshots
            WHERE project_path = $1
            ORDER BY timestamp DESC
            LIMIT 1
            "#,
        )
        .bind(project_path)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(PreviousSnapshot {
                id: r.try_get("id")?,
                timestamp: r.try_get("timestamp")?,
                summary: r.try_get("summary")?,
                tags: r.try_get("tags")?,
            })
        })
        .transpose()
    }

    pub async fn recent(
        &self,
        project_path: Option<&str>,
        limit: i64,
    ) -> Result<Vec<SnapshotListing>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, project_path, session_id, timestamp, trigger_event,
                   message_count, summary, tags
            FROM context_snapshots
            WHERE ($1::text IS NULL OR project_path = $1)
            ORDER BY timestamp DESC
            LIMIT $2
            "#,
        )
        .bind(project_path)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| map_listing(&r)).collect()
    }

    pub async fn get(&self, id: i64) -> Result<Option<Snapshot>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, project_path, session_id, transcript_path, timestamp,
                   trigger_event, message_count, raw_context, summary,
                   embedding, tags, mentioned_files, key_decisions,
                   bugs_fixed, git_commit_hash, git_branch, context_window_size
            FROM context_snapshots
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| map_snapshot(&r)).transpose()
    }

    /// k-nearest snapshots by cosine distance, ascending.
    pub async fn semantic_search(
        &self,
        query: Vec<f32>,
        project_path: Option<&str>,
        limit: i64,
    ) -> Result<Vec<SemanticHit>, sqlx::Error> {
        let query_vec = Vector::from(query);
        let rows = sqlx::query(
            r#"
            SELECT id, project_path, timestamp, summary, tags,
                   (embedding <=> $1)::float8 AS distance
            FROM context_snapshots
            WHERE embedding IS NOT NULL
              AND ($2::text IS NULL OR project_path = $2)
            ORDER BY embedding <=> $1
            LIMIT $3
            "#,
        )
        .bind(query_vec)
        .bind(project_path)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(SemanticHit {
                    id: r.try_get("id")?,
                    project_path: r.try_get("project_path")?,
                    timestamp: r.try_get("timestamp")?,
                    summary: r.try_get("summary")?,
                    tags: r.try_get("tags")?,
                    distance: r.try_get("distance")?,
                })
            })
            .collect()
    }

    /// `ILIKE` over the summary; the degraded path when no query vector
    /// is available.
    pub async fn lexical_search(
        &self,
        query: &str,
        project_path: Option<&str>,
        limit: i64,
    ) -> Result<Vec<SemanticHit>, sqlx::Error> {
        let pattern = format!("%{}%", escape_like(query));
        let rows = sqlx::query(
            r#"
            SELECT id, project_path, timestamp, summary, tags
            FROM context_snapshots
            WHERE summary ILIKE $1
              AND ($2::text IS NULL OR project_path = $2)
            ORDER BY timestamp DESC
            LIMIT $3
            "#,
        )
        .bind(pattern)
        .bind(project_path)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(SemanticHit {
                    id: r.try_get("id")?,
                    project_path: r.try_get("project_path")?,
                    timestamp: r.try_get("timestamp")?,
                    summary: r.try_get("summary")?,
                    tags: r.try_get("tags")?,
                    distance: None,
                })
            })
            .collect()
    }

    /// Substring scan over the raw conversation document, returning hit
    /// snippets with surrounding context.
    pub async fn search_raw_messages(
        &self,
        query: &str,
        project_path: Option<&str>,
        limit: i64,
        context_chars: usize,
    ) -> Result<Vec<RawMessageHit>, sqlx::Error> {
        let pattern = format!("%{}%", escape_like(query));
        let rows = sqlx::query(
            r#"
            SELECT id, project_path, timestamp, raw_context
            FROM context_snapshots
            WHERE raw_context::text ILIKE $1
              AND ($2::text IS NULL OR project_path = $2)
            ORDER BY timestamp DESC
            LIMIT $3
            "#,
        )
        .bind(pattern)
        .bind(project_path)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::new();
        for r in rows {
            let id: i64 = r.try_get("id")?;
            let project: String = r.try_get("project_path")?;
            let timestamp: DateTime<Utc> = r.try_get("timestamp")?;
            let Json(conversation): Json<Conversation> = r.try_get("raw_context")?;

            for message in &conversation.messages {
                if let Some(snippet) = snippet_around(&message.content, query, context_chars) {
                    hits.push(RawMessageHit {
                        snapshot_id: id,
                        project_path: project.clone(),
                        timestamp,
                        role: message.role.clone(),
                        snippet,
                    });
                    if hits.len() as i64 >= limit {
                        return Ok(hits);
                    }
                }
            }
        }
        Ok(hits)
    }

    /// Case-insensitive literal match restricted to assistant messages.
    pub async fn search_exact_phrase(
        &self,
        phrase: &str,
        project_path: Option<&str>,
        limit: i64,
    ) -> Result<Vec<RawMessageHit>, sqlx::Error> {
        let pattern = format!("%{}%", escape_like(phrase));
        let rows = sqlx::query(
            r#"
            SELECT id, project_path, timestamp, raw_context
            FROM context_snapshots
            WHERE raw_context::text ILIKE $1
              AND ($2::text IS NULL OR project_path = $2)
            ORDER BY timestamp DESC
            LIMIT $3
            "#,
        )
        .bind(pattern)
        .bind(project_path)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::new();
        for r in rows {
            let id: i64 = r.try_get("id")?;
            let project: String = r.try_get("project_path")?;
            let timestamp: DateTime<Utc> = r.try_get("timestamp")?;
            let Json(conversation): Json<Conversation> = r.try_get("raw_context")?;

            for message in &conversation.messages {
                if message.role != "assistant" {
                    continue;
                }
                if let Some(snippet) = snippet_around(&message.content, phrase, 120) {
                    hits.push(RawMessageHit {
                        snapshot_id: id,
                        project_path: project.clone(),
                        timestamp,
                        role: message.role.clone(),
                        snippet,
                    });
                    if hits.len() as i64 >= limit {
                        return Ok(hits);
                    }
                }
            }
        }
        Ok(hits)
    }

    pub async fn decisions(
        &self,
        keyword: Option<&str>,
        project_path: Option<&str>,
        limit: i64,
    ) -> Result<Vec<DecisionRow>, sqlx::Error> {
        let pattern = keyword.map(|k| format!("%{}%", escape_like(k)));
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.project_path, s.timestamp, d.decision
            FROM context_snapshots s
            CROSS JOIN LATERAL unnest(s.key_decisions) AS d(decision)
            WHERE ($1::text IS NULL OR s.project_path = $1)
              AND ($2::text IS NULL OR d.decision ILIKE $2)
            ORDER BY s.timestamp DESC
            LIMIT $3
            "#,
        )
        .bind(project_path)
        .bind(pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(DecisionRow {
                    snapshot_id: r.try_get("id")?,
                    project_path: r.try_get("project_path")?,
                    timestamp: r.try_get("timestamp")?,
                    decision: r.try_get("decision")?,
                })
            })
            .collect()
    }

    /// Bug lines with keyword category classification; optionally
    /// filtered to one category.
    pub async fn bugs(
        &self,
        category: Option<&str>,
        project_path: Option<&str>,
        limit: i64,
    ) -> Result<Vec<BugRow>, sqlx::Error> {
        // Category is classified in code, so overfetch when filtering.
        let fetch = if category.is_some() { limit * 5 } else { limit };
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.project_path, s.timestamp, b.bug
            FROM context_snapshots s
            CROSS JOIN LATERAL unnest(s.bugs_fixed) AS b(bug)
            WHERE ($1::text IS NULL OR s.project_path = $1)
            ORDER BY s.timestamp DESC
            LIMIT $2
            "#,
        )
        .bind(project_path)
        .bind(fetch)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::new();
        for r in rows {
            let bug: String = r.try_get("bug")?;
            let bug_category = classify_bug(&bug);
            if let Some(wanted) = category {
                if bug_category != wanted {
                    continue;
                }
            }
            out.push(BugRow {
                snapshot_id: r.try_get("id")?,
                project_path: r.try_get("project_path")?,
                timestamp: r.try_get("timestamp")?,
                bug,
                category: bug_category.to_string(),
            });
            if out.len() as i64 >= limit {
                break;
            }
        }
        Ok(out)
    }

    pub async fn file_activity(
        &self,
        file_type: Option<&str>,
        min_mentions: i64,
        project_path: Option<&str>,
        limit: i64,
    ) -> Result<Vec<FileActivityRow>, sqlx::Error> {
        let fetch = if file_type.is_some() { limit * 5 } else { limit };
        let rows = sqlx::query(
            r#"
            SELECT f.file, count(*) AS mentions, max(s.timestamp) AS last_seen
            FROM context_snapshots s
            CROSS JOIN LATERAL unnest(s.mentioned_files) AS f(file)
            WHERE ($1::text IS NULL OR s.project_path = $1)
            GROUP BY f.file
            HAVING count(*) >= $2
            ORDER BY mentions DESC, f.file
            LIMIT $3
            "#,
        )
        .bind(project_path)
        .bind(min_mentions)
        .bind(fetch)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::new();
        for r in rows {
            let file: String = r.try_get("file")?;
            let kind = classify_file_type(&file);
            if let Some(wanted) = file_type {
                if kind != wanted {
                    continue;
                }
            }
            out.push(FileActivityRow {
                file,
                file_type: kind.to_string(),
                mentions: r.try_get("mentions")?,
                last_seen: r.try_get("last_seen")?,
            });
            if out.len() as i64 >= limit {
                break;
            }
        }
        Ok(out)
    }

    pub async fn project_stats(
        &self,
        project_path: Option<&str>,
    ) -> Result<Vec<ProjectStats>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT project_path, snapshot_count, session_count, total_messages,
                   total_bytes, first_capture, last_capture
            FROM project_stats
            WHERE ($1::text IS NULL OR project_path = $1)
            ORDER BY last_capture DESC
            "#,
        )
        .bind(project_path)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(ProjectStats {
                    project_path: r.try_get("project_path")?,
                    snapshot_count: r.try_get("snapshot_count")?,
                    session_count: r.try_get("session_count")?,
                    total_messages: r.try_get("total_messages")?,
                    total_bytes: r.try_get("total_bytes")?,
                    first_capture: r.try_get("first_capture")?,
                    last_capture: r.try_get("last_capture")?,
                })
            })
            .collect()
    }

    pub async fn timeline(
        &self,
        project_path: Option<&str>,
        limit: i64,
    ) -> Result<Vec<TimelineRow>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, project_path, timestamp, trigger_event, message_count, summary
            FROM context_snapshots
            WHERE ($1::text IS NULL OR project_path = $1)
            ORDER BY timestamp DESC
            LIMIT $2
            "#,
        )
        .bind(project_path)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                let trigger: String = r.try_get("trigger_event")?;
                let summary: Option<String> = r.try_get("summary")?;
                Ok(TimelineRow {
                    id: r.try_get("id")?,
                    project_path: r.try_get("project_path")?,
                    timestamp: r.try_get("timestamp")?,
                    trigger_class: classify_trigger(&trigger).to_string(),
                    trigger_event: trigger,
                    message_count: r.try_get("message_count")?,
                    summary_excerpt: summary.map(|s| excerpt(&s, 160).into_owned()),
                })
            })
            .collect()
    }

    pub async fn quality_report(&self, min_score: i32) -> Result<QualityReport, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, project_path, timestamp, quality_score
            FROM snapshot_quality
            WHERE quality_score >= $1
            ORDER BY quality_score DESC, timestamp DESC
            LIMIT 50
            "#,
        )
        .bind(min_score)
        .fetch_all(&self.pool)
        .await?;

        let quality_rows: Vec<QualityRow> = rows
            .into_iter()
            .map(|r| {
                Ok::<_, sqlx::Error>(QualityRow {
                    id: r.try_get("id")?,
                    project_path: r.try_get("project_path")?,
                    timestamp: r.try_get("timestamp")?,
                    quality_score: r.try_get("quality_score")?,
                })
            })
            .collect::<Result<_, _>>()?;

        let buckets = sqlx::query(
            r#"
            SELECT
                count(*) FILTER (WHERE quality_score >= 8)              AS high,
                count(*) FILTER (WHERE quality_score BETWEEN 5 AND 7)   AS medium,
                count(*) FILTER (WHERE quality_score < 5)               AS low
            FROM snapshot_quality
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(QualityReport {
            rows: quality_rows,
            high: buckets.try_get::<i64, _>("high")? as usize,
            medium: buckets.try_get::<i64, _>("medium")? as usize,
            low: buckets.try_get::<i64, _>("low")? as usize,
        })
    }

    pub async fn overview(&self) -> Result<StoreOverview, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT count(*) AS snapshot_count,
                   count(DISTINCT project_path) AS project_count,
                   max(timestamp) AS last_capture
            FROM context_snapshots
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreOverview {
            snapshot_count: row.try_get("snapshot_count")?,
            project_count: row.try_get("project_count")?,
            last_capture: row.try_get("last_capture")?,
        })
    }
}

fn map_listing(row: &PgRow) -> Result<SnapshotListing, sqlx::Error> {
    let summary: Option<String> = row.try_get("summary")?;
    Ok(SnapshotListing {
        id: row.try_get("id")?,
        project_path: row.try_get("project_path")?,
        session_id: row.try_get("session_id")?,
        timestamp: row.try_get("timestamp")?,
        trigger_event: row.try_get("trigger_event")?,
        message_count: row.try_get("message_count")?,
        summary_excerpt: summary.map(|s| excerpt(&s, 160).into_owned()),
        tags: row.try_get("tags")?,
    })
}

fn map_snapshot(row: &PgRow) -> Result<Snapshot, sqlx::Error> {
    let Json(raw_context): Json<Conversation> = row.try_get("raw_context")?;
    let embedding: Option<Vector> = row.try_get("embedding")?;
    Ok(Snapshot {
        id: row.try_get("id")?,
        project_path: row.try_get("project_path")?,
        session_id: row.try_get("session_id")?,
        transcript_path: row.try_get("transcript_path")?,
        timestamp: row.try_get("timestamp")?,
        trigger_event: row.try_get("trigger_event")?,
        message_count: row.try_get("message_count")?,
        raw_context,
        summary: row.try_get("summary")?,
        embedding: embedding.map(|v| v.to_vec()),
        tags: row.try_get("tags")?,
        mentioned_files: row.try_get("mentioned_files")?,
        key_decisions: row.try_get("key_decisions")?,
        bugs_fixed: row.try_get("bugs_fixed")?,
        git_commit_hash: row.try_get("git_commit_hash")?,
        git_branch: row.try_get("git_branch")?,
        context_window_size: row.try_get("context_window_size")?,
    })
}

/// Escape `%`, `_` and `\` so user queries stay literal inside ILIKE.
fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Case-insensitive substring hit with up to `context` characters on
/// each side; `None` when `needle` does not occur.
fn snippet_around(text: &str, needle: &str, context: usize) -> Option<String> {
    if needle.is_empty() {
        return None;
    }
    let lower_text = text.to_lowercase();
    let lower_needle = needle.to_lowercase();
    let byte_pos = lower_text.find(&lower_needle)?;
    let char_pos = lower_text[..byte_pos].chars().count();

    let start = char_pos.saturating_sub(context);
    let len = context * 2 + lower_needle.chars().count();
    let snippet: String = text.chars().skip(start).take(len).collect();
    Some(snippet)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===== ILIKE Escaping Tests =====

    #[test]
    fn test_escape_like_neutralizes_wildcards() {
        assert_eq!(escape_like("100%_done"), "100\\%\\_done");
        assert_eq!(escape_like(r"a\b"), r"a\\b");
        assert_eq!(escape_like("plain"), "plain");
    }

    // ===== Snippet Tests =====

    #[test]
    fn test_snippet_finds_case_insensitive_match() {
        let text = "We patched the SQL Injection in the login handler yesterday";
        let snippet = snippet_around(text, "sql injection", 10).unwrap();
        assert!(snippet.to_lowercase().contains("sql injection"));
    }

    #[test]
    fn test_snippet_respects_context_window() {
        let text = format!("{}NEEDLE{}", "a".repeat(100), "b".repeat(100));
        let snippet = snippet_around(&text, "NEEDLE", 5).unwrap();
        assert_eq!(snippet, "aaaaaNEEDLEbbbbb");
    }

    #[test]
    fn test_snippet_none_when_absent() {
        assert!(snippet_around("nothing here", "zebra", 10).is_none());
        assert!(snippet_around("text", "", 10).is_none());
    }

    #[test]
    fn test_snippet_at_start_of_text() {
        let snippet = snippet_around("needle then more text", "needle", 4).unwrap();
        assert!(snippet.starts_with("needle"));
    }
}
