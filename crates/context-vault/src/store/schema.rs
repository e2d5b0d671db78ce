//! Domain types, Postgres schema, and the pure mirrors of the derived
//! read models (quality rubric, trigger/bug/file classification).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Embedding dimension enforced end to end (column type `vector(384)`).
pub const EMBEDDING_DIM: usize = 384;

/// One `{role, content}` message of a captured conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// The structured conversation document stored in `raw_context`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Serialized byte size, recorded as `context_window_size`.
    pub fn byte_size(&self) -> i64 {
        serde_json::to_vec(self).map(|v| v.len() as i64).unwrap_or(0)
    }
}

/// Everything the pipeline hands to `persist` for one capture.
#[derive(Debug, Clone)]
pub struct CaptureRecord {
    pub project_path: String,
    pub session_id: Option<String>,
    pub transcript_path: Option<String>,
    pub trigger_event: String,
    pub message_count: i32,
    pub raw_context: Conversation,
    pub summary: String,
    pub embedding: Vec<f32>,
    pub tags: Vec<String>,
    pub mentioned_files: Vec<String>,
    pub key_decisions: Vec<String>,
    pub bugs_fixed: Vec<String>,
    pub git_commit_hash: Option<String>,
    pub git_branch: Option<String>,
}

/// A persisted snapshot row, as read back from the store.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub id: i64,
    pub project_path: String,
    pub session_id: Option<String>,
    pub transcript_path: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub trigger_event: String,
    pub message_count: i32,
    pub raw_context: Conversation,
    pub summary: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub tags: Vec<String>,
    pub mentioned_files: Vec<String>,
    pub key_decisions: Vec<String>,
    pub bugs_fixed: Vec<String>,
    pub git_commit_hash: Option<String>,
    pub git_branch: Option<String>,
    pub context_window_size: i64,
}

/// What `persist` did with the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistAction {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, Serialize)]
pub struct PersistOutcome {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub action: PersistAction,
}

/// Compact listing row for `/api/recent` and the timeline.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotListing {
    pub id: i64,
    pub project_path: String,
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub trigger_event: String,
    pub message_count: i32,
    pub summary_excerpt: Option<String>,
    pub tags: Vec<String>,
}

/// Semantic search hit, ordered by ascending cosine distance.
#[derive(Debug, Clone, Serialize)]
pub struct SemanticHit {
    pub id: i64,
    pub project_path: String,
    pub timestamp: DateTime<Utc>,
    pub summary: Option<String>,
    pub tags: Vec<String>,
    pub distance: Option<f64>,
}

/// Raw-message substring hit with surrounding context.
#[derive(Debug, Clone, Serialize)]
pub struct RawMessageHit {
    pub snapshot_id: i64,
    pub project_path: String,
    pub timestamp: DateTime<Utc>,
    pub role: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityRow {
    pub id: i64,
    pub project_path: String,
    pub timestamp: DateTime<Utc>,
    pub quality_score: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub rows: Vec<QualityRow>,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectStats {
    pub project_path: String,
    pub snapshot_count: i64,
    pub session_count: i64,
    pub total_messages: i64,
    pub total_bytes: i64,
    pub first_capture: DateTime<Utc>,
    pub last_capture: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineRow {
    pub id: i64,
    pub project_path: String,
    pub timestamp: DateTime<Utc>,
    pub trigger_event: String,
    pub trigger_class: String,
    pub message_count: i32,
    pub summary_excerpt: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionRow {
    pub snapshot_id: i64,
    pub project_path: String,
    pub timestamp: DateTime<Utc>,
    pub decision: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BugRow {
    pub snapshot_id: i64,
    pub project_path: String,
    pub timestamp: DateTime<Utc>,
    pub bug: String,
    pub category: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileActivityRow {
    pub file: String,
    pub file_type: String,
    pub mentions: i64,
    pub last_seen: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Agent work / definitions
// ---------------------------------------------------------------------------

/// Input record for one agent execution.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentWorkRecord {
    pub agent_id: String,
    pub parent_session_id: String,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub parent_snapshot_id: Option<i64>,
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub agent_request: Option<String>,
    #[serde(default)]
    pub agent_transcript_path: Option<String>,
    #[serde(default)]
    pub work_context: Vec<Message>,
    /// Tool-name → invocation count.
    #[serde(default)]
    pub tools_used: BTreeMap<String, i64>,
    #[serde(default)]
    pub files_examined: Vec<String>,
    #[serde(default)]
    pub urls_fetched: Vec<String>,
    #[serde(default)]
    pub result_summary: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// The reusable blueprint an agent ran with; deduplicated by
/// `(agent_type, config_hash)`.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentDefinitionSpec {
    pub agent_type: String,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub system_message: Option<String>,
    #[serde(default)]
    pub configuration_params: JsonValue,
    #[serde(default)]
    pub tools_available: Vec<String>,
    #[serde(default)]
    pub model_used: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentWorkListing {
    pub id: i64,
    pub agent_id: String,
    pub agent_type: Option<String>,
    pub parent_session_id: String,
    pub agent_request: Option<String>,
    pub result_summary: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentPerformanceRow {
    pub agent_definition_id: i64,
    pub agent_type: String,
    pub version: i32,
    pub times_used: i64,
    pub avg_duration_seconds: Option<f64>,
    pub avg_message_count: Option<f64>,
    pub success_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolUsageRow {
    pub agent_type: String,
    pub tool: String,
    pub total_calls: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionComparisonRow {
    pub agent_type: String,
    pub version: i32,
    pub avg_duration_seconds: Option<f64>,
    /// Percent change in average duration relative to the previous
    /// version of the same type; `None` for the first version.
    pub duration_change_pct: Option<f64>,
}

// ---------------------------------------------------------------------------
// Derived-view mirrors
// ---------------------------------------------------------------------------

/// The 10-point completeness rubric. Must stay in lockstep with the
/// `snapshot_quality` view below; dashboards depend on the exact values.
pub fn quality_score(snapshot: &Snapshot) -> i32 {
    let summary_len = snapshot.summary.as_deref().map(str::len).unwrap_or(0);
    let mut score = 0;
    score += i32::from(summary_len >= 50);
    score += i32::from(snapshot.embedding.is_some());
    score += i32::from(!snapshot.tags.is_empty());
    score += i32::from(!snapshot.mentioned_files.is_empty());
    score += i32::from(!snapshot.key_decisions.is_empty());
    score += i32::from(!snapshot.bugs_fixed.is_empty());
    score += i32::from(snapshot.git_commit_hash.is_some());
    score += i32::from(snapshot.session_id.is_some());
    score += i32::from(snapshot.message_count >= 5);
    score += i32::from(summary_len > 200);
    score
}

/// Bucket a trigger label for timeline rendering.
pub fn classify_trigger(trigger: &str) -> &'static str {
    let t = trigger.to_lowercase();
    if t.starts_with("auto-compact") || t.starts_with("auto_compact") {
        "auto-compact"
    } else if t.starts_with("post-compact") {
        "post-compact"
    } else if t.starts_with("manual") {
        "manual"
    } else if t.starts_with("test") {
        "test"
    } else {
        "other"
    }
}

/// Keyword classification of a captured bug line.
pub fn classify_bug(bug: &str) -> &'static str {
    let b = bug.to_lowercase();
    if ["race", "deadlock", "concurren", "lock"].iter().any(|k| b.contains(k)) {
        "concurrency"
    } else if ["leak", "memory", "oom", "overflow"].iter().any(|k| b.contains(k)) {
        "memory"
    } else if ["null", "undefined", "none", "parse", "format"].iter().any(|k| b.contains(k)) {
        "data"
    } else if ["timeout", "connect", "http", "api", "network"].iter().any(|k| b.contains(k)) {
        "integration"
    } else if ["slow", "performance", "latency"].iter().any(|k| b.contains(k)) {
        "performance"
    } else if ["security", "injection", "auth", "xss", "csrf"].iter().any(|k| b.contains(k)) {
        "security"
    } else {
        "logic"
    }
}

/// File-type classification for the heatmap.
pub fn classify_file_type(file: &str) -> &'static str {
    let lower = file.to_lowercase();
    if lower.contains("test") || lower.contains("spec.") {
        return "test";
    }
    let ext = lower.rsplit('.').next().unwrap_or("");
    match ext {
        "rs" | "py" | "js" | "jsx" | "ts" | "tsx" | "go" | "java" | "c" | "cpp" | "h" | "hpp"
        | "rb" | "php" | "swift" | "kt" | "scala" => "source",
        "json" | "yaml" | "yml" | "toml" | "ini" | "conf" | "cfg" | "env" | "lock" => "config",
        "md" | "rst" | "txt" | "adoc" => "docs",
        "sh" | "bash" | "zsh" | "fish" => "shell",
        "sql" => "sql",
        "css" | "html" | "scss" | "svelte" | "vue" => "frontend",
        _ => "other",
    }
}

// ---------------------------------------------------------------------------
// Schema DDL
// ---------------------------------------------------------------------------

/// Idempotent schema, applied at startup. The `snapshot_quality` view is
/// the authoritative copy of the rubric mirrored by [`quality_score`].
pub const SCHEMA_SQL: &str = r#"
CREATE EXTENSION IF NOT EXISTS vector;

CREATE TABLE IF NOT EXISTS context_snapshots (
    id                   BIGSERIAL PRIMARY KEY,
    project_path         TEXT NOT NULL,
    session_id           TEXT UNIQUE,
    transcript_path      TEXT UNIQUE,
    timestamp            TIMESTAMPTZ NOT NULL DEFAULT now(),
    trigger_event        TEXT NOT NULL,
    message_count        INTEGER NOT NULL DEFAULT 0,
    raw_context          JSONB NOT NULL,
    summary              TEXT,
    embedding            vector(384),
    tags                 TEXT[] NOT NULL DEFAULT '{}',
    mentioned_files      TEXT[] NOT NULL DEFAULT '{}',
    key_decisions        TEXT[] NOT NULL DEFAULT '{}',
    bugs_fixed           TEXT[] NOT NULL DEFAULT '{}',
    git_commit_hash      TEXT,
    git_branch           TEXT,
    context_window_size  BIGINT NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_snapshots_project   ON context_snapshots (project_path);
CREATE INDEX IF NOT EXISTS idx_snapshots_session   ON context_snapshots (session_id);
CREATE INDEX IF NOT EXISTS idx_snapshots_timestamp ON context_snapshots (timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_snapshots_trigger   ON context_snapshots (trigger_event);
CREATE INDEX IF NOT EXISTS idx_snapshots_transcript ON context_snapshots (transcript_path);
CREATE INDEX IF NOT EXISTS idx_snapshots_tags      ON context_snapshots USING GIN (tags);
CREATE INDEX IF NOT EXISTS idx_snapshots_files     ON context_snapshots USING GIN (mentioned_files);
CREATE INDEX IF NOT EXISTS idx_snapshots_raw       ON context_snapshots USING GIN (raw_context);
CREATE INDEX IF NOT EXISTS idx_snapshots_embedding ON context_snapshots
    USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100);

CREATE TABLE IF NOT EXISTS agent_definitions (
    id                    BIGSERIAL PRIMARY KEY,
    agent_type            TEXT NOT NULL,
    agent_name            TEXT,
    system_message        TEXT,
    configuration_params  JSONB NOT NULL DEFAULT '{}',
    tools_available       TEXT[] NOT NULL DEFAULT '{}',
    model_used            TEXT,
    version               INTEGER NOT NULL,
    parent_definition_id  BIGINT REFERENCES agent_definitions(id),
    description           TEXT,
    created_at            TIMESTAMPTZ NOT NULL DEFAULT now(),
    created_by            TEXT,
    config_hash           TEXT NOT NULL,
    UNIQUE (agent_type, config_hash),
    UNIQUE (agent_type, version)
);

CREATE TABLE IF NOT EXISTS agent_work (
    id                    BIGSERIAL PRIMARY KEY,
    request_id            TEXT,
    parent_snapshot_id    BIGINT REFERENCES context_snapshots(id),
    parent_session_id     TEXT NOT NULL,
    agent_definition_id   BIGINT REFERENCES agent_definitions(id),
    agent_id              TEXT NOT NULL,
    agent_type            TEXT,
    agent_request         TEXT,
    agent_transcript_path TEXT,
    work_context          JSONB NOT NULL DEFAULT '[]',
    tools_used            JSONB NOT NULL DEFAULT '{}',
    files_examined        TEXT[] NOT NULL DEFAULT '{}',
    urls_fetched          TEXT[] NOT NULL DEFAULT '{}',
    result_summary        TEXT,
    started_at            TIMESTAMPTZ,
    completed_at          TIMESTAMPTZ,
    embedding             vector(384),
    UNIQUE (agent_id, parent_session_id),
    CHECK (completed_at IS NULL OR started_at IS NULL OR completed_at >= started_at)
);

CREATE INDEX IF NOT EXISTS idx_agent_work_session    ON agent_work (parent_session_id);
CREATE INDEX IF NOT EXISTS idx_agent_work_definition ON agent_work (agent_definition_id);
CREATE INDEX IF NOT EXISTS idx_agent_work_embedding  ON agent_work
    USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100);

CREATE OR REPLACE VIEW snapshot_quality AS
SELECT
    id,
    project_path,
    timestamp,
    (
        (CASE WHEN summary IS NOT NULL AND length(summary) >= 50 THEN 1 ELSE 0 END) +
        (CASE WHEN embedding IS NOT NULL THEN 1 ELSE 0 END) +
        (CASE WHEN cardinality(tags) > 0 THEN 1 ELSE 0 END) +
        (CASE WHEN cardinality(mentioned_files) > 0 THEN 1 ELSE 0 END) +
        (CASE WHEN cardinality(key_decisions) > 0 THEN 1 ELSE 0 END) +
        (CASE WHEN cardinality(bugs_fixed) > 0 THEN 1 ELSE 0 END) +
        (CASE WHEN git_commit_hash IS NOT NULL THEN 1 ELSE 0 END) +
        (CASE WHEN session_id IS NOT NULL THEN 1 ELSE 0 END) +
        (CASE WHEN message_count >= 5 THEN 1 ELSE 0 END) +
        (CASE WHEN summary IS NOT NULL AND length(summary) > 200 THEN 1 ELSE 0 END)
    ) AS quality_score
FROM context_snapshots;

CREATE OR REPLACE VIEW project_stats AS
SELECT
    project_path,
    count(*)                    AS snapshot_count,
    count(DISTINCT session_id)  AS session_count,
    coalesce(sum(message_count), 0)::BIGINT       AS total_messages,
    coalesce(sum(context_window_size), 0)::BIGINT AS total_bytes,
    min(timestamp)              AS first_capture,
    max(timestamp)              AS last_capture
FROM context_snapshots
GROUP BY project_path;

CREATE OR REPLACE VIEW agent_performance AS
SELECT
    d.id                          AS agent_definition_id,
    d.agent_type,
    d.version,
    count(w.id)                   AS times_used,
    avg(EXTRACT(EPOCH FROM (w.completed_at - w.started_at)))        AS avg_duration_seconds,
    avg(jsonb_array_length(w.work_context))                         AS avg_message_count,
    avg(CASE WHEN w.result_summary IS NOT NULL THEN 1.0 ELSE 0.0 END) AS success_rate
FROM agent_definitions d
LEFT JOIN agent_work w ON w.agent_definition_id = d.id
GROUP BY d.id, d.agent_type, d.version;
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_snapshot() -> Snapshot {
        Snapshot {
            id: 1,
            project_path: "Code/demo".into(),
            session_id: None,
            transcript_path: None,
            timestamp: Utc::now(),
            trigger_event: "manual".into(),
            message_count: 0,
            raw_context: Conversation::default(),
            summary: None,
            embedding: None,
            tags: vec![],
            mentioned_files: vec![],
            key_decisions: vec![],
            bugs_fixed: vec![],
            git_commit_hash: None,
            git_branch: None,
            context_window_size: 0,
        }
    }

    // ===== Quality Rubric Tests =====

    #[test]
    fn test_quality_score_empty_row_is_zero() {
        assert_eq!(quality_score(&blank_snapshot()), 0);
    }

    #[test]
    fn test_quality_score_full_row_is_ten() {
        let mut s = blank_snapshot();
        s.summary = Some("x".repeat(201));
        s.embedding = Some(vec![0.0; EMBEDDING_DIM]);
        s.tags = vec!["bug-fix".into()];
        s.mentioned_files = vec!["src/auth.js".into()];
        s.key_decisions = vec!["use prepared statements".into()];
        s.bugs_fixed = vec!["sql injection in login".into()];
        s.git_commit_hash = Some("abc123".into());
        s.session_id = Some("S".into());
        s.message_count = 5;
        assert_eq!(quality_score(&s), 10);
    }

    #[test]
    fn test_quality_score_summary_thresholds_are_independent() {
        let mut s = blank_snapshot();
        // 50..=200 chars: present-and-long-enough counts, >200 does not.
        s.summary = Some("x".repeat(120));
        assert_eq!(quality_score(&s), 1);
        s.summary = Some("x".repeat(201));
        assert_eq!(quality_score(&s), 2);
        s.summary = Some("x".repeat(10));
        assert_eq!(quality_score(&s), 0);
    }

    #[test]
    fn test_quality_score_message_count_boundary() {
        let mut s = blank_snapshot();
        s.message_count = 4;
        assert_eq!(quality_score(&s), 0);
        s.message_count = 5;
        assert_eq!(quality_score(&s), 1);
    }

    // ===== Trigger Classification Tests =====

    #[test]
    fn test_classify_trigger_buckets() {
        assert_eq!(classify_trigger("auto-compact-auto-2025-11-02-14-30"), "auto-compact");
        assert_eq!(classify_trigger("post-compact"), "post-compact");
        assert_eq!(classify_trigger("manual"), "manual");
        assert_eq!(classify_trigger("test-run-7"), "test");
        assert_eq!(classify_trigger("session-end"), "other");
    }

    // ===== Bug Classification Tests =====

    #[test]
    fn test_classify_bug_categories() {
        assert_eq!(classify_bug("race condition in the worker pool"), "concurrency");
        assert_eq!(classify_bug("memory leak in cache"), "memory");
        assert_eq!(classify_bug("null pointer on parse"), "data");
        assert_eq!(classify_bug("timeout talking to the api"), "integration");
        assert_eq!(classify_bug("slow query on dashboard"), "performance");
        assert_eq!(classify_bug("sql injection in login"), "security");
        assert_eq!(classify_bug("off by one in pagination"), "logic");
    }

    // ===== File Classification Tests =====

    #[test]
    fn test_classify_file_type() {
        assert_eq!(classify_file_type("src/auth.rs"), "source");
        assert_eq!(classify_file_type("config/app.yaml"), "config");
        assert_eq!(classify_file_type("README.md"), "docs");
        assert_eq!(classify_file_type("scripts/deploy.sh"), "shell");
        assert_eq!(classify_file_type("migrations/001.sql"), "sql");
        assert_eq!(classify_file_type("test/auth.test.js"), "test");
        assert_eq!(classify_file_type("Makefile"), "other");
    }

    // ===== Conversation Tests =====

    #[test]
    fn test_conversation_byte_size_counts_serialized_form() {
        let conv = Conversation {
            messages: vec![Message {
                role: "user".into(),
                content: "hello".into(),
            }],
        };
        let expected = serde_json::to_vec(&conv).unwrap().len() as i64;
        assert_eq!(conv.byte_size(), expected);
        assert!(expected > 0);
    }

    #[test]
    fn test_conversation_tolerates_missing_messages_key() {
        let conv: Conversation = serde_json::from_str("{}").unwrap();
        assert!(conv.is_empty());
    }
}
