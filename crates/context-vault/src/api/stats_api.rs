//! Read-only dashboard endpoints over the store views, plus the
//! first-class summary rewrite used by the enhanced-summary utility.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::shared_state::SharedState;

fn clamp_limit(limit: Option<i64>, default: i64) -> i64 {
    limit.unwrap_or(default).clamp(1, 100)
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub project_path: Option<String>,
    pub limit: Option<i64>,
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// System status: store totals plus ingress counters.
pub async fn stats(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let overview = state.store.snapshots.overview().await?;
    let agent_work = state.store.agents.work_count().await?;
    let counters = &state.counters;
    Ok(Json(json!({
        "snapshots": overview.snapshot_count,
        "projects": overview.project_count,
        "agent_work": agent_work,
        "last_capture": overview.last_capture,
        "captures_accepted": counters.captures_accepted.load(std::sync::atomic::Ordering::Relaxed),
        "captures_rejected_busy": counters.captures_rejected_busy.load(std::sync::atomic::Ordering::Relaxed),
        "captures_rejected_invalid": counters.captures_rejected_invalid.load(std::sync::atomic::Ordering::Relaxed),
    })))
}

pub async fn recent(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = state
        .store
        .snapshots
        .recent(query.project_path.as_deref(), clamp_limit(query.limit, 10))
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct QualityQuery {
    pub min_score: Option<i32>,
}

pub async fn quality(
    State(state): State<SharedState>,
    Query(query): Query<QualityQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state
        .store
        .snapshots
        .quality_report(query.min_score.unwrap_or(0))
        .await?;
    Ok(Json(report))
}

pub async fn projects(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = state
        .store
        .snapshots
        .project_stats(query.project_path.as_deref())
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct BugsQuery {
    pub category: Option<String>,
    pub project_path: Option<String>,
    pub limit: Option<i64>,
}

pub async fn bugs(
    State(state): State<SharedState>,
    Query(query): Query<BugsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = state
        .store
        .snapshots
        .bugs(
            query.category.as_deref(),
            query.project_path.as_deref(),
            clamp_limit(query.limit, 20),
        )
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct FilesQuery {
    pub file_type: Option<String>,
    pub min_mentions: Option<i64>,
    pub project_path: Option<String>,
    pub limit: Option<i64>,
}

pub async fn files(
    State(state): State<SharedState>,
    Query(query): Query<FilesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = state
        .store
        .snapshots
        .file_activity(
            query.file_type.as_deref(),
            query.min_mentions.unwrap_or(1).max(1),
            query.project_path.as_deref(),
            clamp_limit(query.limit, 20),
        )
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct DecisionsQuery {
    pub keyword: Option<String>,
    pub project_path: Option<String>,
    pub limit: Option<i64>,
}

pub async fn decisions(
    State(state): State<SharedState>,
    Query(query): Query<DecisionsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = state
        .store
        .snapshots
        .decisions(
            query.keyword.as_deref(),
            query.project_path.as_deref(),
            clamp_limit(query.limit, 20),
        )
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct RewriteSummaryRequest {
    pub summary: String,
}

/// Replace a snapshot's summary and re-embed it in one operation.
pub async fn rewrite_summary(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(request): Json<RewriteSummaryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.summary.trim().is_empty() {
        return Err(ApiError::bad_request("summary must not be empty"));
    }

    let (embedding, degraded) = state
        .pipeline
        .embedder()
        .embed_for_storage(&request.summary)
        .await;
    let updated = state
        .store
        .snapshots
        .rewrite_summary(id, &request.summary, embedding)
        .await?;
    if !updated {
        return Err(ApiError::NotFound { entity: "snapshot", id });
    }
    Ok(Json(json!({
        "status": if degraded { "updated (embedding degraded)" } else { "updated" },
        "snapshot_id": id,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_limit_defaults_and_bounds() {
        assert_eq!(clamp_limit(None, 10), 10);
        assert_eq!(clamp_limit(Some(5), 10), 5);
        assert_eq!(clamp_limit(Some(0), 10), 1);
        assert_eq!(clamp_limit(Some(-3), 10), 1);
        assert_eq!(clamp_limit(Some(10_000), 10), 100);
    }
}
