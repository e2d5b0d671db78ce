//! Agent analytics endpoints and agent-work ingestion.
//!
//! Ingestion stores the work row together with its deduplicated
//! definition; re-posting the same `(agent_id, parent_session_id)` pair
//! is a no-op that returns the existing row id.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::error::ApiError;
use crate::shared_state::SharedState;
use crate::store::schema::{AgentDefinitionSpec, AgentWorkRecord};

#[derive(Debug, Deserialize)]
pub struct AgentListQuery {
    pub session_id: Option<String>,
    pub agent_type: Option<String>,
    pub limit: Option<i64>,
}

/// Aggregate counts for the agents dashboard.
pub async fn agent_stats(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let work_count = state.store.agents.work_count().await?;
    let performance = state.store.agents.performance().await?;
    let definition_count = performance.len();
    Ok(Json(json!({
        "agent_work": work_count,
        "agent_definitions": definition_count,
    })))
}

pub async fn agent_performance(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.agents.performance().await?))
}

pub async fn agent_tools(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.agents.tool_usage().await?))
}

pub async fn agent_recent(
    State(state): State<SharedState>,
    Query(query): Query<AgentListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = state
        .store
        .agents
        .recent_work(query.session_id.as_deref(), query.limit.unwrap_or(10).clamp(1, 100))
        .await?;
    Ok(Json(rows))
}

/// Ingestion body: the execution record plus the blueprint it ran with.
#[derive(Debug, Deserialize)]
pub struct AgentCaptureRequest {
    #[serde(flatten)]
    pub work: AgentWorkRecord,
    pub definition: AgentDefinitionSpec,
}

pub async fn capture_agent_work(
    State(state): State<SharedState>,
    Json(request): Json<AgentCaptureRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.work.agent_id.trim().is_empty() {
        return Err(ApiError::bad_request("agent_id must not be empty"));
    }
    if request.work.parent_session_id.trim().is_empty() {
        return Err(ApiError::bad_request("parent_session_id must not be empty"));
    }

    let mut work = request.work;
    if work.agent_type.is_none() {
        work.agent_type = Some(
            infer_agent_type(
                work.agent_request.as_deref(),
                request.definition.system_message.as_deref(),
            )
            .to_string(),
        );
    }

    let definition_id = state
        .store
        .agents
        .get_or_create_definition(&request.definition)
        .await?;

    // Embed the agent's outcome so agent work is semantically searchable
    // alongside snapshots.
    let embed_text = work.result_summary.clone().or_else(|| work.agent_request.clone());
    let embedding = match &embed_text {
        Some(text) => Some(state.pipeline.embedder().embed_for_storage(text).await.0),
        None => None,
    };

    let work_id = state
        .store
        .agents
        .store_work(&work, definition_id, embedding)
        .await?;

    info!(
        agent_id = %work.agent_id,
        parent_session_id = %work.parent_session_id,
        definition_id,
        work_id,
        "agent work captured"
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": "stored",
            "agent_work_id": work_id,
            "agent_definition_id": definition_id,
        })),
    ))
}

/// Heuristic agent-type classification for captures that arrive without
/// one, keyed on the task wording and the agent's self-description.
fn infer_agent_type(agent_request: Option<&str>, system_message: Option<&str>) -> &'static str {
    let text = format!(
        "{} {}",
        agent_request.unwrap_or_default(),
        system_message.unwrap_or_default()
    )
    .to_lowercase();

    if text.trim().is_empty() {
        "general-purpose"
    } else if ["explore", "find", "search", "locate"].iter().any(|w| text.contains(w)) {
        "Explore"
    } else if ["plan", "design", "architect", "strategy"].iter().any(|w| text.contains(w)) {
        "Plan"
    } else if ["fetch", "scrape", "download", "retrieve url"].iter().any(|w| text.contains(w)) {
        "WebFetch"
    } else if text.contains("read-only") || text.contains("readonly") {
        "ReadOnly"
    } else {
        "general-purpose"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_capture_request_deserializes_flattened() {
        let body = serde_json::json!({
            "agent_id": "a1b2",
            "parent_session_id": "S",
            "agent_type": "Explore",
            "tools_used": {"Read": 4, "Grep": 2},
            "files_examined": ["src/lib.rs"],
            "definition": {
                "agent_type": "Explore",
                "tools_available": ["Read", "Grep"],
                "model_used": "local-llm"
            }
        });
        let parsed: AgentCaptureRequest = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.work.agent_id, "a1b2");
        assert_eq!(parsed.work.tools_used.get("Read"), Some(&4));
        assert_eq!(parsed.definition.agent_type, "Explore");
    }

    #[test]
    fn test_infer_agent_type_from_request_wording() {
        assert_eq!(infer_agent_type(Some("explore the codebase for callers"), None), "Explore");
        assert_eq!(infer_agent_type(Some("plan the migration"), None), "Plan");
        assert_eq!(infer_agent_type(Some("fetch the changelog page"), None), "WebFetch");
        assert_eq!(
            infer_agent_type(Some("retrieve url from the docs site"), None),
            "WebFetch"
        );
        assert_eq!(infer_agent_type(Some("summarize this module"), None), "general-purpose");
    }

    #[test]
    fn test_infer_agent_type_uses_self_description() {
        assert_eq!(
            infer_agent_type(None, Some("I operate in read-only mode")),
            "ReadOnly"
        );
        assert_eq!(infer_agent_type(None, None), "general-purpose");
    }
}
