//! Named-operation retrieval dispatch over the store.
//!
//! This is the stable query surface consumed by tool clients: every
//! operation takes `(query, optional project_path, optional limit)`
//! style arguments and returns a JSON document. Unknown names and
//! missing required arguments are rejected synchronously.

use serde_json::{json, Value as JsonValue};

use crate::error::ApiError;
use crate::shared_state::SharedState;

/// The closed set of retrieval operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    SearchMemory,
    SearchRawMessages,
    SearchExactPhrase,
    GetTimeline,
    GetSnapshot,
    GetQualityReport,
    GetProjectStats,
    SearchDecisions,
    AnalyzeBugs,
    GetFileActivity,
    SearchAgentWork,
    GetAgentAnalytics,
    CompareAgentConfigs,
}

impl Operation {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "search_memory" => Some(Self::SearchMemory),
            "search_raw_messages" => Some(Self::SearchRawMessages),
            "search_exact_phrase" => Some(Self::SearchExactPhrase),
            "get_timeline" => Some(Self::GetTimeline),
            "get_snapshot" => Some(Self::GetSnapshot),
            "get_quality_report" => Some(Self::GetQualityReport),
            "get_project_stats" => Some(Self::GetProjectStats),
            "search_decisions" => Some(Self::SearchDecisions),
            "analyze_bugs" => Some(Self::AnalyzeBugs),
            "get_file_activity" => Some(Self::GetFileActivity),
            "search_agent_work" => Some(Self::SearchAgentWork),
            "get_agent_analytics" => Some(Self::GetAgentAnalytics),
            "compare_agent_configs" => Some(Self::CompareAgentConfigs),
            _ => None,
        }
    }
}

fn require_str<'a>(args: &'a JsonValue, key: &str) -> Result<&'a str, ApiError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("missing required argument: {}", key)))
}

fn opt_str<'a>(args: &'a JsonValue, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str()).filter(|s| !s.trim().is_empty())
}

fn opt_i64(args: &JsonValue, key: &str) -> Option<i64> {
    args.get(key).and_then(|v| v.as_i64())
}

fn limit_arg(args: &JsonValue, default: i64) -> i64 {
    opt_i64(args, "limit").unwrap_or(default).clamp(1, 100)
}

pub async fn dispatch(
    state: &SharedState,
    name: &str,
    args: &JsonValue,
) -> Result<JsonValue, ApiError> {
    let operation =
        Operation::parse(name).ok_or_else(|| ApiError::UnknownOperation(name.to_string()))?;
    let project = opt_str(args, "project_path");

    match operation {
        Operation::SearchMemory => {
            let query = require_str(args, "query")?;
            let limit = limit_arg(args, 5);
            match state.pipeline.embedder().embed_query(query).await {
                Some(vector) => {
                    let hits = state.store.snapshots.semantic_search(vector, project, limit).await?;
                    Ok(json!({ "mode": "semantic", "results": hits }))
                }
                None => {
                    let hits = state.store.snapshots.lexical_search(query, project, limit).await?;
                    Ok(json!({ "mode": "lexical", "results": hits }))
                }
            }
        }
        Operation::SearchRawMessages => {
            let query = require_str(args, "query")?;
            let hits = state
                .store
                .snapshots
                .search_raw_messages(query, project, limit_arg(args, 10), 100)
                .await?;
            Ok(json!({ "results": hits }))
        }
        Operation::SearchExactPhrase => {
            let phrase = require_str(args, "phrase")?;
            let hits = state
                .store
                .snapshots
                .search_exact_phrase(phrase, project, limit_arg(args, 10))
                .await?;
            Ok(json!({ "results": hits }))
        }
        Operation::GetTimeline => {
            let rows = state
                .store
                .snapshots
                .timeline(project, limit_arg(args, 20))
                .await?;
            Ok(json!({ "timeline": rows }))
        }
        Operation::GetSnapshot => {
            let id = opt_i64(args, "id")
                .ok_or_else(|| ApiError::bad_request("missing required argument: id"))?;
            let snapshot = state
                .store
                .snapshots
                .get(id)
                .await?
                .ok_or(ApiError::NotFound { entity: "snapshot", id })?;
            Ok(serde_json::to_value(snapshot)
                .map_err(|e| ApiError::StoreError(e.to_string()))?)
        }
        Operation::GetQualityReport => {
            let min_score = opt_i64(args, "min_score").unwrap_or(0) as i32;
            let report = state.store.snapshots.quality_report(min_score).await?;
            Ok(serde_json::to_value(report)
                .map_err(|e| ApiError::StoreError(e.to_string()))?)
        }
        Operation::GetProjectStats => {
            let rows = state.store.snapshots.project_stats(project).await?;
            Ok(json!({ "projects": rows }))
        }
        Operation::SearchDecisions => {
            let keyword = require_str(args, "keyword")?;
            let rows = state
                .store
                .snapshots
                .decisions(Some(keyword), project, limit_arg(args, 20))
                .await?;
            Ok(json!({ "decisions": rows }))
        }
        Operation::AnalyzeBugs => {
            let rows = state
                .store
                .snapshots
                .bugs(opt_str(args, "category"), project, limit_arg(args, 20))
                .await?;
            Ok(json!({ "bugs": rows }))
        }
        Operation::GetFileActivity => {
            let min_mentions = opt_i64(args, "min_mentions").unwrap_or(2).max(1);
            let rows = state
                .store
                .snapshots
                .file_activity(opt_str(args, "file_type"), min_mentions, project, limit_arg(args, 20))
                .await?;
            Ok(json!({ "files": rows }))
        }
        Operation::SearchAgentWork => {
            let query = require_str(args, "query")?;
            let embedding = state.pipeline.embedder().embed_query(query).await;
            let mode = if embedding.is_some() { "semantic" } else { "lexical" };
            let rows = state
                .store
                .agents
                .search_work(embedding, query, limit_arg(args, 10))
                .await?;
            Ok(json!({ "mode": mode, "results": rows }))
        }
        Operation::GetAgentAnalytics => {
            let performance = state.store.agents.performance().await?;
            let tools = state.store.agents.tool_usage().await?;
            Ok(json!({ "performance": performance, "tool_usage": tools }))
        }
        Operation::CompareAgentConfigs => {
            let rows = state
                .store
                .agents
                .compare_versions(opt_str(args, "agent_type"))
                .await?;
            Ok(json!({ "versions": rows }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===== Operation Parsing Tests =====

    #[test]
    fn test_all_operation_names_parse() {
        let names = [
            "search_memory",
            "search_raw_messages",
            "search_exact_phrase",
            "get_timeline",
            "get_snapshot",
            "get_quality_report",
            "get_project_stats",
            "search_decisions",
            "analyze_bugs",
            "get_file_activity",
            "search_agent_work",
            "get_agent_analytics",
            "compare_agent_configs",
        ];
        for name in names {
            assert!(Operation::parse(name).is_some(), "unparsed: {}", name);
        }
    }

    #[test]
    fn test_unknown_operation_name_rejected() {
        assert!(Operation::parse("drop_all_tables").is_none());
        assert!(Operation::parse("").is_none());
        assert!(Operation::parse("SEARCH_MEMORY").is_none());
    }

    // ===== Argument Helper Tests =====

    #[test]
    fn test_require_str_present_and_missing() {
        let args = json!({ "query": "sql injection" });
        assert_eq!(require_str(&args, "query").unwrap(), "sql injection");
        assert!(require_str(&args, "phrase").is_err());
        assert!(require_str(&json!({ "query": "  " }), "query").is_err());
        assert!(require_str(&json!({ "query": 7 }), "query").is_err());
    }

    #[test]
    fn test_limit_arg_clamped() {
        assert_eq!(limit_arg(&json!({}), 5), 5);
        assert_eq!(limit_arg(&json!({ "limit": 3 }), 5), 3);
        assert_eq!(limit_arg(&json!({ "limit": 0 }), 5), 1);
        assert_eq!(limit_arg(&json!({ "limit": 1000 }), 5), 100);
    }

    #[test]
    fn test_opt_str_filters_blank() {
        assert_eq!(opt_str(&json!({ "project_path": "Code/demo" }), "project_path"), Some("Code/demo"));
        assert_eq!(opt_str(&json!({ "project_path": "" }), "project_path"), None);
        assert_eq!(opt_str(&json!({}), "project_path"), None);
    }
}
