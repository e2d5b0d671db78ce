//! Capture ingress: validate, acknowledge with `202`, enqueue.
//!
//! The acknowledgement always precedes pipeline work; pipeline failures
//! never surface here. Overload is reported synchronously as `429`
//! rather than queueing without bound.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::pipeline::CaptureJob;
use crate::shared_state::SharedState;
use crate::store::schema::Conversation;

/// Capture request body. Unknown fields (hook metadata and the like)
/// are tolerated and ignored.
#[derive(Debug, Deserialize)]
pub struct CaptureRequest {
    pub project_path: String,
    pub trigger: String,
    #[serde(default)]
    pub conversation_data: Option<Conversation>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub transcript_path: Option<String>,
}

impl CaptureRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if self.project_path.trim().is_empty() {
            return Err(ApiError::bad_request("project_path must not be empty"));
        }
        if self.trigger.trim().is_empty() {
            return Err(ApiError::bad_request("trigger must not be empty"));
        }
        let has_inline = self
            .conversation_data
            .as_ref()
            .map(|c| !c.is_empty())
            .unwrap_or(false);
        let has_transcript = self
            .transcript_path
            .as_ref()
            .map(|p| !p.trim().is_empty())
            .unwrap_or(false);
        if !has_inline && !has_transcript {
            return Err(ApiError::bad_request(
                "one of conversation_data or transcript_path is required",
            ));
        }
        Ok(())
    }
}

pub async fn capture(
    State(state): State<SharedState>,
    Json(request): Json<CaptureRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Err(e) = request.validate() {
        state.counters.inc_rejected_invalid();
        return Err(e);
    }

    let job = CaptureJob {
        project_path: request.project_path.clone(),
        trigger: request.trigger.clone(),
        conversation: request.conversation_data,
        session_id: request.session_id.clone(),
        transcript_path: request.transcript_path,
    };

    if state.try_enqueue(job).is_err() {
        state.counters.inc_rejected_busy();
        warn!(
            project_path = %request.project_path,
            trigger = %request.trigger,
            "capture rejected: queue full"
        );
        return Err(ApiError::Busy);
    }

    state.counters.inc_accepted();
    info!(
        project_path = %request.project_path,
        trigger = %request.trigger,
        session_id = ?request.session_id,
        "capture accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "accepted",
            "project_path": request.project_path,
            "trigger": request.trigger,
        })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::Message;

    fn base_request() -> CaptureRequest {
        CaptureRequest {
            project_path: "Code/demo".into(),
            trigger: "manual".into(),
            conversation_data: Some(Conversation {
                messages: vec![Message {
                    role: "user".into(),
                    content: "hello".into(),
                }],
            }),
            session_id: None,
            transcript_path: None,
        }
    }

    #[test]
    fn test_valid_request_passes() {
        assert!(base_request().validate().is_ok());
    }

    #[test]
    fn test_blank_project_path_rejected() {
        let mut request = base_request();
        request.project_path = "  ".into();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_blank_trigger_rejected() {
        let mut request = base_request();
        request.trigger = "".into();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_missing_both_sources_rejected() {
        let mut request = base_request();
        request.conversation_data = None;
        request.transcript_path = None;
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_transcript_path_alone_suffices() {
        let mut request = base_request();
        request.conversation_data = None;
        request.transcript_path = Some("/tmp/session.jsonl".into());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_empty_inline_conversation_needs_transcript() {
        let mut request = base_request();
        request.conversation_data = Some(Conversation::default());
        request.transcript_path = None;
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_unknown_fields_tolerated_in_body() {
        let body = serde_json::json!({
            "project_path": "Code/demo",
            "trigger": "auto-compact-auto-2025-11-02-14-30",
            "conversation_data": {"messages": [{"role": "user", "content": "hi"}]},
            "metadata": {"tags": ["auto-capture"]},
            "hook_version": 3
        });
        let parsed: CaptureRequest = serde_json::from_value(body).unwrap();
        assert!(parsed.validate().is_ok());
    }
}
