//! HTTP wrapper over the retrieval dispatch.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::error::ApiError;
use crate::retrieval;
use crate::shared_state::SharedState;

#[derive(Debug, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: JsonValue,
}

pub async fn call_tool(
    State(state): State<SharedState>,
    Json(request): Json<ToolCallRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let result = retrieval::dispatch(&state, &request.name, &request.arguments).await?;
    Ok(Json(result))
}
