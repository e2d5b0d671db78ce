//! Ad-hoc embedding endpoint, used by retrieval clients to embed query
//! text with the same model (and the same degradation ladder) as the
//! write path.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::shared_state::SharedState;

#[derive(Debug, Deserialize)]
pub struct EmbedRequest {
    pub text: String,
}

pub async fn embed(
    State(state): State<SharedState>,
    Json(request): Json<EmbedRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.text.trim().is_empty() {
        return Err(ApiError::bad_request("text must not be empty"));
    }

    let (embedding, degraded) = state.pipeline.embedder().embed_for_storage(&request.text).await;
    let dimensions = embedding.len();
    Ok(Json(json!({
        "status": if degraded { "degraded" } else { "ok" },
        "embedding": embedding,
        "dimensions": dimensions,
    })))
}
