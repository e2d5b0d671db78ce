//! Fixed-dimension embedding generation with a deterministic fallback.
//!
//! The backend is an OpenAI-compatible `/v1/embeddings` endpoint. When
//! it fails (or real embeddings are switched off), rows still get a
//! shape-valid synthetic vector so downstream similarity stays
//! computable.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::CaptureError;
use crate::store::schema::EMBEDDING_DIM;

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

pub struct Embedder {
    base_url: String,
    model: String,
    use_real: bool,
    http_client: reqwest::Client,
}

impl Embedder {
    pub fn new(base_url: String, model: String, timeout: Duration, use_real: bool) -> Self {
        info!("Embedder initialized with backend: {} ({})", base_url, model);
        Self {
            base_url,
            model,
            use_real,
            http_client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    fn embeddings_url(&self) -> String {
        format!("{}/v1/embeddings", self.base_url)
    }

    /// Embedding for persistence: always returns a 384-component vector.
    /// The boolean reports degraded mode (backend requested but failed).
    pub async fn embed_for_storage(&self, text: &str) -> (Vec<f32>, bool) {
        if !self.use_real {
            return (synthetic_vector(), false);
        }
        match self.request_embedding(text).await {
            Ok(vector) => (vector, false),
            Err(e) => {
                let err = CaptureError::EmbedderUnavailable(e.to_string());
                warn!("{}; storing synthetic vector", err);
                (synthetic_vector(), true)
            }
        }
    }

    /// Query-side embedding: `None` on backend failure so the caller can
    /// fall back to lexical search instead of comparing garbage.
    pub async fn embed_query(&self, text: &str) -> Option<Vec<f32>> {
        if !self.use_real {
            return Some(synthetic_vector());
        }
        match self.request_embedding(text).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                debug!("query embedding unavailable ({}), lexical fallback", e);
                None
            }
        }
    }

    async fn request_embedding(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: vec![text.to_string()],
        };

        let response = self
            .http_client
            .post(self.embeddings_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("embedding backend request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("embedding backend returned {}: {}", status, body));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("failed to parse embedding response: {}", e))?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow::anyhow!("embedding response carried no vectors"))?;

        if vector.len() != EMBEDDING_DIM {
            return Err(anyhow::anyhow!(
                "embedding dimension mismatch: expected {}, got {}",
                EMBEDDING_DIM,
                vector.len()
            ));
        }
        Ok(vector)
    }
}

/// Deterministic shape-valid stand-in: `sin(i · 0.1)` per component.
pub fn synthetic_vector() -> Vec<f32> {
    (0..EMBEDDING_DIM).map(|i| (i as f32 * 0.1).sin()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_vector_has_declared_dimension() {
        assert_eq!(synthetic_vector().len(), EMBEDDING_DIM);
    }

    #[test]
    fn test_synthetic_vector_is_deterministic() {
        assert_eq!(synthetic_vector(), synthetic_vector());
    }

    #[test]
    fn test_synthetic_vector_components() {
        let v = synthetic_vector();
        assert_eq!(v[0], 0.0);
        assert!((v[1] - 0.1_f32.sin()).abs() < f32::EPSILON);
        assert!(v.iter().all(|c| (-1.0..=1.0).contains(c)));
    }

    #[tokio::test]
    async fn test_unreachable_backend_degrades_to_synthetic() {
        // Port 1 refuses connections, so the real path fails fast.
        let embedder = Embedder::new(
            "http://127.0.0.1:1".into(),
            "all-minilm".into(),
            Duration::from_millis(250),
            true,
        );
        let (vector, degraded) = embedder.embed_for_storage("SQL injection").await;
        assert!(degraded);
        assert_eq!(vector, synthetic_vector());
    }

    #[tokio::test]
    async fn test_query_embedding_none_on_failure() {
        let embedder = Embedder::new(
            "http://127.0.0.1:1".into(),
            "all-minilm".into(),
            Duration::from_millis(250),
            true,
        );
        assert!(embedder.embed_query("anything").await.is_none());
    }

    #[tokio::test]
    async fn test_flag_off_short_circuits_without_degradation() {
        let embedder = Embedder::new(
            "http://127.0.0.1:1".into(),
            "all-minilm".into(),
            Duration::from_millis(250),
            false,
        );
        let (vector, degraded) = embedder.embed_for_storage("anything").await;
        assert!(!degraded);
        assert_eq!(vector.len(), EMBEDDING_DIM);
    }
}
