//! Chat-completion client for the summarization backend.
//!
//! The backend speaks the OpenAI-compatible `/v1/chat/completions`
//! surface; the client timeout is generous because local models can
//! take minutes on long prompts.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

pub struct SummaryClient {
    base_url: String,
    model: String,
    http_client: reqwest::Client,
}

impl SummaryClient {
    pub fn new(base_url: String, model: String, timeout: Duration) -> Self {
        info!("Summary client initialized with backend: {} ({})", base_url, model);
        Self {
            base_url,
            model,
            http_client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    pub async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        debug!("requesting summary ({} prompt chars)", prompt.len());
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: 600,
            temperature: 0.3,
            stream: false,
        };

        let response = self
            .http_client
            .post(self.completions_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("summary backend request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("summary backend returned {}: {}", status, body));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("failed to parse summary response: {}", e))?;

        let content = completion
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .map(|m| m.content.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(anyhow::anyhow!("summary backend returned an empty completion"));
        }
        Ok(content)
    }
}
