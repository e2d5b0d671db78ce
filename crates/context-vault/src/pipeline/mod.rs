//! The capture pipeline: one acknowledged request in, at most one
//! persisted snapshot out.
//!
//! Stages run strictly in order inside a pipeline; separate requests run
//! in parallel across a bounded worker pool. Persistence is single-shot,
//! so nothing is written until summarization and embedding have settled
//! (possibly on their fallbacks).

pub mod transcript;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::embed::Embedder;
use crate::error::CaptureError;
use crate::extract::{self, vcs};
use crate::store::schema::{CaptureRecord, Conversation, PersistOutcome};
use crate::store::ContextStore;
use crate::summarize::{SamplingPolicy, SessionContext, Summarizer};

/// One validated capture request, as handed off by ingress.
#[derive(Debug, Clone)]
pub struct CaptureJob {
    pub project_path: String,
    pub trigger: String,
    pub conversation: Option<Conversation>,
    pub session_id: Option<String>,
    pub transcript_path: Option<String>,
}

/// Per-request orchestration over the extractor, summarizer, embedder,
/// and store.
pub struct CapturePipeline {
    store: ContextStore,
    summarizer: Summarizer,
    embedder: Embedder,
    workspace_root: String,
}

impl CapturePipeline {
    pub fn new(config: &Config, store: ContextStore) -> Self {
        let summarizer = Summarizer::new(
            config.ollama_url.clone(),
            config.summary_model.clone(),
            Duration::from_secs(config.summary_timeout_seconds),
            config.use_ai_summaries,
            SamplingPolicy {
                first: config.sample_first,
                middle: config.sample_middle,
                last: config.sample_last,
            },
        );
        let embedder = Embedder::new(
            config.ollama_url.clone(),
            config.embedding_model.clone(),
            Duration::from_secs(config.embed_timeout_seconds),
            config.use_real_embeddings,
        );
        Self {
            store,
            summarizer,
            embedder,
            workspace_root: config.workspace_root.clone(),
        }
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    /// Run all five stages for one job.
    pub async fn run(&self, job: CaptureJob) -> Result<PersistOutcome, CaptureError> {
        // Stage 1: resolve the conversation document.
        let conversation = resolve_conversation(&job).await?;

        // Stage 2: metadata. Extraction is pure; the VCS probe is
        // best-effort and silent on failure.
        let mut metadata = extract::extract_metadata(&conversation);
        let (git_hash, git_branch) = vcs::probe(&job.project_path, &self.workspace_root).await;
        metadata.git_commit_hash = git_hash;
        metadata.git_branch = git_branch;

        // Stage 3: summary, primed with the previous snapshot for this
        // project when one exists. A store hiccup here only costs the
        // continuity hint.
        let previous = match self.store.snapshots.latest_for_project(&job.project_path).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!("previous-session lookup failed ({}), continuing without it", e);
                None
            }
        };
        let context = SessionContext {
            project_path: job.project_path.clone(),
            session_id: job.session_id.clone(),
            trigger: job.trigger.clone(),
        };
        let (summary, summary_degraded) = self
            .summarizer
            .summarize(&conversation, &metadata, &context, previous.as_ref())
            .await;

        // Stage 4: embedding, synthetic on failure.
        let (embedding, embedding_degraded) = self.embedder.embed_for_storage(&summary).await;

        // Stage 5: single-shot persistence.
        let record = CaptureRecord {
            project_path: job.project_path.clone(),
            session_id: job.session_id.clone(),
            transcript_path: job.transcript_path.clone(),
            trigger_event: job.trigger.clone(),
            message_count: conversation.len() as i32,
            raw_context: conversation,
            summary,
            embedding,
            tags: metadata.tags,
            mentioned_files: metadata.files,
            key_decisions: metadata.decisions,
            bugs_fixed: metadata.bugs,
            git_commit_hash: metadata.git_commit_hash,
            git_branch: metadata.git_branch,
        };
        let outcome = self.store.snapshots.persist(&record).await?;

        info!(
            project_path = %job.project_path,
            trigger = %job.trigger,
            session_id = ?job.session_id,
            snapshot_id = outcome.id,
            action = ?outcome.action,
            summary_degraded,
            embedding_degraded,
            "capture pipeline completed"
        );
        Ok(outcome)
    }
}

/// Stage 1: an inline conversation wins; otherwise the transcript file
/// is read. No messages from either source aborts the capture.
async fn resolve_conversation(job: &CaptureJob) -> Result<Conversation, CaptureError> {
    let conversation = match (&job.conversation, &job.transcript_path) {
        (Some(inline), _) if !inline.is_empty() => inline.clone(),
        (_, Some(path)) => transcript::read_transcript(path).await.map_err(|e| {
            warn!(path = %path, "transcript read failed: {}", e);
            CaptureError::EmptyConversation
        })?,
        _ => return Err(CaptureError::EmptyConversation),
    };
    if conversation.is_empty() {
        return Err(CaptureError::EmptyConversation);
    }
    Ok(conversation)
}

/// Handle over the bounded queue and its worker pool.
pub struct PipelineHandle {
    sender: mpsc::Sender<CaptureJob>,
    workers: Vec<JoinHandle<()>>,
}

impl PipelineHandle {
    /// Spawn `workers` pipeline tasks draining one bounded queue.
    pub fn spawn(pipeline: Arc<CapturePipeline>, queue_size: usize, workers: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<CaptureJob>(queue_size);
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers.max(1))
            .map(|worker_id| {
                let pipeline = pipeline.clone();
                let receiver = receiver.clone();
                tokio::spawn(async move {
                    loop {
                        let job = { receiver.lock().await.recv().await };
                        let Some(job) = job else {
                            // Sender dropped: shutdown.
                            break;
                        };
                        let descriptor = (
                            job.project_path.clone(),
                            job.trigger.clone(),
                            job.session_id.clone(),
                        );
                        match pipeline.run(job).await {
                            Ok(_) => {}
                            Err(CaptureError::EmptyConversation) => {
                                warn!(
                                    worker_id,
                                    project_path = %descriptor.0,
                                    trigger = %descriptor.1,
                                    session_id = ?descriptor.2,
                                    "capture aborted: empty conversation"
                                );
                            }
                            Err(e) => {
                                error!(
                                    worker_id,
                                    project_path = %descriptor.0,
                                    trigger = %descriptor.1,
                                    session_id = ?descriptor.2,
                                    "capture failed: {}", e
                                );
                            }
                        }
                    }
                })
            })
            .collect();

        Self { sender, workers: handles }
    }

    /// Producer side of the bounded queue, cloned into shared state.
    pub fn sender(&self) -> mpsc::Sender<CaptureJob> {
        self.sender.clone()
    }

    /// Stop accepting work and give in-flight pipelines a grace window.
    pub async fn shutdown(self, grace: Duration) {
        drop(self.sender);
        let drain = async {
            for worker in self.workers {
                let _ = worker.await;
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("pipeline workers did not drain within the grace window");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::Message;
    use std::io::Write;

    fn job() -> CaptureJob {
        CaptureJob {
            project_path: "Code/demo".into(),
            trigger: "manual".into(),
            conversation: None,
            session_id: Some("S".into()),
            transcript_path: None,
        }
    }

    fn inline(messages: usize) -> Conversation {
        Conversation {
            messages: (0..messages)
                .map(|i| Message {
                    role: "user".into(),
                    content: format!("message {}", i),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_resolve_prefers_inline_conversation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"role":"user","content":"from disk"}}"#).unwrap();

        let mut job = job();
        job.conversation = Some(inline(3));
        job.transcript_path = Some(file.path().to_str().unwrap().into());

        let conversation = resolve_conversation(&job).await.unwrap();
        assert_eq!(conversation.len(), 3);
        assert_eq!(conversation.messages[0].content, "message 0");
    }

    #[tokio::test]
    async fn test_resolve_falls_through_to_transcript_when_inline_empty() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"role":"user","content":"from disk"}}"#).unwrap();

        let mut job = job();
        job.conversation = Some(Conversation::default());
        job.transcript_path = Some(file.path().to_str().unwrap().into());

        let conversation = resolve_conversation(&job).await.unwrap();
        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation.messages[0].content, "from disk");
    }

    #[tokio::test]
    async fn test_resolve_rejects_missing_sources() {
        let result = resolve_conversation(&job()).await;
        assert!(matches!(result, Err(CaptureError::EmptyConversation)));
    }

    #[tokio::test]
    async fn test_resolve_rejects_unreadable_transcript() {
        let mut job = job();
        job.transcript_path = Some("/no/such/session.jsonl".into());
        let result = resolve_conversation(&job).await;
        assert!(matches!(result, Err(CaptureError::EmptyConversation)));
    }

    #[tokio::test]
    async fn test_resolve_rejects_transcript_with_no_messages() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"type":"summary","summary":"only noise"}}"#).unwrap();

        let mut job = job();
        job.transcript_path = Some(file.path().to_str().unwrap().into());
        let result = resolve_conversation(&job).await;
        assert!(matches!(result, Err(CaptureError::EmptyConversation)));
    }
}
