//! Session-aware summary generation with an extractive fallback.
//!
//! The prompt is primed with the extracted metadata and, when one
//! exists, a short reference to the most recent prior snapshot for the
//! same project, so consecutive sessions read as one continuing story.

pub mod ollama;

pub use ollama::SummaryClient;

use std::time::Duration;
use tracing::warn;

use crate::error::CaptureError;
use crate::extract::Metadata;
use crate::store::schema::{Conversation, Message};
use crate::store::snapshot_store::PreviousSnapshot;
use crate::utils::{excerpt, truncate_with_marker};

/// Per-message character cap inside the prompt.
const MESSAGE_CAP: usize = 500;

/// How the message sequence was chosen for the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    /// Every message fit within the budget.
    Full,
    /// Head + evenly spaced middle band + tail.
    Sampled,
}

/// Request-scoped context threaded into the prompt.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub project_path: String,
    pub session_id: Option<String>,
    pub trigger: String,
}

/// Head/middle/tail sampling policy (defaults 20/30/50).
#[derive(Debug, Clone, Copy)]
pub struct SamplingPolicy {
    pub first: usize,
    pub middle: usize,
    pub last: usize,
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self { first: 20, middle: 30, last: 50 }
    }
}

pub struct Summarizer {
    client: SummaryClient,
    use_ai: bool,
    policy: SamplingPolicy,
}

impl Summarizer {
    pub fn new(
        base_url: String,
        model: String,
        timeout: Duration,
        use_ai: bool,
        policy: SamplingPolicy,
    ) -> Self {
        Self {
            client: SummaryClient::new(base_url, model, timeout),
            use_ai,
            policy,
        }
    }

    /// Produce the summary text. The second element reports whether the
    /// pipeline ran degraded (model path requested but unavailable).
    pub async fn summarize(
        &self,
        conversation: &Conversation,
        metadata: &Metadata,
        context: &SessionContext,
        previous: Option<&PreviousSnapshot>,
    ) -> (String, bool) {
        if !self.use_ai {
            return (extractive_summary(conversation), false);
        }

        let (selected, strategy) = select_messages(&conversation.messages, self.policy);
        let prompt = build_prompt(&selected, strategy, metadata, context, previous);

        match self.client.generate(&prompt).await {
            Ok(summary) => (summary, false),
            Err(e) => {
                let err = CaptureError::SummarizerUnavailable(e.to_string());
                warn!(
                    project_path = %context.project_path,
                    "{}; falling back to extractive summary", err
                );
                (extractive_summary(conversation), true)
            }
        }
    }
}

/// Pick the messages that go into the prompt.
///
/// Everything fits when `N ≤ first + middle + last`. Beyond that, keep
/// the head, an evenly spaced sample across the middle band, and the
/// tail, in original order.
pub fn select_messages(messages: &[Message], policy: SamplingPolicy) -> (Vec<&Message>, SelectionStrategy) {
    let n = messages.len();
    let budget = policy.first + policy.middle + policy.last;
    if n <= budget {
        return (messages.iter().collect(), SelectionStrategy::Full);
    }

    let mut selected: Vec<&Message> = messages[..policy.first].iter().collect();

    let band = &messages[policy.first..n - policy.last];
    let take = policy.middle.min(band.len());
    for i in 0..take {
        let idx = i * band.len() / take;
        selected.push(&band[idx]);
    }

    selected.extend(messages[n - policy.last..].iter());
    (selected, SelectionStrategy::Sampled)
}

fn build_prompt(
    selected: &[&Message],
    strategy: SelectionStrategy,
    metadata: &Metadata,
    context: &SessionContext,
    previous: Option<&PreviousSnapshot>,
) -> String {
    let mut prompt = String::with_capacity(16 * 1024);

    prompt.push_str("You are summarizing a coding-assistant session for long-term memory.\n\n");

    match previous {
        Some(prev) => {
            prompt.push_str("Previous session context:\n");
            prompt.push_str(&format!(
                "- snapshot #{} captured {}\n",
                prev.id,
                prev.timestamp.to_rfc3339()
            ));
            if let Some(summary) = &prev.summary {
                prompt.push_str(&format!("- summary: {}\n", excerpt(summary, 300)));
            }
            if !prev.tags.is_empty() {
                prompt.push_str(&format!("- tags: {}\n", prev.tags.join(", ")));
            }
        }
        None => {
            prompt.push_str("Previous session context: none (first capture for this project).\n");
        }
    }

    prompt.push_str(&format!(
        "\nSession: project={} session_id={} trigger={}\n",
        context.project_path,
        context.session_id.as_deref().unwrap_or("unknown"),
        context.trigger
    ));

    prompt.push_str(&format!(
        "Extracted metadata: tags=[{}] files=[{}] decisions={} bugs={}\n",
        metadata.tags.join(", "),
        metadata.files.join(", "),
        metadata.decisions.len(),
        metadata.bugs.len()
    ));

    let selection_note = match strategy {
        SelectionStrategy::Full => "complete conversation".to_string(),
        SelectionStrategy::Sampled => format!(
            "sampled conversation ({} of {} messages: head, spaced middle, tail)",
            selected.len(),
            metadata.message_count
        ),
    };
    prompt.push_str(&format!("\nConversation ({}):\n", selection_note));

    for message in selected {
        prompt.push_str(&format!(
            "[{}] {}\n",
            message.role,
            truncate_with_marker(&message.content, MESSAGE_CAP)
        ));
    }

    prompt.push_str(
        "\nWrite a structured summary with these sections:\n\
         ## Primary Goal\n\
         ## Files Modified\n\
         ## Features Added\n\
         ## Bugs Fixed\n\
         ## Technical Decisions\n\
         ## Session Metrics\n\
         ## Continuity\n\
         Cover continuity with the previous session explicitly. Be concrete and concise.\n",
    );

    prompt
}

/// Deterministic fallback when the model path is off or unavailable:
/// first user message as the request, last assistant message as the
/// outcome, plus the message count.
pub fn extractive_summary(conversation: &Conversation) -> String {
    let request = conversation
        .messages
        .iter()
        .find(|m| m.role == "user")
        .map(|m| excerpt(&m.content, 200).into_owned())
        .unwrap_or_default();

    let outcome = conversation
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "assistant")
        .map(|m| excerpt(&m.content, 300).into_owned())
        .unwrap_or_default();

    format!(
        "Request: {}\n\nOutcome: {}\n\nTotal messages: {}",
        request,
        outcome,
        conversation.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn messages(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| Message {
                role: if i % 2 == 0 { "user" } else { "assistant" }.into(),
                content: format!("message {}", i),
            })
            .collect()
    }

    fn context() -> SessionContext {
        SessionContext {
            project_path: "Code/demo".into(),
            session_id: Some("S".into()),
            trigger: "manual".into(),
        }
    }

    // ===== Selection Strategy Tests =====

    #[test]
    fn test_exact_budget_uses_full_strategy() {
        let msgs = messages(100);
        let (selected, strategy) = select_messages(&msgs, SamplingPolicy::default());
        assert_eq!(strategy, SelectionStrategy::Full);
        assert_eq!(selected.len(), 100);
    }

    #[test]
    fn test_one_over_budget_uses_sampled_strategy() {
        let msgs = messages(101);
        let (selected, strategy) = select_messages(&msgs, SamplingPolicy::default());
        assert_eq!(strategy, SelectionStrategy::Sampled);
        assert_eq!(selected.len(), 100);
    }

    #[test]
    fn test_sampled_selection_preserves_order_and_bands() {
        let msgs = messages(500);
        let (selected, _) = select_messages(&msgs, SamplingPolicy::default());
        assert_eq!(selected.len(), 100);
        // Head intact.
        assert_eq!(selected[0].content, "message 0");
        assert_eq!(selected[19].content, "message 19");
        // Tail intact.
        assert_eq!(selected[50].content, "message 450");
        assert_eq!(selected[99].content, "message 499");
        // Middle band sampled from inside (20..450).
        let middle_indices: Vec<usize> = selected[20..50]
            .iter()
            .map(|m| m.content.strip_prefix("message ").unwrap().parse().unwrap())
            .collect();
        assert!(middle_indices.iter().all(|&i| (20..450).contains(&i)));
        assert!(middle_indices.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_short_conversation_passes_through() {
        let msgs = messages(2);
        let (selected, strategy) = select_messages(&msgs, SamplingPolicy::default());
        assert_eq!(strategy, SelectionStrategy::Full);
        assert_eq!(selected.len(), 2);
    }

    // ===== Prompt Tests =====

    #[test]
    fn test_prompt_caps_each_message_at_500_chars() {
        let long = Message {
            role: "assistant".into(),
            content: "z".repeat(800),
        };
        let short = Message {
            role: "user".into(),
            content: "short".into(),
        };
        let selected = vec![&short, &long];
        let meta = Metadata::default();
        let prompt = build_prompt(&selected, SelectionStrategy::Full, &meta, &context(), None);
        assert!(prompt.contains("... [truncated]"));
        assert!(!prompt.contains(&"z".repeat(501)));
        assert!(prompt.contains("[user] short"));
    }

    #[test]
    fn test_prompt_includes_previous_session_reference() {
        let previous = PreviousSnapshot {
            id: 42,
            timestamp: Utc::now(),
            summary: Some("a".repeat(400)),
            tags: vec!["bug-fix".into(), "security".into()],
        };
        let meta = Metadata::default();
        let prompt = build_prompt(&[], SelectionStrategy::Full, &meta, &context(), Some(&previous));
        assert!(prompt.contains("snapshot #42"));
        assert!(prompt.contains("bug-fix, security"));
        // The prior summary is excerpted, not inlined whole.
        assert!(!prompt.contains(&"a".repeat(301)));
    }

    #[test]
    fn test_prompt_states_when_no_previous_session() {
        let meta = Metadata::default();
        let prompt = build_prompt(&[], SelectionStrategy::Full, &meta, &context(), None);
        assert!(prompt.contains("none (first capture for this project)"));
    }

    // ===== Extractive Fallback Tests =====

    #[test]
    fn test_extractive_summary_template() {
        let conversation = Conversation {
            messages: vec![
                Message {
                    role: "user".into(),
                    content: "fix the SQL injection in login".into(),
                },
                Message {
                    role: "assistant".into(),
                    content: "patched src/auth.js line 42; added tests in test/auth.test.js".into(),
                },
            ],
        };
        let summary = extractive_summary(&conversation);
        assert_eq!(
            summary,
            "Request: fix the SQL injection in login\n\n\
             Outcome: patched src/auth.js line 42; added tests in test/auth.test.js\n\n\
             Total messages: 2"
        );
    }

    #[test]
    fn test_extractive_summary_caps_fields() {
        let conversation = Conversation {
            messages: vec![
                Message {
                    role: "user".into(),
                    content: "u".repeat(300),
                },
                Message {
                    role: "assistant".into(),
                    content: "a".repeat(400),
                },
            ],
        };
        let summary = extractive_summary(&conversation);
        assert!(summary.contains(&"u".repeat(200)));
        assert!(!summary.contains(&"u".repeat(201)));
        assert!(summary.contains(&"a".repeat(300)));
        assert!(!summary.contains(&"a".repeat(301)));
    }

    #[test]
    fn test_extractive_summary_picks_last_assistant_message() {
        let conversation = Conversation {
            messages: vec![
                Message { role: "user".into(), content: "start".into() },
                Message { role: "assistant".into(), content: "first answer".into() },
                Message { role: "user".into(), content: "continue".into() },
                Message { role: "assistant".into(), content: "final answer".into() },
            ],
        };
        let summary = extractive_summary(&conversation);
        assert!(summary.contains("Outcome: final answer"));
        assert!(summary.contains("Request: start"));
        assert!(summary.contains("Total messages: 4"));
    }
}
