//! Metadata extraction over the raw message text.
//!
//! Everything here is pure and deterministic: the same conversation
//! always yields the same tags, file mentions, decisions, and bug lines.
//! The VCS probe lives in [`vcs`] and is the only effectful part.

pub mod vcs;

use lazy_static::lazy_static;
use regex::Regex;

use crate::store::schema::Conversation;

pub const MAX_TAGS: usize = 10;
pub const MAX_FILES: usize = 50;
pub const MAX_DECISIONS: usize = 10;
pub const MAX_BUGS: usize = 10;

/// Longest phrase capture we keep; anything longer is noise from a
/// greedy match and gets dropped outright.
const MAX_PHRASE_CHARS: usize = 200;

/// Keyword table scanned in declaration order; a tag is emitted when any
/// of its keywords occurs in the case-folded conversation text.
const TAG_TABLE: &[(&str, &[&str])] = &[
    ("debugging", &["debug", "stack trace", "traceback", "breakpoint"]),
    ("bug-fix", &["fix", "fixed", "bug", "patch", "resolved"]),
    ("feature", &["feature", "implement", "add support"]),
    ("refactoring", &["refactor", "cleanup", "restructure", "rename"]),
    ("testing", &["test", "coverage", "assertion"]),
    ("database", &["database", "sql", "migration", "postgres", "sqlite"]),
    ("api", &["endpoint", "rest api", "http api", "route"]),
    ("security", &["security", "vulnerability", "injection", "auth", "cve"]),
    ("performance", &["performance", "optimize", "latency", "slow"]),
    ("documentation", &["readme", "documentation", "docstring"]),
    ("configuration", &["config", "environment variable", "dotenv"]),
    ("deployment", &["deploy", "docker", "kubernetes", "pipeline"]),
];

lazy_static! {
    static ref FILE_PATTERN: Regex = Regex::new(
        r"(?x)
        [A-Za-z0-9_\-./]+
        \.(?:rs|py|js|jsx|ts|tsx|go|java|c|cc|cpp|h|hpp|rb|php|swift|kt|scala
          |sh|bash|zsh|sql|json|yaml|yml|toml|md|rst|txt|css|html|xml
          |conf|cfg|ini|env|lock)\b"
    )
    .expect("file pattern is valid");

    static ref DECISION_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"decided to ([^.\n]+)").unwrap(),
        Regex::new(r"chose to ([^.\n]+)").unwrap(),
        Regex::new(r"implemented ([^.\n]+)").unwrap(),
        Regex::new(r"will use ([^.\n]+)").unwrap(),
        Regex::new(r"using ([^.\n]+)").unwrap(),
        Regex::new(r"(?:approach|solution|strategy):\s*([^.\n]+)").unwrap(),
    ];

    static ref BUG_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?:fixed|resolved)\s+([^.\n]+)").unwrap(),
        Regex::new(r"bug:\s*([^.\n]+)").unwrap(),
        Regex::new(r"(?:error|issue):\s*([^.\n]+)").unwrap(),
    ];
}

/// Metadata derived from one conversation.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub tags: Vec<String>,
    pub files: Vec<String>,
    pub decisions: Vec<String>,
    pub bugs: Vec<String>,
    pub git_commit_hash: Option<String>,
    pub git_branch: Option<String>,
    pub message_count: usize,
}

pub fn extract_metadata(conversation: &Conversation) -> Metadata {
    let text = conversation
        .messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
        .to_lowercase();

    Metadata {
        tags: extract_tags(&text),
        files: extract_files(&text),
        decisions: extract_phrases(&text, &DECISION_PATTERNS, MAX_DECISIONS),
        bugs: extract_phrases(&text, &BUG_PATTERNS, MAX_BUGS),
        git_commit_hash: None,
        git_branch: None,
        message_count: conversation.len(),
    }
}

fn extract_tags(text: &str) -> Vec<String> {
    TAG_TABLE
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map(|(tag, _)| tag.to_string())
        .take(MAX_TAGS)
        .collect()
}

fn extract_files(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for m in FILE_PATTERN.find_iter(text) {
        let file = m
            .as_str()
            .trim_start_matches("./")
            .trim_matches(|c| c == '.' || c == ',')
            .to_string();
        if !file.is_empty() && !seen.contains(&file) {
            seen.push(file);
            if seen.len() >= MAX_FILES {
                break;
            }
        }
    }
    seen
}

fn extract_phrases(text: &str, patterns: &[Regex], max: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for pattern in patterns {
        for caps in pattern.captures_iter(text) {
            if let Some(capture) = caps.get(1) {
                let phrase = capture.as_str().trim().to_string();
                // Overlong captures are dropped, never truncated.
                if phrase.is_empty() || phrase.chars().count() > MAX_PHRASE_CHARS {
                    continue;
                }
                if !out.contains(&phrase) {
                    out.push(phrase);
                    if out.len() >= max {
                        return out;
                    }
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::Message;

    fn conversation(contents: &[(&str, &str)]) -> Conversation {
        Conversation {
            messages: contents
                .iter()
                .map(|(role, content)| Message {
                    role: role.to_string(),
                    content: content.to_string(),
                })
                .collect(),
        }
    }

    // ===== Tag Tests =====

    #[test]
    fn test_tags_for_security_fix_session() {
        let conv = conversation(&[
            ("user", "fix the SQL injection in login"),
            ("assistant", "patched src/auth.js line 42; added tests in test/auth.test.js"),
        ]);
        let meta = extract_metadata(&conv);
        assert!(meta.tags.contains(&"security".to_string()));
        assert!(meta.tags.contains(&"bug-fix".to_string()));
    }

    #[test]
    fn test_tags_capped_at_ten_in_declaration_order() {
        // A message hitting every keyword family still yields 10 tags.
        let kitchen_sink = "debug fix feature refactor test sql endpoint \
                            security performance readme config deploy";
        let conv = conversation(&[("user", kitchen_sink)]);
        let meta = extract_metadata(&conv);
        assert_eq!(meta.tags.len(), MAX_TAGS);
        assert_eq!(meta.tags[0], "debugging");
    }

    #[test]
    fn test_tags_empty_for_neutral_text() {
        let conv = conversation(&[("user", "hello, how are you today")]);
        assert!(extract_metadata(&conv).tags.is_empty());
    }

    // ===== File Mention Tests =====

    #[test]
    fn test_files_extracted_and_deduplicated() {
        let conv = conversation(&[
            ("user", "look at src/auth.js and src/auth.js again"),
            ("assistant", "also touched test/auth.test.js and config.yaml"),
        ]);
        let meta = extract_metadata(&conv);
        assert_eq!(
            meta.files,
            vec!["src/auth.js", "test/auth.test.js", "config.yaml"]
        );
    }

    #[test]
    fn test_files_capped_at_fifty() {
        let listing: String = (0..80).map(|i| format!("mod_{}.rs ", i)).collect();
        let conv = conversation(&[("assistant", &listing)]);
        assert_eq!(extract_metadata(&conv).files.len(), MAX_FILES);
    }

    #[test]
    fn test_file_at_sentence_end_keeps_extension() {
        let conv = conversation(&[("assistant", "I rewrote src/pipeline/mod.rs.")]);
        let meta = extract_metadata(&conv);
        assert_eq!(meta.files, vec!["src/pipeline/mod.rs"]);
    }

    // ===== Decision Tests =====

    #[test]
    fn test_decision_patterns() {
        let conv = conversation(&[(
            "assistant",
            "We decided to use prepared statements. Approach: parameterize every query",
        )]);
        let meta = extract_metadata(&conv);
        assert!(meta.decisions.contains(&"use prepared statements".to_string()));
        assert!(meta
            .decisions
            .contains(&"parameterize every query".to_string()));
    }

    #[test]
    fn test_overlong_decision_dropped_not_truncated() {
        let long_tail = "x".repeat(250);
        let text = format!("decided to {}", long_tail);
        let conv = conversation(&[("assistant", &text)]);
        let meta = extract_metadata(&conv);
        assert!(meta.decisions.is_empty());
    }

    #[test]
    fn test_decisions_capped_at_ten() {
        let many: String = (0..15)
            .map(|i| format!("decided to option number {}\n", i))
            .collect();
        let conv = conversation(&[("assistant", &many)]);
        assert_eq!(extract_metadata(&conv).decisions.len(), MAX_DECISIONS);
    }

    // ===== Bug Tests =====

    #[test]
    fn test_bug_patterns() {
        let conv = conversation(&[(
            "assistant",
            "fixed the race condition in the pool\nerror: connection refused on startup",
        )]);
        let meta = extract_metadata(&conv);
        assert!(meta
            .bugs
            .contains(&"the race condition in the pool".to_string()));
        assert!(meta
            .bugs
            .contains(&"connection refused on startup".to_string()));
    }

    #[test]
    fn test_overlong_bug_dropped() {
        let text = format!("bug: {}", "y".repeat(201));
        let conv = conversation(&[("assistant", &text)]);
        assert!(extract_metadata(&conv).bugs.is_empty());
    }

    // ===== Determinism Tests =====

    #[test]
    fn test_extraction_is_deterministic() {
        let conv = conversation(&[
            ("user", "fix the bug in src/main.rs"),
            ("assistant", "resolved the panic, decided to guard the index"),
        ]);
        let a = extract_metadata(&conv);
        let b = extract_metadata(&conv);
        assert_eq!(a.tags, b.tags);
        assert_eq!(a.files, b.files);
        assert_eq!(a.decisions, b.decisions);
        assert_eq!(a.bugs, b.bugs);
        assert_eq!(a.message_count, 2);
    }
}
