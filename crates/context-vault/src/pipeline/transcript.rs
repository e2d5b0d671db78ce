//! Tolerant reader for line-delimited transcript files.
//!
//! Real transcripts interleave user/assistant turns with tool-use and
//! tool-result records whose schemas drift between host versions. The
//! reader extracts only role/content-shaped entries and skips everything
//! else; a malformed line never fails the capture.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};

use crate::store::schema::{Conversation, Message};

pub async fn read_transcript(path: &str) -> Result<Conversation> {
    let raw = tokio::fs::read_to_string(Path::new(path))
        .await
        .with_context(|| format!("cannot read transcript at {}", path))?;
    Ok(parse_transcript(&raw, path))
}

fn parse_transcript(raw: &str, path: &str) -> Conversation {
    let mut messages = Vec::new();
    for (line_no, line) in raw.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                warn!(path, line = line_no + 1, "skipping malformed transcript line: {}", e);
                continue;
            }
        };
        match parse_entry(&value) {
            Some(message) => messages.push(message),
            None => debug!(path, line = line_no + 1, "skipping non-message transcript entry"),
        }
    }
    Conversation { messages }
}

/// Accepts plain `{role, content}` objects and host-style
/// `{type, message: {...}}` entries; everything else is skipped.
fn parse_entry(value: &Value) -> Option<Message> {
    let obj = value.as_object()?;

    // Plain form, as submitted inline by capture clients.
    if let (Some(role), Some(content)) = (obj.get("role"), obj.get("content")) {
        let role = role.as_str()?;
        if role == "user" || role == "assistant" {
            return flatten_content(content).map(|content| Message {
                role: role.to_string(),
                content,
            });
        }
        return None;
    }

    // Host transcript form: the role lives in `type`, the payload in
    // `message` (or directly in `content` for older layouts).
    let entry_type = obj.get("type")?.as_str()?;
    if entry_type != "user" && entry_type != "assistant" {
        return None;
    }

    let payload = obj
        .get("message")
        .and_then(|m| m.as_object())
        .and_then(|m| m.get("content"))
        .or_else(|| obj.get("content"))?;

    flatten_content(payload).map(|content| Message {
        role: entry_type.to_string(),
        content,
    })
}

/// String content passes through; block arrays contribute their text
/// blocks only (tool-use blocks carry no prose).
fn flatten_content(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(blocks) => {
            let text: String = blocks
                .iter()
                .filter_map(|block| {
                    let block = block.as_object()?;
                    if block.get("type")?.as_str()? == "text" {
                        block.get("text")?.as_str().map(str::to_string)
                    } else {
                        None
                    }
                })
                .collect();
            Some(text)
        }
        _ => None,
    }
}
