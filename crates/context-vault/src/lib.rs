//! context-vault: durable capture and retrieval of coding-assistant
//! conversation context.
//!
//! A transcript emitted at a pre-compact boundary is acknowledged
//! immediately, then processed out of band: metadata extraction,
//! session-aware summarization, embedding, and a single-shot upsert into
//! Postgres keyed on session identity. The corpus is retrievable by
//! vector similarity, substring and exact-phrase lookup, and a set of
//! analytical views.

pub mod api;
pub mod config;
pub mod embed;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod retrieval;
pub mod server;
pub mod shared_state;
pub mod store;
pub mod summarize;
pub mod telemetry;
pub mod utils;

// Public API exports
pub use config::Config;
pub use error::{ApiError, CaptureError};
pub use server::run_server;
pub use shared_state::SharedState;
pub use store::ContextStore;
