//! HTTP surface: capture ingress, ad-hoc embedding, dashboards, and the
//! retrieval dispatch endpoint.

pub mod agents_api;
pub mod capture_api;
pub mod embed_api;
pub mod stats_api;
pub mod tools_api;

pub use capture_api::{capture, CaptureRequest};
pub use embed_api::embed;
