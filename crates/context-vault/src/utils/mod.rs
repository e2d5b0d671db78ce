pub mod text;

pub use text::{excerpt, truncate_with_marker};
