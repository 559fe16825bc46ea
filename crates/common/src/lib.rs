//! Quill common library
//!
//! This crate contains shared code used across Quill components.

pub mod config;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use config::QuillConfig;
pub use error::{QuillError, Result};
pub use metrics::{MetricsRegistry, METRICS};
