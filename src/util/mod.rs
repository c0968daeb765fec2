//! Utility modules for modelyard
//!
//! This module provides various utility functions and helpers including:
//! - Structured logging setup and configuration
//! - Human-readable byte formatting
//! - Cooperative cancellation tokens
//! - Atomic file writes shared by the persistence layers

pub mod bytes;
pub mod cancel;
pub mod fs;
pub mod logging;

// Re-export commonly used items
pub use bytes::format_bytes;
pub use cancel::CancelToken;
pub use logging::{init_default, init_from_env, init_logging, LoggingConfig};
