//! Memory-budgeted pool of loaded models
//!
//! The pool keeps models resident up to a byte budget derived from detected
//! memory. Admission reserves the estimated footprint plus a safety margin;
//! when the reservation does not fit, least recently used models are evicted
//! until it does. Loads are serialized through one lock so two callers can
//! never race the same model into memory twice.

pub mod entry;
pub mod manager;

pub use entry::{LoadedModel, ModelLoader, PoolStatus, PooledModelInfo};
pub use manager::ModelPool;

use thiserror::Error;

use crate::util::format_bytes;

/// Errors from pool admission and lifecycle
#[derive(Debug, Error)]
pub enum PoolError {
    #[error(
        "model '{model_id}' needs {} but the pool has {} free",
        format_bytes(*required_bytes),
        format_bytes(*available_bytes)
    )]
    InsufficientMemory {
        model_id: String,
        /// Estimated bytes including the safety margin
        required_bytes: u64,
        available_bytes: u64,
    },

    #[error("failed to load model '{model_id}': {source}")]
    LoadFailed {
        model_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("model '{0}' is not loaded")]
    NotLoaded(String),
}
