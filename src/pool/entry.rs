//! Pool entry bookkeeping and the loader seam

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// A model resident in memory
///
/// Implementations wrap whatever the inference backend hands back. The pool
/// only holds the handle; memory is released when the last `Arc` drops, so
/// callers still using an evicted model keep it alive until they finish.
pub trait LoadedModel: std::fmt::Debug + Send + Sync {
    fn model_id(&self) -> &str;
}

/// Materializes a model into memory
///
/// Called by the pool under its load lock, at most once per admission.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, model_id: &str) -> anyhow::Result<Arc<dyn LoadedModel>>;
}

/// Internal pool record for one resident model
pub(crate) struct PoolEntry {
    pub(crate) model: Arc<dyn LoadedModel>,
    /// Estimated footprint counted against the budget (margin excluded)
    pub(crate) estimated_bytes: u64,
    pub(crate) loaded_at: DateTime<Utc>,
    /// Logical tick of the last access; the LRU victim has the lowest
    pub(crate) last_touched: AtomicU64,
    /// Wall clock of the last access, for reporting only
    pub(crate) last_accessed_ms: AtomicI64,
}

impl PoolEntry {
    pub(crate) fn new(model: Arc<dyn LoadedModel>, estimated_bytes: u64, tick: u64) -> Self {
        Self {
            model,
            estimated_bytes,
            loaded_at: Utc::now(),
            last_touched: AtomicU64::new(tick),
            last_accessed_ms: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    pub(crate) fn touch(&self, tick: u64) {
        self.last_touched.store(tick, Ordering::Release);
        self.last_accessed_ms
            .store(Utc::now().timestamp_millis(), Ordering::Release);
    }

    pub(crate) fn info(&self, model_id: &str) -> PooledModelInfo {
        let ms = self.last_accessed_ms.load(Ordering::Acquire);
        PooledModelInfo {
            model_id: model_id.to_string(),
            estimated_bytes: self.estimated_bytes,
            loaded_at: self.loaded_at,
            last_accessed: DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_else(Utc::now),
        }
    }
}

/// One loaded model, as reported by [`super::ModelPool::status`]
#[derive(Debug, Clone, Serialize)]
pub struct PooledModelInfo {
    pub model_id: String,
    pub estimated_bytes: u64,
    pub loaded_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

/// Point-in-time view of pool occupancy
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub budget_bytes: u64,
    pub allocated_bytes: u64,
    pub available_bytes: u64,
    pub model_count: usize,
    /// Most recently accessed first
    pub models: Vec<PooledModelInfo>,
}
