//! The pool itself: admission, LRU eviction, lifecycle
//!
//! Reads (`get`, `status`) touch a sharded map and never block loads.
//! `get_or_load` serializes through one async mutex; the double check after
//! acquiring it means concurrent callers for the same model share a single
//! load.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::entry::{LoadedModel, ModelLoader, PoolEntry, PoolStatus};
use super::PoolError;
use crate::memory::{self, ModelMemoryConfig};

/// Memory-budgeted model pool
pub struct ModelPool {
    budget_bytes: u64,
    safety_margin: f64,
    entries: DashMap<String, Arc<PoolEntry>>,
    allocated_bytes: AtomicU64,
    /// Monotonic access clock; avoids wall-clock ties in LRU ordering
    clock: AtomicU64,
    load_lock: Mutex<()>,
}

impl ModelPool {
    pub fn new(budget_bytes: u64, safety_margin: f64) -> Self {
        Self {
            budget_bytes,
            safety_margin,
            entries: DashMap::new(),
            allocated_bytes: AtomicU64::new(0),
            clock: AtomicU64::new(0),
            load_lock: Mutex::new(()),
        }
    }

    pub fn budget_bytes(&self) -> u64 {
        self.budget_bytes
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes.load(Ordering::Acquire)
    }

    /// Returns a resident model without loading, refreshing its LRU position
    pub fn get(&self, model_id: &str) -> Option<Arc<dyn LoadedModel>> {
        let entry = self.entries.get(model_id)?;
        entry.touch(self.tick());
        Some(entry.model.clone())
    }

    /// Returns the resident model or loads it, evicting LRU models if the
    /// estimated footprint plus safety margin does not fit the budget
    pub async fn get_or_load(
        &self,
        model_id: &str,
        config: &ModelMemoryConfig,
        loader: &dyn ModelLoader,
    ) -> Result<Arc<dyn LoadedModel>, PoolError> {
        if let Some(model) = self.get(model_id) {
            return Ok(model);
        }

        let _guard = self.load_lock.lock().await;
        // A concurrent caller may have loaded it while we waited.
        if let Some(model) = self.get(model_id) {
            return Ok(model);
        }

        let usage = memory::estimate(config);
        let required = memory::required_with_margin(usage.total_bytes, self.safety_margin);
        self.make_room(model_id, required)?;

        debug!(model = %model_id, estimated_bytes = usage.total_bytes, "loading model");
        let model = loader
            .load(model_id)
            .await
            .map_err(|source| PoolError::LoadFailed {
                model_id: model_id.to_string(),
                source,
            })?;

        let entry = Arc::new(PoolEntry::new(model.clone(), usage.total_bytes, self.tick()));
        self.entries.insert(model_id.to_string(), entry);
        self.allocated_bytes
            .fetch_add(usage.total_bytes, Ordering::AcqRel);
        info!(
            model = %model_id,
            allocated_bytes = self.allocated_bytes(),
            budget_bytes = self.budget_bytes,
            "model loaded into pool"
        );
        Ok(model)
    }

    /// Releases the pool's handle on one model
    ///
    /// The budget is credited immediately; the memory itself goes when the
    /// last outstanding handle drops.
    pub fn unload(&self, model_id: &str) -> Result<(), PoolError> {
        match self.remove_entry(model_id) {
            Some(entry) => {
                info!(model = %model_id, freed_bytes = entry.estimated_bytes, "model unloaded");
                Ok(())
            }
            None => Err(PoolError::NotLoaded(model_id.to_string())),
        }
    }

    /// Releases every model
    pub fn unload_all(&self) {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.remove_entry(&id);
        }
        info!("model pool drained");
    }

    pub fn status(&self) -> PoolStatus {
        let mut models: Vec<_> = self
            .entries
            .iter()
            .map(|e| e.value().info(e.key()))
            .collect();
        models.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        let allocated_bytes = self.allocated_bytes();
        PoolStatus {
            budget_bytes: self.budget_bytes,
            allocated_bytes,
            available_bytes: self.budget_bytes.saturating_sub(allocated_bytes),
            model_count: self.entries.len(),
            models,
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Evicts LRU entries until `required_bytes` fits; errors when the pool
    /// is empty and it still does not
    fn make_room(&self, model_id: &str, required_bytes: u64) -> Result<(), PoolError> {
        loop {
            let allocated = self.allocated_bytes();
            if allocated + required_bytes <= self.budget_bytes {
                return Ok(());
            }
            let Some(victim_id) = self.lru_victim() else {
                return Err(PoolError::InsufficientMemory {
                    model_id: model_id.to_string(),
                    required_bytes,
                    available_bytes: self.budget_bytes.saturating_sub(allocated),
                });
            };
            if let Some(entry) = self.remove_entry(&victim_id) {
                info!(
                    model = %victim_id,
                    freed_bytes = entry.estimated_bytes,
                    "evicted model to make room"
                );
            }
        }
    }

    fn lru_victim(&self) -> Option<String> {
        let mut victim: Option<(String, u64)> = None;
        for item in self.entries.iter() {
            let tick = item.value().last_touched.load(Ordering::Acquire);
            match &victim {
                Some((_, best)) if *best <= tick => {}
                _ => victim = Some((item.key().clone(), tick)),
            }
        }
        victim.map(|(id, _)| id)
    }

    fn remove_entry(&self, model_id: &str) -> Option<Arc<PoolEntry>> {
        let (_, entry) = self.entries.remove(model_id)?;
        self.allocated_bytes
            .fetch_sub(entry.estimated_bytes, Ordering::AcqRel);
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Quantization;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug)]
    struct FakeModel {
        id: String,
    }

    impl LoadedModel for FakeModel {
        fn model_id(&self) -> &str {
            &self.id
        }
    }

    #[derive(Default)]
    struct CountingLoader {
        loads: AtomicUsize,
    }

    impl CountingLoader {
        fn count(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ModelLoader for CountingLoader {
        async fn load(&self, model_id: &str) -> anyhow::Result<Arc<dyn LoadedModel>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FakeModel {
                id: model_id.to_string(),
            }))
        }
    }

    struct FailingLoader;

    #[async_trait]
    impl ModelLoader for FailingLoader {
        async fn load(&self, _model_id: &str) -> anyhow::Result<Arc<dyn LoadedModel>> {
            anyhow::bail!("backend exploded")
        }
    }

    // Weights only: 1,000,000 int8 params -> 1,000,000 model bytes plus
    // 100,000 overhead, 1,100,000 total.
    fn small_config() -> ModelMemoryConfig {
        ModelMemoryConfig::new(1_000_000, Quantization::Int8, 0, 0, 0)
    }

    #[tokio::test]
    async fn test_load_then_hit_loads_once() {
        let pool = ModelPool::new(100_000_000, 0.2);
        let loader = CountingLoader::default();

        let first = pool
            .get_or_load("phi-3", &small_config(), &loader)
            .await
            .unwrap();
        let second = pool
            .get_or_load("phi-3", &small_config(), &loader)
            .await
            .unwrap();

        assert_eq!(loader.count(), 1);
        assert_eq!(first.model_id(), "phi-3");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pool.allocated_bytes(), 1_100_000);
    }

    #[tokio::test]
    async fn test_margin_gates_admission_but_not_accounting() {
        // Total is 1,100,000; with 50% margin the reservation is 1,650,000.
        let pool = ModelPool::new(1_600_000, 0.5);
        let loader = CountingLoader::default();

        let err = pool
            .get_or_load("phi-3", &small_config(), &loader)
            .await
            .unwrap_err();
        match err {
            PoolError::InsufficientMemory {
                required_bytes,
                available_bytes,
                ..
            } => {
                assert_eq!(required_bytes, 1_650_000);
                assert_eq!(available_bytes, 1_600_000);
            }
            other => panic!("unexpected error: {other}"),
        }

        let pool = ModelPool::new(1_700_000, 0.5);
        pool.get_or_load("phi-3", &small_config(), &loader)
            .await
            .unwrap();
        // Only the unscaled estimate is counted once resident.
        assert_eq!(pool.allocated_bytes(), 1_100_000);
    }

    #[tokio::test]
    async fn test_lru_eviction_order() {
        // Fits two small models (1,100,000 each + 20% margin on admission).
        let pool = ModelPool::new(2_600_000, 0.2);
        let loader = CountingLoader::default();

        pool.get_or_load("a", &small_config(), &loader).await.unwrap();
        pool.get_or_load("b", &small_config(), &loader).await.unwrap();
        // Touch "a" so "b" is the LRU victim.
        assert!(pool.get("a").is_some());

        pool.get_or_load("c", &small_config(), &loader).await.unwrap();

        assert!(pool.get("a").is_some());
        assert!(pool.get("b").is_none());
        assert!(pool.get("c").is_some());
        assert_eq!(pool.allocated_bytes(), 2_200_000);
    }

    #[tokio::test]
    async fn test_evicted_handle_stays_usable() {
        let pool = ModelPool::new(1_400_000, 0.2);
        let loader = CountingLoader::default();

        let handle = pool
            .get_or_load("a", &small_config(), &loader)
            .await
            .unwrap();
        pool.get_or_load("b", &small_config(), &loader).await.unwrap();

        assert!(pool.get("a").is_none());
        // The caller's Arc outlives the eviction.
        assert_eq!(handle.model_id(), "a");
    }

    #[tokio::test]
    async fn test_unload_and_unload_all() {
        let pool = ModelPool::new(100_000_000, 0.2);
        let loader = CountingLoader::default();

        pool.get_or_load("a", &small_config(), &loader).await.unwrap();
        pool.get_or_load("b", &small_config(), &loader).await.unwrap();

        pool.unload("a").unwrap();
        assert!(matches!(pool.unload("a"), Err(PoolError::NotLoaded(_))));
        assert_eq!(pool.allocated_bytes(), 1_100_000);

        pool.unload_all();
        assert_eq!(pool.allocated_bytes(), 0);
        assert_eq!(pool.status().model_count, 0);
    }

    #[tokio::test]
    async fn test_failed_load_reserves_nothing() {
        let pool = ModelPool::new(100_000_000, 0.2);
        let err = pool
            .get_or_load("a", &small_config(), &FailingLoader)
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::LoadFailed { .. }));
        assert_eq!(pool.allocated_bytes(), 0);
        assert_eq!(pool.status().model_count, 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_load() {
        let pool = Arc::new(ModelPool::new(100_000_000, 0.2));
        let loader = Arc::new(CountingLoader::default());

        let mut joins = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let loader = loader.clone();
            joins.push(tokio::spawn(async move {
                pool.get_or_load("phi-3", &small_config(), loader.as_ref())
                    .await
                    .unwrap()
            }));
        }
        for join in joins {
            join.await.unwrap();
        }
        assert_eq!(loader.count(), 1);
    }

    #[tokio::test]
    async fn test_status_reports_occupancy() {
        let pool = ModelPool::new(10_000_000, 0.2);
        let loader = CountingLoader::default();
        pool.get_or_load("a", &small_config(), &loader).await.unwrap();

        let status = pool.status();
        assert_eq!(status.budget_bytes, 10_000_000);
        assert_eq!(status.allocated_bytes, 1_100_000);
        assert_eq!(status.available_bytes, 8_900_000);
        assert_eq!(status.model_count, 1);
        assert_eq!(status.models[0].model_id, "a");
    }
}
