//! Per-cycle collector cache.
//!
//! All five firms analyse the same events, so each `(symbol, source)` pair
//! is loaded exactly once per cycle. Single-flight: concurrent callers of
//! a missing key share one loader invocation. The orchestrator clears the
//! cache between cycles so day-over-day drift is never served.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::collectors::AreaReport;

type Key = (String, String);
type Slot = Arc<OnceCell<AreaReport>>;

#[derive(Default)]
pub struct CycleCache {
    // parking_lot: held only to clone the slot handle, never across await.
    slots: Mutex<HashMap<Key, Slot>>,
}

impl CycleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the cached value or run `loader` exactly once for this key.
    /// Loaders are infallible by contract: collector failures degrade to a
    /// neutral report before reaching the cache.
    pub async fn get_or_load<F, Fut>(&self, symbol: &str, source: &str, loader: F) -> AreaReport
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AreaReport>,
    {
        let slot = self
            .slots
            .lock()
            .entry((symbol.to_string(), source.to_string()))
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        slot.get_or_init(loader).await.clone()
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::Area;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn loads_once_per_key() {
        let cache = CycleCache::new();
        let loads = AtomicU32::new(0);

        for _ in 0..3 {
            let report = cache
                .get_or_load("BTC", "technical", || {
                    loads.fetch_add(1, Ordering::SeqCst);
                    async { AreaReport::neutral(Area::Technical, "BTC", "stub") }
                })
                .await;
            assert_eq!(report.score, 5.0);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_load() {
        let cache = Arc::new(CycleCache::new());
        let loads = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let loads = loads.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_load("ETH", "news", move || {
                        loads.fetch_add(1, Ordering::SeqCst);
                        async {
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                            AreaReport::neutral(Area::News, "ETH", "stub")
                        }
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn clear_evicts_everything() {
        let cache = CycleCache::new();
        cache
            .get_or_load("BTC", "sentiment", || async {
                AreaReport::neutral(Area::Sentiment, "BTC", "stub")
            })
            .await;
        assert!(!cache.is_empty());
        cache.clear();
        assert!(cache.is_empty());
    }
}
