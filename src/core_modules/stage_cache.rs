// THEORY:
// The `StageCache` memoizes the expensive, deterministic pipeline stages so that
// iterative tuning sessions (the same handful of photos re-run with different
// thresholds) skip straight to the stage that actually changed.
//
// Key architectural principles:
// 1.  **Single Owner**: the three maps (preprocessing, contours, filtering) live
//     inside one actor task. Every lookup, insertion, eviction and statistics
//     read is a message on one channel, so they are serialized. Nothing outside
//     the actor can touch the maps, and eviction can never race a lookup.
// 2.  **Content Keys**: preprocessing and contour results are keyed by the image
//     content hash. Filtering results depend on the configuration too, so their
//     key is `<imageHash>_<configHash>`. The prefix lets all of one image's
//     threshold experiments be invalidated together.
// 3.  **Bounded, FIFO Eviction**: each map holds at most `capacity` entries. When
//     a new key arrives at a full map, the oldest half (by insertion order) is
//     dropped first. This is not LRU; for a small working set re-run many times
//     insertion order is a good enough proxy.
// 4.  **Cheap Handles**: `StageCache` is a clonable sender. Cached values are
//     `Arc`s, so a hit never copies pixel data.

use crate::core_modules::candidate_filter::FilteringResult;
use crate::core_modules::contour::ContourDetectionResult;
use crate::core_modules::preprocess::PreprocessingResult;
use crate::error::{VisionError, VisionResult};
use log::debug;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

pub const MAX_CACHE_SIZE: usize = 20;
const MAILBOX_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheCategory {
    Preprocessing,
    Contours,
    Filtering,
}

#[derive(Debug, Clone)]
pub enum CachedValue {
    Preprocessing(Arc<PreprocessingResult>),
    Contours(Arc<ContourDetectionResult>),
    Filtering(Arc<FilteringResult>),
}

impl CachedValue {
    fn category(&self) -> CacheCategory {
        match self {
            CachedValue::Preprocessing(_) => CacheCategory::Preprocessing,
            CachedValue::Contours(_) => CacheCategory::Contours,
            CachedValue::Filtering(_) => CacheCategory::Filtering,
        }
    }
}

/// Point-in-time view of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct CacheStatistics {
    pub preprocessing_entries: usize,
    pub contour_entries: usize,
    pub filtering_entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStatistics {
    /// Fraction of lookups that hit, 0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}

/// Key for a filtering result.
pub fn filtering_key(image_hash: &str, config_hash: &str) -> String {
    format!("{image_hash}_{config_hash}")
}

/// Insertion-ordered map with half-eviction at capacity.
struct BoundedStore {
    entries: HashMap<String, CachedValue>,
    order: VecDeque<String>,
    capacity: usize,
}

impl BoundedStore {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    fn get(&self, key: &str) -> Option<CachedValue> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: String, value: CachedValue) {
        if let Some(slot) = self.entries.get_mut(&key) {
            *slot = value;
            return;
        }
        if self.entries.len() >= self.capacity {
            let evict = (self.entries.len() / 2).max(1);
            for old in self.order.drain(..evict) {
                self.entries.remove(&old);
            }
            debug!("stage cache evicted {evict} entries");
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
    }

    fn retain(&mut self, keep: impl Fn(&str) -> bool) {
        self.order.retain(|k| keep(k));
        self.entries.retain(|k, _| keep(k));
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// The state owned by the cache actor.
struct CacheState {
    preprocessing: BoundedStore,
    contours: BoundedStore,
    filtering: BoundedStore,
    hits: u64,
    misses: u64,
}

impl CacheState {
    fn new(capacity: usize) -> Self {
        Self {
            preprocessing: BoundedStore::new(capacity),
            contours: BoundedStore::new(capacity),
            filtering: BoundedStore::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    fn store_for(&mut self, category: CacheCategory) -> &mut BoundedStore {
        match category {
            CacheCategory::Preprocessing => &mut self.preprocessing,
            CacheCategory::Contours => &mut self.contours,
            CacheCategory::Filtering => &mut self.filtering,
        }
    }

    fn get(&mut self, category: CacheCategory, key: &str) -> Option<CachedValue> {
        let found = self.store_for(category).get(key);
        if found.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        found
    }

    fn insert(&mut self, key: String, value: CachedValue) {
        self.store_for(value.category()).insert(key, value);
    }

    fn clear_for_image(&mut self, image_hash: &str) {
        let prefix = format!("{image_hash}_");
        self.preprocessing.retain(|k| k != image_hash);
        self.contours.retain(|k| k != image_hash);
        self.filtering.retain(|k| !k.starts_with(&prefix));
    }

    fn clear_all(&mut self) {
        self.preprocessing.clear();
        self.contours.clear();
        self.filtering.clear();
        self.hits = 0;
        self.misses = 0;
    }

    fn statistics(&self) -> CacheStatistics {
        CacheStatistics {
            preprocessing_entries: self.preprocessing.len(),
            contour_entries: self.contours.len(),
            filtering_entries: self.filtering.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }
}

/// Message type for the cache actor.
enum CacheMessage {
    Get(CacheCategory, String, oneshot::Sender<Option<CachedValue>>),
    Store(String, CachedValue, oneshot::Sender<()>),
    ClearForImage(String, oneshot::Sender<()>),
    ClearAll(oneshot::Sender<()>),
    Statistics(oneshot::Sender<CacheStatistics>),
    Shutdown,
}

/// Handle to the cache actor. Clones share the same cache.
#[derive(Clone)]
pub struct StageCache {
    sender: mpsc::Sender<CacheMessage>,
}

impl StageCache {
    /// Spawns the actor on the current tokio runtime.
    pub fn new() -> Self {
        Self::with_capacity(MAX_CACHE_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<CacheMessage>(MAILBOX_SIZE);
        tokio::spawn(async move {
            let mut state = CacheState::new(capacity);
            while let Some(msg) = receiver.recv().await {
                match msg {
                    CacheMessage::Get(category, key, reply) => {
                        let _ = reply.send(state.get(category, &key));
                    }
                    CacheMessage::Store(key, value, ack) => {
                        state.insert(key, value);
                        let _ = ack.send(());
                    }
                    CacheMessage::ClearForImage(hash, ack) => {
                        state.clear_for_image(&hash);
                        let _ = ack.send(());
                    }
                    CacheMessage::ClearAll(ack) => {
                        state.clear_all();
                        let _ = ack.send(());
                    }
                    CacheMessage::Statistics(reply) => {
                        let _ = reply.send(state.statistics());
                    }
                    CacheMessage::Shutdown => break,
                }
            }
        });
        Self { sender }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> CacheMessage) -> VisionResult<T> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(build(reply))
            .await
            .map_err(|_| VisionError::CacheUnavailable)?;
        response.await.map_err(|_| VisionError::CacheUnavailable)
    }

    pub async fn get(&self, category: CacheCategory, key: &str) -> VisionResult<Option<CachedValue>> {
        let key = key.to_string();
        self.request(|reply| CacheMessage::Get(category, key, reply)).await
    }

    pub async fn store(&self, key: &str, value: CachedValue) -> VisionResult<()> {
        let key = key.to_string();
        self.request(|ack| CacheMessage::Store(key, value, ack)).await
    }

    pub async fn get_preprocessing(&self, image_hash: &str) -> VisionResult<Option<Arc<PreprocessingResult>>> {
        Ok(match self.get(CacheCategory::Preprocessing, image_hash).await? {
            Some(CachedValue::Preprocessing(result)) => Some(result),
            _ => None,
        })
    }

    pub async fn get_contours(&self, image_hash: &str) -> VisionResult<Option<Arc<ContourDetectionResult>>> {
        Ok(match self.get(CacheCategory::Contours, image_hash).await? {
            Some(CachedValue::Contours(result)) => Some(result),
            _ => None,
        })
    }

    pub async fn get_filtering(&self, key: &str) -> VisionResult<Option<Arc<FilteringResult>>> {
        Ok(match self.get(CacheCategory::Filtering, key).await? {
            Some(CachedValue::Filtering(result)) => Some(result),
            _ => None,
        })
    }

    pub async fn cache_preprocessing(&self, result: Arc<PreprocessingResult>, image_hash: &str) -> VisionResult<()> {
        self.store(image_hash, CachedValue::Preprocessing(result)).await
    }

    pub async fn cache_contours(&self, result: Arc<ContourDetectionResult>, image_hash: &str) -> VisionResult<()> {
        self.store(image_hash, CachedValue::Contours(result)).await
    }

    pub async fn cache_filtering(&self, result: Arc<FilteringResult>, key: &str) -> VisionResult<()> {
        self.store(key, CachedValue::Filtering(result)).await
    }

    /// Drops one image's preprocessing and contour entries and every filtering
    /// entry derived from it. Other images are untouched.
    pub async fn clear_for_image(&self, image_hash: &str) -> VisionResult<()> {
        let hash = image_hash.to_string();
        self.request(|ack| CacheMessage::ClearForImage(hash, ack)).await
    }

    /// Empties every map and resets the counters.
    pub async fn clear_all(&self) -> VisionResult<()> {
        self.request(CacheMessage::ClearAll).await
    }

    pub async fn statistics(&self) -> VisionResult<CacheStatistics> {
        self.request(CacheMessage::Statistics).await
    }

    /// Stops the actor. Every handle fails with `CacheUnavailable` afterwards.
    pub async fn shutdown(&self) {
        let _ = self.sender.send(CacheMessage::Shutdown).await;
    }
}
