//! Page cache - decoded chunks shared by every accessor and request of a volume
//!
//! Pages are reference counted. A page whose count is zero may be evicted,
//! least recently used first, once its layer holds more pages than the sum of
//! the budgets registered for it. Pages with a nonzero count are never evicted.

use crate::data_block::DataBlock;
use crate::error::{Result, VdsError};
use crate::layer::{LayerKey, VolumeDataLayer};
use crate::page::{Page, PageKey};
use crate::store::VolumeDataStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Receives dirty pages leaving the cache
pub trait PageWriteBack: Send + Sync {
    /// Persist the contents of an evicted or committed page
    fn write_back(&self, layer: Arc<VolumeDataLayer>, chunk: i64, block: DataBlock);

    /// Contents of a page handed over but not yet persisted
    fn pending_block(&self, key: &PageKey) -> Option<DataBlock>;
}

struct CacheEntry {
    page: Arc<Page>,
    layer: Arc<VolumeDataLayer>,
    ref_count: usize,
    last_access: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<PageKey, CacheEntry>,
    budgets: HashMap<LayerKey, HashMap<u64, usize>>,
    tick: u64,
}

type Eviction = (Arc<VolumeDataLayer>, i64, DataBlock);

impl CacheState {
    fn budget(&self, layer: &LayerKey) -> usize {
        self.budgets
            .get(layer)
            .map(|budgets| budgets.values().sum())
            .unwrap_or(0)
    }

    /// Evict unreferenced pages of `layer` until it fits its budget
    fn trim(&mut self, layer: &LayerKey) -> Vec<Eviction> {
        let budget = self.budget(layer);
        let resident = self.entries.keys().filter(|key| &key.layer == layer).count();
        if resident <= budget {
            return Vec::new();
        }

        let mut candidates: Vec<(u64, PageKey)> = self
            .entries
            .iter()
            .filter(|(key, entry)| &key.layer == layer && entry.ref_count == 0 && entry.page.is_ready())
            .map(|(key, entry)| (entry.last_access, *key))
            .collect();
        candidates.sort_unstable_by_key(|(last_access, _)| *last_access);

        let mut evicted = Vec::new();
        for (_, key) in candidates.into_iter().take(resident - budget) {
            if let Some(entry) = self.entries.remove(&key) {
                log::trace!("evicting page {} of {}", key.chunk, key.layer);
                if let Some(block) = entry.page.take_dirty_snapshot() {
                    evicted.push((entry.layer, key.chunk, block));
                }
            }
        }
        evicted
    }
}

/// Pin held while a page loads. Unpins on drop unless kept.
struct PendingPin<'a> {
    cache: &'a PageCache,
    page: Arc<Page>,
    kept: bool,
}

impl PendingPin<'_> {
    fn keep(mut self) -> Arc<Page> {
        self.kept = true;
        Arc::clone(&self.page)
    }
}

impl Drop for PendingPin<'_> {
    fn drop(&mut self) {
        if !self.kept {
            self.cache.release(&self.page);
        }
    }
}

/// Cache of decoded pages for one volume
pub struct PageCache {
    store: Arc<VolumeDataStore>,
    write_back: Arc<dyn PageWriteBack>,
    state: Mutex<CacheState>,
    next_budget_id: AtomicU64,
}

impl PageCache {
    pub fn new(store: Arc<VolumeDataStore>, write_back: Arc<dyn PageWriteBack>) -> Self {
        Self {
            store,
            write_back,
            state: Mutex::new(CacheState::default()),
            next_budget_id: AtomicU64::new(1),
        }
    }

    /// Add `max_pages` to the budget of a layer, returning a handle for updates
    pub(crate) fn register_budget(&self, layer: LayerKey, max_pages: usize) -> u64 {
        let id = self.next_budget_id.fetch_add(1, Ordering::Relaxed);
        self.state
            .lock()
            .budgets
            .entry(layer)
            .or_default()
            .insert(id, max_pages);
        id
    }

    pub(crate) fn update_budget(&self, layer: LayerKey, id: u64, max_pages: usize) {
        let evicted = {
            let mut state = self.state.lock();
            state.budgets.entry(layer).or_default().insert(id, max_pages);
            state.trim(&layer)
        };
        self.hand_over(evicted);
    }

    pub(crate) fn unregister_budget(&self, layer: LayerKey, id: u64) {
        let evicted = {
            let mut state = self.state.lock();
            let now_empty = state
                .budgets
                .get_mut(&layer)
                .map(|budgets| {
                    budgets.remove(&id);
                    budgets.is_empty()
                })
                .unwrap_or(false);
            if now_empty {
                state.budgets.remove(&layer);
            }
            state.trim(&layer)
        };
        self.hand_over(evicted);
    }

    /// Pin the page of `chunk`, inserting an unloaded page when absent
    fn acquire(&self, layer: &Arc<VolumeDataLayer>, chunk: i64) -> Arc<Page> {
        let key = PageKey {
            layer: layer.key(),
            chunk,
        };
        let mut state = self.state.lock();
        state.tick += 1;
        let tick = state.tick;
        let entry = state.entries.entry(key).or_insert_with(|| CacheEntry {
            page: Arc::new(Page::new(
                key,
                layer.partition().chunk_extent(chunk),
                layer.channel().format,
                layer.channel().components,
            )),
            layer: Arc::clone(layer),
            ref_count: 0,
            last_access: tick,
        });
        entry.ref_count += 1;
        entry.last_access = tick;
        Arc::clone(&entry.page)
    }

    /// Get a pinned, loaded page. With `create` the page starts out as NoValue
    /// instead of being fetched from storage. Dropping the future before it
    /// resolves leaves no pin behind.
    pub(crate) async fn get_page(&self, layer: &Arc<VolumeDataLayer>, chunk: i64, create: bool) -> Result<Arc<Page>> {
        layer.partition().check_chunk_index(chunk)?;
        let pin = PendingPin {
            cache: self,
            page: self.acquire(layer, chunk),
            kept: false,
        };
        let loaded = pin
            .page
            .ensure_loaded(|| self.load_block(layer, chunk, create))
            .await;
        match loaded {
            Ok(()) => Ok(pin.keep()),
            Err(e) => {
                self.discard(&pin.page);
                Err(e)
            }
        }
    }

    async fn load_block(&self, layer: &Arc<VolumeDataLayer>, chunk: i64, create: bool) -> Result<DataBlock> {
        let key = PageKey {
            layer: layer.key(),
            chunk,
        };
        if let Some(block) = self.write_back.pending_block(&key) {
            return Ok(block);
        }
        if !create {
            let fetched = self
                .store
                .read_chunk(layer, chunk)
                .await
                .map_err(|e| VdsError::ChunkFetchFailure {
                    chunk,
                    reason: e.to_string(),
                })?;
            if let Some(block) = fetched {
                return Ok(block);
            }
        }

        let channel = layer.channel();
        let size = layer.partition().chunk_extent(chunk).allocated_size();
        let mut block = DataBlock::new(channel.format, channel.components, size);
        block.fill(channel.no_value_raw().unwrap_or(0.0));
        Ok(block)
    }

    /// Drop a page that failed to load so later requests fetch it again
    fn discard(&self, page: &Arc<Page>) {
        let key = page.key();
        let mut state = self.state.lock();
        let same_page = state
            .entries
            .get(&key)
            .is_some_and(|entry| Arc::ptr_eq(&entry.page, page));
        if same_page {
            log::debug!("discarding failed page {} of {}", key.chunk, key.layer);
            state.entries.remove(&key);
        }
    }

    /// Unpin a page. An unreferenced page that never finished loading is dropped.
    pub(crate) fn release(&self, page: &Arc<Page>) {
        let key = page.key();
        let evicted = {
            let mut state = self.state.lock();
            let unreferenced = match state.entries.get_mut(&key) {
                Some(entry) if Arc::ptr_eq(&entry.page, page) => {
                    entry.ref_count = entry.ref_count.saturating_sub(1);
                    (entry.ref_count == 0).then(|| entry.page.is_ready())
                }
                _ => None,
            };
            match unreferenced {
                Some(true) => state.trim(&key.layer),
                Some(false) => {
                    log::trace!("dropping unloaded page {} of {}", key.chunk, key.layer);
                    state.entries.remove(&key);
                    Vec::new()
                }
                None => Vec::new(),
            }
        };
        self.hand_over(evicted);
    }

    fn hand_over(&self, evicted: Vec<Eviction>) {
        for (layer, chunk, block) in evicted {
            self.write_back.write_back(layer, chunk, block);
        }
    }

    /// Resident pages of a layer
    pub(crate) fn resident_pages(&self, layer: &LayerKey) -> Vec<(Arc<VolumeDataLayer>, Arc<Page>)> {
        self.state
            .lock()
            .values_for(layer)
    }

    /// Hand every dirty page over for writing, returning how many were dirty
    pub(crate) fn commit_layer(&self, layer: &LayerKey) -> usize {
        let mut committed = 0;
        for (layer, page) in self.resident_pages(layer) {
            if let Some(block) = page.take_dirty_snapshot() {
                self.write_back.write_back(layer, page.key().chunk, block);
                committed += 1;
            }
        }
        committed
    }

    /// Hand the dirty pages of every layer over for writing
    pub(crate) fn commit_all(&self) -> usize {
        let layers: Vec<LayerKey> = {
            let state = self.state.lock();
            let mut layers: Vec<LayerKey> = state.entries.keys().map(|key| key.layer).collect();
            layers.sort_unstable();
            layers.dedup();
            layers
        };
        layers.iter().map(|layer| self.commit_layer(layer)).sum()
    }

    /// Commit every layer, then drop all unreferenced pages
    pub(crate) fn invalidate_all(&self) {
        self.commit_all();
        self.state.lock().entries.retain(|_, entry| entry.ref_count > 0);
    }

    /// Reference count of a resident page
    pub fn ref_count(&self, layer: &LayerKey, chunk: i64) -> Option<usize> {
        self.state
            .lock()
            .entries
            .get(&PageKey { layer: *layer, chunk })
            .map(|entry| entry.ref_count)
    }

    pub fn is_resident(&self, layer: &LayerKey, chunk: i64) -> bool {
        self.ref_count(layer, chunk).is_some()
    }

    pub fn resident_count(&self, layer: &LayerKey) -> usize {
        self.state
            .lock()
            .entries
            .keys()
            .filter(|key| &key.layer == layer)
            .count()
    }
}

impl CacheState {
    fn values_for(&self, layer: &LayerKey) -> Vec<(Arc<VolumeDataLayer>, Arc<Page>)> {
        self.entries
            .iter()
            .filter(|(key, _)| &key.layer == layer)
            .map(|(_, entry)| (Arc::clone(&entry.layer), Arc::clone(&entry.page)))
            .collect()
    }
}
