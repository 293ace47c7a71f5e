//! Upload queue - background persistence of modified pages
//!
//! Every dirty page handed over by the page cache becomes one pending upload.
//! A page handed over again while its upload is in flight replaces the pending
//! contents and is uploaded once more. Failures are recorded, never returned
//! to the writer.

use crate::data_block::DataBlock;
use crate::error::{Result, VdsError};
use crate::layer::VolumeDataLayer;
use crate::page::PageKey;
use crate::page_cache::PageWriteBack;
use crate::scheduler::run_blocking;
use crate::store::VolumeDataStore;
use crate::utils::chunk_url;
use parking_lot::{Condvar, Mutex};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;

/// A chunk or metadata object that could not be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadError {
    pub object: String,
    pub message: String,
}

struct PendingUpload {
    layer: Arc<VolumeDataLayer>,
    block: DataBlock,
    generation: u64,
}

#[derive(Default)]
struct UploadState {
    pending: HashMap<PageKey, PendingUpload>,
    errors: Vec<UploadError>,
    cursor: usize,
}

pub struct UploadQueue {
    me: Weak<UploadQueue>,
    store: Arc<VolumeDataStore>,
    runtime: Handle,
    retry_attempts: u32,
    state: Mutex<UploadState>,
    idle: Condvar,
}

impl UploadQueue {
    pub fn new(store: Arc<VolumeDataStore>, runtime: Handle, retry_attempts: u32) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            store,
            runtime,
            retry_attempts,
            state: Mutex::new(UploadState::default()),
            idle: Condvar::new(),
        })
    }

    /// Queue the contents of a page for writing
    pub fn submit(&self, layer: Arc<VolumeDataLayer>, chunk: i64, block: DataBlock) {
        let key = PageKey {
            layer: layer.key(),
            chunk,
        };
        let mut state = self.state.lock();
        match state.pending.entry(key) {
            Entry::Occupied(mut entry) => {
                let pending = entry.get_mut();
                pending.block = block;
                pending.generation += 1;
            }
            Entry::Vacant(entry) => {
                let Some(queue) = self.me.upgrade() else {
                    return;
                };
                entry.insert(PendingUpload {
                    layer,
                    block,
                    generation: 0,
                });
                self.runtime.spawn(queue.upload(key));
            }
        }
    }

    /// Upload `key` until its pending contents stop changing
    async fn upload(self: Arc<Self>, key: PageKey) {
        loop {
            let (layer, block, generation) = {
                let state = self.state.lock();
                match state.pending.get(&key) {
                    Some(pending) => (Arc::clone(&pending.layer), pending.block.clone(), pending.generation),
                    None => return,
                }
            };

            let result = self.write_with_retry(&layer, key.chunk, &block).await;

            let mut state = self.state.lock();
            if let Err(e) = result {
                let object = chunk_url(layer.name(), key.chunk);
                log::warn!("upload of {} failed: {}", object, e);
                state.errors.push(UploadError {
                    object,
                    message: e.to_string(),
                });
            }
            let settled = state
                .pending
                .get(&key)
                .is_some_and(|pending| pending.generation == generation);
            if settled {
                state.pending.remove(&key);
                if state.pending.is_empty() {
                    self.idle.notify_all();
                }
                return;
            }
        }
    }

    async fn write_with_retry(&self, layer: &VolumeDataLayer, chunk: i64, block: &DataBlock) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.store.write_chunk(layer, chunk, block).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.retry_attempts => {
                    attempt += 1;
                    log::warn!(
                        "retrying upload of chunk {} of {} (attempt {}): {}",
                        chunk,
                        layer.name(),
                        attempt,
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Wait for every queued upload, then persist the chunk metadata pages.
    /// A failed metadata write is recorded as an upload error and returned.
    pub fn flush(&self, write_layer_status: bool) -> Result<()> {
        {
            let mut state = self.state.lock();
            while !state.pending.is_empty() {
                self.idle.wait(&mut state);
            }
        }

        let store = Arc::clone(&self.store);
        let result = run_blocking(&self.runtime, async move {
            let pages = store.flush_metadata().await?;
            if write_layer_status {
                store.write_layer_status().await?;
            }
            Ok(pages)
        });
        match result {
            Ok(pages) => {
                log::debug!("flushed {} chunk metadata pages", pages);
                Ok(())
            }
            Err(e) => {
                log::warn!("flushing chunk metadata failed: {}", e);
                self.state.lock().errors.push(UploadError {
                    object: "ChunkMetadata".to_string(),
                    message: e.to_string(),
                });
                Err(VdsError::Upload(e.to_string()))
            }
        }
    }

    /// Errors not yet retrieved with `next_error`
    pub fn error_count(&self) -> usize {
        let state = self.state.lock();
        state.errors.len() - state.cursor
    }

    /// The oldest error not yet retrieved
    pub fn next_error(&self) -> Option<UploadError> {
        let mut state = self.state.lock();
        let error = state.errors.get(state.cursor).cloned()?;
        state.cursor += 1;
        Some(error)
    }

    /// Drop the errors already retrieved
    pub fn clear_errors(&self) {
        let mut state = self.state.lock();
        let cursor = state.cursor;
        state.errors.drain(..cursor);
        state.cursor = 0;
    }

    pub fn force_clear_all_errors(&self) {
        let mut state = self.state.lock();
        state.errors.clear();
        state.cursor = 0;
    }
}

impl PageWriteBack for UploadQueue {
    fn write_back(&self, layer: Arc<VolumeDataLayer>, chunk: i64, block: DataBlock) {
        self.submit(layer, chunk, block);
    }

    fn pending_block(&self, key: &PageKey) -> Option<DataBlock> {
        self.state
            .lock()
            .pending
            .get(key)
            .map(|pending| pending.block.clone())
    }
}
