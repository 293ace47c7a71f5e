//! Pages - decoded chunks held by the page cache

use crate::data_block::DataBlock;
use crate::error::{Result, VdsError};
use crate::layer::LayerKey;
use crate::page_cache::PageCache;
use crate::partition::ChunkExtent;
use crate::types::{Components, Format, DIMENSIONALITY_MAX};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Identifies a page: a chunk of a layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub layer: LayerKey,
    pub chunk: i64,
}

/// A decoded chunk. Readers only see it once loading has finished.
pub struct Page {
    key: PageKey,
    extent: ChunkExtent,
    block: RwLock<DataBlock>,
    loaded: OnceCell<Result<()>>,
    dirty: AtomicBool,
}

impl Page {
    pub(crate) fn new(key: PageKey, extent: ChunkExtent, format: Format, components: Components) -> Self {
        Self {
            key,
            extent,
            block: RwLock::new(DataBlock::new(format, components, [0; DIMENSIONALITY_MAX])),
            loaded: OnceCell::new(),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> PageKey {
        self.key
    }

    pub fn extent(&self) -> &ChunkExtent {
        &self.extent
    }

    /// Whether the page finished loading successfully
    pub fn is_ready(&self) -> bool {
        matches!(self.loaded.get(), Some(Ok(())))
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Run `load` once; concurrent callers wait for the same outcome
    pub(crate) async fn ensure_loaded<F, Fut>(&self, load: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<DataBlock>>,
    {
        self.loaded
            .get_or_init(|| async {
                let block = load().await?;
                *self.block.write() = block;
                Ok(())
            })
            .await
            .clone()
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, DataBlock> {
        self.block.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, DataBlock> {
        let guard = self.block.write();
        self.dirty.store(true, Ordering::Release);
        guard
    }

    /// Copy of the block if it has unsaved changes, clearing the dirty flag
    pub(crate) fn take_dirty_snapshot(&self) -> Option<DataBlock> {
        let guard = self.block.read();
        if self.dirty.swap(false, Ordering::AcqRel) {
            Some(guard.clone())
        } else {
            None
        }
    }

    /// Stored value at a voxel position of the layer. The position must lie
    /// inside the extent including margin.
    pub(crate) fn raw_value(block: &DataBlock, extent: &ChunkExtent, position: &[i32; DIMENSIONALITY_MAX], component: usize) -> f64 {
        let local = std::array::from_fn(|dim| (position[dim] - extent.min_including_margin[dim]) as usize);
        block.get(block.voxel_index(&local), component)
    }
}

/// A pinned page. The page cannot be evicted until the handle is released or dropped.
pub struct PageHandle {
    page: Arc<Page>,
    cache: Arc<PageCache>,
    writable: bool,
    released: AtomicBool,
}

impl PageHandle {
    pub(crate) fn new(page: Arc<Page>, cache: Arc<PageCache>, writable: bool) -> Self {
        Self {
            page,
            cache,
            writable,
            released: AtomicBool::new(false),
        }
    }

    pub fn chunk_index(&self) -> i64 {
        self.page.key.chunk
    }

    pub fn layer(&self) -> LayerKey {
        self.page.key.layer
    }

    /// Voxel bounds of the page data, margin included
    pub fn min_max(&self) -> ([i32; DIMENSIONALITY_MAX], [i32; DIMENSIONALITY_MAX]) {
        (
            self.page.extent.min_including_margin,
            self.page.extent.max_including_margin,
        )
    }

    pub fn min_max_excluding_margin(&self) -> ([i32; DIMENSIONALITY_MAX], [i32; DIMENSIONALITY_MAX]) {
        (
            self.page.extent.min_excluding_margin,
            self.page.extent.max_excluding_margin,
        )
    }

    pub fn extent(&self) -> &ChunkExtent {
        &self.page.extent
    }

    /// Read access to the decoded samples
    pub fn read(&self) -> RwLockReadGuard<'_, DataBlock> {
        self.page.read()
    }

    /// Write access to the samples; marks the page dirty
    pub fn write(&self) -> Result<RwLockWriteGuard<'_, DataBlock>> {
        if !self.writable {
            return Err(VdsError::InvalidArgument(
                "Page was obtained from a read-only accessor".to_string(),
            ));
        }
        Ok(self.page.write())
    }

    /// Stored value at a layer voxel position inside this page
    pub fn value_at(&self, position: &[i32; DIMENSIONALITY_MAX], component: usize) -> Result<f64> {
        if !self.page.extent.including_margin().contains(position) {
            return Err(VdsError::OutOfRange(format!(
                "Position {:?} is outside chunk {}",
                position, self.page.key.chunk
            )));
        }
        Ok(Page::raw_value(&self.read(), &self.page.extent, position, component))
    }

    /// Unpin the page. Safe to call more than once.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.cache.release(&self.page);
        }
    }
}

impl Drop for PageHandle {
    fn drop(&mut self) {
        self.release();
    }
}
