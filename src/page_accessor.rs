//! Page accessors - budgeted views on the pages of one layer

use crate::error::{Result, VdsError};
use crate::layer::{LayerKey, VolumeDataLayer};
use crate::page::PageHandle;
use crate::page_cache::PageCache;
use crate::partition::ChunkExtent;
use crate::types::{AccessMode, DIMENSIONALITY_MAX};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Gives out pinned pages of one layer. The accessor's `max_pages` is added to
/// the layer's eviction budget for as long as the accessor lives.
pub struct VolumeDataPageAccessor {
    layer: Arc<VolumeDataLayer>,
    cache: Arc<PageCache>,
    access_mode: AccessMode,
    budget_id: u64,
    max_pages: AtomicUsize,
    references: AtomicI32,
}

impl VolumeDataPageAccessor {
    pub(crate) fn new(
        layer: Arc<VolumeDataLayer>,
        cache: Arc<PageCache>,
        access_mode: AccessMode,
        max_pages: usize,
    ) -> Self {
        let budget_id = cache.register_budget(layer.key(), max_pages);
        log::debug!(
            "page accessor for {} ({:?}, {} pages)",
            layer.name(),
            access_mode,
            max_pages
        );
        Self {
            layer,
            cache,
            access_mode,
            budget_id,
            max_pages: AtomicUsize::new(max_pages),
            references: AtomicI32::new(1),
        }
    }

    pub fn layer_key(&self) -> LayerKey {
        self.layer.key()
    }

    pub fn layer(&self) -> &VolumeDataLayer {
        &self.layer
    }

    pub fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    /// Samples of the layer along `dimension`
    pub fn num_samples(&self, dimension: usize) -> Result<usize> {
        if dimension >= DIMENSIONALITY_MAX {
            return Err(VdsError::OutOfRange(format!("Dimension {} does not exist", dimension)));
        }
        Ok(self.layer.partition().num_samples(dimension))
    }

    pub fn chunk_count(&self) -> i64 {
        self.layer.partition().chunk_count()
    }

    pub fn chunk_min_max(&self, chunk: i64) -> Result<ChunkExtent> {
        self.layer.partition().check_chunk_index(chunk)?;
        Ok(self.layer.partition().chunk_extent(chunk))
    }

    pub fn chunk_index(&self, position: &[i32; DIMENSIONALITY_MAX]) -> Result<i64> {
        let partition = self.layer.partition();
        if !partition.is_position_inside(position) {
            return Err(VdsError::OutOfRange(format!(
                "Position {:?} is outside {}",
                position,
                self.layer.name()
            )));
        }
        Ok(partition.chunk_index_from_position(position))
    }

    pub fn max_pages(&self) -> usize {
        self.max_pages.load(Ordering::Acquire)
    }

    /// Change the budget; unreferenced pages beyond it are evicted immediately
    pub fn set_max_pages(&self, max_pages: usize) {
        self.max_pages.store(max_pages, Ordering::Release);
        self.cache
            .update_budget(self.layer.key(), self.budget_id, max_pages);
    }

    pub fn add_reference(&self) -> i32 {
        self.references.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drop a reference; at zero the accessor's budget is withdrawn
    pub fn remove_reference(&self) -> i32 {
        let remaining = self.references.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 {
            self.cache.update_budget(self.layer.key(), self.budget_id, 0);
        }
        remaining
    }

    /// Pin and load the page of `chunk`
    pub async fn read_page(&self, chunk: i64) -> Result<PageHandle> {
        let page = self.cache.get_page(&self.layer, chunk, false).await?;
        Ok(PageHandle::new(
            page,
            Arc::clone(&self.cache),
            self.access_mode.is_writable(),
        ))
    }

    pub async fn read_page_at_position(&self, position: &[i32; DIMENSIONALITY_MAX]) -> Result<PageHandle> {
        let chunk = self.chunk_index(position)?;
        self.read_page(chunk).await
    }

    /// Pin the page of `chunk` without reading storage; it starts out filled with NoValue
    pub async fn create_page(&self, chunk: i64) -> Result<PageHandle> {
        if !self.access_mode.is_writable() {
            return Err(VdsError::InvalidArgument(format!(
                "Cannot create pages through a read-only accessor of {}",
                self.layer.name()
            )));
        }
        let page = self.cache.get_page(&self.layer, chunk, true).await?;
        Ok(PageHandle::new(page, Arc::clone(&self.cache), true))
    }

    /// Hand every modified page of the layer to the upload queue
    pub fn commit(&self) -> Result<usize> {
        if !self.access_mode.is_writable() {
            return Err(VdsError::InvalidArgument(
                "Cannot commit a read-only accessor".to_string(),
            ));
        }
        let committed = self.cache.commit_layer(&self.layer.key());
        log::debug!("committed {} pages of {}", committed, self.layer.name());
        Ok(committed)
    }
}

impl Drop for VolumeDataPageAccessor {
    fn drop(&mut self) {
        self.cache.unregister_budget(self.layer.key(), self.budget_id);
    }
}

impl std::fmt::Debug for VolumeDataPageAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeDataPageAccessor")
            .field("layer", &self.layer.name())
            .field("access_mode", &self.access_mode)
            .field("max_pages", &self.max_pages())
            .finish()
    }
}
