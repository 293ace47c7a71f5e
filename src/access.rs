//! Volume data access manager - the request API of an opened volume
//!
//! Argument and buffer-size checks happen when a request is issued and fail
//! the call. Everything that depends on the stored data (fetch failures,
//! cancellation) is only reported through the request id.

use crate::buffer::VolumeBuffer;
use crate::config::AccessManagerConfig;
use crate::dimensions::DimensionsND;
use crate::error::{Result, VdsError};
use crate::jobs::{OutputConverter, PrefetchJob, ProjectedPlane, SampleJob, SubsetJob};
use crate::layer::{LayerKey, VolumeDataLayer};
use crate::layout::VolumeDataLayout;
use crate::page_accessor::VolumeDataPageAccessor;
use crate::page_cache::PageCache;
use crate::partition::ChunkExtent;
use crate::request::{RequestId, RequestStatus};
use crate::scheduler::{ChunkJob, RequestScheduler};
use crate::store::VolumeDataStore;
use crate::types::{AccessMode, Format, InterpolationMethod, VoxelBox, DIMENSIONALITY_MAX};
use crate::upload::{UploadError, UploadQueue};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct AccessManagerInner {
    layout: Arc<VolumeDataLayout>,
    access_mode: AccessMode,
    config: AccessManagerConfig,
    cache: Arc<PageCache>,
    uploads: Arc<UploadQueue>,
    layers: Mutex<HashMap<LayerKey, Arc<VolumeDataLayer>>>,
    request_accessors: Mutex<HashMap<LayerKey, Arc<VolumeDataPageAccessor>>>,
    closed: AtomicBool,
    // Dropped last: shuts down the worker pool
    scheduler: RequestScheduler,
}

/// Issues and tracks requests against one volume. Clones share the same
/// page cache, worker pool and request table.
#[derive(Clone)]
pub struct VolumeDataAccessManager {
    inner: Arc<AccessManagerInner>,
}

impl VolumeDataAccessManager {
    pub(crate) fn new(
        layout: Arc<VolumeDataLayout>,
        store: Arc<VolumeDataStore>,
        access_mode: AccessMode,
        config: AccessManagerConfig,
    ) -> Result<Self> {
        let scheduler = RequestScheduler::new(&config)?;
        let uploads = UploadQueue::new(
            Arc::clone(&store),
            scheduler.handle().clone(),
            config.upload_retry_attempts,
        );
        let cache = Arc::new(PageCache::new(store, uploads.clone()));
        log::debug!(
            "access manager ({:?}, {} workers) for {}",
            access_mode,
            config.worker_threads,
            layout.summary()
        );
        Ok(Self {
            inner: Arc::new(AccessManagerInner {
                layout,
                access_mode,
                config,
                cache,
                uploads,
                layers: Mutex::new(HashMap::new()),
                request_accessors: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                scheduler,
            }),
        })
    }

    pub fn layout(&self) -> &VolumeDataLayout {
        &self.inner.layout
    }

    pub fn access_mode(&self) -> AccessMode {
        self.inner.access_mode
    }

    pub fn config(&self) -> &AccessManagerConfig {
        &self.inner.config
    }

    pub fn page_cache(&self) -> &Arc<PageCache> {
        &self.inner.cache
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Layer of `(dimensions, lod, channel)`, validating all three
    pub fn layer(&self, dimensions: DimensionsND, lod: u32, channel: usize) -> Result<Arc<VolumeDataLayer>> {
        let key = LayerKey::new(dimensions, lod, channel);
        if let Some(layer) = self.inner.layers.lock().get(&key) {
            return Ok(Arc::clone(layer));
        }
        let layer = Arc::new(VolumeDataLayer::new(&self.inner.layout, key)?);
        Ok(Arc::clone(
            self.inner.layers.lock().entry(key).or_insert(layer),
        ))
    }

    /// Page accessor for one layer. `max_pages` is added to the layer's cache budget.
    pub fn create_volume_data_page_accessor(
        &self,
        dimensions: DimensionsND,
        lod: u32,
        channel: usize,
        max_pages: usize,
        access_mode: AccessMode,
    ) -> Result<VolumeDataPageAccessor> {
        if access_mode.is_writable() && !self.inner.access_mode.is_writable() {
            return Err(VdsError::InvalidArgument(
                "Volume was opened read-only".to_string(),
            ));
        }
        let layer = self.layer(dimensions, lod, channel)?;
        Ok(VolumeDataPageAccessor::new(
            layer,
            Arc::clone(&self.inner.cache),
            access_mode,
            max_pages,
        ))
    }

    fn request_accessor(&self, layer: &Arc<VolumeDataLayer>) -> Arc<VolumeDataPageAccessor> {
        let mut accessors = self.inner.request_accessors.lock();
        let accessor = accessors.entry(layer.key()).or_insert_with(|| {
            Arc::new(VolumeDataPageAccessor::new(
                Arc::clone(layer),
                Arc::clone(&self.inner.cache),
                AccessMode::ReadOnly,
                self.inner.config.request_page_budget,
            ))
        });
        Arc::clone(accessor)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(VdsError::Canceled("volume has been closed".to_string()));
        }
        Ok(())
    }

    /// Box with the dimensions past the dimensionality set to `[0, 1)`,
    /// checked against the layer bounds
    fn normalize_box(&self, layer: &VolumeDataLayer, voxels: &VoxelBox, axes: &[usize]) -> Result<VoxelBox> {
        let mut normalized = *voxels;
        let partition = layer.partition();
        for dim in 0..DIMENSIONALITY_MAX {
            if dim >= self.inner.layout.dimensionality() {
                normalized.min[dim] = 0;
                normalized.max[dim] = 1;
                continue;
            }
            if !axes.contains(&dim) {
                continue;
            }
            let n = partition.num_samples(dim) as i32;
            if normalized.min[dim] < 0 || normalized.max[dim] > n || normalized.min[dim] >= normalized.max[dim] {
                return Err(VdsError::OutOfRange(format!(
                    "Voxel range [{}, {}) of dimension {} is outside [0, {})",
                    normalized.min[dim], normalized.max[dim], dim, n
                )));
            }
        }
        Ok(normalized)
    }

    fn check_buffer(buffer: &VolumeBuffer, required: usize) -> Result<()> {
        if buffer.len() < required {
            return Err(VdsError::BufferTooSmall {
                required,
                actual: buffer.len(),
            });
        }
        Ok(())
    }

    fn check_positions(positions: &[[f32; DIMENSIONALITY_MAX]]) -> Result<()> {
        if positions.is_empty() {
            return Err(VdsError::InvalidArgument("No positions given".to_string()));
        }
        if positions.iter().flatten().any(|coordinate| !coordinate.is_finite()) {
            return Err(VdsError::InvalidArgument(
                "Positions must be finite".to_string(),
            ));
        }
        Ok(())
    }

    fn submit(&self, layer: &Arc<VolumeDataLayer>, chunks: Vec<i64>, job: Arc<dyn ChunkJob>) -> RequestId {
        let accessor = self.request_accessor(layer);
        self.inner.scheduler.submit(accessor, chunks, job)
    }

    fn subset_box(&self, layer: &VolumeDataLayer, voxels: &VoxelBox) -> Result<VoxelBox> {
        let all: Vec<usize> = (0..self.inner.layout.dimensionality()).collect();
        self.normalize_box(layer, voxels, &all)
    }

    pub fn volume_subset_buffer_size(
        &self,
        voxels: &VoxelBox,
        format: Format,
        lod: u32,
        channel: usize,
    ) -> Result<usize> {
        let layer = self.layer(self.inner.layout.primary_dimensions(), lod, channel)?;
        let voxels = self.subset_box(&layer, voxels)?;
        Ok(format.byte_count(voxels.voxel_count() * layer.channel().components.count()))
    }

    /// Axes of a projected subset and the axis the plane determines
    fn projection(&self, layer: &VolumeDataLayer, projected: DimensionsND) -> Result<([usize; 2], usize)> {
        let layer_axes = layer.key().dimensions.axes();
        let axes = projected.axes();
        if layer_axes.len() != 3
            || axes.len() != 2
            || !axes.iter().all(|axis| layer_axes.contains(axis))
        {
            return Err(VdsError::InvalidArgument(format!(
                "{} is not a projection of {}",
                projected,
                layer.key().dimensions
            )));
        }
        let remaining = layer_axes
            .iter()
            .copied()
            .find(|axis| !axes.contains(axis))
            .ok_or_else(|| VdsError::InvalidArgument(format!("{} has no remaining axis", projected)))?;
        Ok(([axes[0], axes[1]], remaining))
    }

    pub fn projected_volume_subset_buffer_size(
        &self,
        voxels: &VoxelBox,
        projected: DimensionsND,
        format: Format,
        lod: u32,
        channel: usize,
    ) -> Result<usize> {
        let layer = self.layer(self.inner.layout.primary_dimensions(), lod, channel)?;
        let (axes, _) = self.projection(&layer, projected)?;
        let voxels = self.normalize_box(&layer, voxels, &axes)?;
        Ok(format.byte_count(voxels.extent(axes[0]) * voxels.extent(axes[1])))
    }

    pub fn volume_samples_buffer_size(&self, sample_count: usize, channel: usize) -> Result<usize> {
        self.inner.layout.channel(channel)?;
        Ok(sample_count * Format::R32.size_in_bytes())
    }

    pub fn volume_traces_buffer_size(
        &self,
        trace_count: usize,
        trace_dimension: usize,
        lod: u32,
        channel: usize,
    ) -> Result<usize> {
        let layer = self.layer(self.inner.layout.primary_dimensions(), lod, channel)?;
        self.check_trace_dimension(trace_dimension)?;
        Ok(trace_count * layer.partition().num_samples(trace_dimension) * Format::R32.size_in_bytes())
    }

    fn check_trace_dimension(&self, trace_dimension: usize) -> Result<()> {
        if trace_dimension >= self.inner.layout.dimensionality() {
            return Err(VdsError::InvalidArgument(format!(
                "Trace dimension {} is outside a {}D volume",
                trace_dimension,
                self.inner.layout.dimensionality()
            )));
        }
        Ok(())
    }

    /// Copy a box of voxels into `buffer`, converted to `format`, dimension 0 fastest
    #[allow(clippy::too_many_arguments)]
    pub fn request_volume_subset(
        &self,
        buffer: &VolumeBuffer,
        dimensions: DimensionsND,
        lod: u32,
        channel: usize,
        voxels: &VoxelBox,
        format: Format,
        replacement_no_value: Option<f32>,
    ) -> Result<RequestId> {
        self.check_open()?;
        let layer = self.layer(dimensions, lod, channel)?;
        let voxels = self.subset_box(&layer, voxels)?;
        let components = layer.channel().components.count();
        Self::check_buffer(buffer, format.byte_count(voxels.voxel_count() * components))?;

        let chunks = layer.partition().chunks_overlapping(&voxels);
        let converter = OutputConverter::new(layer.channel(), format, replacement_no_value);
        let job = SubsetJob::new(buffer.clone(), voxels, converter, components);
        Ok(self.submit(&layer, chunks, Arc::new(job)))
    }

    /// Sample the plane `equation` (in voxel coordinates of dimensions 0, 1
    /// and 2) over the `projected` axes of `voxels`
    #[allow(clippy::too_many_arguments)]
    pub fn request_projected_volume_subset(
        &self,
        buffer: &VolumeBuffer,
        dimensions: DimensionsND,
        lod: u32,
        channel: usize,
        voxels: &VoxelBox,
        equation: [f32; 4],
        projected: DimensionsND,
        format: Format,
        interpolation: InterpolationMethod,
        replacement_no_value: Option<f32>,
    ) -> Result<RequestId> {
        self.check_open()?;
        let layer = self.layer(dimensions, lod, channel)?;
        let (axes, remaining_axis) = self.projection(&layer, projected)?;
        if equation[remaining_axis] == 0.0 || equation.iter().any(|c| !c.is_finite()) {
            return Err(VdsError::InvalidArgument(format!(
                "Plane {:?} does not determine dimension {}",
                equation, remaining_axis
            )));
        }
        let voxels = self.normalize_box(&layer, voxels, &axes)?;
        Self::check_buffer(
            buffer,
            format.byte_count(voxels.extent(axes[0]) * voxels.extent(axes[1])),
        )?;

        let plane = ProjectedPlane {
            axes,
            remaining_axis,
            equation,
        };
        let converter = OutputConverter::new(layer.channel(), format, replacement_no_value);
        let job = SampleJob::projected(Arc::clone(&layer), buffer.clone(), voxels, plane, interpolation, converter);
        Ok(self.submit_samples(&layer, job))
    }

    fn submit_samples(&self, layer: &Arc<VolumeDataLayer>, job: SampleJob) -> RequestId {
        let chunks = job.chunks();
        self.submit(layer, chunks, Arc::new(job))
    }

    /// Interpolate the volume at each position; writes one `f32` per position
    #[allow(clippy::too_many_arguments)]
    pub fn request_volume_samples(
        &self,
        buffer: &VolumeBuffer,
        dimensions: DimensionsND,
        lod: u32,
        channel: usize,
        positions: &[[f32; DIMENSIONALITY_MAX]],
        interpolation: InterpolationMethod,
        replacement_no_value: Option<f32>,
    ) -> Result<RequestId> {
        self.check_open()?;
        let layer = self.layer(dimensions, lod, channel)?;
        Self::check_positions(positions)?;
        Self::check_buffer(buffer, positions.len() * Format::R32.size_in_bytes())?;

        let job = SampleJob::samples(Arc::clone(&layer), buffer.clone(), positions, interpolation, replacement_no_value);
        Ok(self.submit_samples(&layer, job))
    }

    /// Full traces along `trace_dimension` through each position; writes
    /// `num_samples(trace_dimension)` `f32` values per trace
    #[allow(clippy::too_many_arguments)]
    pub fn request_volume_traces(
        &self,
        buffer: &VolumeBuffer,
        dimensions: DimensionsND,
        lod: u32,
        channel: usize,
        positions: &[[f32; DIMENSIONALITY_MAX]],
        interpolation: InterpolationMethod,
        trace_dimension: usize,
        replacement_no_value: Option<f32>,
    ) -> Result<RequestId> {
        self.check_open()?;
        let layer = self.layer(dimensions, lod, channel)?;
        self.check_trace_dimension(trace_dimension)?;
        Self::check_positions(positions)?;
        let partition = layer.partition();
        let trace_length = partition.num_samples(trace_dimension);
        Self::check_buffer(
            buffer,
            positions.len() * trace_length * Format::R32.size_in_bytes(),
        )?;

        let job = SampleJob::traces(
            Arc::clone(&layer),
            buffer.clone(),
            positions,
            trace_dimension,
            interpolation,
            replacement_no_value,
        );
        Ok(self.submit_samples(&layer, job))
    }

    /// Load a chunk into the page cache without producing output
    pub fn prefetch_volume_chunk(
        &self,
        dimensions: DimensionsND,
        lod: u32,
        channel: usize,
        chunk: i64,
    ) -> Result<RequestId> {
        self.check_open()?;
        let layer = self.layer(dimensions, lod, channel)?;
        layer.partition().check_chunk_index(chunk)?;
        Ok(self.submit(&layer, vec![chunk], Arc::new(PrefetchJob)))
    }

    pub fn chunk_count(&self, dimensions: DimensionsND, lod: u32, channel: usize) -> Result<i64> {
        Ok(self.layer(dimensions, lod, channel)?.partition().chunk_count())
    }

    pub fn chunk_index_from_position(
        &self,
        dimensions: DimensionsND,
        lod: u32,
        channel: usize,
        position: &[i32; DIMENSIONALITY_MAX],
    ) -> Result<i64> {
        let layer = self.layer(dimensions, lod, channel)?;
        if !layer.partition().is_position_inside(position) {
            return Err(VdsError::OutOfRange(format!(
                "Position {:?} is outside {}",
                position,
                layer.name()
            )));
        }
        Ok(layer.partition().chunk_index_from_position(position))
    }

    pub fn chunk_extent(&self, dimensions: DimensionsND, lod: u32, channel: usize, chunk: i64) -> Result<ChunkExtent> {
        let layer = self.layer(dimensions, lod, channel)?;
        layer.partition().check_chunk_index(chunk)?;
        Ok(layer.partition().chunk_extent(chunk))
    }

    pub fn completion_factor(&self, id: RequestId) -> f32 {
        self.inner.scheduler.requests().completion_factor(id)
    }

    /// True once, when the request has completed
    pub fn is_completed(&self, id: RequestId) -> bool {
        self.inner.scheduler.requests().is_completed(id)
    }

    /// True once, when the request has been canceled
    pub fn is_canceled(&self, id: RequestId) -> bool {
        self.inner.scheduler.requests().is_canceled(id)
    }

    /// Block until the request finishes. Returns true once, for a completed
    /// request; false when it was canceled or `timeout` elapsed.
    pub fn wait_for_completion(&self, id: RequestId, timeout: Option<Duration>) -> bool {
        self.inner.scheduler.requests().wait_for_completion(id, timeout)
    }

    pub fn cancel(&self, id: RequestId) {
        self.inner.scheduler.requests().cancel(id);
    }

    /// Current state of a request; does not consume a terminal report
    pub fn request_status(&self, id: RequestId) -> RequestStatus {
        self.inner.scheduler.requests().request_status(id)
    }

    pub fn cancel_reason(&self, id: RequestId) -> Option<String> {
        self.inner.scheduler.requests().cancel_reason(id)
    }

    /// Write every modified page and wait until all queued uploads are done
    pub fn flush_upload_queue(&self, write_updated_layer_status: bool) -> Result<()> {
        let committed = self.inner.cache.commit_all();
        log::debug!("flushing upload queue ({} pages committed)", committed);
        self.inner.uploads.flush(write_updated_layer_status)
    }

    pub fn clear_upload_errors(&self) {
        self.inner.uploads.clear_errors();
    }

    pub fn force_clear_all_upload_errors(&self) {
        self.inner.uploads.force_clear_all_errors();
    }

    pub fn upload_error_count(&self) -> usize {
        self.inner.uploads.error_count()
    }

    pub fn next_upload_error(&self) -> Option<UploadError> {
        self.inner.uploads.next_error()
    }

    /// Write back and drop every unreferenced cached page
    pub fn invalidate(&self) {
        self.inner.cache.invalidate_all();
    }

    /// Flush pending writes, then cancel every live request. Later requests
    /// fail. Returns the flush outcome; calling again does nothing.
    pub(crate) fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let flushed = if self.inner.access_mode.is_writable() {
            self.flush_upload_queue(true)
        } else {
            Ok(())
        };
        self.inner.scheduler.requests().cancel_all("volume closed");
        self.inner.request_accessors.lock().clear();
        flushed
    }
}

impl std::fmt::Debug for VolumeDataAccessManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeDataAccessManager")
            .field("access_mode", &self.inner.access_mode)
            .field("closed", &self.is_closed())
            .finish()
    }
}
