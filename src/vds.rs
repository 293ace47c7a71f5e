//! Volume handle - opens or creates a volume and owns its access manager

use crate::access::VolumeDataAccessManager;
use crate::compression::DefaultCodec;
use crate::config::{AccessManagerConfig, CreateOptions};
use crate::error::{Result, VdsError};
use crate::io::{create_io_manager, IOManager, OpenOptions};
use crate::jobs::for_each_position;
use crate::layout::VolumeDataLayout;
use crate::metadata::VdsDescriptor;
use crate::store::VolumeDataStore;
use crate::types::{AccessMode, DIMENSIONALITY_MAX};
use crate::utils::DESCRIPTOR_OBJECT;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// An opened or newly created volume
///
/// Dropping the handle closes it. Layout and access manager handles taken
/// from it stay usable afterwards, but new requests are refused.
pub struct Vds {
    descriptor: VdsDescriptor,
    layout: Arc<VolumeDataLayout>,
    store: Arc<VolumeDataStore>,
    access_manager: VolumeDataAccessManager,
    closed: AtomicBool,
}

impl Vds {
    /// Open an existing volume read-only
    pub async fn open(options: &OpenOptions, config: AccessManagerConfig) -> Result<Self> {
        Self::open_with_mode(options, AccessMode::ReadOnly, config).await
    }

    /// Open an existing volume read-only or for modifying its chunks
    pub async fn open_with_mode(
        options: &OpenOptions,
        access_mode: AccessMode,
        config: AccessManagerConfig,
    ) -> Result<Self> {
        let io = create_io_manager(options)?;
        Self::open_with_io_manager_mode(io, access_mode, config).await
    }

    pub async fn open_with_io_manager(io: Arc<dyn IOManager>, config: AccessManagerConfig) -> Result<Self> {
        Self::open_with_io_manager_mode(io, AccessMode::ReadOnly, config).await
    }

    pub async fn open_with_io_manager_mode(
        io: Arc<dyn IOManager>,
        access_mode: AccessMode,
        config: AccessManagerConfig,
    ) -> Result<Self> {
        if access_mode == AccessMode::Create {
            return Err(VdsError::InvalidArgument(
                "An existing volume can be opened ReadOnly or ReadWrite; use create for Create".to_string(),
            ));
        }
        config.validate()?;
        let descriptor = match io.read(DESCRIPTOR_OBJECT).await {
            Ok(bytes) => VdsDescriptor::from_json(&bytes)?,
            Err(VdsError::NotFound(what)) => {
                return Err(VdsError::ConnectionFailure(format!("No volume found: {}", what)))
            }
            Err(e) => return Err(e),
        };
        log::info!(
            "opened volume {} {:?}: {}",
            descriptor.volume_id,
            access_mode,
            descriptor.layout.summary()
        );
        Self::with_descriptor(io, descriptor, access_mode, config)
    }

    /// Create a new volume, replacing any descriptor at the location
    pub async fn create(
        options: &OpenOptions,
        layout: VolumeDataLayout,
        create_options: CreateOptions,
        config: AccessManagerConfig,
    ) -> Result<Self> {
        let io = create_io_manager(options)?;
        Self::create_with_io_manager(io, layout, create_options, config).await
    }

    pub async fn create_with_io_manager(
        io: Arc<dyn IOManager>,
        layout: VolumeDataLayout,
        create_options: CreateOptions,
        config: AccessManagerConfig,
    ) -> Result<Self> {
        config.validate()?;
        layout.validate()?;
        let descriptor = VdsDescriptor::new(layout)
            .with_compression(create_options.compression)
            .with_compression_tolerance(create_options.compression_tolerance);
        let vds = Self::with_descriptor(io, descriptor, AccessMode::Create, config)?;
        vds.store.write_descriptor(&vds.descriptor).await?;
        log::info!("created volume {}: {}", vds.volume_id(), vds.layout.summary());
        Ok(vds)
    }

    fn with_descriptor(
        io: Arc<dyn IOManager>,
        descriptor: VdsDescriptor,
        access_mode: AccessMode,
        config: AccessManagerConfig,
    ) -> Result<Self> {
        let codec = DefaultCodec::new(descriptor.compression, descriptor.compression_tolerance);
        let store = Arc::new(VolumeDataStore::new(io, Arc::new(codec), config.chunk_metadata_page_size));
        let layout = Arc::new(descriptor.layout.clone());
        let access_manager =
            VolumeDataAccessManager::new(Arc::clone(&layout), Arc::clone(&store), access_mode, config)?;
        Ok(Self {
            descriptor,
            layout,
            store,
            access_manager,
            closed: AtomicBool::new(false),
        })
    }

    pub fn layout(&self) -> Arc<VolumeDataLayout> {
        Arc::clone(&self.layout)
    }

    pub fn access_manager(&self) -> VolumeDataAccessManager {
        self.access_manager.clone()
    }

    pub fn volume_id(&self) -> Uuid {
        self.descriptor.volume_id
    }

    pub fn descriptor(&self) -> &VdsDescriptor {
        &self.descriptor
    }

    /// Write `values` (dimension 0 fastest, one per voxel) into LOD 0 of a
    /// channel. Non-finite values are stored as NoValue. The data reaches
    /// storage on `flush_upload_queue` or `close`.
    pub async fn write_array(&self, channel_name: &str, values: &[f64]) -> Result<()> {
        let channel = self.layout.channel_index(channel_name).ok_or_else(|| {
            VdsError::InvalidArgument(format!("No channel named {}", channel_name))
        })?;
        let descriptor = self.layout.channel(channel)?;
        if descriptor.components.count() != 1 {
            return Err(VdsError::InvalidArgument(format!(
                "Channel {} has {} components",
                channel_name,
                descriptor.components.count()
            )));
        }

        let dimensionality = self.layout.dimensionality();
        let num_samples: Vec<usize> = (0..dimensionality)
            .map(|dim| self.layout.dimension_num_samples(dim))
            .collect::<Result<_>>()?;
        let expected: usize = num_samples.iter().product();
        if values.len() != expected {
            return Err(VdsError::InvalidArgument(format!(
                "{} values given for a volume of {} voxels",
                values.len(),
                expected
            )));
        }
        let mut pitch = [0usize; DIMENSIONALITY_MAX];
        let mut stride = 1;
        for dim in 0..dimensionality {
            pitch[dim] = stride;
            stride *= num_samples[dim];
        }
        let no_value = descriptor.no_value_raw();

        let accessor = self.access_manager.create_volume_data_page_accessor(
            self.layout.primary_dimensions(),
            0,
            channel,
            1,
            AccessMode::Create,
        )?;
        for chunk in 0..accessor.chunk_count() {
            let page = accessor.create_page(chunk).await?;
            {
                let extent = *page.extent();
                let mut block = page.write()?;
                let origin = extent.min_including_margin;
                for_each_position(&extent.including_margin(), |position| {
                    let source: usize = (0..DIMENSIONALITY_MAX)
                        .map(|dim| position[dim] as usize * pitch[dim])
                        .sum();
                    let real = values[source];
                    let raw = match no_value {
                        Some(code) if !real.is_finite() => code,
                        _ => descriptor.from_real(real),
                    };
                    let local: [usize; DIMENSIONALITY_MAX] =
                        std::array::from_fn(|dim| (position[dim] - origin[dim]) as usize);
                    let voxel = block.voxel_index(&local);
                    block.set(voxel, 0, raw);
                });
            }
            page.release();
        }
        let committed = accessor.commit()?;
        log::debug!("write_array {}: {} pages committed", channel_name, committed);
        Ok(())
    }

    /// Flush pending writes and cancel outstanding requests. Safe to call
    /// more than once; only the first call does anything.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = self.access_manager.close();
        let errors = self.access_manager.upload_error_count();
        if errors > 0 {
            log::warn!("volume {} closed with {} upload errors", self.volume_id(), errors);
        }
        log::info!("closed volume {}", self.volume_id());
        result
    }
}

impl Drop for Vds {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("closing volume {} failed: {}", self.volume_id(), e);
        }
    }
}

impl std::fmt::Debug for Vds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vds")
            .field("volume_id", &self.descriptor.volume_id)
            .field("layout", &self.layout.summary())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelDescriptor;
    use crate::io::InMemoryIOManager;
    use crate::layout::{BrickSize, LayoutDescriptor};
    use crate::metadata::MetadataContainer;
    use crate::types::{AxisDescriptor, Format, ValueRange};

    fn small_layout() -> VolumeDataLayout {
        VolumeDataLayout::new(
            LayoutDescriptor::new(BrickSize::Size32).with_margins(2, 2),
            vec![
                AxisDescriptor::new(40, "Sample", "ms", 0.0, 39.0),
                AxisDescriptor::new(20, "Crossline", "", 1.0, 20.0),
                AxisDescriptor::new(10, "Inline", "", 1.0, 10.0),
            ],
            vec![ChannelDescriptor::new(Format::R32, "Amplitude", "", ValueRange::new(-1.0, 1.0))
                .with_no_value(-999.0)],
            MetadataContainer::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_then_open() {
        let io: Arc<dyn IOManager> = Arc::new(InMemoryIOManager::new());
        let created = Vds::create_with_io_manager(
            Arc::clone(&io),
            small_layout(),
            CreateOptions::default(),
            AccessManagerConfig::default().with_worker_threads(2),
        )
        .await
        .unwrap();
        let id = created.volume_id();
        created.close().unwrap();
        created.close().unwrap();

        let opened = Vds::open_with_io_manager(io, AccessManagerConfig::default().with_worker_threads(2))
            .await
            .unwrap();
        assert_eq!(opened.volume_id(), id);
        assert_eq!(*opened.layout(), small_layout());
        assert_eq!(opened.access_manager().access_mode(), AccessMode::ReadOnly);
    }

    #[tokio::test]
    async fn test_open_modes() {
        let io: Arc<dyn IOManager> = Arc::new(InMemoryIOManager::new());
        let config = || AccessManagerConfig::default().with_worker_threads(2);
        Vds::create_with_io_manager(Arc::clone(&io), small_layout(), CreateOptions::default(), config())
            .await
            .unwrap();

        let writable = Vds::open_with_io_manager_mode(Arc::clone(&io), AccessMode::ReadWrite, config())
            .await
            .unwrap();
        assert_eq!(writable.access_manager().access_mode(), AccessMode::ReadWrite);

        let result = Vds::open_with_io_manager_mode(io, AccessMode::Create, config()).await;
        assert!(matches!(result, Err(VdsError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_open_missing_volume() {
        let io: Arc<dyn IOManager> = Arc::new(InMemoryIOManager::new());
        let result = Vds::open_with_io_manager(io, AccessManagerConfig::default()).await;
        assert!(matches!(result, Err(VdsError::ConnectionFailure(_))));
    }

    #[tokio::test]
    async fn test_cloud_backend_needs_io_manager() {
        let options = OpenOptions::from_url("s3://bucket/volume", "Region=eu-north-1").unwrap();
        let result = Vds::open(&options, AccessManagerConfig::default()).await;
        assert!(matches!(result, Err(VdsError::ConnectionFailure(_))));
    }

    #[tokio::test]
    async fn test_write_array_checks_input() {
        let vds = Vds::create_with_io_manager(
            Arc::new(InMemoryIOManager::new()),
            small_layout(),
            CreateOptions::default(),
            AccessManagerConfig::default().with_worker_threads(2),
        )
        .await
        .unwrap();
        assert!(vds.write_array("Velocity", &[0.0; 8000]).await.is_err());
        assert!(vds.write_array("Amplitude", &[0.0; 10]).await.is_err());
        vds.write_array("Amplitude", &vec![0.25; 8000]).await.unwrap();
    }
}
