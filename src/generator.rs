//! Synthetic in-memory volumes filled with smooth pseudo-noise

use crate::channel::{scale_offset_for_format, ChannelDescriptor};
use crate::config::{AccessManagerConfig, CreateOptions};
use crate::error::Result;
use crate::io::InMemoryIOManager;
use crate::jobs::for_each_position;
use crate::layout::{BrickSize, LayoutDescriptor, VolumeDataLayout};
use crate::metadata::MetadataContainer;
use crate::types::{AccessMode, AxisDescriptor, Format, ValueRange, DIMENSIONALITY_MAX};
use crate::vds::Vds;
use std::sync::Arc;

/// Name of the single channel of generated volumes
pub const AMPLITUDE_CHANNEL: &str = "Amplitude";

const AMPLITUDE_RANGE: f32 = 0.1234;

/// Builds noise volumes: 32³ bricks with 4-voxel margins and one amplitude
/// channel in the requested format
#[derive(Debug, Clone)]
pub struct NoiseVolumeGenerator {
    samples: [usize; 3],
    format: Format,
    frequency: [f64; 3],
    seed: u32,
    config: AccessManagerConfig,
}

impl NoiseVolumeGenerator {
    pub fn new(nx: usize, ny: usize, nz: usize, format: Format) -> Self {
        Self {
            samples: [nx, ny, nz],
            format,
            frequency: [0.6, 2.0, 4.0],
            seed: 345,
            config: AccessManagerConfig::default(),
        }
    }

    pub fn with_frequency(mut self, frequency: [f64; 3]) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn with_seed(mut self, seed: u32) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_config(mut self, config: AccessManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn layout(&self) -> Result<VolumeDataLayout> {
        let range = ValueRange::new(-AMPLITUDE_RANGE as f64, AMPLITUDE_RANGE as f64);
        let (scale, offset) = scale_offset_for_format(self.format, range, true);
        let channel = ChannelDescriptor::new(self.format, AMPLITUDE_CHANNEL, "", range)
            .with_integer_scale_offset(scale, offset);

        VolumeDataLayout::new(
            LayoutDescriptor::new(BrickSize::Size32)
                .with_margins(4, 4)
                .with_brick_size_2d_multiplier(4),
            vec![
                AxisDescriptor::new(self.samples[0], "Sample", "ms", 0.0, 4.0),
                AxisDescriptor::new(self.samples[1], "Crossline", "", 1932.0, 2536.0),
                AxisDescriptor::new(self.samples[2], "Inline", "", 9985.0, 10369.0),
            ],
            vec![channel],
            sample_metadata(),
        )
    }

    /// Value of the noise field at a voxel, in `[-0.1234, 0.1234]`
    pub fn value_at(&self, position: &[i32; DIMENSIONALITY_MAX]) -> f64 {
        let point: [f64; 3] = std::array::from_fn(|dim| {
            position[dim] as f64 * self.frequency[dim] / self.samples[dim].max(1) as f64 * 8.0
        });
        AMPLITUDE_RANGE as f64 * value_noise(point, self.seed)
    }

    /// Create the volume in memory and fill LOD 0 with noise
    pub async fn generate(&self) -> Result<Vds> {
        let vds = Vds::create_with_io_manager(
            Arc::new(InMemoryIOManager::new()),
            self.layout()?,
            CreateOptions::default(),
            self.config.clone(),
        )
        .await?;
        let layout = vds.layout();
        let channel = layout.channel(0)?;
        let access_manager = vds.access_manager();
        let accessor = access_manager.create_volume_data_page_accessor(
            layout.primary_dimensions(),
            0,
            0,
            100,
            AccessMode::Create,
        )?;

        for chunk in 0..accessor.chunk_count() {
            let page = accessor.create_page(chunk).await?;
            {
                let extent = *page.extent();
                let mut block = page.write()?;
                for_each_position(&extent.including_margin(), |position| {
                    let local: [usize; DIMENSIONALITY_MAX] = std::array::from_fn(|dim| {
                        (position[dim] - extent.min_including_margin[dim]) as usize
                    });
                    let voxel = block.voxel_index(&local);
                    block.set(voxel, 0, channel.from_real(self.value_at(position)));
                });
            }
            page.release();
        }
        accessor.commit()?;
        accessor.set_max_pages(0);
        access_manager.flush_upload_queue(true)?;
        log::debug!("generated noise volume {}", layout.summary());
        Ok(vds)
    }
}

/// In-memory `nx` x `ny` x `nz` noise volume with an amplitude channel of `format`
pub async fn generate_noise_volume(nx: usize, ny: usize, nz: usize, format: Format) -> Result<Vds> {
    NoiseVolumeGenerator::new(nx, ny, nz, format).generate().await
}

/// One typed entry of each kind in four categories
fn sample_metadata() -> MetadataContainer {
    let mut metadata = MetadataContainer::new();
    metadata.set_int("categoryInt", "Int", 123);
    metadata.set_int_vector2("categoryInt", "IntVector2", [45, 78]);
    metadata.set_int_vector3("categoryInt", "IntVector3", [45, 78, 72]);
    metadata.set_int_vector4("categoryInt", "IntVector4", [45, 78, 72, 84]);
    metadata.set_float("categoryFloat", "Float", 123.0);
    metadata.set_float_vector2("categoryFloat", "FloatVector2", [45.5, 78.75]);
    metadata.set_float_vector3("categoryFloat", "FloatVector3", [45.5, 78.75, 72.75]);
    metadata.set_float_vector4("categoryFloat", "FloatVector4", [45.5, 78.75, 72.75, 84.1]);
    metadata.set_double("categoryDouble", "Double", 123.0);
    metadata.set_double_vector2("categoryDouble", "DoubleVector2", [45.5, 78.75]);
    metadata.set_double_vector3("categoryDouble", "DoubleVector3", [45.5, 78.75, 72.75]);
    metadata.set_double_vector4("categoryDouble", "DoubleVector4", [45.5, 78.75, 72.75, 84.1]);
    metadata.set_string("categoryString", "String", "Test string".to_string());
    metadata
}

fn lattice_hash(x: i64, y: i64, z: i64, seed: u32) -> f64 {
    let mut h = (x as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (y as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
        ^ (z as u64).wrapping_mul(0x1656_67B1_9E37_79F9)
        ^ seed as u64;
    h ^= h >> 33;
    h = h.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
    h ^= h >> 33;
    (h >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0
}

fn smoothstep(t: f64) -> f64 {
    t * t * (3.0 - 2.0 * t)
}

/// Trilinearly blended lattice noise in `[-1, 1]`
fn value_noise(point: [f64; 3], seed: u32) -> f64 {
    let base = point.map(|p| p.floor());
    let t = [0, 1, 2].map(|dim| smoothstep(point[dim] - base[dim]));
    let [x, y, z] = base.map(|b| b as i64);
    let mut value = 0.0;
    for corner in 0..8 {
        let offset = [corner & 1, (corner >> 1) & 1, (corner >> 2) & 1];
        let weight: f64 = (0..3)
            .map(|dim| if offset[dim] == 1 { t[dim] } else { 1.0 - t[dim] })
            .product();
        value += weight * lattice_hash(x + offset[0], y + offset[1], z + offset[2], seed);
    }
    value
}
