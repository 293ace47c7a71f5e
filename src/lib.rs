//! VDS volume data access engine
//!
//! Random access to bricked, multi-resolution volumes of up to six
//! dimensions. Chunks are fetched from an [`IOManager`], decoded into pages
//! held by a shared page cache, and served through asynchronous requests
//! tracked by id.
//!
//! # Features
//!
//! - Volume layouts with per-axis sampling, channels and typed metadata
//! - Chunk addressing across dimension groups and LOD levels
//! - Page accessors with per-layer cache budgets and dirty-page write-back
//! - Subset, projected subset, sample and trace requests with nearest,
//!   linear, cubic, angular and triangular interpolation
//! - Exactly-once request completion reporting plus an idempotent status query
//! - Upload queue with retries and an error cursor
//!
//! # Example
//!
//! ```rust,no_run
//! use vds_access::{generate_noise_volume, Format, VolumeBuffer, VoxelBox};
//!
//! # async fn example() -> vds_access::Result<()> {
//! let vds = generate_noise_volume(64, 64, 64, Format::R32).await?;
//! let manager = vds.access_manager();
//! let dims = vds.layout().primary_dimensions();
//!
//! let slice = VoxelBox::new([0, 0, 10, 0, 0, 0], [64, 64, 11, 1, 1, 1]);
//! let buffer = VolumeBuffer::new(manager.volume_subset_buffer_size(&slice, Format::R32, 0, 0)?);
//! let request = manager.request_volume_subset(&buffer, dims, 0, 0, &slice, Format::R32, None)?;
//! if manager.wait_for_completion(request, None) {
//!     println!("first sample: {}", buffer.as_f32_vec()[0]);
//! }
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod buffer;
pub mod channel;
pub mod compression;
pub mod config;
pub mod data_block;
pub mod dimensions;
pub mod error;
pub mod generator;
pub mod io;
mod jobs;
pub mod layer;
pub mod layout;
pub mod metadata;
pub mod page;
pub mod page_accessor;
pub mod page_cache;
pub mod partition;
pub mod request;
pub mod sampler;
pub mod scheduler;
pub mod store;
pub mod types;
pub mod upload;
pub mod utils;
pub mod vds;

// Re-exports
pub use access::VolumeDataAccessManager;
pub use buffer::VolumeBuffer;
pub use channel::{ChannelDescriptor, ChannelFlags};
pub use compression::{CompressionMethod, Compressor};
pub use config::{AccessManagerConfig, CreateOptions};
pub use dimensions::DimensionsND;
pub use error::{Result, VdsError};
pub use generator::{generate_noise_volume, NoiseVolumeGenerator};
pub use io::{IOManager, OpenOptions, StorageBackend};
pub use layout::{BrickSize, LayoutDescriptor, VolumeDataLayout};
pub use metadata::{MetadataContainer, MetadataReadAccess, MetadataValue};
pub use page::PageHandle;
pub use page_accessor::VolumeDataPageAccessor;
pub use partition::ChunkExtent;
pub use request::{RequestId, RequestStatus};
pub use types::{
    AccessMode, AxisDescriptor, Components, Format, InterpolationMethod, ValueRange, VoxelBox,
    DIMENSIONALITY_MAX,
};
pub use upload::UploadError;
pub use vds::Vds;

/// Version of this crate
pub const VDS_ACCESS_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Magic number for VDS format
pub const VDS_MAGIC: &[u8; 4] = b"VDS\0";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VDS_ACCESS_VERSION.is_empty());
    }
}
