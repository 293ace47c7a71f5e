//! Chunk addressing - maps voxel positions and chunk indices to brick extents
//!
//! Chunk indices enumerate bricks with dimension 0 varying fastest. Extents
//! are half-open and expressed in voxel coordinates of the partition's LOD.

use crate::channel::ChannelDescriptor;
use crate::dimensions::DimensionsND;
use crate::error::{Result, VdsError};
use crate::layout::VolumeDataLayout;
use crate::types::{VolumeDataMapping, VoxelBox, DIMENSIONALITY_MAX};

/// Voxel extent of one chunk, with and without its margin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkExtent {
    pub min_including_margin: [i32; DIMENSIONALITY_MAX],
    pub max_including_margin: [i32; DIMENSIONALITY_MAX],
    pub min_excluding_margin: [i32; DIMENSIONALITY_MAX],
    pub max_excluding_margin: [i32; DIMENSIONALITY_MAX],
}

impl ChunkExtent {
    /// Voxel counts of the allocated brick, margin included
    pub fn allocated_size(&self) -> [usize; DIMENSIONALITY_MAX] {
        std::array::from_fn(|dim| {
            (self.max_including_margin[dim] - self.min_including_margin[dim]) as usize
        })
    }

    pub fn including_margin(&self) -> VoxelBox {
        VoxelBox::new(self.min_including_margin, self.max_including_margin)
    }

    pub fn excluding_margin(&self) -> VoxelBox {
        VoxelBox::new(self.min_excluding_margin, self.max_excluding_margin)
    }
}

/// Partition of one layer (dimension group, LOD, channel) into chunks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeDataPartition {
    lod: u32,
    num_samples: [usize; DIMENSIONALITY_MAX],
    brick_size: [usize; DIMENSIONALITY_MAX],
    negative_margin: [usize; DIMENSIONALITY_MAX],
    positive_margin: [usize; DIMENSIONALITY_MAX],
    lod_factor: [usize; DIMENSIONALITY_MAX],
    chunks_in_dimension: [usize; DIMENSIONALITY_MAX],
    pitch: [i64; DIMENSIONALITY_MAX],
    chunk_count: i64,
}

impl VolumeDataPartition {
    pub fn new(
        layout: &VolumeDataLayout,
        dimensions: DimensionsND,
        lod: u32,
        channel: &ChannelDescriptor,
    ) -> Self {
        let descriptor = layout.descriptor();
        let dimensionality = layout.dimensionality();
        let mut edge = descriptor.brick_size.edge();
        if dimensions.dimension_count() == 2 {
            edge *= descriptor.brick_size_2d_multiplier;
        }
        let per_trace = channel.mapping == VolumeDataMapping::PerTrace;

        let mut num_samples = [1usize; DIMENSIONALITY_MAX];
        let mut brick_size = [1usize; DIMENSIONALITY_MAX];
        let mut negative_margin = [0usize; DIMENSIONALITY_MAX];
        let mut positive_margin = [0usize; DIMENSIONALITY_MAX];
        let mut lod_factor = [1usize; DIMENSIONALITY_MAX];

        for dim in 0..DIMENSIONALITY_MAX {
            num_samples[dim] = layout.num_samples_at_lod(dim, lod);
            if dim < dimensionality && !layout.is_full_resolution_dimension(dim) {
                lod_factor[dim] = 1 << lod;
            }
            if dim < dimensionality && dimensions.contains(dim) {
                brick_size[dim] = edge;
                if !per_trace {
                    negative_margin[dim] = descriptor.negative_margin;
                    positive_margin[dim] = descriptor.positive_margin;
                }
            }
        }

        if per_trace {
            num_samples[0] = channel.mapped_value_count;
            brick_size[0] = channel.mapped_value_count;
            lod_factor[0] = 1;
        }

        let mut chunks_in_dimension = [1usize; DIMENSIONALITY_MAX];
        let mut pitch = [1i64; DIMENSIONALITY_MAX];
        let mut chunk_count = 1i64;
        for dim in 0..DIMENSIONALITY_MAX {
            chunks_in_dimension[dim] = num_samples[dim].div_ceil(brick_size[dim]);
            pitch[dim] = chunk_count;
            chunk_count *= chunks_in_dimension[dim] as i64;
        }

        Self {
            lod,
            num_samples,
            brick_size,
            negative_margin,
            positive_margin,
            lod_factor,
            chunks_in_dimension,
            pitch,
            chunk_count,
        }
    }

    pub fn lod(&self) -> u32 {
        self.lod
    }

    pub fn chunk_count(&self) -> i64 {
        self.chunk_count
    }

    pub fn num_samples(&self, dim: usize) -> usize {
        self.num_samples[dim]
    }

    pub fn brick_size(&self, dim: usize) -> usize {
        self.brick_size[dim]
    }

    pub fn chunks_in_dimension(&self, dim: usize) -> usize {
        self.chunks_in_dimension[dim]
    }

    /// The whole layer as a voxel box
    pub fn bounds(&self) -> VoxelBox {
        VoxelBox::new([0; DIMENSIONALITY_MAX], self.num_samples.map(|n| n as i32))
    }

    pub fn check_chunk_index(&self, chunk: i64) -> Result<()> {
        if chunk < 0 || chunk >= self.chunk_count {
            return Err(VdsError::OutOfRange(format!(
                "Chunk index {} outside [0, {})",
                chunk, self.chunk_count
            )));
        }
        Ok(())
    }

    /// Per-dimension brick coordinates of a chunk
    pub fn index_array(&self, chunk: i64) -> [usize; DIMENSIONALITY_MAX] {
        std::array::from_fn(|dim| {
            ((chunk / self.pitch[dim]) % self.chunks_in_dimension[dim] as i64) as usize
        })
    }

    pub fn chunk_index_from_index_array(&self, index_array: &[usize; DIMENSIONALITY_MAX]) -> i64 {
        (0..DIMENSIONALITY_MAX)
            .map(|dim| index_array[dim] as i64 * self.pitch[dim])
            .sum()
    }

    /// Chunk containing a voxel. Positions outside the layer are clamped.
    pub fn chunk_index_from_position(&self, position: &[i32; DIMENSIONALITY_MAX]) -> i64 {
        let index_array = std::array::from_fn(|dim| {
            let clamped = position[dim].clamp(0, self.num_samples[dim] as i32 - 1) as usize;
            clamped / self.brick_size[dim]
        });
        self.chunk_index_from_index_array(&index_array)
    }

    pub fn is_position_inside(&self, position: &[i32; DIMENSIONALITY_MAX]) -> bool {
        self.bounds().contains(position)
    }

    /// Extent of a chunk. Margins are clipped to the layer bounds.
    pub fn chunk_extent(&self, chunk: i64) -> ChunkExtent {
        let index_array = self.index_array(chunk);
        let mut extent = ChunkExtent {
            min_including_margin: [0; DIMENSIONALITY_MAX],
            max_including_margin: [1; DIMENSIONALITY_MAX],
            min_excluding_margin: [0; DIMENSIONALITY_MAX],
            max_excluding_margin: [1; DIMENSIONALITY_MAX],
        };
        for dim in 0..DIMENSIONALITY_MAX {
            let n = self.num_samples[dim];
            let min = index_array[dim] * self.brick_size[dim];
            let max = (min + self.brick_size[dim]).min(n);
            extent.min_excluding_margin[dim] = min as i32;
            extent.max_excluding_margin[dim] = max as i32;
            extent.min_including_margin[dim] = min.saturating_sub(self.negative_margin[dim]) as i32;
            extent.max_including_margin[dim] = (max + self.positive_margin[dim]).min(n) as i32;
        }
        extent
    }

    /// Chunks whose margin-free extent overlaps `voxels`, in index order
    pub fn chunks_overlapping(&self, voxels: &VoxelBox) -> Vec<i64> {
        let Some(clipped) = voxels.intersect(&self.bounds()) else {
            return Vec::new();
        };
        let first: [usize; DIMENSIONALITY_MAX] =
            std::array::from_fn(|dim| clipped.min[dim] as usize / self.brick_size[dim]);
        let last: [usize; DIMENSIONALITY_MAX] =
            std::array::from_fn(|dim| (clipped.max[dim] as usize - 1) / self.brick_size[dim]);

        let mut chunks = Vec::new();
        let mut current = first;
        loop {
            chunks.push(self.chunk_index_from_index_array(&current));

            let mut dim = 0;
            loop {
                if dim == DIMENSIONALITY_MAX {
                    return chunks;
                }
                current[dim] += 1;
                if current[dim] <= last[dim] {
                    break;
                }
                current[dim] = first[dim];
                dim += 1;
            }
        }
    }

    /// Chunk of the coarser `parent` partition covering this chunk
    pub fn parent_chunk_index(&self, parent: &VolumeDataPartition, chunk: i64) -> Result<i64> {
        if parent.lod != self.lod + 1 {
            return Err(VdsError::InvalidArgument(format!(
                "LOD {} is not the parent of LOD {}",
                parent.lod, self.lod
            )));
        }
        let extent = self.chunk_extent(chunk);
        let position = std::array::from_fn(|dim| {
            let ratio = (parent.lod_factor[dim] / self.lod_factor[dim]) as i32;
            extent.min_excluding_margin[dim] / ratio
        });
        Ok(parent.chunk_index_from_position(&position))
    }

    /// Chunks of the finer `child` partition covered by this chunk
    pub fn child_chunk_indices(&self, child: &VolumeDataPartition, chunk: i64) -> Result<Vec<i64>> {
        if child.lod + 1 != self.lod {
            return Err(VdsError::InvalidArgument(format!(
                "LOD {} is not a child of LOD {}",
                child.lod, self.lod
            )));
        }
        let extent = self.chunk_extent(chunk);
        let mut voxels = extent.excluding_margin();
        for dim in 0..DIMENSIONALITY_MAX {
            let ratio = (self.lod_factor[dim] / child.lod_factor[dim]) as i32;
            voxels.min[dim] *= ratio;
            voxels.max[dim] *= ratio;
        }
        Ok(child.chunks_overlapping(&voxels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{BrickSize, LayoutDescriptor};
    use crate::metadata::MetadataContainer;
    use crate::types::{AxisDescriptor, Format, ValueRange};

    fn layout(samples: [usize; 3], lod_levels: u32) -> VolumeDataLayout {
        VolumeDataLayout::new(
            LayoutDescriptor::new(BrickSize::Size32)
                .with_margins(4, 4)
                .with_lod_levels(lod_levels),
            vec![
                AxisDescriptor::new(samples[0], "Sample", "ms", 0.0, 1.0),
                AxisDescriptor::new(samples[1], "Crossline", "", 0.0, 1.0),
                AxisDescriptor::new(samples[2], "Inline", "", 0.0, 1.0),
            ],
            vec![ChannelDescriptor::new(
                Format::R32,
                "Amplitude",
                "",
                ValueRange::new(-1.0, 1.0),
            )],
            MetadataContainer::new(),
        )
        .unwrap()
    }

    fn partition(layout: &VolumeDataLayout, lod: u32) -> VolumeDataPartition {
        VolumeDataPartition::new(
            layout,
            DimensionsND::Dimensions012,
            lod,
            layout.channel(0).unwrap(),
        )
    }

    #[test]
    fn test_chunk_counts() {
        let layout = layout([100, 64, 33], 1);
        let p = partition(&layout, 0);
        assert_eq!(p.chunks_in_dimension(0), 4);
        assert_eq!(p.chunks_in_dimension(1), 2);
        assert_eq!(p.chunks_in_dimension(2), 2);
        assert_eq!(p.chunk_count(), 16);

        let p1 = partition(&layout, 1);
        assert_eq!(p1.num_samples(0), 50);
        assert_eq!(p1.num_samples(2), 17);
        assert_eq!(p1.chunk_count(), 2);
    }

    #[test]
    fn test_position_and_index_are_consistent() {
        let layout = layout([100, 64, 33], 0);
        let p = partition(&layout, 0);
        for chunk in 0..p.chunk_count() {
            let extent = p.chunk_extent(chunk);
            assert_eq!(p.chunk_index_from_position(&extent.min_excluding_margin), chunk);
            let last = extent.max_excluding_margin.map(|v| v - 1);
            assert_eq!(p.chunk_index_from_position(&last), chunk);
            assert_eq!(p.chunk_index_from_index_array(&p.index_array(chunk)), chunk);
        }
    }

    #[test]
    fn test_dimension_zero_is_fastest() {
        let layout = layout([100, 64, 33], 0);
        let p = partition(&layout, 0);
        assert_eq!(p.chunk_index_from_position(&[32, 0, 0, 0, 0, 0]), 1);
        assert_eq!(p.chunk_index_from_position(&[0, 32, 0, 0, 0, 0]), 4);
        assert_eq!(p.chunk_index_from_position(&[0, 0, 32, 0, 0, 0]), 8);
        assert_eq!(p.chunk_index_from_position(&[-5, 1000, 0, 0, 0, 0]), 4);
    }

    #[test]
    fn test_extent_margins() {
        let layout = layout([100, 64, 33], 0);
        let p = partition(&layout, 0);

        let first = p.chunk_extent(0);
        assert_eq!(first.min_excluding_margin, [0, 0, 0, 0, 0, 0]);
        assert_eq!(first.max_excluding_margin, [32, 32, 32, 1, 1, 1]);
        assert_eq!(first.min_including_margin, [0, 0, 0, 0, 0, 0]);
        assert_eq!(first.max_including_margin, [36, 36, 33, 1, 1, 1]);

        let last = p.chunk_extent(p.chunk_count() - 1);
        assert_eq!(last.min_excluding_margin, [96, 32, 32, 0, 0, 0]);
        assert_eq!(last.max_excluding_margin, [100, 64, 33, 1, 1, 1]);
        assert_eq!(last.min_including_margin, [92, 28, 28, 0, 0, 0]);
        assert_eq!(last.allocated_size(), [8, 36, 5, 1, 1, 1]);
    }

    #[test]
    fn test_lod_margins_are_not_scaled() {
        let layout = layout([256, 256, 256], 2);
        let p2 = partition(&layout, 2);
        assert_eq!(p2.num_samples(0), 64);
        let extent = p2.chunk_extent(1);
        assert_eq!(extent.min_excluding_margin[0], 32);
        assert_eq!(extent.min_including_margin[0], 28);
    }

    #[test]
    fn test_chunks_overlapping() {
        let layout = layout([100, 64, 33], 0);
        let p = partition(&layout, 0);
        let slice = VoxelBox::new([0, 0, 0, 0, 0, 0], [100, 64, 1, 1, 1, 1]);
        assert_eq!(p.chunks_overlapping(&slice), vec![0, 1, 2, 3, 4, 5, 6, 7]);

        let corner = VoxelBox::new([31, 31, 31, 0, 0, 0], [33, 33, 33, 1, 1, 1]);
        assert_eq!(p.chunks_overlapping(&corner).len(), 8);

        let outside = VoxelBox::new([200, 0, 0, 0, 0, 0], [300, 1, 1, 1, 1, 1]);
        assert!(p.chunks_overlapping(&outside).is_empty());
    }

    #[test]
    fn test_parent_and_children() {
        let layout = layout([128, 128, 64], 1);
        let p0 = partition(&layout, 0);
        let p1 = partition(&layout, 1);

        let chunk = p0.chunk_index_from_position(&[100, 40, 10, 0, 0, 0]);
        let parent = p0.parent_chunk_index(&p1, chunk).unwrap();
        assert_eq!(parent, p1.chunk_index_from_position(&[50, 20, 5, 0, 0, 0]));

        let children = p1.child_chunk_indices(&p0, parent).unwrap();
        assert_eq!(children.len(), 8);
        assert!(children.contains(&chunk));
        for child in children {
            assert_eq!(p0.parent_chunk_index(&p1, child).unwrap(), parent);
        }

        assert!(p0.parent_chunk_index(&p0, chunk).is_err());
        assert!(p0.child_chunk_indices(&p1, chunk).is_err());
    }

    #[test]
    fn test_per_trace_partition() {
        let layout = layout([100, 64, 33], 0);
        let channel = ChannelDescriptor::new(Format::R32, "Offsets", "", ValueRange::new(0.0, 1.0))
            .with_per_trace_mapping(5);
        let p = VolumeDataPartition::new(&layout, DimensionsND::Dimensions012, 0, &channel);
        assert_eq!(p.num_samples(0), 5);
        assert_eq!(p.chunks_in_dimension(0), 1);
        assert_eq!(p.chunk_count(), 4);
        let extent = p.chunk_extent(3);
        assert_eq!(extent.min_including_margin, [0, 32, 32, 0, 0, 0]);
        assert_eq!(extent.max_including_margin, [5, 64, 33, 1, 1, 1]);
    }
}
