//! Volume data layout - immutable description of dimensions, channels and bricking

use crate::channel::ChannelDescriptor;
use crate::dimensions::DimensionsND;
use crate::error::{Result, VdsError};
use crate::metadata::MetadataContainer;
use crate::types::{AxisDescriptor, Format, ValueRange, DIMENSIONALITY_MAX};
use serde::{Deserialize, Serialize};

/// Highest LOD level a layout may request
pub const LOD_LEVELS_MAX: u32 = 12;

/// Edge length of a brick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BrickSize {
    Size32,
    Size64,
    Size128,
    Size256,
    Size512,
    Size1024,
    Size2048,
    Size4096,
}

impl BrickSize {
    /// Edge length in voxels
    pub fn edge(&self) -> usize {
        match self {
            BrickSize::Size32 => 32,
            BrickSize::Size64 => 64,
            BrickSize::Size128 => 128,
            BrickSize::Size256 => 256,
            BrickSize::Size512 => 512,
            BrickSize::Size1024 => 1024,
            BrickSize::Size2048 => 2048,
            BrickSize::Size4096 => 4096,
        }
    }
}

impl Default for BrickSize {
    fn default() -> Self {
        BrickSize::Size64
    }
}

/// Bricking and LOD parameters of a layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutDescriptor {
    pub brick_size: BrickSize,
    /// Overlap voxels before each brick
    pub negative_margin: usize,
    /// Overlap voxels after each brick
    pub positive_margin: usize,
    /// Brick edge multiplier for 2D volumes
    pub brick_size_2d_multiplier: usize,
    /// Number of LOD levels above full resolution
    pub lod_levels: u32,
    pub create_2d_lods: bool,
    pub force_full_resolution_dimension: bool,
    /// Dimension kept at full resolution across LODs when forced
    pub full_resolution_dimension: usize,
}

impl Default for LayoutDescriptor {
    fn default() -> Self {
        Self {
            brick_size: BrickSize::default(),
            negative_margin: 0,
            positive_margin: 0,
            brick_size_2d_multiplier: 4,
            lod_levels: 0,
            create_2d_lods: false,
            force_full_resolution_dimension: false,
            full_resolution_dimension: 0,
        }
    }
}

impl LayoutDescriptor {
    pub fn new(brick_size: BrickSize) -> Self {
        Self {
            brick_size,
            ..Self::default()
        }
    }

    /// Set margins
    pub fn with_margins(mut self, negative_margin: usize, positive_margin: usize) -> Self {
        self.negative_margin = negative_margin;
        self.positive_margin = positive_margin;
        self
    }

    pub fn with_brick_size_2d_multiplier(mut self, multiplier: usize) -> Self {
        self.brick_size_2d_multiplier = multiplier;
        self
    }

    /// Set the number of LOD levels
    pub fn with_lod_levels(mut self, lod_levels: u32) -> Self {
        self.lod_levels = lod_levels;
        self
    }

    pub fn with_create_2d_lods(mut self, create_2d_lods: bool) -> Self {
        self.create_2d_lods = create_2d_lods;
        self
    }

    pub fn with_full_resolution_dimension(mut self, dimension: usize) -> Self {
        self.force_full_resolution_dimension = true;
        self.full_resolution_dimension = dimension;
        self
    }
}

/// Layout of a volume: axes, channels, bricking and metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeDataLayout {
    descriptor: LayoutDescriptor,
    axes: Vec<AxisDescriptor>,
    channels: Vec<ChannelDescriptor>,
    metadata: MetadataContainer,
}

impl VolumeDataLayout {
    /// Create a validated layout
    pub fn new(
        descriptor: LayoutDescriptor,
        axes: Vec<AxisDescriptor>,
        channels: Vec<ChannelDescriptor>,
        metadata: MetadataContainer,
    ) -> Result<Self> {
        let layout = Self {
            descriptor,
            axes,
            channels,
            metadata,
        };
        layout.validate()?;
        Ok(layout)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.axes.is_empty() || self.axes.len() > DIMENSIONALITY_MAX {
            return Err(VdsError::InvalidArgument(format!(
                "Dimensionality must be between 1 and {}, got {}",
                DIMENSIONALITY_MAX,
                self.axes.len()
            )));
        }
        if let Some(axis) = self.axes.iter().find(|axis| axis.num_samples == 0) {
            return Err(VdsError::InvalidArgument(format!(
                "Axis '{}' has no samples",
                axis.name
            )));
        }
        if self.channels.is_empty() {
            return Err(VdsError::InvalidArgument(
                "A volume needs at least one channel".to_string(),
            ));
        }
        for channel in &self.channels {
            channel.validate()?;
        }

        let descriptor = &self.descriptor;
        if descriptor.lod_levels > LOD_LEVELS_MAX {
            return Err(VdsError::InvalidArgument(format!(
                "LOD levels must be at most {}, got {}",
                LOD_LEVELS_MAX, descriptor.lod_levels
            )));
        }
        let edge = descriptor.brick_size.edge();
        if descriptor.negative_margin >= edge || descriptor.positive_margin >= edge {
            return Err(VdsError::InvalidArgument(
                "Margins must be smaller than the brick size".to_string(),
            ));
        }
        if !descriptor.brick_size_2d_multiplier.is_power_of_two() {
            return Err(VdsError::InvalidArgument(
                "2D brick size multiplier must be a power of two".to_string(),
            ));
        }
        if descriptor.force_full_resolution_dimension
            && descriptor.full_resolution_dimension >= self.dimensionality()
        {
            return Err(VdsError::InvalidArgument(format!(
                "Full resolution dimension {} is outside the volume",
                descriptor.full_resolution_dimension
            )));
        }
        Ok(())
    }

    pub fn descriptor(&self) -> &LayoutDescriptor {
        &self.descriptor
    }

    pub fn dimensionality(&self) -> usize {
        self.axes.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn lod_levels(&self) -> u32 {
        self.descriptor.lod_levels
    }

    pub fn metadata(&self) -> &MetadataContainer {
        &self.metadata
    }

    pub fn axes(&self) -> &[AxisDescriptor] {
        &self.axes
    }

    pub fn channels(&self) -> &[ChannelDescriptor] {
        &self.channels
    }

    pub fn axis(&self, dimension: usize) -> Result<&AxisDescriptor> {
        self.axes.get(dimension).ok_or_else(|| {
            VdsError::OutOfRange(format!(
                "Dimension {} is outside a {}D volume",
                dimension,
                self.dimensionality()
            ))
        })
    }

    pub fn dimension_num_samples(&self, dimension: usize) -> Result<usize> {
        Ok(self.axis(dimension)?.num_samples)
    }

    pub fn channel(&self, channel: usize) -> Result<&ChannelDescriptor> {
        self.channels.get(channel).ok_or_else(|| {
            VdsError::OutOfRange(format!(
                "Channel {} is outside a volume with {} channels",
                channel,
                self.channels.len()
            ))
        })
    }

    pub fn channel_format(&self, channel: usize) -> Result<Format> {
        Ok(self.channel(channel)?.format)
    }

    pub fn channel_value_range(&self, channel: usize) -> Result<ValueRange> {
        Ok(self.channel(channel)?.value_range)
    }

    /// Index of the channel with this name
    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.channels.iter().position(|channel| channel.name == name)
    }

    pub fn validate_lod(&self, lod: u32) -> Result<()> {
        if lod > self.descriptor.lod_levels {
            return Err(VdsError::OutOfRange(format!(
                "LOD {} requested, volume has {} LOD levels",
                lod, self.descriptor.lod_levels
            )));
        }
        Ok(())
    }

    /// Whether `dimension` keeps full resolution at every LOD
    pub fn is_full_resolution_dimension(&self, dimension: usize) -> bool {
        self.descriptor.force_full_resolution_dimension
            && self.descriptor.full_resolution_dimension == dimension
    }

    /// Sample count of a dimension at a LOD. Dimensions past the
    /// dimensionality have a single sample.
    pub fn num_samples_at_lod(&self, dimension: usize, lod: u32) -> usize {
        match self.axes.get(dimension) {
            Some(axis) if self.is_full_resolution_dimension(dimension) => axis.num_samples,
            Some(axis) => {
                let factor = 1usize << lod;
                axis.num_samples.div_ceil(factor)
            }
            None => 1,
        }
    }

    /// Dimension group whose layers hold the volume data
    pub fn primary_dimensions(&self) -> DimensionsND {
        if self.dimensionality() <= 2 {
            DimensionsND::Dimensions01
        } else {
            DimensionsND::Dimensions012
        }
    }

    /// Brick edge along the axes of the primary dimension group
    pub fn primary_brick_edge(&self) -> usize {
        let edge = self.descriptor.brick_size.edge();
        if self.dimensionality() <= 2 {
            edge * self.descriptor.brick_size_2d_multiplier
        } else {
            edge
        }
    }

    /// Get a summary string of the layout
    pub fn summary(&self) -> String {
        let size_str = self
            .axes
            .iter()
            .map(|axis| axis.num_samples.to_string())
            .collect::<Vec<_>>()
            .join(" x ");

        format!(
            "{}D volume: {}, {} channel(s), brick {} (+{}/-{}), {} LOD level(s)",
            self.dimensionality(),
            size_str,
            self.channels.len(),
            self.descriptor.brick_size.edge(),
            self.descriptor.positive_margin,
            self.descriptor.negative_margin,
            self.descriptor.lod_levels,
        )
    }
}
