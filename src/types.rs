//! Core data types for volume data access

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of dimensions a volume can have
pub const DIMENSIONALITY_MAX: usize = 6;

/// Sample formats a channel can be stored in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    /// 1-bit, bit-packed
    U1,
    /// Unsigned 8-bit integer
    U8,
    /// Unsigned 16-bit integer
    U16,
    /// Unsigned 32-bit integer
    U32,
    /// Unsigned 64-bit integer
    U64,
    /// 32-bit floating point
    R32,
    /// 64-bit floating point
    R64,
}

impl Format {
    /// Size in bytes of one element. `U1` reports 1 and is bit-packed by callers.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            Format::U1 | Format::U8 => 1,
            Format::U16 => 2,
            Format::U32 | Format::R32 => 4,
            Format::U64 | Format::R64 => 8,
        }
    }

    /// Check if this is a floating point format
    pub fn is_float(&self) -> bool {
        matches!(self, Format::R32 | Format::R64)
    }

    /// Check if this is an integer format
    pub fn is_integer(&self) -> bool {
        !self.is_float()
    }

    /// Largest raw value representable in this format
    pub fn max_raw_value(&self) -> f64 {
        match self {
            Format::U1 => 1.0,
            Format::U8 => u8::MAX as f64,
            Format::U16 => u16::MAX as f64,
            Format::U32 => u32::MAX as f64,
            Format::U64 => u64::MAX as f64,
            Format::R32 => f32::MAX as f64,
            Format::R64 => f64::MAX,
        }
    }

    /// Bytes needed to hold `count` elements of this format
    pub fn byte_count(&self, count: usize) -> usize {
        match self {
            Format::U1 => count.div_ceil(8),
            _ => count * self.size_in_bytes(),
        }
    }

    /// Code used for this format in serialized chunks
    pub(crate) fn storage_code(&self) -> u8 {
        match self {
            Format::U1 => 1,
            Format::U8 => 2,
            Format::U16 => 3,
            Format::R32 => 4,
            Format::U32 => 5,
            Format::R64 => 6,
            Format::U64 => 7,
        }
    }

    pub(crate) fn from_storage_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Format::U1),
            2 => Some(Format::U8),
            3 => Some(Format::U16),
            4 => Some(Format::R32),
            5 => Some(Format::U32),
            6 => Some(Format::R64),
            7 => Some(Format::U64),
            _ => None,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Number of components stored per voxel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Components {
    One,
    Two,
    Four,
}

impl Components {
    pub fn count(&self) -> usize {
        match self {
            Components::One => 1,
            Components::Two => 2,
            Components::Four => 4,
        }
    }

    pub fn from_count(count: usize) -> Option<Self> {
        match count {
            1 => Some(Components::One),
            2 => Some(Components::Two),
            4 => Some(Components::Four),
            _ => None,
        }
    }
}

/// How the values of a channel map onto the voxels of the volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolumeDataMapping {
    /// One value per voxel
    Direct,
    /// One set of values per trace
    PerTrace,
}

/// Interpolation used when sampling at fractional positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterpolationMethod {
    Nearest,
    Linear,
    Cubic,
    /// Linear interpolation that wraps around the channel value range
    Angular,
    /// Piecewise linear over triangles, for heightmap-like channels
    Triangular,
}

/// Access mode of a page accessor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
    Create,
}

impl AccessMode {
    pub fn is_writable(&self) -> bool {
        !matches!(self, AccessMode::ReadOnly)
    }
}

/// Axis descriptor with name, unit, and coordinate information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisDescriptor {
    /// Number of samples along this axis
    pub num_samples: usize,
    /// Name of the axis (e.g., "Inline", "Crossline", "Sample")
    pub name: String,
    /// Unit of measurement (e.g., "m", "ms", "ft")
    pub unit: String,
    /// Coordinate of the first sample
    pub coord_min: f64,
    /// Coordinate of the last sample
    pub coord_max: f64,
}

impl AxisDescriptor {
    /// Create a new axis descriptor
    pub fn new(
        num_samples: usize,
        name: impl Into<String>,
        unit: impl Into<String>,
        coord_min: f64,
        coord_max: f64,
    ) -> Self {
        Self {
            num_samples,
            name: name.into(),
            unit: unit.into(),
            coord_min,
            coord_max,
        }
    }

    /// Get the step size between samples
    pub fn step_size(&self) -> f64 {
        if self.num_samples <= 1 {
            0.0
        } else {
            (self.coord_max - self.coord_min) / (self.num_samples - 1) as f64
        }
    }

    /// Convert sample index to coordinate
    pub fn index_to_coord(&self, index: usize) -> f64 {
        self.coord_min + index as f64 * self.step_size()
    }

    /// Convert coordinate to sample index (nearest)
    pub fn coord_to_index(&self, coord: f64) -> usize {
        let step = self.step_size();
        if step == 0.0 {
            return 0;
        }
        let normalized = (coord - self.coord_min) / step;
        normalized
            .round()
            .max(0.0)
            .min((self.num_samples - 1) as f64) as usize
    }
}

/// Value range of a channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }
}

/// Half-open voxel box `[min, max)` over all six dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoxelBox {
    pub min: [i32; DIMENSIONALITY_MAX],
    pub max: [i32; DIMENSIONALITY_MAX],
}

impl VoxelBox {
    pub fn new(min: [i32; DIMENSIONALITY_MAX], max: [i32; DIMENSIONALITY_MAX]) -> Self {
        Self { min, max }
    }

    /// Extent along one dimension, zero for inverted ranges
    pub fn extent(&self, dim: usize) -> usize {
        (self.max[dim] - self.min[dim]).max(0) as usize
    }

    pub fn voxel_count(&self) -> usize {
        (0..DIMENSIONALITY_MAX).map(|dim| self.extent(dim)).product()
    }

    pub fn is_empty(&self) -> bool {
        self.voxel_count() == 0
    }

    pub fn contains(&self, position: &[i32; DIMENSIONALITY_MAX]) -> bool {
        (0..DIMENSIONALITY_MAX).all(|dim| position[dim] >= self.min[dim] && position[dim] < self.max[dim])
    }

    /// Intersection of two boxes, `None` when they do not overlap
    pub fn intersect(&self, other: &VoxelBox) -> Option<VoxelBox> {
        let mut result = *self;
        for dim in 0..DIMENSIONALITY_MAX {
            result.min[dim] = self.min[dim].max(other.min[dim]);
            result.max[dim] = self.max[dim].min(other.max[dim]);
            if result.min[dim] >= result.max[dim] {
                return None;
            }
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_sizes() {
        assert_eq!(Format::U8.size_in_bytes(), 1);
        assert_eq!(Format::U16.size_in_bytes(), 2);
        assert_eq!(Format::R32.size_in_bytes(), 4);
        assert_eq!(Format::R64.size_in_bytes(), 8);
        assert_eq!(Format::U1.byte_count(9), 2);
        assert_eq!(Format::U16.byte_count(9), 18);
    }

    #[test]
    fn test_storage_codes() {
        for format in [
            Format::U1,
            Format::U8,
            Format::U16,
            Format::U32,
            Format::U64,
            Format::R32,
            Format::R64,
        ] {
            assert_eq!(Format::from_storage_code(format.storage_code()), Some(format));
        }
        assert_eq!(Format::from_storage_code(0), None);
    }

    #[test]
    fn test_axis_descriptor() {
        let axis = AxisDescriptor::new(101, "Depth", "m", 0.0, 1000.0);
        assert_eq!(axis.step_size(), 10.0);
        assert_eq!(axis.index_to_coord(0), 0.0);
        assert_eq!(axis.index_to_coord(100), 1000.0);
        assert_eq!(axis.coord_to_index(500.0), 50);
        assert_eq!(AxisDescriptor::new(1, "Flat", "", 5.0, 5.0).coord_to_index(7.0), 0);
    }

    #[test]
    fn test_voxel_box_intersection() {
        let a = VoxelBox::new([0, 0, 0, 0, 0, 0], [10, 10, 10, 1, 1, 1]);
        let b = VoxelBox::new([5, 8, 0, 0, 0, 0], [20, 20, 3, 1, 1, 1]);
        let i = a.intersect(&b).unwrap();
        assert_eq!(i.min, [5, 8, 0, 0, 0, 0]);
        assert_eq!(i.max, [10, 10, 3, 1, 1, 1]);
        assert_eq!(i.voxel_count(), 5 * 2 * 3);

        let c = VoxelBox::new([10, 0, 0, 0, 0, 0], [12, 1, 1, 1, 1, 1]);
        assert!(a.intersect(&c).is_none());
    }
}
