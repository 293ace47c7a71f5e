//! Data blocks - typed, N-dimensional sample storage for one brick

use crate::error::{Result, VdsError};
use crate::types::{Components, Format, DIMENSIONALITY_MAX};
use num_traits::{Bounded, NumCast, ToPrimitive};

/// Round and saturate a value into an integer type
fn to_integer<T: NumCast + Bounded + ToPrimitive>(value: f64) -> T {
    if value.is_nan() {
        return T::min_value();
    }
    let min = T::min_value().to_f64().unwrap_or(0.0);
    let max = T::max_value().to_f64().unwrap_or(f64::MAX);
    T::from(value.round().clamp(min, max)).unwrap_or_else(T::max_value)
}

/// Read element `index` of a little-endian buffer in `format`
pub(crate) fn read_element(bytes: &[u8], format: Format, index: usize) -> f64 {
    let size = format.size_in_bytes();
    match format {
        Format::U1 => ((bytes[index / 8] >> (index % 8)) & 1) as f64,
        Format::U8 => bytes[index] as f64,
        Format::U16 => {
            let offset = index * size;
            u16::from_le_bytes([bytes[offset], bytes[offset + 1]]) as f64
        }
        Format::U32 => {
            let offset = index * size;
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[offset..offset + 4]);
            u32::from_le_bytes(raw) as f64
        }
        Format::U64 => {
            let offset = index * size;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[offset..offset + 8]);
            u64::from_le_bytes(raw) as f64
        }
        Format::R32 => {
            let offset = index * size;
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[offset..offset + 4]);
            f32::from_le_bytes(raw) as f64
        }
        Format::R64 => {
            let offset = index * size;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[offset..offset + 8]);
            f64::from_le_bytes(raw)
        }
    }
}

/// Write element `index` of a little-endian buffer in `format`.
/// Integer formats round and saturate.
pub(crate) fn write_element(bytes: &mut [u8], format: Format, index: usize, value: f64) {
    let offset = index * format.size_in_bytes();
    match format {
        Format::U1 => {
            let mask = 1u8 << (index % 8);
            if value != 0.0 && !value.is_nan() {
                bytes[index / 8] |= mask;
            } else {
                bytes[index / 8] &= !mask;
            }
        }
        Format::U8 => bytes[index] = to_integer::<u8>(value),
        Format::U16 => bytes[offset..offset + 2].copy_from_slice(&to_integer::<u16>(value).to_le_bytes()),
        Format::U32 => bytes[offset..offset + 4].copy_from_slice(&to_integer::<u32>(value).to_le_bytes()),
        Format::U64 => bytes[offset..offset + 8].copy_from_slice(&to_integer::<u64>(value).to_le_bytes()),
        Format::R32 => bytes[offset..offset + 4].copy_from_slice(&(value as f32).to_le_bytes()),
        Format::R64 => bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes()),
    }
}

/// Decoded samples of one brick, dimension 0 varying fastest
#[derive(Debug, Clone, PartialEq)]
pub struct DataBlock {
    format: Format,
    components: Components,
    size: [usize; DIMENSIONALITY_MAX],
    pitch: [usize; DIMENSIONALITY_MAX],
    data: Vec<u8>,
}

impl DataBlock {
    /// Allocate a zeroed block
    pub fn new(format: Format, components: Components, size: [usize; DIMENSIONALITY_MAX]) -> Self {
        let pitch = Self::pitch_for(&size);
        let voxels: usize = size.iter().product();
        let data = vec![0u8; format.byte_count(voxels * components.count())];
        Self {
            format,
            components,
            size,
            pitch,
            data,
        }
    }

    /// Wrap decoded bytes, checking their length against the geometry
    pub fn from_bytes(
        format: Format,
        components: Components,
        size: [usize; DIMENSIONALITY_MAX],
        data: Vec<u8>,
    ) -> Result<Self> {
        let voxels: usize = size.iter().product();
        let expected = format.byte_count(voxels * components.count());
        if data.len() != expected {
            return Err(VdsError::InvalidFormat(format!(
                "Data block holds {} bytes, geometry needs {}",
                data.len(),
                expected
            )));
        }
        Ok(Self {
            format,
            components,
            size,
            pitch: Self::pitch_for(&size),
            data,
        })
    }

    fn pitch_for(size: &[usize; DIMENSIONALITY_MAX]) -> [usize; DIMENSIONALITY_MAX] {
        let mut pitch = [1usize; DIMENSIONALITY_MAX];
        for dim in 1..DIMENSIONALITY_MAX {
            pitch[dim] = pitch[dim - 1] * size[dim - 1];
        }
        pitch
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn components(&self) -> Components {
        self.components
    }

    pub fn size(&self) -> [usize; DIMENSIONALITY_MAX] {
        self.size
    }

    pub fn voxel_count(&self) -> usize {
        self.size.iter().product()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Linear voxel index of a block-local position
    pub fn voxel_index(&self, local: &[usize; DIMENSIONALITY_MAX]) -> usize {
        (0..DIMENSIONALITY_MAX).map(|dim| local[dim] * self.pitch[dim]).sum()
    }

    /// Stored value of one component of a voxel
    pub fn get(&self, voxel: usize, component: usize) -> f64 {
        read_element(
            &self.data,
            self.format,
            voxel * self.components.count() + component,
        )
    }

    pub fn set(&mut self, voxel: usize, component: usize, value: f64) {
        let index = voxel * self.components.count() + component;
        write_element(&mut self.data, self.format, index, value);
    }

    /// Set every component of every voxel to `value`
    pub fn fill(&mut self, value: f64) {
        let count = self.voxel_count() * self.components.count();
        match self.format {
            Format::U1 => {
                let byte = if value != 0.0 && !value.is_nan() { 0xFF } else { 0 };
                self.data.iter_mut().for_each(|b| *b = byte);
            }
            _ if value == 0.0 => self.data.iter_mut().for_each(|b| *b = 0),
            _ => {
                for index in 0..count {
                    write_element(&mut self.data, self.format, index, value);
                }
            }
        }
    }
}
