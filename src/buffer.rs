//! Output buffers filled by asynchronous requests

use crate::data_block::{read_element, write_element};
use crate::error::{Result, VdsError};
use crate::types::Format;
use ndarray::Array3;
use parking_lot::Mutex;
use std::sync::Arc;

/// Byte buffer shared between the caller and the request filling it.
/// Contents are only meaningful once the request has completed.
#[derive(Debug, Clone, Default)]
pub struct VolumeBuffer {
    data: Arc<Mutex<Vec<u8>>>,
}

impl VolumeBuffer {
    /// Zero-filled buffer of `len` bytes
    pub fn new(len: usize) -> Self {
        Self::from_vec(vec![0; len])
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(Mutex::new(data)),
        }
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Store already computed `(element index, value)` pairs in `format`
    pub(crate) fn write_elements(&self, format: Format, values: &[(usize, f64)]) {
        let mut data = self.data.lock();
        for &(index, value) in values {
            write_element(&mut data, format, index, value);
        }
    }

    /// Copy pre-encoded byte runs to their offsets
    pub(crate) fn copy_runs<'a>(&self, runs: impl IntoIterator<Item = (usize, &'a [u8])>) {
        let mut data = self.data.lock();
        for (offset, bytes) in runs {
            data[offset..offset + bytes.len()].copy_from_slice(bytes);
        }
    }

    /// Element `index` interpreted in `format`
    pub fn value(&self, format: Format, index: usize) -> Result<f64> {
        let data = self.data.lock();
        if format.byte_count(index + 1) > data.len() {
            return Err(VdsError::OutOfRange(format!(
                "Element {} is outside a buffer of {} bytes",
                index,
                data.len()
            )));
        }
        Ok(read_element(&data, format, index))
    }

    /// Contents as `f32` values, the layout of sample and trace requests
    pub fn as_f32_vec(&self) -> Vec<f32> {
        self.data
            .lock()
            .chunks_exact(4)
            .map(|raw| f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
            .collect()
    }

    pub fn as_f64_vec(&self) -> Vec<f64> {
        self.data
            .lock()
            .chunks_exact(8)
            .map(|raw| {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(raw);
                f64::from_le_bytes(bytes)
            })
            .collect()
    }

    /// View a subset result as a 3D array indexed `[dim2, dim1, dim0]`
    pub fn to_array3(&self, format: Format, size: [usize; 3]) -> Result<Array3<f64>> {
        let count = size.iter().product::<usize>();
        let data = self.data.lock();
        let required = format.byte_count(count);
        if data.len() < required {
            return Err(VdsError::BufferTooSmall {
                required,
                actual: data.len(),
            });
        }
        let values: Vec<f64> = (0..count).map(|index| read_element(&data, format, index)).collect();
        Array3::from_shape_vec((size[2], size[1], size[0]), values)
            .map_err(|e| VdsError::InvalidArgument(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_between_clones() {
        let buffer = VolumeBuffer::new(8);
        let writer = buffer.clone();
        writer.write_elements(Format::R32, &[(0, 1.5)]);
        assert_eq!(buffer.as_f32_vec(), vec![1.5, 0.0]);
        assert_eq!(buffer.value(Format::R32, 0).unwrap(), 1.5);
        assert!(buffer.value(Format::R32, 2).is_err());
    }

    #[test]
    fn test_copy_runs() {
        let buffer = VolumeBuffer::new(6);
        let runs: [(usize, &[u8]); 2] = [(0, &[1, 2]), (4, &[5, 6])];
        buffer.copy_runs(runs);
        assert_eq!(buffer.to_vec(), vec![1, 2, 0, 0, 5, 6]);
    }

    #[test]
    fn test_to_array3() {
        let buffer = VolumeBuffer::from_vec((0..24).collect());
        let array = buffer.to_array3(Format::U8, [4, 3, 2]).unwrap();
        assert_eq!(array.shape(), &[2, 3, 4]);
        assert_eq!(array[[1, 2, 3]], 23.0);
        assert_eq!(array[[0, 1, 0]], 4.0);
        assert!(buffer.to_array3(Format::U16, [4, 3, 2]).is_err());
    }
}
