//! Chunk jobs behind the request kinds of the access manager

use crate::buffer::VolumeBuffer;
use crate::channel::{scale_offset_for_format, ChannelDescriptor};
use crate::data_block::{write_element, DataBlock};
use crate::error::Result;
use crate::layer::VolumeDataLayer;
use crate::page::{Page, PageHandle};
use crate::partition::ChunkExtent;
use crate::sampler::{VolumeSampler, VoxelSource};
use crate::scheduler::ChunkJob;
use crate::types::{Format, InterpolationMethod, VoxelBox, DIMENSIONALITY_MAX};
use parking_lot::RwLockReadGuard;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Visit every position of a box, dimension 0 fastest
pub(crate) fn for_each_position(voxels: &VoxelBox, mut visit: impl FnMut(&[i32; DIMENSIONALITY_MAX])) {
    if voxels.is_empty() {
        return;
    }
    let mut position = voxels.min;
    loop {
        visit(&position);
        let mut dim = 0;
        loop {
            position[dim] += 1;
            if position[dim] < voxels.max[dim] {
                break;
            }
            position[dim] = voxels.min[dim];
            dim += 1;
            if dim == DIMENSIONALITY_MAX {
                return;
            }
        }
    }
}

/// Converts channel values to the element format of an output buffer
#[derive(Debug, Clone)]
pub(crate) struct OutputConverter {
    channel: ChannelDescriptor,
    format: Format,
    replacement: Option<f64>,
    scale: f64,
    offset: f64,
}

impl OutputConverter {
    pub(crate) fn new(channel: &ChannelDescriptor, format: Format, replacement: Option<f32>) -> Self {
        let (scale, offset) = scale_offset_for_format(format, channel.value_range, false);
        Self {
            channel: channel.clone(),
            format,
            replacement: replacement.map(f64::from),
            scale,
            offset,
        }
    }

    pub(crate) fn format(&self) -> Format {
        self.format
    }

    /// Stored values can be copied without conversion
    fn is_raw_copy(&self) -> bool {
        self.format == self.channel.format && self.replacement.is_none()
    }

    /// Value written for NoValue
    fn no_value(&self) -> f64 {
        self.replacement
            .or(self.channel.no_value.map(f64::from))
            .unwrap_or(f64::NAN)
    }

    /// Element value for a real value, `None` meaning NoValue
    pub(crate) fn from_real(&self, real: Option<f64>) -> f64 {
        let real = real.unwrap_or_else(|| self.no_value());
        if self.format == self.channel.format {
            return self.channel.from_real(real);
        }
        match self.format {
            Format::R32 | Format::R64 => real,
            Format::U1 => {
                if real != 0.0 && !real.is_nan() {
                    1.0
                } else {
                    0.0
                }
            }
            _ => ((real - self.offset) / self.scale).round(),
        }
    }

    /// Element value for a stored value of the channel
    pub(crate) fn from_raw(&self, raw: f64) -> f64 {
        if self.is_raw_copy() {
            return raw;
        }
        if self.channel.is_no_value_raw(raw) {
            self.from_real(None)
        } else {
            self.from_real(Some(self.channel.to_real(raw)))
        }
    }
}

/// Copies the part of each chunk inside the requested box
pub(crate) struct SubsetJob {
    buffer: VolumeBuffer,
    voxels: VoxelBox,
    converter: OutputConverter,
    components: usize,
}

impl SubsetJob {
    pub(crate) fn new(buffer: VolumeBuffer, voxels: VoxelBox, converter: OutputConverter, components: usize) -> Self {
        Self {
            buffer,
            voxels,
            converter,
            components,
        }
    }

    fn output_index(&self, position: &[i32; DIMENSIONALITY_MAX]) -> usize {
        let mut index = 0;
        let mut pitch = 1;
        for dim in 0..DIMENSIONALITY_MAX {
            index += (position[dim] - self.voxels.min[dim]) as usize * pitch;
            pitch *= self.voxels.extent(dim);
        }
        index
    }
}

impl ChunkJob for SubsetJob {
    fn process_chunk(&self, page: PageHandle, _neighbours: &[PageHandle]) -> Result<()> {
        let Some(overlap) = self.voxels.intersect(&page.extent().excluding_margin()) else {
            return Ok(());
        };
        let format = self.converter.format();
        let block = page.read();
        let extent = page.extent();

        if format == Format::U1 {
            let mut values = Vec::with_capacity(overlap.voxel_count() * self.components);
            for_each_position(&overlap, |position| {
                let output = self.output_index(position) * self.components;
                for component in 0..self.components {
                    let raw = Page::raw_value(&block, extent, position, component);
                    values.push((output + component, self.converter.from_raw(raw)));
                }
            });
            drop(block);
            self.buffer.write_elements(format, &values);
            return Ok(());
        }

        // Encode outside the buffer lock, one run of bytes per row along dimension 0
        let mut scratch = vec![0u8; format.byte_count(overlap.voxel_count() * self.components)];
        let mut row_starts = Vec::new();
        let mut written = 0;
        for_each_position(&overlap, |position| {
            if position[0] == overlap.min[0] {
                row_starts.push(self.output_index(position) * self.components);
            }
            for component in 0..self.components {
                let raw = Page::raw_value(&block, extent, position, component);
                write_element(&mut scratch, format, written, self.converter.from_raw(raw));
                written += 1;
            }
        });
        drop(block);

        let row_bytes = format.byte_count(overlap.extent(0) * self.components);
        self.buffer.copy_runs(
            row_starts
                .iter()
                .zip(scratch.chunks_exact(row_bytes))
                .map(|(&start, bytes)| (format.byte_count(start), bytes)),
        );
        Ok(())
    }
}

/// Stored values of one chunk and the neighbours pinned with it
struct ChunkSource<'a> {
    primary: (RwLockReadGuard<'a, DataBlock>, &'a ChunkExtent, VoxelBox),
    neighbours: Vec<(RwLockReadGuard<'a, DataBlock>, &'a ChunkExtent, VoxelBox)>,
}

impl<'a> ChunkSource<'a> {
    fn new(page: &'a PageHandle, neighbours: &'a [PageHandle]) -> Self {
        let pinned = |page: &'a PageHandle| (page.read(), page.extent(), page.extent().excluding_margin());
        Self {
            primary: pinned(page),
            neighbours: neighbours.iter().map(pinned).collect(),
        }
    }
}

impl VoxelSource for ChunkSource<'_> {
    fn raw_value(&self, position: &[i32; DIMENSIONALITY_MAX]) -> f64 {
        std::iter::once(&self.primary)
            .chain(&self.neighbours)
            .find(|(_, _, interior)| interior.contains(position))
            .map(|(block, extent, _)| Page::raw_value(block, extent, position, 0))
            .unwrap_or(f64::NAN)
    }
}

/// How interpolated values are written
#[derive(Debug, Clone)]
pub(crate) enum PointWriter {
    /// `f32` elements, NoValue written as the given value
    Float(f32),
    /// Elements of the converter's format
    Converted(OutputConverter),
}

impl PointWriter {
    /// `f32` output honoring the replacement, then the channel NoValue
    pub(crate) fn float(channel: &ChannelDescriptor, replacement: Option<f32>) -> Self {
        PointWriter::Float(replacement.or(channel.no_value).unwrap_or(f32::NAN))
    }

    fn format(&self) -> Format {
        match self {
            PointWriter::Float(_) => Format::R32,
            PointWriter::Converted(converter) => converter.format(),
        }
    }

    fn element(&self, value: Option<f64>) -> f64 {
        match self {
            PointWriter::Float(no_value) => value.map(|value| value as f32).unwrap_or(*no_value) as f64,
            PointWriter::Converted(converter) => converter.from_real(value),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SamplePoint {
    position: [f32; DIMENSIONALITY_MAX],
    output: usize,
}

/// Points whose nearest voxel lies in one chunk, and the other chunks their taps reach
#[derive(Debug, Default)]
struct ChunkPoints {
    points: Vec<SamplePoint>,
    neighbours: BTreeSet<i64>,
}

/// Interpolates positions chunk by chunk. Each position is handled with the
/// chunk holding its nearest voxel; taps outside it come from neighbours
/// pinned only while that chunk is processed.
pub(crate) struct SampleJob {
    layer: Arc<VolumeDataLayer>,
    method: InterpolationMethod,
    num_samples: [usize; DIMENSIONALITY_MAX],
    buffer: VolumeBuffer,
    writer: PointWriter,
    chunks: BTreeMap<i64, ChunkPoints>,
    off_volume: Vec<usize>,
}

impl SampleJob {
    /// Job over `(output element, position)` pairs; `None` positions are written as NoValue
    fn new(
        layer: Arc<VolumeDataLayer>,
        method: InterpolationMethod,
        buffer: VolumeBuffer,
        writer: PointWriter,
        points: impl IntoIterator<Item = (usize, Option<[f32; DIMENSIONALITY_MAX]>)>,
    ) -> Self {
        let partition = layer.partition();
        let num_samples: [usize; DIMENSIONALITY_MAX] = std::array::from_fn(|dim| partition.num_samples(dim));
        let sampler = VolumeSampler::new(layer.channel(), method, layer.key().dimensions.axes(), num_samples);

        let mut chunks: BTreeMap<i64, ChunkPoints> = BTreeMap::new();
        let mut interiors: HashMap<i64, VoxelBox> = HashMap::new();
        let mut off_volume = Vec::new();
        for (output, position) in points {
            let Some(position) = position else {
                off_volume.push(output);
                continue;
            };
            let chunk = partition.chunk_index_from_position(&sampler.nearest(&position));
            let interior = *interiors
                .entry(chunk)
                .or_insert_with(|| partition.chunk_extent(chunk).excluding_margin());
            let (min, max) = sampler.footprint(&position);
            let footprint = VoxelBox::new(min, max);
            let entry = chunks.entry(chunk).or_default();
            if interior.intersect(&footprint) != Some(footprint) {
                entry.neighbours.extend(
                    partition
                        .chunks_overlapping(&footprint)
                        .into_iter()
                        .filter(|&neighbour| neighbour != chunk),
                );
            }
            entry.points.push(SamplePoint { position, output });
        }

        Self {
            layer,
            method,
            num_samples,
            buffer,
            writer,
            chunks,
            off_volume,
        }
    }

    /// Interpolated `f32` samples, one per position
    pub(crate) fn samples(
        layer: Arc<VolumeDataLayer>,
        buffer: VolumeBuffer,
        positions: &[[f32; DIMENSIONALITY_MAX]],
        method: InterpolationMethod,
        replacement: Option<f32>,
    ) -> Self {
        let writer = PointWriter::float(layer.channel(), replacement);
        let points = positions
            .iter()
            .enumerate()
            .map(|(output, position)| (output, Some(*position)));
        Self::new(layer, method, buffer, writer, points)
    }

    /// Full runs of `f32` samples along `trace_dimension` through each position
    pub(crate) fn traces(
        layer: Arc<VolumeDataLayer>,
        buffer: VolumeBuffer,
        positions: &[[f32; DIMENSIONALITY_MAX]],
        trace_dimension: usize,
        method: InterpolationMethod,
        replacement: Option<f32>,
    ) -> Self {
        let writer = PointWriter::float(layer.channel(), replacement);
        let trace_length = layer.partition().num_samples(trace_dimension);
        let points = positions.iter().enumerate().flat_map(move |(trace, position)| {
            (0..trace_length).map(move |sample| {
                let mut position = *position;
                position[trace_dimension] = sample as f32 + 0.5;
                (trace * trace_length + sample, Some(position))
            })
        });
        Self::new(layer, method, buffer, writer, points)
    }

    /// The plane over the projected axes of `voxels`, first projected axis fastest
    pub(crate) fn projected(
        layer: Arc<VolumeDataLayer>,
        buffer: VolumeBuffer,
        voxels: VoxelBox,
        plane: ProjectedPlane,
        method: InterpolationMethod,
        converter: OutputConverter,
    ) -> Self {
        let [u_axis, v_axis] = plane.axes;
        let width = voxels.extent(u_axis);
        let extent = layer.partition().num_samples(plane.remaining_axis);
        let points = (voxels.min[v_axis]..voxels.max[v_axis]).flat_map(move |j| {
            (voxels.min[u_axis]..voxels.max[u_axis]).map(move |i| {
                let output = (j - voxels.min[v_axis]) as usize * width + (i - voxels.min[u_axis]) as usize;
                (output, plane.position(i, j, extent))
            })
        });
        Self::new(layer, method, buffer, PointWriter::Converted(converter), points)
    }

    /// Chunks holding the nearest voxel of at least one position
    pub(crate) fn chunks(&self) -> Vec<i64> {
        self.chunks.keys().copied().collect()
    }

    fn sampler(&self) -> VolumeSampler<'_> {
        VolumeSampler::new(
            self.layer.channel(),
            self.method,
            self.layer.key().dimensions.axes(),
            self.num_samples,
        )
    }
}

impl ChunkJob for SampleJob {
    fn neighbours(&self, chunk: i64) -> Vec<i64> {
        self.chunks
            .get(&chunk)
            .map(|points| points.neighbours.iter().copied().collect())
            .unwrap_or_default()
    }

    fn process_chunk(&self, page: PageHandle, neighbours: &[PageHandle]) -> Result<()> {
        let Some(points) = self.chunks.get(&page.chunk_index()) else {
            return Ok(());
        };
        let sampler = self.sampler();
        let values: Vec<(usize, f64)> = {
            let source = ChunkSource::new(&page, neighbours);
            points
                .points
                .iter()
                .map(|point| (point.output, self.writer.element(sampler.sample(&source, &point.position))))
                .collect()
        };
        self.buffer.write_elements(self.writer.format(), &values);
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        let no_value = self.writer.element(None);
        let values: Vec<(usize, f64)> = self.off_volume.iter().map(|&output| (output, no_value)).collect();
        self.buffer.write_elements(self.writer.format(), &values);
        Ok(())
    }
}

/// A 2D subset of a plane through a 3D layer
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProjectedPlane {
    /// Projected axes, in output order
    pub(crate) axes: [usize; 2],
    /// The axis whose coordinate the plane determines
    pub(crate) remaining_axis: usize,
    /// `a*x + b*y + c*z + d = 0` in voxel coordinates of dimensions 0, 1, 2
    pub(crate) equation: [f32; 4],
}

impl ProjectedPlane {
    /// Position on the plane above the center of projected voxel `(i, j)`,
    /// `None` when the plane leaves the volume there
    pub(crate) fn position(&self, i: i32, j: i32, extent: usize) -> Option<[f32; DIMENSIONALITY_MAX]> {
        let mut position = [0.5f32; DIMENSIONALITY_MAX];
        position[self.axes[0]] = i as f32 + 0.5;
        position[self.axes[1]] = j as f32 + 0.5;
        let [a, b, c, d] = self.equation.map(f64::from);
        let coefficients = [a, b, c];
        let partial: f64 = d + self
            .axes
            .iter()
            .map(|&axis| coefficients[axis] * position[axis] as f64)
            .sum::<f64>();
        let coordinate = -partial / coefficients[self.remaining_axis];
        if !coordinate.is_finite() || coordinate < 0.0 || coordinate >= extent as f64 {
            return None;
        }
        position[self.remaining_axis] = coordinate as f32;
        Some(position)
    }
}

/// Loads chunks without producing output
pub(crate) struct PrefetchJob;

impl ChunkJob for PrefetchJob {
    fn process_chunk(&self, _page: PageHandle, _neighbours: &[PageHandle]) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValueRange;

    #[test]
    fn test_for_each_position_order() {
        let voxels = VoxelBox::new([0, 0, 0, 0, 0, 0], [2, 2, 1, 1, 1, 1]);
        let mut visited = Vec::new();
        for_each_position(&voxels, |position| visited.push((position[0], position[1])));
        assert_eq!(visited, vec![(0, 0), (1, 0), (0, 1), (1, 1)]);

        let mut count = 0;
        for_each_position(&VoxelBox::new([0; 6], [0, 1, 1, 1, 1, 1]), |_| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_converter() {
        let channel = ChannelDescriptor::quantized(
            Format::U8,
            "Amplitude",
            "",
            ValueRange::new(0.0, 254.0),
            Some(-999.0),
        );
        let raw_copy = OutputConverter::new(&channel, Format::U8, None);
        assert_eq!(raw_copy.from_raw(255.0), 255.0);
        assert_eq!(raw_copy.from_raw(17.0), 17.0);

        let real = OutputConverter::new(&channel, Format::R32, None);
        assert_eq!(real.from_raw(17.0), 17.0);
        assert_eq!(real.from_raw(255.0), -999.0);

        let replaced = OutputConverter::new(&channel, Format::R32, Some(0.0));
        assert_eq!(replaced.from_raw(255.0), 0.0);

        let wide = OutputConverter::new(&channel, Format::U16, None);
        assert_eq!(wide.from_raw(254.0), 65535.0);
    }

    #[test]
    fn test_projected_plane_position() {
        // z = x / 2 + 1  <=>  0.5 x - z + 1 = 0
        let plane = ProjectedPlane {
            axes: [0, 1],
            remaining_axis: 2,
            equation: [0.5, 0.0, -1.0, 1.0],
        };
        let position = plane.position(3, 0, 10).unwrap();
        assert_eq!(position[0], 3.5);
        assert_eq!(position[1], 0.5);
        assert!((position[2] - 2.75).abs() < 1e-6);
        assert!(plane.position(30, 0, 10).is_none());

        let vertical = ProjectedPlane {
            axes: [0, 1],
            remaining_axis: 2,
            equation: [1.0, 0.0, 0.0, 0.0],
        };
        assert!(vertical.position(0, 0, 10).is_none());
    }
}
