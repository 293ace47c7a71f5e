//! Volume sampler - interpolation of stored voxels at fractional positions
//!
//! Voxel `i` covers `[i, i + 1)`, so its center is `i + 0.5`. Tap positions
//! are clamped to the volume. With a NoValue-enabled channel a sample whose
//! nearest voxel is NoValue is NoValue itself, and NoValue taps are left out
//! of the weighted sum.

use crate::channel::ChannelDescriptor;
use crate::types::{InterpolationMethod, DIMENSIONALITY_MAX};

/// Source of stored (raw) values by voxel position
pub trait VoxelSource {
    fn raw_value(&self, position: &[i32; DIMENSIONALITY_MAX]) -> f64;
}

impl<F> VoxelSource for F
where
    F: Fn(&[i32; DIMENSIONALITY_MAX]) -> f64,
{
    fn raw_value(&self, position: &[i32; DIMENSIONALITY_MAX]) -> f64 {
        self(position)
    }
}

/// Weights of the four cubic taps around a fractional offset `t`
pub fn cubic_weights(t: f64) -> [f64; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    [
        -0.5 * t3 + t2 - 0.5 * t,
        1.5 * t3 - 2.5 * t2 + 1.0,
        -1.5 * t3 + 2.0 * t2 + 0.5 * t,
        0.5 * (t3 - t2),
    ]
}

fn clamp_index(index: i64, size: usize) -> i32 {
    index.clamp(0, size.max(1) as i64 - 1) as i32
}

pub struct VolumeSampler<'a> {
    channel: &'a ChannelDescriptor,
    method: InterpolationMethod,
    axes: Vec<usize>,
    num_samples: [usize; DIMENSIONALITY_MAX],
}

impl<'a> VolumeSampler<'a> {
    /// Sampler interpolating along `axes` (at most three); other dimensions
    /// use the nearest voxel.
    pub fn new(
        channel: &'a ChannelDescriptor,
        method: InterpolationMethod,
        axes: &[usize],
        num_samples: [usize; DIMENSIONALITY_MAX],
    ) -> Self {
        Self {
            channel,
            method,
            axes: axes.iter().copied().take(3).collect(),
            num_samples,
        }
    }

    /// Voxel holding `position`
    pub fn nearest(&self, position: &[f32; DIMENSIONALITY_MAX]) -> [i32; DIMENSIONALITY_MAX] {
        std::array::from_fn(|dim| clamp_index(position[dim].floor() as i64, self.num_samples[dim]))
    }

    /// Voxels read when sampling `position`, as an inclusive-exclusive box
    pub fn footprint(&self, position: &[f32; DIMENSIONALITY_MAX]) -> ([i32; DIMENSIONALITY_MAX], [i32; DIMENSIONALITY_MAX]) {
        let nearest = self.nearest(position);
        let mut min = nearest;
        let mut max = nearest.map(|index| index + 1);
        let (before, after) = match self.method {
            InterpolationMethod::Nearest => (0, 0),
            InterpolationMethod::Cubic => (1, 2),
            _ => (0, 1),
        };
        for &axis in &self.axes {
            let base = (position[axis] as f64 - 0.5).floor() as i64;
            let size = self.num_samples[axis];
            min[axis] = min[axis].min(clamp_index(base - before, size));
            max[axis] = max[axis].max(clamp_index(base + after, size) + 1);
        }
        (min, max)
    }

    /// Real value at `position`, `None` for NoValue
    pub fn sample(&self, source: &dyn VoxelSource, position: &[f32; DIMENSIONALITY_MAX]) -> Option<f64> {
        if self.method == InterpolationMethod::Triangular && self.axes.len() >= 2 {
            return self.sample_triangular(source, position);
        }

        let nearest = self.nearest(position);
        let nearest_raw = source.raw_value(&nearest);
        if self.channel.is_no_value_raw(nearest_raw) {
            return None;
        }
        let nearest_value = self.channel.to_real(nearest_raw);

        match self.method {
            InterpolationMethod::Nearest => Some(nearest_value),
            InterpolationMethod::Linear | InterpolationMethod::Angular | InterpolationMethod::Triangular => {
                Some(self.sample_linear(source, position, &nearest, nearest_value))
            }
            InterpolationMethod::Cubic => Some(self.sample_cubic(source, position, &nearest, nearest_value)),
        }
    }

    /// Base tap index and fractional offset along `axis`
    fn offset(&self, position: &[f32; DIMENSIONALITY_MAX], axis: usize) -> (i64, f64) {
        let p = position[axis] as f64 - 0.5;
        let base = p.floor();
        (base as i64, p - base)
    }

    fn range_size(&self) -> f64 {
        self.channel.value_range.span()
    }

    fn wrap_to_closest(&self, value: f64, fixed: f64) -> f64 {
        let range = self.range_size();
        value - ((value - fixed) / range + 0.5).floor() * range
    }

    fn wrap_to_range(&self, value: f64) -> f64 {
        let range = self.range_size();
        value - ((value - self.channel.value_range.min) / range).floor() * range
    }

    fn sample_linear(
        &self,
        source: &dyn VoxelSource,
        position: &[f32; DIMENSIONALITY_MAX],
        nearest: &[i32; DIMENSIONALITY_MAX],
        nearest_value: f64,
    ) -> f64 {
        let angular = self.method == InterpolationMethod::Angular && self.range_size() > 0.0;
        let taps: Vec<[(i32, f64); 2]> = self
            .axes
            .iter()
            .map(|&axis| {
                let (base, t) = self.offset(position, axis);
                let size = self.num_samples[axis];
                [(clamp_index(base, size), 1.0 - t), (clamp_index(base + 1, size), t)]
            })
            .collect();

        let mut sum = 0.0;
        let mut weight_sum = 0.0;
        for combination in 0..(1usize << taps.len()) {
            let mut tap = *nearest;
            let mut weight = 1.0;
            for (i, axis_taps) in taps.iter().enumerate() {
                let (index, w) = axis_taps[(combination >> i) & 1];
                tap[self.axes[i]] = index;
                weight *= w;
            }
            let raw = source.raw_value(&tap);
            if self.channel.is_no_value_raw(raw) {
                continue;
            }
            let mut value = self.channel.to_real(raw);
            if angular {
                value = self.wrap_to_closest(value, nearest_value);
            }
            sum += (value - nearest_value) * weight;
            weight_sum += weight;
        }

        if self.channel.no_value.is_some() && weight_sum > 0.0 {
            sum /= weight_sum;
        }
        let value = sum + nearest_value;
        if angular {
            self.wrap_to_range(value)
        } else {
            value
        }
    }

    fn sample_cubic(
        &self,
        source: &dyn VoxelSource,
        position: &[f32; DIMENSIONALITY_MAX],
        nearest: &[i32; DIMENSIONALITY_MAX],
        nearest_value: f64,
    ) -> f64 {
        let taps: Vec<[(i32, f64); 4]> = self
            .axes
            .iter()
            .map(|&axis| {
                let (base, t) = self.offset(position, axis);
                let size = self.num_samples[axis];
                let weights = cubic_weights(t);
                std::array::from_fn(|k| (clamp_index(base - 1 + k as i64, size), weights[k]))
            })
            .collect();
        let use_no_value = self.channel.no_value.is_some();

        let mut sum = 0.0;
        let mut weight_sum = 0.0;
        for combination in 0..(1usize << (2 * taps.len())) {
            let mut tap = *nearest;
            let mut center = *nearest;
            let mut weight = 1.0;
            for (i, axis_taps) in taps.iter().enumerate() {
                let k = (combination >> (2 * i)) & 3;
                let (index, w) = axis_taps[k];
                tap[self.axes[i]] = index;
                center[self.axes[i]] = axis_taps[if k <= 1 { 1 } else { 2 }].0;
                weight *= w;
            }
            let raw = source.raw_value(&tap);
            if use_no_value
                && (self.channel.is_no_value_raw(raw)
                    || self.channel.is_no_value_raw(source.raw_value(&center)))
            {
                continue;
            }
            sum += (self.channel.to_real(raw) - nearest_value) * weight;
            weight_sum += weight;
        }

        if use_no_value && weight_sum != 0.0 {
            sum /= weight_sum;
        }
        sum + nearest_value
    }

    fn sample_triangular(&self, source: &dyn VoxelSource, position: &[f32; DIMENSIONALITY_MAX]) -> Option<f64> {
        let (u_axis, v_axis) = (self.axes[0], self.axes[1]);
        let nearest = self.nearest(position);
        let (base_u, u) = self.offset(position, u_axis);
        let (base_v, v) = self.offset(position, v_axis);
        let us = [
            clamp_index(base_u, self.num_samples[u_axis]),
            clamp_index(base_u + 1, self.num_samples[u_axis]),
        ];
        let vs = [
            clamp_index(base_v, self.num_samples[v_axis]),
            clamp_index(base_v + 1, self.num_samples[v_axis]),
        ];

        // corner[j][i]: i along u, j along v
        let corner: [[Option<f64>; 2]; 2] = std::array::from_fn(|j| {
            std::array::from_fn(|i| {
                let mut tap = nearest;
                tap[u_axis] = us[i];
                tap[v_axis] = vs[j];
                let raw = source.raw_value(&tap);
                (!self.channel.is_no_value_raw(raw)).then(|| self.channel.to_real(raw))
            })
        });
        let [[v00, v01], [v10, v11]] = corner;

        if let (Some(v01), Some(v10)) = (v01, v10) {
            if u <= 1.0 - v {
                if let Some(v00) = v00 {
                    return Some(v00 + u * (v01 - v00) + v * (v10 - v00));
                }
            }
            if u >= 1.0 - v {
                if let Some(v11) = v11 {
                    return Some(v11 + (1.0 - u) * (v10 - v11) + (1.0 - v) * (v01 - v11));
                }
            }
        } else if let (Some(v00), Some(v11)) = (v00, v11) {
            if u >= v {
                if let Some(v01) = v01 {
                    return Some(v01 + (1.0 - u) * (v00 - v01) + v * (v11 - v01));
                }
            } else if let Some(v10) = v10 {
                return Some(v10 + u * (v11 - v10) + (1.0 - v) * (v00 - v10));
            }
        } else if let Some(v00) = v00 {
            if u == 0.0 && v == 0.0 {
                return Some(v00);
            }
            if u == 0.0 {
                if let Some(v10) = v10 {
                    return Some(v00 + v * (v10 - v00));
                }
            }
            if v == 0.0 {
                if let Some(v01) = v01 {
                    return Some(v00 + u * (v01 - v00));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Format, ValueRange};

    const SIZE: [usize; DIMENSIONALITY_MAX] = [4, 4, 4, 1, 1, 1];

    fn ramp(position: &[i32; DIMENSIONALITY_MAX]) -> f64 {
        position[0] as f64 + 10.0 * position[1] as f64 + 100.0 * position[2] as f64
    }

    fn channel() -> ChannelDescriptor {
        ChannelDescriptor::new(Format::R32, "Amplitude", "", ValueRange::new(0.0, 400.0))
    }

    fn at(u: f32, v: f32, w: f32) -> [f32; DIMENSIONALITY_MAX] {
        [u, v, w, 0.0, 0.0, 0.0]
    }

    #[test]
    fn test_cubic_weights_sum_to_one() {
        for t in [0.0, 0.25, 0.5, 0.9] {
            let sum: f64 = cubic_weights(t).iter().sum();
            assert!((sum - 1.0).abs() < 1e-12);
        }
        assert_eq!(cubic_weights(0.0), [0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_nearest_uses_floor() {
        let channel = channel();
        let sampler = VolumeSampler::new(&channel, InterpolationMethod::Nearest, &[0, 1, 2], SIZE);
        assert_eq!(sampler.sample(&ramp, &at(1.99, 2.0, 3.5)), Some(321.0));
        assert_eq!(sampler.sample(&ramp, &at(-3.0, 9.0, 0.0)), Some(30.0));
    }

    #[test]
    fn test_linear_at_centers_and_between() {
        let channel = channel();
        let sampler = VolumeSampler::new(&channel, InterpolationMethod::Linear, &[0, 1, 2], SIZE);
        assert!((sampler.sample(&ramp, &at(1.5, 1.5, 1.5)).unwrap() - 111.0).abs() < 1e-9);
        assert!((sampler.sample(&ramp, &at(2.0, 1.5, 1.5)).unwrap() - 111.5).abs() < 1e-9);
        assert!((sampler.sample(&ramp, &at(1.5, 2.0, 2.0)).unwrap() - 166.0).abs() < 1e-9);
    }

    #[test]
    fn test_cubic_reproduces_linear_ramp() {
        let channel = channel();
        let sampler = VolumeSampler::new(&channel, InterpolationMethod::Cubic, &[0, 1, 2], SIZE);
        assert!((sampler.sample(&ramp, &at(1.75, 1.5, 1.5)).unwrap() - 111.25).abs() < 1e-9);
        assert!((sampler.sample(&ramp, &at(1.5, 1.5, 1.5)).unwrap() - 111.0).abs() < 1e-9);
    }

    #[test]
    fn test_angular_wraps_across_range() {
        let channel = ChannelDescriptor::new(Format::R32, "Azimuth", "deg", ValueRange::new(0.0, 360.0));
        let source = |position: &[i32; DIMENSIONALITY_MAX]| if position[0] == 0 { 350.0 } else { 10.0 };
        let sampler = VolumeSampler::new(&channel, InterpolationMethod::Angular, &[0, 1], [2, 1, 1, 1, 1, 1]);
        let value = sampler.sample(&source, &at(1.0, 0.5, 0.5)).unwrap();
        assert!(value.abs() < 1e-9 || (value - 360.0).abs() < 1e-9);

        let linear = VolumeSampler::new(&channel, InterpolationMethod::Linear, &[0, 1], [2, 1, 1, 1, 1, 1]);
        assert!((linear.sample(&source, &at(1.0, 0.5, 0.5)).unwrap() - 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_triangular_splits_cell() {
        let channel = channel();
        let source = |position: &[i32; DIMENSIONALITY_MAX]| match (position[0], position[1]) {
            (0, 0) => 0.0,
            (1, 0) => 1.0,
            (0, 1) => 2.0,
            _ => 10.0,
        };
        let size = [2, 2, 1, 1, 1, 1];
        let sampler = VolumeSampler::new(&channel, InterpolationMethod::Triangular, &[0, 1], size);
        // lower triangle only sees v00, v01 (u) and v10 (v)
        assert!((sampler.sample(&source, &at(0.75, 0.75, 0.0)).unwrap() - 0.75).abs() < 1e-9);
        // upper triangle is anchored at v11
        let value = sampler.sample(&source, &at(1.25, 1.25, 0.0)).unwrap();
        assert!((value - (10.0 + 0.25 * (2.0 - 10.0) + 0.25 * (1.0 - 10.0))).abs() < 1e-9);
    }

    #[test]
    fn test_no_value_handling() {
        let channel = channel().with_no_value(-1.0);
        let source = |position: &[i32; DIMENSIONALITY_MAX]| if position[0] == 2 { -1.0 } else { 5.0 };
        let size = [4, 1, 1, 1, 1, 1];

        let nearest = VolumeSampler::new(&channel, InterpolationMethod::Nearest, &[0, 1], size);
        assert_eq!(nearest.sample(&source, &at(2.5, 0.5, 0.5)), None);
        assert_eq!(nearest.sample(&source, &at(1.5, 0.5, 0.5)), Some(5.0));

        // the NoValue neighbour is excluded instead of pulling the result down
        let linear = VolumeSampler::new(&channel, InterpolationMethod::Linear, &[0, 1], size);
        assert!((linear.sample(&source, &at(1.9, 0.5, 0.5)).unwrap() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_footprint() {
        let channel = channel();
        let cubic = VolumeSampler::new(&channel, InterpolationMethod::Cubic, &[0, 1, 2], SIZE);
        let (min, max) = cubic.footprint(&at(2.0, 0.2, 3.9));
        assert_eq!(&min[..3], &[0, 0, 2]);
        assert_eq!(&max[..3], &[4, 2, 4]);
        assert_eq!(&max[3..], &[1, 1, 1]);

        let nearest = VolumeSampler::new(&channel, InterpolationMethod::Nearest, &[0, 1, 2], SIZE);
        let (min, max) = nearest.footprint(&at(2.0, 0.2, 3.9));
        assert_eq!(&min[..3], &[2, 0, 3]);
        assert_eq!(&max[..3], &[3, 1, 4]);
    }
}
