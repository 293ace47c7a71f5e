//! Channel descriptors and conversion between stored and real values

use crate::error::{Result, VdsError};
use crate::types::{Components, Format, ValueRange, VolumeDataMapping};
use serde::{Deserialize, Serialize};

/// Behavioural flags of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFlags {
    pub discrete: bool,
    pub renderable: bool,
    pub allow_lossy_compression: bool,
    pub use_zip_for_lossless_compression: bool,
}

impl Default for ChannelFlags {
    fn default() -> Self {
        Self {
            discrete: false,
            renderable: true,
            allow_lossy_compression: true,
            use_zip_for_lossless_compression: true,
        }
    }
}

/// Description of one channel of a volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    pub format: Format,
    pub components: Components,
    pub name: String,
    pub unit: String,
    pub value_range: ValueRange,
    pub mapping: VolumeDataMapping,
    /// Values per trace for `PerTrace` channels, 1 otherwise
    pub mapped_value_count: usize,
    pub flags: ChannelFlags,
    /// Real value marking absent samples
    pub no_value: Option<f32>,
    pub integer_scale: f64,
    pub integer_offset: f64,
}

impl ChannelDescriptor {
    /// Create a single-component, directly mapped channel
    pub fn new(
        format: Format,
        name: impl Into<String>,
        unit: impl Into<String>,
        value_range: ValueRange,
    ) -> Self {
        Self {
            format,
            components: Components::One,
            name: name.into(),
            unit: unit.into(),
            value_range,
            mapping: VolumeDataMapping::Direct,
            mapped_value_count: 1,
            flags: ChannelFlags::default(),
            no_value: None,
            integer_scale: 1.0,
            integer_offset: 0.0,
        }
    }

    /// Create a channel whose integer scale and offset spread the value range
    /// over the raw codes of `format`, reserving the top code for NoValue
    pub fn quantized(
        format: Format,
        name: impl Into<String>,
        unit: impl Into<String>,
        value_range: ValueRange,
        no_value: Option<f32>,
    ) -> Self {
        let (scale, offset) = scale_offset_for_format(format, value_range, no_value.is_some());
        let mut channel = Self::new(format, name, unit, value_range);
        channel.no_value = no_value;
        channel.integer_scale = scale;
        channel.integer_offset = offset;
        channel
    }

    pub fn with_components(mut self, components: Components) -> Self {
        self.components = components;
        self
    }

    pub fn with_per_trace_mapping(mut self, mapped_value_count: usize) -> Self {
        self.mapping = VolumeDataMapping::PerTrace;
        self.mapped_value_count = mapped_value_count;
        self
    }

    pub fn with_no_value(mut self, no_value: f32) -> Self {
        self.no_value = Some(no_value);
        self
    }

    pub fn with_integer_scale_offset(mut self, scale: f64, offset: f64) -> Self {
        self.integer_scale = scale;
        self.integer_offset = offset;
        self
    }

    pub fn with_flags(mut self, flags: ChannelFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(VdsError::InvalidArgument(
                "Channel name must not be empty".to_string(),
            ));
        }
        if !self.value_range.is_valid() {
            return Err(VdsError::InvalidArgument(format!(
                "Channel '{}' has an invalid value range",
                self.name
            )));
        }
        if self.format == Format::U1 && self.components != Components::One {
            return Err(VdsError::InvalidArgument(
                "1-bit channels must have a single component".to_string(),
            ));
        }
        if matches!(self.no_value, Some(no_value) if !no_value.is_finite()) {
            return Err(VdsError::InvalidArgument(format!(
                "Channel '{}' has a non-finite NoValue",
                self.name
            )));
        }
        if self.mapped_value_count == 0 {
            return Err(VdsError::InvalidArgument(
                "Mapped value count must be at least 1".to_string(),
            ));
        }
        if self.mapping == VolumeDataMapping::Direct && self.mapped_value_count != 1 {
            return Err(VdsError::InvalidArgument(
                "Directly mapped channels have a mapped value count of 1".to_string(),
            ));
        }
        if !self.integer_scale.is_finite() || self.integer_scale == 0.0 || !self.integer_offset.is_finite() {
            return Err(VdsError::InvalidArgument(format!(
                "Channel '{}' has an invalid integer scale/offset",
                self.name
            )));
        }
        Ok(())
    }

    /// Bytes per voxel, or per bit-packed byte for `U1`
    pub fn element_size(&self) -> usize {
        self.format.size_in_bytes() * self.components.count()
    }

    /// Whether stored values go through the integer scale and offset
    pub fn is_quantized(&self) -> bool {
        self.format.is_integer() && self.format != Format::U1
    }

    /// Raw code used to store NoValue
    pub fn no_value_raw(&self) -> Option<f64> {
        self.no_value.map(|no_value| {
            if self.is_quantized() {
                self.format.max_raw_value()
            } else {
                no_value as f64
            }
        })
    }

    pub fn is_no_value_raw(&self, raw: f64) -> bool {
        match self.no_value_raw() {
            Some(code) => raw == code || (code.is_nan() && raw.is_nan()),
            None => false,
        }
    }

    pub fn is_no_value(&self, real: f64) -> bool {
        match self.no_value {
            Some(no_value) => real == no_value as f64 || (no_value.is_nan() && real.is_nan()),
            None => false,
        }
    }

    /// Convert a stored value to its real value
    pub fn to_real(&self, raw: f64) -> f64 {
        if let Some(no_value) = self.no_value {
            if self.is_no_value_raw(raw) {
                return no_value as f64;
            }
        }
        if self.is_quantized() {
            raw * self.integer_scale + self.integer_offset
        } else {
            raw
        }
    }

    /// Convert a real value to the value stored for it
    pub fn from_real(&self, real: f64) -> f64 {
        if let Some(code) = self.no_value_raw() {
            if self.is_no_value(real) {
                return code;
            }
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
            _ => {
                let mut max = self.format.max_raw_value();
                if self.no_value.is_some() {
                    max -= 1.0;
                }
                let raw = ((real - self.integer_offset) / self.integer_scale).round();
                if raw.is_nan() {
                    0.0
                } else {
                    raw.clamp(0.0, max)
                }
            }
        }
    }
}

/// Integer scale and offset mapping `range` onto the raw codes of `format`
pub fn scale_offset_for_format(format: Format, range: ValueRange, reserve_no_value: bool) -> (f64, f64) {
    let reserved = if reserve_no_value { 1.0 } else { 0.0 };
    match format {
        Format::U8 => (range.span() / (255.0 - reserved), range.min),
        Format::U16 => (range.span() / (65535.0 - reserved), range.min),
        _ => (1.0, 0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantized_u8_round_trip() {
        let range = ValueRange::new(-0.1234, 0.1234);
        let channel = ChannelDescriptor::quantized(Format::U8, "Amplitude", "", range, Some(-999.25));
        assert!((channel.integer_scale - 0.2468 / 254.0).abs() < 1e-12);
        assert_eq!(channel.integer_offset, -0.1234);

        assert_eq!(channel.from_real(-0.1234), 0.0);
        assert_eq!(channel.from_real(0.1234), 254.0);
        assert_eq!(channel.from_real(10.0), 254.0);
        assert_eq!(channel.from_real(-999.25), 255.0);
        assert_eq!(channel.to_real(255.0), -999.25);
        assert!((channel.to_real(254.0) - 0.1234).abs() < 1e-9);
        assert!(channel.is_no_value_raw(255.0));
        assert!(!channel.is_no_value_raw(254.0));
    }

    #[test]
    fn test_float_channel_is_identity() {
        let channel = ChannelDescriptor::new(Format::R32, "Value", "m", ValueRange::new(0.0, 1.0))
            .with_no_value(-999.25);
        assert_eq!(channel.to_real(0.25), 0.25);
        assert_eq!(channel.from_real(0.25), 0.25);
        assert!(channel.is_no_value(-999.25));
        assert!(channel.is_no_value_raw(-999.25));
        assert!(!channel.is_no_value(0.0));
        assert!(channel.validate().is_ok());
        assert!(channel.with_no_value(f32::NAN).validate().is_err());
    }

    #[test]
    fn test_validate() {
        let range = ValueRange::new(0.0, 1.0);
        assert!(ChannelDescriptor::new(Format::U1, "Mask", "", range).validate().is_ok());
        assert!(ChannelDescriptor::new(Format::U1, "Mask", "", range)
            .with_components(Components::Two)
            .validate()
            .is_err());
        assert!(ChannelDescriptor::new(Format::R32, "", "", range).validate().is_err());
        assert!(ChannelDescriptor::new(Format::R32, "Bad", "", ValueRange::new(1.0, 0.0))
            .validate()
            .is_err());
        assert!(ChannelDescriptor::new(Format::R32, "Trace", "", range)
            .with_per_trace_mapping(8)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_u1_from_real() {
        let channel = ChannelDescriptor::new(Format::U1, "Mask", "", ValueRange::new(0.0, 1.0));
        assert_eq!(channel.from_real(0.0), 0.0);
        assert_eq!(channel.from_real(0.3), 1.0);
        assert_eq!(channel.to_real(1.0), 1.0);
    }
}
