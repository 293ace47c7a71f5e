//! Layers - one partition per (dimension group, LOD, channel)

use crate::channel::ChannelDescriptor;
use crate::dimensions::DimensionsND;
use crate::error::{Result, VdsError};
use crate::layout::VolumeDataLayout;
use crate::partition::VolumeDataPartition;
use std::fmt;

/// Identifies a layer of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerKey {
    pub dimensions: DimensionsND,
    pub lod: u32,
    pub channel: usize,
}

impl LayerKey {
    pub fn new(dimensions: DimensionsND, lod: u32, channel: usize) -> Self {
        Self {
            dimensions,
            lod,
            channel,
        }
    }
}

impl fmt::Display for LayerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}LOD{}/channel{}", self.dimensions.name(), self.lod, self.channel)
    }
}

/// A layer: its partition, channel and storage name
#[derive(Debug, Clone)]
pub struct VolumeDataLayer {
    key: LayerKey,
    name: String,
    channel: ChannelDescriptor,
    partition: VolumeDataPartition,
}

impl VolumeDataLayer {
    /// Build the layer for `key`. Only the primary dimension group holds data.
    pub fn new(layout: &VolumeDataLayout, key: LayerKey) -> Result<Self> {
        layout.validate_lod(key.lod)?;
        let channel = layout.channel(key.channel)?.clone();
        if key.dimensions != layout.primary_dimensions() {
            return Err(VdsError::InvalidArgument(format!(
                "Volume data is stored in {}, not {}",
                layout.primary_dimensions(),
                key.dimensions
            )));
        }

        let partition = VolumeDataPartition::new(layout, key.dimensions, key.lod, &channel);
        let mut name = format!("{}LOD{}", key.dimensions.name(), key.lod);
        if key.channel > 0 {
            name = format!("{}{}", channel.name, name);
        }

        Ok(Self {
            key,
            name,
            channel,
            partition,
        })
    }

    pub fn key(&self) -> LayerKey {
        self.key
    }

    /// Name used as the storage prefix of the layer
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> &ChannelDescriptor {
        &self.channel
    }

    pub fn partition(&self) -> &VolumeDataPartition {
        &self.partition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{BrickSize, LayoutDescriptor};
    use crate::metadata::MetadataContainer;
    use crate::types::{AxisDescriptor, Format, ValueRange};

    fn layout() -> VolumeDataLayout {
        VolumeDataLayout::new(
            LayoutDescriptor::new(BrickSize::Size32).with_lod_levels(1),
            vec![
                AxisDescriptor::new(40, "Sample", "ms", 0.0, 1.0),
                AxisDescriptor::new(40, "Crossline", "", 0.0, 1.0),
                AxisDescriptor::new(40, "Inline", "", 0.0, 1.0),
            ],
            vec![
                ChannelDescriptor::new(Format::R32, "Amplitude", "", ValueRange::new(-1.0, 1.0)),
                ChannelDescriptor::new(Format::U8, "Mask", "", ValueRange::new(0.0, 1.0)),
            ],
            MetadataContainer::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_layer_names() {
        let layout = layout();
        let primary = VolumeDataLayer::new(&layout, LayerKey::new(DimensionsND::Dimensions012, 0, 0)).unwrap();
        assert_eq!(primary.name(), "Dimensions_012LOD0");

        let mask = VolumeDataLayer::new(&layout, LayerKey::new(DimensionsND::Dimensions012, 1, 1)).unwrap();
        assert_eq!(mask.name(), "MaskDimensions_012LOD1");
        assert_eq!(mask.channel().format, Format::U8);
        assert_eq!(mask.partition().num_samples(0), 20);
    }

    #[test]
    fn test_invalid_layers() {
        let layout = layout();
        assert!(matches!(
            VolumeDataLayer::new(&layout, LayerKey::new(DimensionsND::Dimensions01, 0, 0)),
            Err(VdsError::InvalidArgument(_))
        ));
        assert!(matches!(
            VolumeDataLayer::new(&layout, LayerKey::new(DimensionsND::Dimensions012, 2, 0)),
            Err(VdsError::OutOfRange(_))
        ));
        assert!(matches!(
            VolumeDataLayer::new(&layout, LayerKey::new(DimensionsND::Dimensions012, 0, 2)),
            Err(VdsError::OutOfRange(_))
        ));
    }
}
