//! Volume metadata: typed key-value entries and the persisted volume descriptor

use crate::compression::CompressionMethod;
use crate::error::{Result, VdsError};
use crate::layout::VolumeDataLayout;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// VDS format version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VdsVersion {
    pub major: u16,
    pub minor: u16,
}

impl VdsVersion {
    pub const CURRENT: Self = Self { major: 3, minor: 0 };

    pub fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    pub fn is_compatible(&self, other: &Self) -> bool {
        self.major == other.major
    }
}

impl Default for VdsVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

/// A typed metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataValue {
    Int(i32),
    IntVector2([i32; 2]),
    IntVector3([i32; 3]),
    IntVector4([i32; 4]),
    Float(f32),
    FloatVector2([f32; 2]),
    FloatVector3([f32; 3]),
    FloatVector4([f32; 4]),
    Double(f64),
    DoubleVector2([f64; 2]),
    DoubleVector3([f64; 3]),
    DoubleVector4([f64; 4]),
    String(String),
    Blob(Vec<u8>),
}

/// Read access to metadata, by category and name
pub trait MetadataReadAccess {
    /// Look up the raw entry
    fn get_metadata(&self, category: &str, name: &str) -> Option<&MetadataValue>;

    /// Names of all categories holding entries
    fn categories(&self) -> Vec<String>;

    /// Names of the entries in a category
    fn names(&self, category: &str) -> Vec<String>;
}

macro_rules! typed_metadata {
    ($(($variant:ident, $ty:ty, $is_available:ident, $get:ident, $set:ident)),+ $(,)?) => {
        impl MetadataContainer {
            $(
                pub fn $is_available(&self, category: &str, name: &str) -> bool {
                    matches!(self.get_metadata(category, name), Some(MetadataValue::$variant(_)))
                }

                pub fn $get(&self, category: &str, name: &str) -> Result<$ty> {
                    match self.get_metadata(category, name) {
                        Some(MetadataValue::$variant(value)) => Ok(value.clone()),
                        Some(_) => Err(VdsError::Metadata(format!(
                            "{}/{} is not of type {}",
                            category,
                            name,
                            stringify!($variant)
                        ))),
                        None => Err(VdsError::Metadata(format!(
                            "{}/{} is not available",
                            category, name
                        ))),
                    }
                }

                pub fn $set(&mut self, category: impl Into<String>, name: impl Into<String>, value: $ty) {
                    self.set(category, name, MetadataValue::$variant(value));
                }
            )+
        }
    };
}

/// Metadata entries grouped by category
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataContainer {
    categories: BTreeMap<String, BTreeMap<String, MetadataValue>>,
}

impl MetadataContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, category: impl Into<String>, name: impl Into<String>, value: MetadataValue) {
        self.categories
            .entry(category.into())
            .or_default()
            .insert(name.into(), value);
    }

    pub fn remove(&mut self, category: &str, name: &str) -> Option<MetadataValue> {
        let entries = self.categories.get_mut(category)?;
        let removed = entries.remove(name);
        if entries.is_empty() {
            self.categories.remove(category);
        }
        removed
    }

    /// Copy every entry of `other` into this container, overwriting duplicates
    pub fn copy_from(&mut self, other: &dyn MetadataReadAccess) {
        for category in other.categories() {
            for name in other.names(&category) {
                if let Some(value) = other.get_metadata(&category, &name) {
                    self.set(category.clone(), name, value.clone());
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.categories.values().map(|entries| entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

typed_metadata! {
    (Int, i32, is_int_available, get_int, set_int),
    (IntVector2, [i32; 2], is_int_vector2_available, get_int_vector2, set_int_vector2),
    (IntVector3, [i32; 3], is_int_vector3_available, get_int_vector3, set_int_vector3),
    (IntVector4, [i32; 4], is_int_vector4_available, get_int_vector4, set_int_vector4),
    (Float, f32, is_float_available, get_float, set_float),
    (FloatVector2, [f32; 2], is_float_vector2_available, get_float_vector2, set_float_vector2),
    (FloatVector3, [f32; 3], is_float_vector3_available, get_float_vector3, set_float_vector3),
    (FloatVector4, [f32; 4], is_float_vector4_available, get_float_vector4, set_float_vector4),
    (Double, f64, is_double_available, get_double, set_double),
    (DoubleVector2, [f64; 2], is_double_vector2_available, get_double_vector2, set_double_vector2),
    (DoubleVector3, [f64; 3], is_double_vector3_available, get_double_vector3, set_double_vector3),
    (DoubleVector4, [f64; 4], is_double_vector4_available, get_double_vector4, set_double_vector4),
    (String, String, is_string_available, get_string, set_string),
    (Blob, Vec<u8>, is_blob_available, get_blob, set_blob),
}

impl MetadataReadAccess for MetadataContainer {
    fn get_metadata(&self, category: &str, name: &str) -> Option<&MetadataValue> {
        self.categories.get(category)?.get(name)
    }

    fn categories(&self) -> Vec<String> {
        self.categories.keys().cloned().collect()
    }

    fn names(&self, category: &str) -> Vec<String> {
        self.categories
            .get(category)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Descriptor persisted next to the chunks of a volume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VdsDescriptor {
    /// Format version
    pub version: VdsVersion,

    /// Identity of the volume
    pub volume_id: Uuid,

    /// Volume data layout
    pub layout: VolumeDataLayout,

    /// Compression method used for chunks
    pub compression: CompressionMethod,

    /// Compression tolerance (for lossy compression)
    pub compression_tolerance: f32,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub modified_at: DateTime<Utc>,
}

impl VdsDescriptor {
    /// Create a descriptor for a new volume
    pub fn new(layout: VolumeDataLayout) -> Self {
        let now = Utc::now();
        Self {
            version: VdsVersion::default(),
            volume_id: Uuid::new_v4(),
            layout,
            compression: CompressionMethod::Zstd,
            compression_tolerance: 0.0,
            created_at: now,
            modified_at: now,
        }
    }

    /// Set compression method
    pub fn with_compression(mut self, method: CompressionMethod) -> Self {
        self.compression = method;
        self
    }

    /// Set compression tolerance
    pub fn with_compression_tolerance(mut self, tolerance: f32) -> Self {
        self.compression_tolerance = tolerance;
        self
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| VdsError::Metadata(e.to_string()))
    }

    /// Parse and check a persisted descriptor
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let descriptor: VdsDescriptor =
            serde_json::from_slice(bytes).map_err(|e| VdsError::Metadata(e.to_string()))?;
        if !descriptor.version.is_compatible(&VdsVersion::CURRENT) {
            return Err(VdsError::InvalidFormat(format!(
                "Unsupported VDS version {}.{}",
                descriptor.version.major, descriptor.version.minor
            )));
        }
        descriptor.layout.validate()?;
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelDescriptor;
    use crate::layout::LayoutDescriptor;
    use crate::types::{AxisDescriptor, Format, ValueRange};

    #[test]
    fn test_version_compatibility() {
        let v3_0 = VdsVersion::new(3, 0);
        let v3_1 = VdsVersion::new(3, 1);
        let v2_0 = VdsVersion::new(2, 0);

        assert!(v3_0.is_compatible(&v3_1));
        assert!(!v3_0.is_compatible(&v2_0));
    }

    #[test]
    fn test_typed_access() {
        let mut metadata = MetadataContainer::new();
        metadata.set_int("categoryInt", "Int", 123);
        metadata.set_int_vector2("categoryInt", "IntVector2", [45, 78]);
        metadata.set_double_vector3("categoryDouble", "DoubleVector3", [1.5, 2.5, 3.5]);
        metadata.set_string("categoryString", "String", "Test string".to_string());

        assert!(metadata.is_int_available("categoryInt", "Int"));
        assert!(!metadata.is_float_available("categoryInt", "Int"));
        assert!(!metadata.is_int_available("categoryInt", "Missing"));
        assert_eq!(metadata.get_int("categoryInt", "Int").unwrap(), 123);
        assert_eq!(metadata.get_int_vector2("categoryInt", "IntVector2").unwrap(), [45, 78]);
        assert_eq!(
            metadata.get_string("categoryString", "String").unwrap(),
            "Test string"
        );
        assert!(metadata.get_float("categoryInt", "Int").is_err());
        assert_eq!(metadata.len(), 4);
        assert_eq!(
            metadata.categories(),
            vec!["categoryDouble", "categoryInt", "categoryString"]
        );
    }

    #[test]
    fn test_copy_from_and_remove() {
        let mut source = MetadataContainer::new();
        source.set_float("a", "x", 1.0);
        source.set_blob("b", "y", vec![1, 2, 3]);

        let mut target = MetadataContainer::new();
        target.set_float("a", "x", 0.0);
        target.copy_from(&source);
        assert_eq!(target.get_float("a", "x").unwrap(), 1.0);
        assert_eq!(target.get_blob("b", "y").unwrap(), vec![1, 2, 3]);

        assert!(target.remove("b", "y").is_some());
        assert_eq!(target.names("b"), Vec::<String>::new());
        assert_eq!(target.len(), 1);
    }

    #[test]
    fn test_descriptor_json() {
        let layout = VolumeDataLayout::new(
            LayoutDescriptor::default(),
            vec![
                AxisDescriptor::new(100, "Sample", "ms", 0.0, 396.0),
                AxisDescriptor::new(80, "Crossline", "", 1.0, 80.0),
                AxisDescriptor::new(60, "Inline", "", 1.0, 60.0),
            ],
            vec![ChannelDescriptor::new(
                Format::R32,
                "Amplitude",
                "",
                ValueRange::new(-1000.0, 1000.0),
            )],
            MetadataContainer::new(),
        )
        .unwrap();
        let descriptor = VdsDescriptor::new(layout).with_compression(CompressionMethod::Deflate);

        let json = descriptor.to_json().unwrap();
        let decoded = VdsDescriptor::from_json(&json).unwrap();
        assert_eq!(decoded.volume_id, descriptor.volume_id);
        assert_eq!(decoded.compression, CompressionMethod::Deflate);
        assert_eq!(decoded.layout, descriptor.layout);

        let mut old = descriptor.clone();
        old.version = VdsVersion::new(2, 0);
        assert!(VdsDescriptor::from_json(&old.to_json().unwrap()).is_err());
    }
}
