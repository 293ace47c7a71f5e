//! Dimension groups - the 2D and 3D projections of a six dimensional volume

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bitmask over the six axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct DimensionGroup(u8);

impl DimensionGroup {
    pub(crate) fn from_axes(axes: &[usize]) -> Self {
        Self(axes.iter().fold(0u8, |mask, &axis| mask | (1 << axis)))
    }

    pub(crate) fn contains(&self, axis: usize) -> bool {
        axis < 8 && self.0 & (1 << axis) != 0
    }

    pub(crate) fn is_subset_of(&self, other: &DimensionGroup) -> bool {
        self.0 & !other.0 == 0
    }
}

macro_rules! dimensions_nd {
    ($($variant:ident => [$($axis:literal),+]),+ $(,)?) => {
        /// A group of two or three axes used to interpret request coordinates
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum DimensionsND {
            $($variant),+
        }

        impl DimensionsND {
            /// Every dimension group
            pub const ALL: &'static [DimensionsND] = &[$(DimensionsND::$variant),+];

            /// Axes of this group in ascending order
            pub fn axes(&self) -> &'static [usize] {
                match self {
                    $(DimensionsND::$variant => &[$($axis),+]),+
                }
            }
        }
    };
}

dimensions_nd! {
    Dimensions01 => [0, 1],
    Dimensions02 => [0, 2],
    Dimensions03 => [0, 3],
    Dimensions04 => [0, 4],
    Dimensions05 => [0, 5],
    Dimensions12 => [1, 2],
    Dimensions13 => [1, 3],
    Dimensions14 => [1, 4],
    Dimensions15 => [1, 5],
    Dimensions23 => [2, 3],
    Dimensions24 => [2, 4],
    Dimensions25 => [2, 5],
    Dimensions34 => [3, 4],
    Dimensions35 => [3, 5],
    Dimensions45 => [4, 5],
    Dimensions012 => [0, 1, 2],
    Dimensions013 => [0, 1, 3],
    Dimensions014 => [0, 1, 4],
    Dimensions015 => [0, 1, 5],
    Dimensions023 => [0, 2, 3],
    Dimensions024 => [0, 2, 4],
    Dimensions025 => [0, 2, 5],
    Dimensions034 => [0, 3, 4],
    Dimensions035 => [0, 3, 5],
    Dimensions045 => [0, 4, 5],
    Dimensions123 => [1, 2, 3],
    Dimensions124 => [1, 2, 4],
    Dimensions125 => [1, 2, 5],
    Dimensions134 => [1, 3, 4],
    Dimensions135 => [1, 3, 5],
    Dimensions145 => [1, 4, 5],
    Dimensions234 => [2, 3, 4],
    Dimensions235 => [2, 3, 5],
    Dimensions245 => [2, 4, 5],
    Dimensions345 => [3, 4, 5],
}

impl DimensionsND {
    /// Look up the group made of exactly these axes
    pub fn from_axes(axes: &[usize]) -> Option<Self> {
        let mut sorted = axes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        DimensionsND::ALL
            .iter()
            .copied()
            .find(|dims| dims.axes() == sorted.as_slice())
    }

    /// Number of axes in the group (2 or 3)
    pub fn dimension_count(&self) -> usize {
        self.axes().len()
    }

    pub fn contains(&self, axis: usize) -> bool {
        self.group().contains(axis)
    }

    /// Name used for layers of this group, e.g. `Dimensions_012`
    pub fn name(&self) -> String {
        let digits: String = self.axes().iter().map(|axis| axis.to_string()).collect();
        format!("Dimensions_{}", digits)
    }

    pub(crate) fn group(&self) -> DimensionGroup {
        DimensionGroup::from_axes(self.axes())
    }
}

impl fmt::Display for DimensionsND {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_groups() {
        assert_eq!(DimensionsND::ALL.len(), 35);
        assert_eq!(
            DimensionsND::ALL
                .iter()
                .filter(|d| d.dimension_count() == 2)
                .count(),
            15
        );
    }

    #[test]
    fn test_from_axes() {
        assert_eq!(DimensionsND::from_axes(&[2, 0, 1]), Some(DimensionsND::Dimensions012));
        assert_eq!(DimensionsND::from_axes(&[4, 3]), Some(DimensionsND::Dimensions34));
        assert_eq!(DimensionsND::from_axes(&[1]), None);
        assert_eq!(DimensionsND::from_axes(&[0, 1, 2, 3]), None);
    }

    #[test]
    fn test_names_and_groups() {
        assert_eq!(DimensionsND::Dimensions012.name(), "Dimensions_012");
        assert_eq!(DimensionsND::Dimensions45.to_string(), "Dimensions_45");

        let g012 = DimensionsND::Dimensions012.group();
        let g02 = DimensionsND::Dimensions02.group();
        assert!(g02.is_subset_of(&g012));
        assert!(!g012.is_subset_of(&g02));
        assert!(g012.contains(1));
        assert!(!g02.contains(1));
    }
}
