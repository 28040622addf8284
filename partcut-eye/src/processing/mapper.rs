//! Region mapper: label map to one boolean mask per region

use crate::models::PartLabelMap;
use crate::regions::{Region, REGION_TABLE};
use crate::resource::{BufferKind, BufferTracker, Transient};
use ndarray::{Array2, Zip};
use std::sync::Arc;
use tracing::debug;

/// Pixels of one region
#[derive(Debug, Clone, PartialEq)]
pub struct RegionMask {
    pub region: Region,
    pub mask: Array2<bool>,
    /// Number of `true` pixels
    pub pixel_count: usize,
}

impl RegionMask {
    pub fn dim(&self) -> (usize, usize) {
        self.mask.dim()
    }

    pub fn is_empty(&self) -> bool {
        self.pixel_count == 0
    }
}

/// Build the mask of pixels whose label is one of `labels`
pub fn build_mask(label_map: &PartLabelMap, labels: &[i32]) -> Array2<bool> {
    let mut mask = Array2::from_elem(label_map.dim(), false);
    Zip::from(&mut mask)
        .and(label_map.as_array())
        .for_each(|m, l| *m = labels.contains(l));
    mask
}

pub struct RegionMapper {
    tracker: Arc<BufferTracker>,
}

impl RegionMapper {
    pub fn new(tracker: Arc<BufferTracker>) -> Self {
        Self { tracker }
    }

    /// One mask per region, in `Region::ALL` order
    pub fn map_regions(&self, label_map: &PartLabelMap) -> Vec<Transient<RegionMask>> {
        REGION_TABLE
            .iter()
            .map(|group| {
                let mask = build_mask(label_map, group.labels);
                debug_assert_eq!(mask.dim(), label_map.dim());
                let pixel_count = mask.iter().filter(|m| **m).count();
                debug!("Region {}: {} pixels", group.region, pixel_count);
                self.tracker.track(
                    BufferKind::RegionMask,
                    RegionMask {
                        region: group.region,
                        mask,
                        pixel_count,
                    },
                )
            })
            .collect()
    }
}
