//! Anatomical region table
//!
//! The classifier emits one of 24 part labels per pixel. Those labels are
//! grouped into six regions, and every output artifact is keyed by region.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of part labels the classifier can emit (`0..LABEL_COUNT`).
pub const LABEL_COUNT: i32 = 24;

/// Label used for pixels that do not belong to a person.
pub const BACKGROUND_LABEL: i32 = -1;

/// One of the six output regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    Head,
    LeftArm,
    RightArm,
    Torso,
    LeftLeg,
    RightLeg,
}

impl Region {
    /// All regions, in output order
    pub const ALL: [Region; 6] = [
        Region::Head,
        Region::LeftArm,
        Region::RightArm,
        Region::Torso,
        Region::LeftLeg,
        Region::RightLeg,
    ];

    /// Directory and filename prefix for this region
    pub fn name(&self) -> &'static str {
        match self {
            Region::Head => "head",
            Region::LeftArm => "left_arm",
            Region::RightArm => "right_arm",
            Region::Torso => "torso",
            Region::LeftLeg => "left_leg",
            Region::RightLeg => "right_leg",
        }
    }

    /// Part labels belonging to this region
    pub fn label_ids(&self) -> &'static [i32] {
        REGION_TABLE
            .iter()
            .find(|group| group.region == *self)
            .map(|group| group.labels)
            .unwrap_or(&[])
    }

    /// Region owning `label`, or `None` for background and out-of-domain labels
    pub fn for_label(label: i32) -> Option<Region> {
        REGION_TABLE
            .iter()
            .find(|group| group.labels.contains(&label))
            .map(|group| group.region)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named bucket of part labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionGroup {
    pub region: Region,
    pub labels: &'static [i32],
}

/// Label ids per region.
///
/// Front/back and upper/lower variants of a limb share a region; hands and
/// feet join their arm or leg.
pub const REGION_TABLE: [RegionGroup; 6] = [
    RegionGroup { region: Region::Head, labels: &[0, 1] },
    RegionGroup { region: Region::LeftArm, labels: &[2, 3, 6, 7, 10] },
    RegionGroup { region: Region::RightArm, labels: &[4, 5, 8, 9, 11] },
    RegionGroup { region: Region::Torso, labels: &[12, 13] },
    RegionGroup { region: Region::LeftLeg, labels: &[14, 15, 18, 19, 22] },
    RegionGroup { region: Region::RightLeg, labels: &[16, 17, 20, 21, 23] },
];

/// Check that `table` partitions `0..LABEL_COUNT`: every label is owned by
/// exactly one group and no group lists a label outside the domain.
pub fn verify_partition(table: &[RegionGroup]) -> Result<(), PipelineError> {
    let mut owner: Vec<Option<Region>> = vec![None; LABEL_COUNT as usize];

    for group in table {
        for &label in group.labels {
            if !(0..LABEL_COUNT).contains(&label) {
                return Err(PipelineError::RegionTable(format!(
                    "label {} in region {} is outside 0..{}",
                    label, group.region, LABEL_COUNT
                )));
            }
            let slot = &mut owner[label as usize];
            if let Some(existing) = slot {
                return Err(PipelineError::RegionTable(format!(
                    "label {} is claimed by both {} and {}",
                    label, existing, group.region
                )));
            }
            *slot = Some(group.region);
        }
    }

    let missing: Vec<i32> = owner
        .iter()
        .enumerate()
        .filter(|(_, region)| region.is_none())
        .map(|(label, _)| label as i32)
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::RegionTable(format!(
            "labels {:?} are not assigned to any region",
            missing
        )));
    }

    Ok(())
}
