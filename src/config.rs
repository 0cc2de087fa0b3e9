//! Refinement configuration
//!
//! Every threshold and margin used by the anatomical heuristics lives here so
//! that it can be overridden from a JSON file. All structs deserialize with
//! defaults, so a config file only needs the keys it changes.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{RefineError, Result};

/// Top-level configuration for a refinement run.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RefineConfig {
    /// Components smaller than this fraction of the largest same-organ
    /// component are candidates for merge or removal.
    pub min_size_ratio: f64,
    /// Candidates at or above this fraction are merged into a neighbouring
    /// organ when one dominates their boundary; smaller ones are dropped.
    pub min_merge_ratio: f64,
    /// Minimum voxel count for a lung to anchor the liver vertical constraint.
    pub lung_volume_threshold: usize,
    /// Minimum voxel count for the bladder to act as an anchor.
    pub bladder_volume_threshold: usize,
    /// Distance in voxels past the midline before a single-lung voxel is moved.
    pub lung_midline_margin: f64,
    /// Extra voxels allowed above/below the liver's vertical anchors.
    pub liver_vertical_margin: usize,
    /// Second-largest femur component counts as a femur body only at or above
    /// this fraction of the largest.
    pub femur_body_min_ratio: f64,
    /// Voxels a small femur fragment may reach above the bladder top.
    pub femur_superior_margin: usize,
    /// Voxels by which the pancreas band is widened on each side.
    pub pancreas_band_margin: usize,
    /// Organs whose stray fragments may be absorbed into the pancreas.
    pub pancreas_absorb_organs: Vec<String>,
    /// Compositing priority, highest first. Unlisted organs follow by label id.
    pub priority: Vec<String>,
    /// Per-organ parameter overrides keyed by organ name.
    pub organs: BTreeMap<String, OrganOverride>,
    pub anatomy: AnatomyNames,
    pub orientation: Orientation,
    /// Directory inside each case holding the per-organ mask files.
    pub mask_subdir: String,
    /// Also write the combined label volume next to the per-organ masks.
    pub save_combined: bool,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            min_size_ratio: 0.25,
            min_merge_ratio: 0.075,
            lung_volume_threshold: 10_000,
            bladder_volume_threshold: 10_000,
            lung_midline_margin: 5.0,
            liver_vertical_margin: 0,
            femur_body_min_ratio: 0.1,
            femur_superior_margin: 0,
            pancreas_band_margin: 5,
            pancreas_absorb_organs: vec!["stomach".to_string(), "duodenum".to_string()],
            priority: Vec::new(),
            organs: BTreeMap::new(),
            anatomy: AnatomyNames::default(),
            orientation: Orientation::default(),
            mask_subdir: "segmentations".to_string(),
            save_combined: true,
        }
    }
}

impl RefineConfig {
    /// Reject ratio settings the refiner cannot interpret.
    pub fn validate(&self) -> Result<()> {
        check_ratio("min_size_ratio", self.min_size_ratio)?;
        check_ratio("min_merge_ratio", self.min_merge_ratio)?;
        check_ratio("femur_body_min_ratio", self.femur_body_min_ratio)?;
        if self.min_merge_ratio > self.min_size_ratio {
            return Err(RefineError::Config(format!(
                "min_merge_ratio ({}) must not exceed min_size_ratio ({})",
                self.min_merge_ratio, self.min_size_ratio
            )));
        }
        if self.lung_midline_margin.is_nan() || self.lung_midline_margin < 0.0 {
            return Err(RefineError::Config(format!(
                "lung_midline_margin must be non-negative, got {}",
                self.lung_midline_margin
            )));
        }
        for (organ, o) in &self.organs {
            let size = o.min_size_ratio.unwrap_or(self.min_size_ratio);
            let merge = o.min_merge_ratio.unwrap_or(self.min_merge_ratio);
            check_ratio(&format!("organs.{organ}.min_size_ratio"), size)?;
            check_ratio(&format!("organs.{organ}.min_merge_ratio"), merge)?;
            if merge > size {
                return Err(RefineError::Config(format!(
                    "organs.{organ}: min_merge_ratio ({merge}) exceeds min_size_ratio ({size})"
                )));
            }
        }
        Ok(())
    }
}

fn check_ratio(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(RefineError::Config(format!("{name} must lie in [0, 1], got {value}")))
    }
}

/// Per-organ overrides of the default refiner parameters.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct OrganOverride {
    pub min_size_ratio: Option<f64>,
    pub min_merge_ratio: Option<f64>,
    /// Set to false to exclude the organ from the generic component refiner.
    pub refine: Option<bool>,
}

/// Organ names (mask file stems) that carry an anatomical role.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AnatomyNames {
    pub aorta: String,
    pub lung_left: String,
    pub lung_right: String,
    pub liver: String,
    pub bladder: String,
    pub femur_left: String,
    pub femur_right: String,
    pub pancreas: String,
    pub stomach: String,
}

impl Default for AnatomyNames {
    fn default() -> Self {
        Self {
            aorta: "aorta".to_string(),
            lung_left: "lung_left".to_string(),
            lung_right: "lung_right".to_string(),
            liver: "liver".to_string(),
            bladder: "urinary_bladder".to_string(),
            femur_left: "femur_left".to_string(),
            femur_right: "femur_right".to_string(),
            pancreas: "pancreas".to_string(),
            stomach: "stomach".to_string(),
        }
    }
}

/// How grid axes map onto patient directions.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct Orientation {
    /// Patient left lies towards lower x indices.
    pub left_at_low_x: bool,
    /// Superior lies towards higher z indices.
    pub superior_at_high_z: bool,
}

impl Default for Orientation {
    fn default() -> Self {
        Self {
            left_at_low_x: true,
            superior_at_high_z: true,
        }
    }
}

/// Patient side of a lateral structure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Orientation {
    /// Side of the midline a given x coordinate falls on.
    ///
    /// Coordinates exactly on the midline belong to the high-x side.
    pub fn side_of(&self, x: f64, midline: f64) -> Side {
        let low = x < midline;
        if low == self.left_at_low_x {
            Side::Left
        } else {
            Side::Right
        }
    }

    /// Inferior-most z index of a bounding box.
    pub fn inferior_z(&self, min_z: usize, max_z: usize) -> usize {
        if self.superior_at_high_z { min_z } else { max_z }
    }

    /// Superior-most z index of a bounding box.
    pub fn superior_z(&self, min_z: usize, max_z: usize) -> usize {
        if self.superior_at_high_z { max_z } else { min_z }
    }

    /// Signed distance by which `z` lies above `reference` (positive = superior).
    pub fn height_above(&self, z: usize, reference: usize) -> i64 {
        let d = z as i64 - reference as i64;
        if self.superior_at_high_z { d } else { -d }
    }
}

/// Load a configuration file, falling back to defaults for missing keys.
pub fn load_config(path: &Path) -> Result<RefineConfig> {
    let data = fs::read_to_string(path).map_err(|e| RefineError::io(path, e))?;
    let config: RefineConfig = serde_json::from_str(&data)
        .map_err(|e| RefineError::Config(format!("failed to parse {}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}
