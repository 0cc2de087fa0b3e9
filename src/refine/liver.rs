//! Liver extent filter
//!
//! Two axis-aligned constraints, applied as intersections:
//! - horizontal: liver x must lie within the lungs' combined x range
//! - vertical: liver z must lie between the right lung base and the bladder
//!   top, when both anchors are large enough to trust

use crate::config::Orientation;
use crate::volume::{mask_bbox, mask_count, mask_union, BoundingBox};

/// Parameters for the liver filter
#[derive(Clone, Copy, Debug)]
pub struct LiverParams {
    pub lung_volume_threshold: usize,
    pub bladder_volume_threshold: usize,
    /// Voxels added on both ends of the vertical range
    pub vertical_margin: usize,
    pub orientation: Orientation,
}

/// Why a liver constraint did not run.
#[derive(Clone, Debug, PartialEq)]
pub enum LiverSkip {
    NoLungs,
    RightLungMissing,
    RightLungTooSmall { voxels: usize, threshold: usize },
    BladderMissing,
    BladderTooSmall { voxels: usize, threshold: usize },
}

impl std::fmt::Display for LiverSkip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LiverSkip::NoLungs => write!(f, "both lung masks are empty"),
            LiverSkip::RightLungMissing => write!(f, "right lung is missing"),
            LiverSkip::RightLungTooSmall { voxels, threshold } => {
                write!(f, "right lung has {voxels} voxels, below threshold {threshold}")
            }
            LiverSkip::BladderMissing => write!(f, "bladder is missing"),
            LiverSkip::BladderTooSmall { voxels, threshold } => {
                write!(f, "bladder has {voxels} voxels, below threshold {threshold}")
            }
        }
    }
}

/// Outcome of one constraint.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstraintResult {
    Applied { removed: usize },
    Skipped(LiverSkip),
}

/// Filtered liver mask and what each constraint did.
#[derive(Clone, Debug)]
pub struct LiverOutcome {
    pub mask: Vec<u8>,
    pub horizontal: ConstraintResult,
    pub vertical: ConstraintResult,
}

/// Restrict a liver mask to its plausible extent.
///
/// # Arguments
/// * `liver` - Binary liver mask
/// * `lung_left`, `lung_right` - Corrected lung masks (either may be absent)
/// * `bladder` - Optional bladder mask
/// * `dims` - Volume dimensions (nx, ny, nz)
pub fn filter_liver(
    liver: &[u8],
    lung_left: Option<&[u8]>,
    lung_right: Option<&[u8]>,
    bladder: Option<&[u8]>,
    dims: (usize, usize, usize),
    params: &LiverParams,
) -> LiverOutcome {
    let lungs_bbox = match (lung_left, lung_right) {
        (Some(l), Some(r)) => mask_bbox(&mask_union(l, r), dims),
        (Some(m), None) | (None, Some(m)) => mask_bbox(m, dims),
        (None, None) => None,
    };
    let Some(lungs_bbox) = lungs_bbox else {
        return LiverOutcome {
            mask: liver.to_vec(),
            horizontal: ConstraintResult::Skipped(LiverSkip::NoLungs),
            vertical: ConstraintResult::Skipped(LiverSkip::NoLungs),
        };
    };

    let (x_lo, x_hi) = (lungs_bbox.min[0], lungs_bbox.max[0]);
    let z_range = vertical_range(lung_right, bladder, dims, params);

    let (nx, ny, _) = dims;
    let plane = nx * ny;
    let mut mask = liver.to_vec();
    let mut removed_h = 0;
    let mut removed_v = 0;

    for (idx, v) in mask.iter_mut().enumerate() {
        if *v == 0 {
            continue;
        }
        let x = idx % plane % nx;
        let z = idx / plane;
        if x < x_lo || x > x_hi {
            *v = 0;
            removed_h += 1;
        } else if let Ok((z_lo, z_hi)) = z_range {
            if z < z_lo || z > z_hi {
                *v = 0;
                removed_v += 1;
            }
        }
    }

    LiverOutcome {
        mask,
        horizontal: ConstraintResult::Applied { removed: removed_h },
        vertical: match z_range {
            Ok(_) => ConstraintResult::Applied { removed: removed_v },
            Err(skip) => ConstraintResult::Skipped(skip),
        },
    }
}

/// Inclusive z range between the right lung base and the bladder top.
fn vertical_range(
    lung_right: Option<&[u8]>,
    bladder: Option<&[u8]>,
    dims: (usize, usize, usize),
    params: &LiverParams,
) -> Result<(usize, usize), LiverSkip> {
    let lung = reliable_bbox(
        lung_right,
        params.lung_volume_threshold,
        dims,
        LiverSkip::RightLungMissing,
        |voxels, threshold| LiverSkip::RightLungTooSmall { voxels, threshold },
    )?;
    let bladder = reliable_bbox(
        bladder,
        params.bladder_volume_threshold,
        dims,
        LiverSkip::BladderMissing,
        |voxels, threshold| LiverSkip::BladderTooSmall { voxels, threshold },
    )?;

    let o = params.orientation;
    let lung_base = o.inferior_z(lung.min[2], lung.max[2]);
    let bladder_top = o.superior_z(bladder.min[2], bladder.max[2]);
    let lo = lung_base.min(bladder_top).saturating_sub(params.vertical_margin);
    let hi = lung_base.max(bladder_top) + params.vertical_margin;
    Ok((lo, hi))
}

fn reliable_bbox(
    mask: Option<&[u8]>,
    threshold: usize,
    dims: (usize, usize, usize),
    missing: LiverSkip,
    too_small: impl Fn(usize, usize) -> LiverSkip,
) -> Result<BoundingBox, LiverSkip> {
    let mask = mask.ok_or(missing.clone())?;
    let voxels = mask_count(mask);
    if voxels == 0 {
        return Err(missing);
    }
    if voxels < threshold {
        return Err(too_small(voxels, threshold));
    }
    mask_bbox(mask, dims).ok_or(missing)
}
