//! Left/right lung overlap resolution
//!
//! A sagittal midline is taken from the aorta centroid, or from the centre
//! of the lungs' bounding box when no aorta is available. The box can come
//! from a separate mask so that stray noise does not widen it. Voxels
//! claimed by both lungs go to the side of the midline they lie on; voxels
//! claimed by one lung but lying clearly on the other side are moved.

use crate::config::{Orientation, Side};
use crate::volume::{mask_bbox, mask_centroid, mask_union};

/// Where the midline came from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MidlineSource {
    Aorta,
    LungBounds,
}

/// Resolved lung masks.
#[derive(Clone, Debug)]
pub struct LungResolution {
    pub left: Vec<u8>,
    pub right: Vec<u8>,
    /// `None` when both input masks were empty
    pub midline: Option<(f64, MidlineSource)>,
    /// Voxels claimed by both masks
    pub overlap_voxels: usize,
    /// Single-claim voxels moved across the midline
    pub moved_voxels: usize,
}

/// Parameters for lung overlap resolution
#[derive(Clone, Copy, Debug)]
pub struct LungParams {
    /// Voxels past the midline before a single-claim voxel is reassigned
    pub margin: f64,
    pub orientation: Orientation,
}

/// Resolve left/right lung conflicts.
///
/// # Arguments
/// * `left`, `right` - Binary lung masks
/// * `aorta` - Optional aorta mask used for the midline
/// * `bounds` - Optional mask for the bounding-box midline, defaults to the
///   union of both lungs
/// * `dims` - Volume dimensions (nx, ny, nz)
/// * `params` - Margin and axis orientation
///
/// # Returns
/// Disjoint masks whose union equals the union of the inputs
pub fn resolve_lung_overlap(
    left: &[u8],
    right: &[u8],
    aorta: Option<&[u8]>,
    bounds: Option<&[u8]>,
    dims: (usize, usize, usize),
    params: &LungParams,
) -> LungResolution {
    let union = mask_union(left, right);
    let Some(midline) = find_midline(bounds.unwrap_or(&union), aorta, dims) else {
        return LungResolution {
            left: left.to_vec(),
            right: right.to_vec(),
            midline: None,
            overlap_voxels: 0,
            moved_voxels: 0,
        };
    };
    let (mid, _) = midline;
    let (nx, ny, _) = dims;

    let mut out_left = vec![0u8; left.len()];
    let mut out_right = vec![0u8; right.len()];
    let mut overlap_voxels = 0;
    let mut moved_voxels = 0;

    for idx in 0..union.len() {
        let in_left = left[idx] != 0;
        let in_right = right[idx] != 0;
        if !in_left && !in_right {
            continue;
        }
        let x = (idx % (nx * ny) % nx) as f64;
        let side = params.orientation.side_of(x, mid);

        let assigned = if in_left && in_right {
            overlap_voxels += 1;
            side
        } else {
            let claimed = if in_left { Side::Left } else { Side::Right };
            if side != claimed && (x - mid).abs() > params.margin {
                moved_voxels += 1;
                side
            } else {
                claimed
            }
        };

        match assigned {
            Side::Left => out_left[idx] = 1,
            Side::Right => out_right[idx] = 1,
        }
    }

    LungResolution {
        left: out_left,
        right: out_right,
        midline: Some(midline),
        overlap_voxels,
        moved_voxels,
    }
}

fn find_midline(
    lung_bounds: &[u8],
    aorta: Option<&[u8]>,
    dims: (usize, usize, usize),
) -> Option<(f64, MidlineSource)> {
    let lungs = mask_bbox(lung_bounds, dims)?;
    if let Some(c) = aorta.and_then(|a| mask_centroid(a, dims)) {
        return Some((c[0], MidlineSource::Aorta));
    }
    Some((lungs.center_x(), MidlineSource::LungBounds))
}
