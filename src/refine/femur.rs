//! Femur left/right classification
//!
//! Segmenters swap or merge the two femurs, so components are computed on
//! the union of both labels. The largest components are taken as the femur
//! bodies and labelled by which side of the midline their centroid falls
//! on. Small leftovers are kept only when they sit lateral to and not above
//! the bladder.

use crate::components::{label_components, Component};
use crate::config::{Orientation, Side};
use crate::volume::{mask_bbox, mask_count, LabelId, LabelVolume, BACKGROUND};

/// Parameters for femur classification
#[derive(Clone, Copy, Debug)]
pub struct FemurParams {
    pub bladder_volume_threshold: usize,
    /// Second component is a femur body at or above this fraction of the largest
    pub body_min_ratio: f64,
    /// Voxels a fragment may extend above the bladder top
    pub superior_margin: usize,
    pub orientation: Orientation,
}

/// What the classifier did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FemurOutcome {
    pub components_before: usize,
    pub components_after: usize,
    /// Femur bodies whose label changed
    pub bodies_relabeled: usize,
    /// Fragments kept after the positional check
    pub fragments_kept: usize,
    pub fragments_dropped: usize,
    pub dropped_voxels: usize,
    /// False when the bladder was unusable and fragments were left alone
    pub positional_filter_applied: bool,
}

/// Reassign femur components to the anatomically correct side.
///
/// # Arguments
/// * `volume` - Combined label volume, modified in place
/// * `left_label`, `right_label` - Femur labels for this case
/// * `bladder` - Optional bladder mask for the positional check
/// * `midline` - Sagittal midline x coordinate
/// * `params` - Thresholds and orientation
pub fn classify_femurs(
    volume: &mut LabelVolume,
    left_label: LabelId,
    right_label: LabelId,
    bladder: Option<&[u8]>,
    midline: f64,
    params: &FemurParams,
) -> FemurOutcome {
    let union = volume.binary_view_any(&[left_label, right_label]);
    let components = label_components(&union, volume.dims);
    let mut outcome = FemurOutcome {
        components_before: components.len(),
        ..Default::default()
    };
    let Some(largest) = components.first() else {
        return outcome;
    };

    let n_bodies = match components.get(1) {
        Some(second) if second.volume() as f64 >= params.body_min_ratio * largest.volume() as f64 => 2,
        _ => 1,
    };

    let label_for = |comp: &Component| match params.orientation.side_of(comp.centroid[0], midline) {
        Side::Left => left_label,
        Side::Right => right_label,
    };

    for comp in &components[..n_bodies] {
        let target = label_for(comp);
        if comp.voxels.iter().any(|&i| volume.data[i] != target) {
            outcome.bodies_relabeled += 1;
        }
        volume.relabel(&comp.voxels, target);
    }

    let anchor = bladder
        .filter(|b| mask_count(b) >= params.bladder_volume_threshold)
        .and_then(|b| mask_bbox(b, volume.dims));

    let Some(bladder_bbox) = anchor else {
        outcome.components_after = components.len();
        return outcome;
    };
    outcome.positional_filter_applied = true;

    let o = params.orientation;
    let bladder_top = o.superior_z(bladder_bbox.min[2], bladder_bbox.max[2]);
    for comp in &components[n_bodies..] {
        let cx = comp.centroid[0];
        let lateral = cx < bladder_bbox.min[0] as f64 || cx > bladder_bbox.max[0] as f64;
        let top = o.superior_z(comp.bbox.min[2], comp.bbox.max[2]);
        let not_above = o.height_above(top, bladder_top) <= params.superior_margin as i64;

        if lateral && not_above {
            volume.relabel(&comp.voxels, label_for(comp));
            outcome.fragments_kept += 1;
        } else {
            volume.relabel(&comp.voxels, BACKGROUND);
            outcome.fragments_dropped += 1;
            outcome.dropped_voxels += comp.volume();
        }
    }

    outcome.components_after = n_bodies + outcome.fragments_kept;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::idx3d;

    const DIMS: (usize, usize, usize) = (80, 6, 40);
    const LEFT: LabelId = 3;
    const RIGHT: LabelId = 4;

    fn params() -> FemurParams {
        FemurParams {
            bladder_volume_threshold: 10,
            body_min_ratio: 0.1,
            superior_margin: 0,
            orientation: Orientation::default(),
        }
    }

    fn fill(vol: &mut LabelVolume, lo: [usize; 3], hi: [usize; 3], label: LabelId) {
        let (nx, ny, _) = vol.dims;
        for k in lo[2]..=hi[2] {
            for j in lo[1]..=hi[1] {
                for i in lo[0]..=hi[0] {
                    vol.data[idx3d(i, j, k, nx, ny)] = label;
                }
            }
        }
    }

    fn bladder_mask(lo: [usize; 3], hi: [usize; 3]) -> Vec<u8> {
        let mut v = LabelVolume::new(DIMS);
        fill(&mut v, lo, hi, 1);
        v.binary_view(1)
    }

    /// Midline at x = 40. Bodies of 200 and 180 voxels centred at x = 10 and
    /// x = 70 (offsets -30 and +30), a 10-voxel fragment at x = 45 (+5).
    fn swapped_case() -> LabelVolume {
        let mut vol = LabelVolume::new(DIMS);
        // 5 x 5 x 8 = 200, labelled as the wrong side
        fill(&mut vol, [8, 0, 0], [12, 4, 7], RIGHT);
        // 5 x 4 x 9 = 180, also wrong
        fill(&mut vol, [68, 0, 0], [72, 3, 8], LEFT);
        // 10 voxels, z 0..=1
        fill(&mut vol, [43, 5, 0], [47, 5, 1], LEFT);
        vol
    }

    #[test]
    fn test_bodies_relabeled_and_fragment_dropped() {
        let mut vol = swapped_case();
        let bladder = bladder_mask([35, 0, 10], [50, 5, 20]);

        let out = classify_femurs(&mut vol, LEFT, RIGHT, Some(&bladder), 40.0, &params());
        assert_eq!(out.components_before, 3);
        assert_eq!(out.bodies_relabeled, 2);
        assert!(out.positional_filter_applied);
        assert_eq!(out.fragments_dropped, 1);
        assert_eq!(out.dropped_voxels, 10);
        assert_eq!(out.components_after, 2);

        assert_eq!(vol.count(LEFT), 200);
        assert_eq!(vol.count(RIGHT), 180);
        assert_eq!(vol.data[idx3d(10, 0, 0, 80, 6)], LEFT);
        assert_eq!(vol.data[idx3d(70, 0, 0, 80, 6)], RIGHT);
        assert_eq!(vol.data[idx3d(45, 5, 0, 80, 6)], BACKGROUND);
    }

    #[test]
    fn test_lateral_fragment_below_bladder_kept_on_its_side() {
        let mut vol = swapped_case();
        // Fragment lateral to the bladder on the right side
        fill(&mut vol, [60, 5, 0], [61, 5, 1], LEFT);
        let bladder = bladder_mask([35, 0, 10], [50, 5, 20]);

        let out = classify_femurs(&mut vol, LEFT, RIGHT, Some(&bladder), 40.0, &params());
        assert_eq!(out.fragments_kept, 1);
        assert_eq!(vol.data[idx3d(60, 5, 0, 80, 6)], RIGHT);
    }

    #[test]
    fn test_fragment_above_bladder_dropped() {
        let mut vol = swapped_case();
        fill(&mut vol, [60, 5, 30], [61, 5, 31], RIGHT);
        let bladder = bladder_mask([35, 0, 10], [50, 5, 20]);

        classify_femurs(&mut vol, LEFT, RIGHT, Some(&bladder), 40.0, &params());
        assert_eq!(vol.data[idx3d(60, 5, 30, 80, 6)], BACKGROUND);
    }

    #[test]
    fn test_without_bladder_only_bodies_are_relabeled() {
        let mut vol = swapped_case();
        let out = classify_femurs(&mut vol, LEFT, RIGHT, None, 40.0, &params());
        assert!(!out.positional_filter_applied);
        assert_eq!(out.bodies_relabeled, 2);
        assert_eq!(out.fragments_dropped, 0);
        // Fragment untouched
        assert_eq!(vol.data[idx3d(45, 5, 0, 80, 6)], LEFT);
        assert_eq!(vol.count(LEFT), 210);
    }

    #[test]
    fn test_small_bladder_disables_positional_filter() {
        let mut vol = swapped_case();
        let bladder = bladder_mask([40, 0, 10], [40, 0, 11]);
        let out = classify_femurs(&mut vol, LEFT, RIGHT, Some(&bladder), 40.0, &params());
        assert!(!out.positional_filter_applied);
    }

    #[test]
    fn test_single_femur_with_tiny_second_component() {
        let mut vol = LabelVolume::new(DIMS);
        fill(&mut vol, [8, 0, 0], [12, 4, 7], LEFT);
        fill(&mut vol, [60, 0, 30], [60, 0, 30], LEFT);
        let bladder = bladder_mask([35, 0, 10], [50, 5, 20]);

        let out = classify_femurs(&mut vol, LEFT, RIGHT, Some(&bladder), 40.0, &params());
        // The 1-voxel piece is a fragment, not a body, and sits above the bladder
        assert_eq!(out.fragments_dropped, 1);
        assert_eq!(vol.count(RIGHT), 0);
        assert_eq!(vol.count(LEFT), 200);
    }

    #[test]
    fn test_classification_is_idempotent() {
        let mut vol = swapped_case();
        let bladder = bladder_mask([35, 0, 10], [50, 5, 20]);
        classify_femurs(&mut vol, LEFT, RIGHT, Some(&bladder), 40.0, &params());
        let once = vol.clone();
        let out = classify_femurs(&mut vol, LEFT, RIGHT, Some(&bladder), 40.0, &params());
        assert_eq!(vol, once);
        assert_eq!(out.bodies_relabeled, 0);
        assert_eq!(out.fragments_dropped, 0);
    }

    #[test]
    fn test_empty_femurs_noop() {
        let mut vol = LabelVolume::new(DIMS);
        let out = classify_femurs(&mut vol, LEFT, RIGHT, None, 40.0, &params());
        assert_eq!(out, FemurOutcome::default());
    }
}
