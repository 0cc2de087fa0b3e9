//! Pancreas fragment merging
//!
//! The largest pancreas component is the anchor body. Other fragments are
//! kept only when they lie in the vertical band between the lung bases and
//! the lower border of the stomach; everything else is oversegmentation.
//! Fragments of neighbouring organs that sit in the band and are mostly
//! surrounded by pancreas are pulled into the pancreas label.
//!
//! The size filter runs first and has already merged or dropped small
//! stray pieces of those organs, so absorption acts on fragments large
//! enough to survive it (at least `min_size_ratio` of their organ's body).

use crate::components::{label_components, majority_label, neighbor_contacts, Component};
use crate::config::Orientation;
use crate::volume::{mask_bbox, LabelId, LabelVolume, BACKGROUND};

/// Parameters for pancreas merging
#[derive(Clone, Copy, Debug)]
pub struct PancreasParams {
    /// Voxels the band is widened by on each side
    pub band_margin: usize,
    pub orientation: Orientation,
}

/// Inclusive z limits; `None` on a side means unbounded.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Band {
    pub lo: Option<usize>,
    pub hi: Option<usize>,
}

impl Band {
    fn contains(&self, z_min: usize, z_max: usize) -> bool {
        self.lo.map_or(true, |lo| z_min >= lo) && self.hi.map_or(true, |hi| z_max <= hi)
    }

    fn is_unbounded(&self) -> bool {
        self.lo.is_none() && self.hi.is_none()
    }
}

/// What the merger did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PancreasOutcome {
    pub components_before: usize,
    pub components_after: usize,
    pub fragments_kept: usize,
    pub fragments_dropped: usize,
    pub dropped_voxels: usize,
    /// Foreign fragments relabeled to pancreas: (source label, voxels)
    pub absorbed: Vec<(LabelId, usize)>,
    /// `None` when neither lungs nor stomach were available
    pub band: Option<Band>,
}

/// Merge pancreas fragments by anatomical position.
///
/// # Arguments
/// * `volume` - Combined label volume, modified in place
/// * `pancreas` - Pancreas label
/// * `lungs` - Optional union of the corrected lung masks
/// * `stomach` - Optional stomach mask; its inferior border closes the band
/// * `absorb_labels` - Organs whose stray fragments may become pancreas
/// * `params` - Band margin and orientation
pub fn merge_pancreas(
    volume: &mut LabelVolume,
    pancreas: LabelId,
    lungs: Option<&[u8]>,
    stomach: Option<&[u8]>,
    absorb_labels: &[LabelId],
    params: &PancreasParams,
) -> PancreasOutcome {
    let components = label_components(&volume.binary_view(pancreas), volume.dims);
    let mut outcome = PancreasOutcome {
        components_before: components.len(),
        ..Default::default()
    };
    if components.is_empty() {
        return outcome;
    }

    let band = pancreas_band(lungs, stomach, volume.dims, params);
    outcome.band = (!band.is_unbounded()).then_some(band);

    if outcome.band.is_some() {
        for comp in &components[1..] {
            if in_band(comp, &band) {
                outcome.fragments_kept += 1;
            } else {
                volume.relabel(&comp.voxels, BACKGROUND);
                outcome.fragments_dropped += 1;
                outcome.dropped_voxels += comp.volume();
            }
        }
    } else {
        outcome.fragments_kept = components.len() - 1;
    }

    for &label in absorb_labels {
        if label == pancreas || label == BACKGROUND {
            continue;
        }
        let foreign = label_components(&volume.binary_view(label), volume.dims);
        // The organ's own main body is never absorbed
        for comp in foreign.iter().skip(1) {
            if !in_band(comp, &band) {
                continue;
            }
            let contacts = neighbor_contacts(&volume.data, &comp.voxels, label, volume.dims);
            if majority_label(&contacts) == Some(pancreas) {
                volume.relabel(&comp.voxels, pancreas);
                outcome.absorbed.push((label, comp.volume()));
            }
        }
    }

    outcome.components_after = label_components(&volume.binary_view(pancreas), volume.dims).len();
    outcome
}

fn in_band(comp: &Component, band: &Band) -> bool {
    band.contains(comp.bbox.min[2], comp.bbox.max[2])
}

/// Vertical band from the lung bases down to the stomach's lower border.
fn pancreas_band(
    lungs: Option<&[u8]>,
    stomach: Option<&[u8]>,
    dims: (usize, usize, usize),
    params: &PancreasParams,
) -> Band {
    let o = params.orientation;
    let m = params.band_margin;
    let lung_base = lungs
        .and_then(|l| mask_bbox(l, dims))
        .map(|b| o.inferior_z(b.min[2], b.max[2]));
    let stomach_floor = stomach
        .and_then(|s| mask_bbox(s, dims))
        .map(|b| o.inferior_z(b.min[2], b.max[2]));

    // Superior end comes from the lungs, inferior end from the stomach
    if o.superior_at_high_z {
        Band {
            lo: stomach_floor.map(|z| z.saturating_sub(m)),
            hi: lung_base.map(|z| z + m),
        }
    } else {
        Band {
            lo: lung_base.map(|z| z.saturating_sub(m)),
            hi: stomach_floor.map(|z| z + m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::idx3d;

    const DIMS: (usize, usize, usize) = (30, 4, 60);
    const PANCREAS: LabelId = 5;
    const STOMACH: LabelId = 6;

    fn params() -> PancreasParams {
        PancreasParams { band_margin: 2, orientation: Orientation::default() }
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

    fn mask(lo: [usize; 3], hi: [usize; 3]) -> Vec<u8> {
        let mut v = LabelVolume::new(DIMS);
        fill(&mut v, lo, hi, 1);
        v.binary_view(1)
    }

    #[test]
    fn test_fragments_outside_band_dropped() {
        let mut vol = LabelVolume::new(DIMS);
        // Lungs bottom at z = 40, stomach floor at z = 20: band 18..=42
        let lungs = mask([0, 0, 40], [29, 3, 59]);
        let stomach = mask([20, 0, 20], [29, 3, 35]);
        fill(&mut vol, [2, 0, 25], [10, 3, 30], PANCREAS); // anchor
        fill(&mut vol, [14, 0, 30], [15, 1, 32], PANCREAS); // in band
        fill(&mut vol, [14, 0, 50], [15, 1, 52], PANCREAS); // above band
        fill(&mut vol, [14, 0, 2], [15, 1, 4], PANCREAS); // below band

        let out = merge_pancreas(&mut vol, PANCREAS, Some(&lungs), Some(&stomach), &[], &params());
        assert_eq!(out.components_before, 4);
        assert_eq!(out.fragments_kept, 1);
        assert_eq!(out.fragments_dropped, 2);
        assert_eq!(out.dropped_voxels, 24);
        assert_eq!(out.components_after, 2);
        assert_eq!(out.band, Some(Band { lo: Some(18), hi: Some(42) }));
        assert_eq!(vol.count(PANCREAS), 9 * 4 * 6 + 12);
    }

    #[test]
    fn test_anchor_kept_even_outside_band() {
        let mut vol = LabelVolume::new(DIMS);
        let lungs = mask([0, 0, 40], [29, 3, 59]);
        fill(&mut vol, [2, 0, 50], [10, 3, 55], PANCREAS);
        let before = vol.count(PANCREAS);
        merge_pancreas(&mut vol, PANCREAS, Some(&lungs), None, &[], &params());
        assert_eq!(vol.count(PANCREAS), before);
    }

    #[test]
    fn test_no_anchors_keeps_everything() {
        let mut vol = LabelVolume::new(DIMS);
        fill(&mut vol, [2, 0, 25], [10, 3, 30], PANCREAS);
        fill(&mut vol, [14, 0, 50], [15, 1, 52], PANCREAS);
        let before = vol.clone();
        let out = merge_pancreas(&mut vol, PANCREAS, None, None, &[], &params());
        assert!(out.band.is_none());
        assert_eq!(out.fragments_kept, 1);
        assert_eq!(vol, before);
    }

    #[test]
    fn test_enclosed_stomach_fragment_absorbed() {
        let mut vol = LabelVolume::new(DIMS);
        let lungs = mask([0, 0, 40], [29, 3, 59]);
        fill(&mut vol, [20, 0, 20], [29, 3, 35], STOMACH);
        fill(&mut vol, [2, 0, 25], [10, 3, 30], PANCREAS);
        // Stomach-labelled island inside the pancreas body
        fill(&mut vol, [5, 1, 27], [6, 2, 28], STOMACH);
        let stomach = vol.binary_view(STOMACH);

        let out = merge_pancreas(&mut vol, PANCREAS, Some(&lungs), Some(&stomach), &[STOMACH], &params());
        assert_eq!(out.absorbed, vec![(STOMACH, 8)]);
        assert_eq!(vol.data[idx3d(5, 1, 27, 30, 4)], PANCREAS);
        // Main stomach body untouched
        assert_eq!(vol.count(STOMACH), 10 * 4 * 16);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut vol = LabelVolume::new(DIMS);
        let lungs = mask([0, 0, 40], [29, 3, 59]);
        let stomach = mask([20, 0, 20], [29, 3, 35]);
        fill(&mut vol, [2, 0, 25], [10, 3, 30], PANCREAS);
        fill(&mut vol, [14, 0, 30], [15, 1, 32], PANCREAS);
        fill(&mut vol, [14, 0, 50], [15, 1, 52], PANCREAS);
        merge_pancreas(&mut vol, PANCREAS, Some(&lungs), Some(&stomach), &[], &params());
        let once = vol.clone();
        let out = merge_pancreas(&mut vol, PANCREAS, Some(&lungs), Some(&stomach), &[], &params());
        assert_eq!(vol, once);
        assert_eq!(out.fragments_dropped, 0);
    }
}
