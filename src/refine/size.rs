//! Generic connected-component size filter
//!
//! Components are judged against the organ's largest component:
//! large ones stay, mid-sized ones are merged into a neighbouring organ that
//! holds a strict majority of their boundary contacts (or dropped), and the
//! smallest are always dropped.

use crate::components::{label_components, majority_label, neighbor_contacts};
use crate::registry::OrganParams;
use crate::volume::{LabelId, LabelVolume, BACKGROUND};

/// What the size filter did to one organ.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RefineOutcome {
    pub components_before: usize,
    pub components_after: usize,
    pub kept: usize,
    /// (target label, voxel count) for each merged component
    pub merged: Vec<(LabelId, usize)>,
    pub dropped: usize,
    pub dropped_voxels: usize,
}

impl RefineOutcome {
    pub fn changed(&self) -> bool {
        !self.merged.is_empty() || self.dropped > 0
    }
}

/// Apply the size/merge filter to one organ of the combined volume.
///
/// An organ with no voxels yields a default (all-zero) outcome.
pub fn refine_organ(volume: &mut LabelVolume, label: LabelId, params: &OrganParams) -> RefineOutcome {
    let mask = volume.binary_view(label);
    let components = label_components(&mask, volume.dims);
    let Some(largest) = components.first() else {
        return RefineOutcome::default();
    };

    let v_max = largest.volume() as f64;
    let keep_at = params.min_size_ratio * v_max;
    let merge_at = params.min_merge_ratio * v_max;

    let mut outcome = RefineOutcome {
        components_before: components.len(),
        ..Default::default()
    };

    for comp in &components {
        let v = comp.volume() as f64;
        if v >= keep_at {
            outcome.kept += 1;
            continue;
        }

        let target = if v >= merge_at {
            let contacts = neighbor_contacts(&volume.data, &comp.voxels, label, volume.dims);
            majority_label(&contacts)
        } else {
            None
        };

        match target {
            Some(t) => {
                volume.relabel(&comp.voxels, t);
                outcome.merged.push((t, comp.volume()));
            }
            None => {
                volume.relabel(&comp.voxels, BACKGROUND);
                outcome.dropped += 1;
                outcome.dropped_voxels += comp.volume();
            }
        }
    }

    outcome.components_after = outcome.kept;
    outcome
}
