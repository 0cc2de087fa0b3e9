//! Volume combiner
//!
//! Composites independent binary organ masks into one label volume. Masks
//! are written in priority order and a voxel is only written while it is
//! still background, so the highest-priority claimant keeps it.

use std::collections::BTreeMap;

use tracing::debug;

use crate::registry::OrganRegistry;
use crate::volume::{LabelId, LabelVolume, BACKGROUND};

/// Result of compositing one case.
#[derive(Debug)]
pub struct Combined {
    pub volume: LabelVolume,
    /// Voxels each organ claimed but lost to a higher-priority organ.
    pub lost_voxels: BTreeMap<String, usize>,
}

/// Combine organ masks into a single label volume.
///
/// # Arguments
/// * `masks` - Binary mask per organ name, all of length nx*ny*nz
/// * `registry` - Label assignment for this case
/// * `priority` - Organ names with precedence, highest first
/// * `dims` - Volume dimensions (nx, ny, nz)
pub fn combine_masks(
    masks: &BTreeMap<String, Vec<u8>>,
    registry: &OrganRegistry,
    priority: &[String],
    dims: (usize, usize, usize),
) -> Combined {
    let mut volume = LabelVolume::new(dims);
    let mut lost_voxels = BTreeMap::new();

    for entry in registry.priority_order(priority) {
        let Some(mask) = masks.get(&entry.name) else {
            continue;
        };
        let lost = composite(&mut volume.data, mask, entry.label);
        if lost > 0 {
            debug!(organ = %entry.name, lost, "voxels already claimed by higher-priority organs");
            lost_voxels.insert(entry.name.clone(), lost);
        }
    }

    Combined { volume, lost_voxels }
}

/// Write `label` into background voxels covered by `mask`.
///
/// Returns the number of covered voxels that already held another label.
fn composite(labels: &mut [LabelId], mask: &[u8], label: LabelId) -> usize {
    let mut lost = 0;
    for (v, &m) in labels.iter_mut().zip(mask.iter()) {
        if m == 0 {
            continue;
        }
        if *v == BACKGROUND {
            *v = label;
        } else if *v != label {
            lost += 1;
        }
    }
    lost
}
