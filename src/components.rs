//! Connected component labeling for binary masks
//!
//! 6-connectivity (face adjacency) flood fill with an explicit stack, so
//! large organs never recurse. Components come back sorted by descending
//! volume; equal volumes keep scan order.

use crate::volume::{centroid_of, face_neighbors, BoundingBox};

/// A maximal 6-connected set of foreground voxels.
#[derive(Clone, Debug)]
pub struct Component {
    /// Flat voxel indices, in discovery order
    pub voxels: Vec<usize>,
    pub bbox: BoundingBox,
    /// Mean voxel coordinate (x, y, z)
    pub centroid: [f64; 3],
}

impl Component {
    /// Voxel count.
    pub fn volume(&self) -> usize {
        self.voxels.len()
    }
}

/// Flood fill one component of non-zero voxels starting at `start`.
fn flood_fill_component(
    mask: &[u8],
    visited: &mut [bool],
    start: usize,
    dims: (usize, usize, usize),
) -> Vec<usize> {
    let mut component = Vec::new();
    let mut stack = vec![start];
    let mut neighbors = [0usize; 6];
    visited[start] = true;

    while let Some(idx) = stack.pop() {
        component.push(idx);

        let n = face_neighbors(idx, dims, &mut neighbors);
        for &nb in &neighbors[..n] {
            if !visited[nb] && mask[nb] != 0 {
                visited[nb] = true;
                stack.push(nb);
            }
        }
    }

    component
}

/// Label all 6-connected components of a binary mask.
///
/// # Arguments
/// * `mask` - Binary mask (non-zero = foreground), Fortran order
/// * `dims` - Volume dimensions (nx, ny, nz)
///
/// # Returns
/// Components sorted by descending volume
pub fn label_components(mask: &[u8], dims: (usize, usize, usize)) -> Vec<Component> {
    let n_total = dims.0 * dims.1 * dims.2;
    debug_assert_eq!(mask.len(), n_total);
    let mut visited = vec![false; n_total];
    let mut components = Vec::new();

    for idx in 0..n_total {
        if mask[idx] == 0 || visited[idx] {
            continue;
        }
        let voxels = flood_fill_component(mask, &mut visited, idx, dims);
        // Both are Some: a component holds at least its seed voxel
        if let (Some(bbox), Some(centroid)) = (
            BoundingBox::of_indices(&voxels, dims),
            centroid_of(&voxels, dims),
        ) {
            components.push(Component { voxels, bbox, centroid });
        }
    }

    // Stable sort keeps scan order between equal volumes
    components.sort_by(|a, b| b.volume().cmp(&a.volume()));
    components
}

/// Mask of the components holding at least `ratio` of the largest one's volume.
///
/// At an organ's `min_size_ratio` these are exactly the components the size
/// filter keeps. A ratio of 1.0 keeps only the largest (and any tied with it).
pub fn core_mask(mask: &[u8], dims: (usize, usize, usize), ratio: f64) -> Vec<u8> {
    let components = label_components(mask, dims);
    let mut out = vec![0u8; mask.len()];
    let Some(largest) = components.first() else {
        return out;
    };
    let keep_at = ratio * largest.volume() as f64;
    for comp in components.iter().filter(|c| c.volume() as f64 >= keep_at) {
        for &idx in &comp.voxels {
            out[idx] = 1;
        }
    }
    out
}

/// Count face contacts between a component and neighbouring labels.
///
/// For each voxel of the component, every 6-neighbour outside the component
/// whose label is neither background nor `own_label` adds one contact to
/// that neighbour's label. Returns (label, contacts) pairs sorted by label.
pub fn neighbor_contacts(
    labels: &[u8],
    voxels: &[usize],
    own_label: u8,
    dims: (usize, usize, usize),
) -> Vec<(u8, usize)> {
    let mut counts = [0usize; 256];
    let mut neighbors = [0usize; 6];
    for &idx in voxels {
        let n = face_neighbors(idx, dims, &mut neighbors);
        for &nb in &neighbors[..n] {
            let l = labels[nb];
            if l != 0 && l != own_label {
                counts[l as usize] += 1;
            }
        }
    }
    counts
        .iter()
        .enumerate()
        .filter(|(_, &c)| c > 0)
        .map(|(l, &c)| (l as u8, c))
        .collect()
}

/// Label holding a strict majority (more than half) of all contacts.
///
/// `None` when there are no contacts or no label exceeds half, which
/// includes an exact two-way tie.
pub fn majority_label(contacts: &[(u8, usize)]) -> Option<u8> {
    let total: usize = contacts.iter().map(|&(_, c)| c).sum();
    contacts
        .iter()
        .find(|&&(_, c)| 2 * c > total)
        .map(|&(l, _)| l)
}
