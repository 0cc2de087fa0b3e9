//! Voxel grid, binary mask statistics and the combined label volume
//!
//! All volumes are flattened in Fortran (column-major) order to match the
//! NIfTI convention: index = x + y*nx + z*nx*ny.

use crate::error::{RefineError, Result};

/// Label id stored in the combined volume; 0 is background.
pub type LabelId = u8;

pub const BACKGROUND: LabelId = 0;

const SPACING_TOLERANCE: f64 = 1e-4;
const AFFINE_TOLERANCE: f64 = 1e-3;

/// Convert 3D index to flat index (Fortran order)
#[inline(always)]
pub fn idx3d(i: usize, j: usize, k: usize, nx: usize, ny: usize) -> usize {
    i + j * nx + k * nx * ny
}

/// Shape and physical placement shared by every volume of a case.
#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
    /// Dimensions (nx, ny, nz)
    pub dims: (usize, usize, usize),
    /// Voxel sizes in mm
    pub voxel_size: (f64, f64, f64),
    /// Affine transformation matrix (4x4, row-major)
    pub affine: [f64; 16],
}

impl Grid {
    /// Grid with unit spacing and an identity affine.
    pub fn with_dims(nx: usize, ny: usize, nz: usize) -> Self {
        let mut affine = [0.0; 16];
        affine[0] = 1.0;
        affine[5] = 1.0;
        affine[10] = 1.0;
        affine[15] = 1.0;
        Self {
            dims: (nx, ny, nz),
            voxel_size: (1.0, 1.0, 1.0),
            affine,
        }
    }

    pub fn len(&self) -> usize {
        self.dims.0 * self.dims.1 * self.dims.2
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline(always)]
    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        idx3d(i, j, k, self.dims.0, self.dims.1)
    }

    /// Inverse of [`Grid::index`].
    #[inline(always)]
    pub fn coords(&self, idx: usize) -> (usize, usize, usize) {
        coords(idx, self.dims)
    }

    /// Check that `other` can share a voxel grid with `self`.
    ///
    /// Extent must match exactly; spacing and affine within a small tolerance
    /// since they round-trip through f32 header fields.
    pub fn check_compatible(&self, other: &Grid, organ: &str) -> Result<()> {
        let mismatch = |detail: String| RefineError::GeometryMismatch {
            organ: organ.to_string(),
            detail,
        };
        if self.dims != other.dims {
            return Err(mismatch(format!(
                "extent {:?} differs from case grid {:?}",
                other.dims, self.dims
            )));
        }
        let (a, b) = (self.voxel_size, other.voxel_size);
        if (a.0 - b.0).abs() > SPACING_TOLERANCE
            || (a.1 - b.1).abs() > SPACING_TOLERANCE
            || (a.2 - b.2).abs() > SPACING_TOLERANCE
        {
            return Err(mismatch(format!(
                "voxel size {:?} differs from case grid {:?}",
                b, a
            )));
        }
        if let Some(i) = (0..16).find(|&i| (self.affine[i] - other.affine[i]).abs() > AFFINE_TOLERANCE) {
            return Err(mismatch(format!(
                "affine[{}] = {} differs from case grid value {}",
                i, other.affine[i], self.affine[i]
            )));
        }
        Ok(())
    }
}

#[inline(always)]
fn coords(idx: usize, dims: (usize, usize, usize)) -> (usize, usize, usize) {
    let (nx, ny, _) = dims;
    let k = idx / (nx * ny);
    let rem = idx % (nx * ny);
    (rem % nx, rem / nx, k)
}

/// Flat indices of the 6-connected (face) neighbours of `idx`.
///
/// Writes into `out` and returns how many entries are valid.
#[inline]
pub fn face_neighbors(idx: usize, dims: (usize, usize, usize), out: &mut [usize; 6]) -> usize {
    let (nx, ny, nz) = dims;
    let (i, j, k) = coords(idx, dims);
    let plane = nx * ny;
    let mut n = 0;
    if i > 0 { out[n] = idx - 1; n += 1; }
    if i + 1 < nx { out[n] = idx + 1; n += 1; }
    if j > 0 { out[n] = idx - nx; n += 1; }
    if j + 1 < ny { out[n] = idx + nx; n += 1; }
    if k > 0 { out[n] = idx - plane; n += 1; }
    if k + 1 < nz { out[n] = idx + plane; n += 1; }
    n
}

/// Axis-aligned inclusive bounding box in voxel indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub min: [usize; 3],
    pub max: [usize; 3],
}

impl BoundingBox {
    fn from_point(i: usize, j: usize, k: usize) -> Self {
        Self { min: [i, j, k], max: [i, j, k] }
    }

    fn include(&mut self, i: usize, j: usize, k: usize) {
        let p = [i, j, k];
        for a in 0..3 {
            self.min[a] = self.min[a].min(p[a]);
            self.max[a] = self.max[a].max(p[a]);
        }
    }

    /// Midpoint along x.
    pub fn center_x(&self) -> f64 {
        (self.min[0] + self.max[0]) as f64 / 2.0
    }

    /// Bounding box of a set of flat indices.
    pub fn of_indices(indices: &[usize], dims: (usize, usize, usize)) -> Option<BoundingBox> {
        let mut iter = indices.iter();
        let first = *iter.next()?;
        let (i, j, k) = coords(first, dims);
        let mut bbox = BoundingBox::from_point(i, j, k);
        for &idx in iter {
            let (i, j, k) = coords(idx, dims);
            bbox.include(i, j, k);
        }
        Some(bbox)
    }
}

/// Number of foreground voxels in a binary mask.
pub fn mask_count(mask: &[u8]) -> usize {
    mask.iter().filter(|&&m| m != 0).count()
}

/// Bounding box of the foreground of a mask, `None` when empty.
pub fn mask_bbox(mask: &[u8], dims: (usize, usize, usize)) -> Option<BoundingBox> {
    let mut bbox: Option<BoundingBox> = None;
    for (idx, &m) in mask.iter().enumerate() {
        if m == 0 {
            continue;
        }
        let (i, j, k) = coords(idx, dims);
        match bbox.as_mut() {
            Some(b) => b.include(i, j, k),
            None => bbox = Some(BoundingBox::from_point(i, j, k)),
        }
    }
    bbox
}

/// Mean voxel coordinate of the foreground, `None` when empty.
pub fn mask_centroid(mask: &[u8], dims: (usize, usize, usize)) -> Option<[f64; 3]> {
    let indices: Vec<usize> = mask
        .iter()
        .enumerate()
        .filter(|(_, &m)| m != 0)
        .map(|(i, _)| i)
        .collect();
    centroid_of(&indices, dims)
}

/// Mean voxel coordinate of a list of flat indices.
pub fn centroid_of(indices: &[usize], dims: (usize, usize, usize)) -> Option<[f64; 3]> {
    if indices.is_empty() {
        return None;
    }
    let mut sum = [0.0f64; 3];
    for &idx in indices {
        let (i, j, k) = coords(idx, dims);
        sum[0] += i as f64;
        sum[1] += j as f64;
        sum[2] += k as f64;
    }
    let n = indices.len() as f64;
    Some([sum[0] / n, sum[1] / n, sum[2] / n])
}

/// Voxel-wise OR of two masks.
pub fn mask_union(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b.iter()).map(|(&x, &y)| u8::from(x != 0 || y != 0)).collect()
}

/// The combined label volume: at most one organ label per voxel.
#[derive(Clone, Debug, PartialEq)]
pub struct LabelVolume {
    pub dims: (usize, usize, usize),
    pub data: Vec<LabelId>,
}

impl LabelVolume {
    pub fn new(dims: (usize, usize, usize)) -> Self {
        Self { dims, data: vec![BACKGROUND; dims.0 * dims.1 * dims.2] }
    }

    pub fn from_data(dims: (usize, usize, usize), data: Vec<LabelId>) -> Result<Self> {
        let expected = dims.0 * dims.1 * dims.2;
        if data.len() != expected {
            return Err(RefineError::InvalidVolume(format!(
                "label data has {} voxels, dims {:?} need {}",
                data.len(),
                dims,
                expected
            )));
        }
        Ok(Self { dims, data })
    }

    /// Binary view of all voxels currently holding `label`.
    pub fn binary_view(&self, label: LabelId) -> Vec<u8> {
        self.data.iter().map(|&v| u8::from(v == label)).collect()
    }

    /// Binary view of voxels holding any of `labels`.
    pub fn binary_view_any(&self, labels: &[LabelId]) -> Vec<u8> {
        self.data.iter().map(|v| u8::from(*v != BACKGROUND && labels.contains(v))).collect()
    }

    pub fn count(&self, label: LabelId) -> usize {
        self.data.iter().filter(|&&v| v == label).count()
    }

    /// Assign `label` to every voxel in `indices`.
    pub fn relabel(&mut self, indices: &[usize], label: LabelId) {
        for &idx in indices {
            self.data[idx] = label;
        }
    }

    /// Check that every voxel is background or one of `valid` labels.
    pub fn validate(&self, valid: &[LabelId]) -> Result<()> {
        match self
            .data
            .iter()
            .enumerate()
            .find(|(_, &v)| v != BACKGROUND && !valid.contains(&v))
        {
            Some((index, &label)) => Err(RefineError::InvalidLabel { index, label }),
            None => Ok(()),
        }
    }
}
