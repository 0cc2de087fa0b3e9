//! Fixed class map for downstream visualisation tools
//!
//! Downstream renderers expect one label volume with a fixed set of class
//! ids, independent of which organs a case happens to have. This module
//! composites individual mask files into that layout on the grid of a
//! reference image.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{RefineError, Result};
use crate::nifti_io::{read_mask_file, read_nifti_file, save_labels_to_file};

/// Mask file name and the class id it is written as.
///
/// Applied in order; a later entry overwrites earlier ones where they overlap.
pub const SEGMENTATION_MAP: &[(&str, u8)] = &[
    ("pancreatic_pdac.nii.gz", 1),
    ("veins.nii.gz", 2),
    ("aorta.nii.gz", 3),
    ("celiac_aa.nii.gz", 3),
    ("superior_mesenteric_artery.nii.gz", 3),
    ("pancreas.nii.gz", 4),
    ("pancreatic_duct.nii.gz", 5),
    ("common_bile_duct.nii.gz", 6),
    ("pancreatic_cyst.nii.gz", 7),
    ("pancreatic_pnet.nii.gz", 8),
    ("postcava.nii.gz", 9),
];

/// Class id for a mask file name, if it is part of the map.
pub fn class_of(file: &str) -> Option<u8> {
    SEGMENTATION_MAP.iter().find(|(f, _)| *f == file).map(|&(_, id)| id)
}

#[derive(Debug, Default)]
pub struct MergeReport {
    pub found: Vec<String>,
    pub missing: Vec<String>,
}

/// Merge the mask files in `input_dir` into one class-map volume.
///
/// # Arguments
/// * `input_dir` - Directory holding the per-structure mask files
/// * `reference` - Image whose grid the output uses (usually `ct.nii.gz`)
/// * `output` - Destination label file
/// * `image_copy` - Optional destination for a copy of the reference image
///
/// # Returns
/// Which map entries were found and which were missing
pub fn merge_segmentations(
    input_dir: &Path,
    reference: &Path,
    output: &Path,
    image_copy: Option<&Path>,
) -> Result<MergeReport> {
    let grid = read_nifti_file(reference)?.grid();
    info!(reference = %reference.display(), dims = ?grid.dims, "merging class map");

    for path in [Some(output), image_copy].into_iter().flatten() {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| RefineError::io(parent, e))?;
        }
    }
    if let Some(dest) = image_copy {
        fs::copy(reference, dest).map_err(|e| RefineError::io(dest, e))?;
    }

    let mut labels = vec![0u8; grid.len()];
    let mut report = MergeReport::default();
    for &(file, class) in SEGMENTATION_MAP {
        let path: PathBuf = input_dir.join(file);
        if !path.is_file() {
            warn!(file, "segmentation file not found");
            report.missing.push(file.to_string());
            continue;
        }
        let (mask_grid, mask) = read_mask_file(&path)?;
        // Only the extent has to agree; placement is taken from the reference
        if mask_grid.dims != grid.dims {
            return Err(RefineError::GeometryMismatch {
                organ: file.to_string(),
                detail: format!(
                    "extent {:?} differs from reference {:?}",
                    mask_grid.dims, grid.dims
                ),
            });
        }
        for (v, &m) in labels.iter_mut().zip(&mask) {
            if m != 0 {
                *v = class;
            }
        }
        report.found.push(file.to_string());
    }

    info!(
        found = report.found.len(),
        total = SEGMENTATION_MAP.len(),
        "processed segmentation files"
    );
    save_labels_to_file(output, &labels, &grid)?;
    Ok(report)
}
