//! Common test utilities for organ-refine integration tests
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use organ_refine::nifti_io::{read_mask_file, save_labels_to_file};
use organ_refine::volume::Grid;
use organ_refine::RefineConfig;

pub const DIMS: (usize, usize, usize) = (40, 10, 60);

/// Builds a case directory out of axis-aligned boxes.
pub struct CaseBuilder {
    grid: Grid,
    masks: BTreeMap<String, Vec<u8>>,
}

impl CaseBuilder {
    pub fn new(dims: (usize, usize, usize)) -> Self {
        Self {
            grid: Grid::with_dims(dims.0, dims.1, dims.2),
            masks: BTreeMap::new(),
        }
    }

    /// Add an inclusive box to an organ's mask.
    pub fn block(mut self, organ: &str, lo: [usize; 3], hi: [usize; 3]) -> Self {
        let grid = self.grid.clone();
        let mask = self
            .masks
            .entry(organ.to_string())
            .or_insert_with(|| vec![0; grid.len()]);
        for k in lo[2]..=hi[2] {
            for j in lo[1]..=hi[1] {
                for i in lo[0]..=hi[0] {
                    mask[grid.index(i, j, k)] = 1;
                }
            }
        }
        self
    }

    pub fn without(mut self, organ: &str) -> Self {
        self.masks.remove(organ);
        self
    }

    /// Write `<root>/<case>/segmentations/<organ>.nii.gz` and return the case dir.
    pub fn write(&self, root: &Path, case: &str) -> PathBuf {
        let case_dir = root.join(case);
        let seg = case_dir.join("segmentations");
        fs::create_dir_all(&seg).unwrap();
        for (organ, mask) in &self.masks {
            save_labels_to_file(&seg.join(format!("{organ}.nii.gz")), mask, &self.grid).unwrap();
        }
        case_dir
    }
}

/// Small torso with every anatomical anchor and one planted error per filter.
///
/// Patient left is at low x, superior at high z. The aorta sits at x 19.5,
/// the bladder is centred on x 19.5 with its top at z 10 and the lung bases
/// are at z 40.
pub fn torso_case() -> CaseBuilder {
    CaseBuilder::new(DIMS)
        .block("aorta", [19, 8, 10], [20, 9, 50])
        .block("lung_left", [4, 2, 40], [17, 7, 55])
        // left lung bleeding into the right lung
        .block("lung_left", [30, 2, 50], [33, 7, 52])
        .block("lung_right", [22, 2, 40], [35, 7, 55])
        .block("liver", [22, 2, 28], [33, 7, 39])
        // lateral of both lungs
        .block("liver", [36, 2, 30], [38, 4, 32])
        // below the bladder top
        .block("liver", [33, 8, 2], [35, 9, 4])
        .block("urinary_bladder", [16, 2, 5], [23, 7, 10])
        // femur labels swapped between the two sides
        .block("femur_left", [26, 3, 0], [31, 6, 8])
        .block("femur_right", [8, 3, 0], [13, 6, 8])
        // fragment over the bladder
        .block("femur_right", [18, 2, 12], [21, 5, 15])
        .block("stomach", [4, 6, 22], [9, 7, 35])
        .block("pancreas", [10, 2, 25], [17, 5, 30])
        // fragment inside the lung/stomach band
        .block("pancreas", [12, 2, 33], [15, 5, 36])
        // fragment far below the stomach
        .block("pancreas", [34, 2, 12], [37, 5, 15])
}

/// Defaults with anchor thresholds scaled to the small synthetic volumes.
pub fn test_config() -> RefineConfig {
    RefineConfig {
        lung_volume_threshold: 100,
        bladder_volume_threshold: 100,
        ..Default::default()
    }
}

pub fn at(i: usize, j: usize, k: usize) -> usize {
    i + j * DIMS.0 + k * DIMS.0 * DIMS.1
}

/// Flat index into a grid of any extent.
pub fn at_in(dims: (usize, usize, usize), i: usize, j: usize, k: usize) -> usize {
    i + j * dims.0 + k * dims.0 * dims.1
}

/// Load an output mask written by the pipeline.
pub fn read_mask(path: &Path) -> Vec<u8> {
    read_mask_file(path).unwrap().1
}

pub fn output_mask(case_out: &Path, organ: &str) -> Vec<u8> {
    read_mask(&case_out.join("segmentations").join(format!("{organ}.nii.gz")))
}
