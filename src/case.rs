//! Case directory handling
//!
//! Discovers a case's organ masks, loads them onto one grid, runs the
//! pipeline and writes the refined outputs:
//!
//! ```text
//! <out>/<case>/<mask_subdir>/<organ>.nii.gz
//! <out>/<case>/combined_labels.nii.gz
//! <out>/<case>/label_map.json
//! <out>/<case>/refine.log
//! ```
//!
//! Nothing is written for a case until every mask has loaded and agreed on
//! geometry.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::RefineConfig;
use crate::error::{RefineError, Result};
use crate::nifti_io::{read_mask_file, save_labels_to_file};
use crate::pipeline::{refine_case, CaseState};
use crate::report::CaseLog;
use crate::volume::Grid;

pub const COMBINED_FILE: &str = "combined_labels.nii.gz";
pub const LABEL_MAP_FILE: &str = "label_map.json";
pub const CASE_LOG_FILE: &str = "refine.log";

/// Result of a successfully processed case.
#[derive(Debug)]
pub struct CaseReport {
    pub case: String,
    pub organs: usize,
    pub output_dir: PathBuf,
    pub log: CaseLog,
}

/// Organ name of a mask file, `None` for anything that is not NIfTI.
pub fn organ_name(path: &Path) -> Option<String> {
    let file = path.file_name()?.to_str()?;
    let stem = file
        .strip_suffix(".nii.gz")
        .or_else(|| file.strip_suffix(".nii"))?;
    (!stem.is_empty()).then(|| stem.to_string())
}

/// Name used for a case in logs and output paths.
pub fn case_name(case_dir: &Path) -> String {
    case_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| case_dir.display().to_string())
}

/// Mask files of a case, sorted by organ name.
///
/// When both `<organ>.nii` and `<organ>.nii.gz` exist the `.nii` file wins.
pub fn discover_masks(case_dir: &Path, mask_subdir: &str) -> Result<Vec<(String, PathBuf)>> {
    let dir = case_dir.join(mask_subdir);
    let entries = fs::read_dir(&dir).map_err(|e| RefineError::io(&dir, e))?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| RefineError::io(&dir, e))?;
        let path = entry.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut found: BTreeMap<String, PathBuf> = BTreeMap::new();
    for path in paths {
        if let Some(name) = organ_name(&path) {
            found.entry(name).or_insert(path);
        }
    }
    if found.is_empty() {
        return Err(RefineError::NoMasks(dir));
    }
    Ok(found.into_iter().collect())
}

/// Load every mask of a case onto a shared grid.
///
/// The first mask (by organ name) defines the grid; any other mask whose
/// geometry disagrees fails the case.
pub fn load_case_masks(
    case_dir: &Path,
    config: &RefineConfig,
) -> Result<(Grid, BTreeMap<String, Vec<u8>>)> {
    let files = discover_masks(case_dir, &config.mask_subdir)?;

    let mut grid: Option<Grid> = None;
    let mut masks = BTreeMap::new();
    for (organ, path) in files {
        let (mask_grid, mask) = read_mask_file(&path)?;
        match &grid {
            Some(g) => g.check_compatible(&mask_grid, &organ)?,
            None => grid = Some(mask_grid),
        }
        debug!(organ = %organ, path = %path.display(), "loaded mask");
        masks.insert(organ, mask);
    }

    let grid = grid.ok_or_else(|| RefineError::NoMasks(case_dir.join(&config.mask_subdir)))?;
    Ok((grid, masks))
}

/// Write the refined masks, combined volume, label map and case log.
pub fn write_case_outputs(state: &CaseState, out_dir: &Path, config: &RefineConfig) -> Result<()> {
    let mask_dir = out_dir.join(&config.mask_subdir);
    fs::create_dir_all(&mask_dir).map_err(|e| RefineError::io(&mask_dir, e))?;

    for (organ, mask) in state.organ_masks() {
        let path = mask_dir.join(format!("{organ}.nii.gz"));
        save_labels_to_file(&path, &mask, &state.grid)?;
    }

    if config.save_combined {
        save_labels_to_file(&out_dir.join(COMBINED_FILE), &state.labels.data, &state.grid)?;
    }

    let map_path = out_dir.join(LABEL_MAP_FILE);
    let json = serde_json::to_string_pretty(&state.registry.label_map())
        .map_err(|e| RefineError::Config(format!("failed to serialize label map: {e}")))?;
    fs::write(&map_path, json).map_err(|e| RefineError::io(&map_path, e))?;

    let log_path = out_dir.join(CASE_LOG_FILE);
    fs::write(&log_path, state.log.render()).map_err(|e| RefineError::io(&log_path, e))?;
    Ok(())
}

/// Refine one case directory and write its results under `out_root/<case>`.
pub fn process_case(case_dir: &Path, out_root: &Path, config: &RefineConfig) -> Result<CaseReport> {
    let case = case_name(case_dir);
    let (grid, masks) = load_case_masks(case_dir, config)?;
    info!(case = %case, organs = masks.len(), dims = ?grid.dims, "refining case");

    let state = refine_case(&case, grid, masks, config)?;
    let output_dir = out_root.join(&case);
    write_case_outputs(&state, &output_dir, config)?;

    Ok(CaseReport {
        case,
        organs: state.registry.len(),
        output_dir,
        log: state.log,
    })
}
