//! Single-case refinement pipeline
//!
//! [`CaseState`] owns everything one case needs: the grid, the registry, the
//! original masks (read-only) and the combined label volume that every stage
//! mutates in turn. Stages run strictly in order:
//!
//! combine → lung overlap → liver extent → component filter → femur → pancreas
//!
//! Missing organs and unreliable anchors never fail a case; the affected
//! stage is skipped and the reason recorded in the case log.
//!
//! Anchor geometry (centroids, bounding boxes, voxel counts of the organs a
//! filter is measured against) is taken only from the components the size
//! filter keeps. The lung and liver stages run before that filter, and
//! noise it removes later must not have shaped their result, or a second
//! run over the output would cut again.

use std::collections::BTreeMap;

use tracing::debug;

use crate::combine::combine_masks;
use crate::components::core_mask;
use crate::config::RefineConfig;
use crate::error::{RefineError, Result};
use crate::refine::{
    classify_femurs, filter_liver, merge_pancreas, refine_organ, resolve_lung_overlap,
    ConstraintResult, FemurParams, LiverParams, LungParams, MidlineSource, PancreasParams,
};
use crate::registry::OrganRegistry;
use crate::report::{CaseLog, Stage};
use crate::volume::{
    mask_bbox, mask_centroid, mask_count, mask_union, Grid, LabelId, LabelVolume, BACKGROUND,
};

/// Mutable state of one case as it moves through the pipeline.
#[derive(Debug)]
pub struct CaseState {
    pub grid: Grid,
    pub registry: OrganRegistry,
    originals: BTreeMap<String, Vec<u8>>,
    pub labels: LabelVolume,
    pub log: CaseLog,
}

impl CaseState {
    /// Register the organs and composite their masks.
    ///
    /// Every mask must have one voxel per grid cell.
    pub fn new(
        case: &str,
        grid: Grid,
        masks: BTreeMap<String, Vec<u8>>,
        config: &RefineConfig,
    ) -> Result<Self> {
        for (name, mask) in &masks {
            if mask.len() != grid.len() {
                return Err(RefineError::GeometryMismatch {
                    organ: name.clone(),
                    detail: format!("mask has {} voxels, grid has {}", mask.len(), grid.len()),
                });
            }
        }

        let names: Vec<&str> = masks.keys().map(String::as_str).collect();
        let registry = OrganRegistry::build(&names, config)?;
        let combined = combine_masks(&masks, &registry, &config.priority, grid.dims);

        let mut log = CaseLog::new(case);
        let lost: usize = combined.lost_voxels.values().sum();
        log.applied(
            Stage::Combine,
            None,
            format!(
                "{} organs composited, {} contested voxels resolved by priority",
                registry.len(),
                lost
            ),
        );

        Ok(Self {
            grid,
            registry,
            originals: masks,
            labels: combined.volume,
            log,
        })
    }

    /// The mask as it was loaded, before any correction.
    pub fn original_mask(&self, organ: &str) -> Option<&[u8]> {
        self.originals.get(organ).map(Vec::as_slice)
    }

    /// Current binary view of a registered organ.
    pub fn current_mask(&self, organ: &str) -> Option<Vec<u8>> {
        self.registry.label(organ).map(|l| self.labels.binary_view(l))
    }

    /// Reduce a mask of `organ` to the components the size filter keeps.
    fn anchor_of(&self, organ: &str, mask: Vec<u8>) -> Vec<u8> {
        match self.registry.get(organ) {
            Some(e) if e.params.refine => core_mask(&mask, self.grid.dims, e.params.min_size_ratio),
            _ => mask,
        }
    }

    /// Current mask of a registered organ as an anatomical anchor.
    pub fn anchor_mask(&self, organ: &str) -> Option<Vec<u8>> {
        self.current_mask(organ).map(|m| self.anchor_of(organ, m))
    }

    /// Anchor mask, `None` when the organ is absent or empty.
    fn nonempty_anchor(&self, organ: &str) -> Option<Vec<u8>> {
        self.anchor_mask(organ).filter(|m| mask_count(m) > 0)
    }

    /// Union of both lungs' anchor masks; empty when neither is registered.
    fn lung_anchor(&self, config: &RefineConfig) -> Vec<u8> {
        let names = &config.anatomy;
        [&names.lung_left, &names.lung_right]
            .iter()
            .filter_map(|n| self.anchor_mask(n))
            .fold(vec![0u8; self.grid.len()], |acc, m| mask_union(&acc, &m))
    }

    /// Corrected per-organ masks keyed by organ name.
    pub fn organ_masks(&self) -> BTreeMap<String, Vec<u8>> {
        self.registry
            .entries()
            .iter()
            .map(|e| (e.name.clone(), self.labels.binary_view(e.label)))
            .collect()
    }
}

/// Build the case state and run every stage.
pub fn refine_case(
    case: &str,
    grid: Grid,
    masks: BTreeMap<String, Vec<u8>>,
    config: &RefineConfig,
) -> Result<CaseState> {
    let mut state = CaseState::new(case, grid, masks, config)?;
    run_pipeline(&mut state, config)?;
    Ok(state)
}

/// Run all refinement stages on an already combined case.
pub fn run_pipeline(state: &mut CaseState, config: &RefineConfig) -> Result<()> {
    resolve_lungs(state, config);
    restrict_liver(state, config);
    filter_components(state);
    classify_femur_sides(state, config);
    merge_pancreas_fragments(state, config);
    state.labels.validate(&state.registry.labels())
}

/// Stage: left/right lung overlap.
pub fn resolve_lungs(state: &mut CaseState, config: &RefineConfig) {
    let names = &config.anatomy;
    let (Some(left_id), Some(right_id)) = (
        state.registry.label(&names.lung_left),
        state.registry.label(&names.lung_right),
    ) else {
        state.log.skipped(Stage::LungOverlap, None, "needs both lung masks");
        return;
    };

    // Original claims, limited to voxels that compositing left to a lung
    let lung_voxels = state.labels.binary_view_any(&[left_id, right_id]);
    let restrict = |organ: &str| -> Vec<u8> {
        match state.original_mask(organ) {
            Some(m) => m.iter().zip(&lung_voxels).map(|(&a, &b)| u8::from(a != 0 && b != 0)).collect(),
            None => vec![0; lung_voxels.len()],
        }
    };
    let left = restrict(&names.lung_left);
    let right = restrict(&names.lung_right);
    let bounds = mask_union(
        &state.anchor_of(&names.lung_left, left.clone()),
        &state.anchor_of(&names.lung_right, right.clone()),
    );
    let aorta = state.nonempty_anchor(&names.aorta);

    let params = LungParams {
        margin: config.lung_midline_margin,
        orientation: config.orientation,
    };
    let res = resolve_lung_overlap(
        &left,
        &right,
        aorta.as_deref(),
        Some(&bounds),
        state.grid.dims,
        &params,
    );
    let Some((midline, source)) = res.midline else {
        state.log.skipped(Stage::LungOverlap, None, "both lung masks are empty");
        return;
    };

    for (idx, v) in state.labels.data.iter_mut().enumerate() {
        if lung_voxels[idx] == 0 {
            continue;
        }
        if res.left[idx] != 0 {
            *v = left_id;
        } else if res.right[idx] != 0 {
            *v = right_id;
        }
    }

    let source = match source {
        MidlineSource::Aorta => "aorta centroid",
        MidlineSource::LungBounds => "lung bounding box",
    };
    state.log.applied(
        Stage::LungOverlap,
        None,
        format!(
            "midline x={midline:.1} from {source}; {} overlapping and {} wrong-side voxels reassigned",
            res.overlap_voxels, res.moved_voxels
        ),
    );
}

/// Stage: liver horizontal and vertical extent.
pub fn restrict_liver(state: &mut CaseState, config: &RefineConfig) {
    let names = &config.anatomy;
    let liver_name = names.liver.as_str();
    let Some(liver_id) = state.registry.label(liver_name) else {
        state.log.skipped(Stage::LiverHorizontal, Some(liver_name), "liver mask not present");
        state.log.skipped(Stage::LiverVertical, Some(liver_name), "liver mask not present");
        return;
    };

    let liver = state.labels.binary_view(liver_id);
    let lung_left = state.nonempty_anchor(&names.lung_left);
    let lung_right = state.nonempty_anchor(&names.lung_right);
    let bladder = state.anchor_mask(&names.bladder);

    let params = LiverParams {
        lung_volume_threshold: config.lung_volume_threshold,
        bladder_volume_threshold: config.bladder_volume_threshold,
        vertical_margin: config.liver_vertical_margin,
        orientation: config.orientation,
    };
    let out = filter_liver(
        &liver,
        lung_left.as_deref(),
        lung_right.as_deref(),
        bladder.as_deref(),
        state.grid.dims,
        &params,
    );

    for (v, (&before, &after)) in state.labels.data.iter_mut().zip(liver.iter().zip(&out.mask)) {
        if before != 0 && after == 0 {
            *v = BACKGROUND;
        }
    }

    for (stage, result) in [
        (Stage::LiverHorizontal, &out.horizontal),
        (Stage::LiverVertical, &out.vertical),
    ] {
        match result {
            ConstraintResult::Applied { removed } => state.log.applied(
                stage,
                Some(liver_name),
                format!("{removed} voxels removed"),
            ),
            ConstraintResult::Skipped(reason) => {
                state.log.skipped(stage, Some(liver_name), reason.to_string())
            }
        }
    }
}

/// Stage: generic size/merge filter for every organ that opts in.
pub fn filter_components(state: &mut CaseState) {
    let entries = state.registry.entries().to_vec();
    for entry in entries.iter().filter(|e| e.params.refine) {
        let out = refine_organ(&mut state.labels, entry.label, &entry.params);
        if out.components_before == 0 {
            state.log.skipped(Stage::ComponentFilter, Some(&entry.name), "organ is empty");
            continue;
        }
        let merged: Vec<String> = out
            .merged
            .iter()
            .map(|&(to, n)| format!("{n} -> {}", state.registry.name_of(to).unwrap_or("?")))
            .collect();
        state.log.applied(
            Stage::ComponentFilter,
            Some(&entry.name),
            format!(
                "components {} -> {}; merged [{}]; dropped {} ({} voxels)",
                out.components_before,
                out.components_after,
                merged.join(", "),
                out.dropped,
                out.dropped_voxels
            ),
        );
    }
}

/// Stage: femur left/right relabeling and fragment removal.
pub fn classify_femur_sides(state: &mut CaseState, config: &RefineConfig) {
    let names = &config.anatomy;
    let (Some(left_id), Some(right_id)) = (
        state.registry.label(&names.femur_left),
        state.registry.label(&names.femur_right),
    ) else {
        state.log.skipped(Stage::FemurRelabel, None, "needs both femur masks");
        state.log.skipped(Stage::FemurPositional, None, "needs both femur masks");
        return;
    };

    let bladder = state.anchor_mask(&names.bladder);
    let midline = patient_midline(state, config);
    let params = FemurParams {
        bladder_volume_threshold: config.bladder_volume_threshold,
        body_min_ratio: config.femur_body_min_ratio,
        superior_margin: config.femur_superior_margin,
        orientation: config.orientation,
    };
    let out = classify_femurs(
        &mut state.labels,
        left_id,
        right_id,
        bladder.as_deref(),
        midline,
        &params,
    );

    if out.components_before == 0 {
        state.log.skipped(Stage::FemurRelabel, None, "femur masks are empty");
        state.log.skipped(Stage::FemurPositional, None, "femur masks are empty");
        return;
    }

    // Fragments moved to the other side are judged again against that
    // side's body
    let mut resized = 0;
    for label in [left_id, right_id] {
        let Some(entry) = state.registry.entries().iter().find(|e| e.label == label) else {
            continue;
        };
        if entry.params.refine {
            let params = entry.params.clone();
            let size = refine_organ(&mut state.labels, label, &params);
            resized += size.dropped + size.merged.len();
        }
    }
    state.log.applied(
        Stage::FemurRelabel,
        None,
        format!(
            "midline x={midline:.1}; {} of {} components, {} bodies relabeled; {} removed by size after relabel",
            out.components_after, out.components_before, out.bodies_relabeled, resized
        ),
    );
    if out.positional_filter_applied {
        state.log.applied(
            Stage::FemurPositional,
            None,
            format!(
                "{} fragments kept, {} dropped ({} voxels)",
                out.fragments_kept, out.fragments_dropped, out.dropped_voxels
            ),
        );
    } else {
        let reason = match bladder.as_deref().map(mask_count) {
            None => "bladder is missing".to_string(),
            Some(n) => format!(
                "bladder has {n} voxels, below threshold {}",
                config.bladder_volume_threshold
            ),
        };
        state.log.skipped(Stage::FemurPositional, None, reason);
    }
}

/// Stage: pancreas fragment merging.
pub fn merge_pancreas_fragments(state: &mut CaseState, config: &RefineConfig) {
    let names = &config.anatomy;
    let pancreas_name = names.pancreas.as_str();
    let Some(pancreas_id) = state.registry.label(pancreas_name) else {
        state.log.skipped(Stage::PancreasMerge, Some(pancreas_name), "pancreas mask not present");
        return;
    };

    let lungs = Some(state.lung_anchor(config)).filter(|m| mask_count(m) > 0);
    // Main stomach body only: absorption may move its smaller pieces
    let stomach = state
        .current_mask(&names.stomach)
        .map(|m| core_mask(&m, state.grid.dims, 1.0))
        .filter(|m| mask_count(m) > 0);
    let absorb: Vec<LabelId> = config
        .pancreas_absorb_organs
        .iter()
        .filter_map(|n| state.registry.label(n))
        .collect();

    let params = PancreasParams {
        band_margin: config.pancreas_band_margin,
        orientation: config.orientation,
    };
    let out = merge_pancreas(
        &mut state.labels,
        pancreas_id,
        lungs.as_deref(),
        stomach.as_deref(),
        &absorb,
        &params,
    );

    if out.components_before == 0 {
        state.log.skipped(Stage::PancreasMerge, Some(pancreas_name), "organ is empty");
        return;
    }
    let absorbed: usize = out.absorbed.iter().map(|&(_, n)| n).sum();
    let bound = |b: Option<usize>| b.map_or_else(|| "open".to_string(), |z| z.to_string());
    match out.band {
        Some(band) => state.log.applied(
            Stage::PancreasMerge,
            Some(pancreas_name),
            format!(
                "band z {}..{}; components {} -> {}; {} fragments kept, {} dropped ({} voxels); {} voxels absorbed",
                bound(band.lo),
                bound(band.hi),
                out.components_before,
                out.components_after,
                out.fragments_kept,
                out.fragments_dropped,
                out.dropped_voxels,
                absorbed
            ),
        ),
        None => state.log.skipped(
            Stage::PancreasMerge,
            Some(pancreas_name),
            "neither lungs nor stomach present to bound the pancreas",
        ),
    }
}

/// Sagittal midline for lateral decisions outside the lung stage.
///
/// Bladder centroid when the bladder is reliable, then aorta centroid, then
/// the lungs' bounding box centre, then the grid centre.
fn patient_midline(state: &CaseState, config: &RefineConfig) -> f64 {
    let names = &config.anatomy;
    let dims = state.grid.dims;

    if let Some(b) = state.anchor_mask(&names.bladder) {
        if mask_count(&b) >= config.bladder_volume_threshold {
            if let Some(c) = mask_centroid(&b, dims) {
                return c[0];
            }
        }
    }
    if let Some(c) = state.anchor_mask(&names.aorta).and_then(|a| mask_centroid(&a, dims)) {
        return c[0];
    }
    if let Some(b) = mask_bbox(&state.lung_anchor(config), dims) {
        return b.center_x();
    }
    debug!("no midline anchor, using grid centre");
    (dims.0 as f64 - 1.0) / 2.0
}
