//! End-to-end refinement of synthetic cases through the file interface

mod common;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use common::{at, at_in, output_mask, test_config, torso_case, CaseBuilder};
use organ_refine::case::process_case;
use organ_refine::report::Stage;
use organ_refine::RefineConfig;

#[test]
fn test_torso_case_corrections() {
    let dir = tempfile::tempdir().unwrap();
    let case_dir = torso_case().write(dir.path(), "case_001");
    let out = dir.path().join("out");

    let report = process_case(&case_dir, &out, &test_config()).unwrap();
    assert_eq!(report.case, "case_001");
    assert_eq!(report.organs, 9);
    let case_out = out.join("case_001");

    // Bleed-over beyond the margin moved to the right lung
    assert_eq!(output_mask(&case_out, "lung_right")[at(31, 4, 51)], 1);
    assert_eq!(output_mask(&case_out, "lung_left")[at(31, 4, 51)], 0);

    let liver = output_mask(&case_out, "liver");
    assert_eq!(liver[at(25, 4, 30)], 1);
    assert_eq!(liver[at(37, 3, 31)], 0, "lateral of the lungs");
    assert_eq!(liver[at(34, 8, 3)], 0, "below the bladder");

    // Femur bodies follow the side they lie on; the fragment over the bladder is gone
    let femur_left = output_mask(&case_out, "femur_left");
    let femur_right = output_mask(&case_out, "femur_right");
    assert_eq!(femur_left[at(10, 4, 4)], 1);
    assert_eq!(femur_right[at(28, 4, 4)], 1);
    assert_eq!(femur_left[at(28, 4, 4)], 0);
    assert_eq!(femur_left[at(19, 3, 13)] + femur_right[at(19, 3, 13)], 0);

    let pancreas = output_mask(&case_out, "pancreas");
    assert_eq!(pancreas[at(13, 3, 27)], 1);
    assert_eq!(pancreas[at(13, 3, 34)], 1, "fragment inside the band");
    assert_eq!(pancreas[at(35, 3, 13)], 0, "fragment below the band");

    for stage in [
        Stage::Combine,
        Stage::LungOverlap,
        Stage::LiverHorizontal,
        Stage::LiverVertical,
        Stage::ComponentFilter,
        Stage::FemurRelabel,
        Stage::FemurPositional,
        Stage::PancreasMerge,
    ] {
        assert!(report.log.was_applied(stage), "{stage} not applied");
    }
}

#[test]
fn test_outputs_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let case_dir = torso_case().write(dir.path(), "case_001");
    let out = dir.path().join("out");
    process_case(&case_dir, &out, &test_config()).unwrap();
    let case_out = out.join("case_001");

    let map: BTreeMap<String, u8> =
        serde_json::from_str(&fs::read_to_string(case_out.join("label_map.json")).unwrap()).unwrap();
    assert_eq!(map["aorta"], 1);
    assert_eq!(map["urinary_bladder"], 9);
    assert_eq!(map.len(), 9);

    // Combined volume agrees with the per-organ masks
    let raw = organ_refine::nifti_io::read_nifti_file(&case_out.join("combined_labels.nii.gz")).unwrap();
    assert_eq!(raw.data[at(25, 4, 30)] as u8, map["liver"]);
    assert_eq!(raw.data[at(10, 4, 4)] as u8, map["femur_left"]);

    let log = fs::read_to_string(case_out.join("refine.log")).unwrap();
    assert!(log.starts_with("case: case_001"));
    assert!(log.contains("[applied] femur_positional"));
}

#[test]
fn test_refining_own_output_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let case_dir = torso_case().write(dir.path(), "case_001");
    let first = dir.path().join("first");
    let second = dir.path().join("second");
    let config = test_config();

    process_case(&case_dir, &first, &config).unwrap();
    let report = process_case(&first.join("case_001"), &second, &config).unwrap();

    let organs = [
        "aorta",
        "femur_left",
        "femur_right",
        "liver",
        "lung_left",
        "lung_right",
        "pancreas",
        "stomach",
        "urinary_bladder",
    ];
    for organ in organs {
        assert_eq!(
            output_mask(&first.join("case_001"), organ),
            output_mask(&second.join("case_001"), organ),
            "{organ} changed on second pass"
        );
    }
    assert!(report.log.render().contains("components 2 -> 2"));
}

#[test]
fn test_missing_bladder_skips_bladder_constraints() {
    let dir = tempfile::tempdir().unwrap();
    let case_dir = torso_case().without("urinary_bladder").write(dir.path(), "no_bladder");
    let out = dir.path().join("out");

    let report = process_case(&case_dir, &out, &test_config()).unwrap();
    assert_eq!(report.organs, 8);

    assert!(report.log.was_skipped(Stage::FemurPositional));
    assert!(report.log.was_skipped(Stage::LiverVertical));
    for stage in [
        Stage::LungOverlap,
        Stage::LiverHorizontal,
        Stage::ComponentFilter,
        Stage::FemurRelabel,
        Stage::PancreasMerge,
    ] {
        assert!(report.log.was_applied(stage), "{stage} not applied");
    }

    // Bodies still go by side, using the aorta as midline
    let case_out = out.join("no_bladder");
    assert_eq!(output_mask(&case_out, "femur_left")[at(10, 4, 4)], 1);
    assert_eq!(output_mask(&case_out, "femur_right")[at(28, 4, 4)], 1);
    assert!(fs::read_to_string(case_out.join("refine.log")).unwrap().contains("bladder is missing"));
}

/// Refine `case_dir`, refine the output again and check every organ is unchanged.
fn refine_twice(case_dir: &Path, root: &Path, config: &RefineConfig, organs: &[&str]) -> Vec<Vec<u8>> {
    let case = case_dir.file_name().unwrap().to_str().unwrap().to_string();
    let first = root.join("first");
    let second = root.join("second");
    process_case(case_dir, &first, config).unwrap();
    process_case(&first.join(&case), &second, config).unwrap();

    organs
        .iter()
        .map(|organ| {
            let once = output_mask(&first.join(&case), organ);
            let twice = output_mask(&second.join(&case), organ);
            assert_eq!(once, twice, "{organ} changed on second pass");
            once
        })
        .collect()
}

#[test]
fn test_lung_noise_does_not_widen_liver_extent() {
    let dims = (60, 4, 40);
    let dir = tempfile::tempdir().unwrap();
    let case_dir = CaseBuilder::new(dims)
        .block("lung_left", [5, 0, 25], [24, 3, 39])
        .block("lung_right", [30, 0, 25], [44, 3, 39])
        // isolated speck the size filter removes
        .block("lung_right", [52, 0, 30], [52, 0, 30])
        .block("liver", [20, 0, 5], [50, 3, 20])
        .write(dir.path(), "speck");

    let masks = refine_twice(
        &case_dir,
        dir.path(),
        &RefineConfig::default(),
        &["liver", "lung_left", "lung_right"],
    );
    let liver = &masks[0];
    assert_eq!(liver[at_in(dims, 44, 1, 10)], 1);
    assert_eq!(liver[at_in(dims, 47, 1, 10)], 0);
    assert_eq!(liver.iter().filter(|&&v| v != 0).count(), 25 * 4 * 16);
    assert_eq!(masks[2][at_in(dims, 52, 0, 30)], 0);
}

#[test]
fn test_relabeled_femur_fragment_meets_size_filter() {
    let dims = (60, 10, 40);
    let dir = tempfile::tempdir().unwrap();
    let case_dir = CaseBuilder::new(dims)
        .block("femur_right", [40, 0, 0], [49, 7, 4])
        .block("femur_left", [5, 0, 0], [10, 3, 4])
        // lateral on the right side, large next to the left body only
        .block("femur_left", [52, 0, 0], [58, 4, 0])
        .block("urinary_bladder", [20, 0, 5], [30, 9, 14])
        .write(dir.path(), "femurs");

    let masks = refine_twice(
        &case_dir,
        dir.path(),
        &test_config(),
        &["femur_left", "femur_right", "urinary_bladder"],
    );
    let count = |m: &Vec<u8>| m.iter().filter(|&&v| v != 0).count();
    assert_eq!(count(&masks[0]), 120);
    assert_eq!(count(&masks[1]), 400);
    assert_eq!(masks[1][at_in(dims, 55, 2, 0)], 0);
    assert_eq!(masks[0][at_in(dims, 55, 2, 0)], 0);
}
