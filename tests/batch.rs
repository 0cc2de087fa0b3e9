//! Batch dispatch over several case directories

mod common;

use std::fs;

use common::{test_config, torso_case, CaseBuilder, DIMS};
use organ_refine::batch::{run_batch, SUMMARY_FILE};

#[test]
fn test_mismatched_case_fails_alone() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("cases");
    let out = dir.path().join("refined");

    torso_case().write(&input, "case_a");
    torso_case().without("urinary_bladder").write(&input, "case_b");

    // One mask on a different grid
    let bad = torso_case().write(&input, "case_bad");
    CaseBuilder::new((DIMS.0, DIMS.1, DIMS.2 + 1))
        .block("spleen", [2, 2, 2], [4, 4, 4])
        .write(&input, "spleen_src");
    fs::rename(
        input.join("spleen_src/segmentations/spleen.nii.gz"),
        bad.join("segmentations/spleen.nii.gz"),
    )
    .unwrap();
    fs::remove_dir_all(input.join("spleen_src")).unwrap();

    let summary = run_batch(&input, &out, &test_config()).unwrap();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, "case_bad");
    assert!(summary.failed[0].1.contains("geometry mismatch"));

    assert!(out.join("case_a/label_map.json").is_file());
    assert!(out.join("case_b/refine.log").is_file());
    assert!(!out.join("case_bad").exists());

    let text = fs::read_to_string(out.join(SUMMARY_FILE)).unwrap();
    assert!(text.contains("total: 3"));
    assert!(text.contains("succeeded: 2"));
    assert!(text.contains("failed: 1"));
    assert!(text.contains("case_bad"));
}

#[test]
fn test_empty_input_writes_empty_summary() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("cases");
    fs::create_dir(&input).unwrap();
    let out = dir.path().join("refined");

    let summary = run_batch(&input, &out, &test_config()).unwrap();
    assert_eq!(summary.total, 0);
    assert!(out.join(SUMMARY_FILE).is_file());
}
