//! Multi-case dispatch
//!
//! Cases run in parallel on the rayon pool. Each worker owns its case
//! outright; a failing or panicking case is recorded and its siblings carry
//! on. The summary is written once every case has finished.

use std::fmt::Write as _;
use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{error, info};

use crate::case::{case_name, process_case, CaseReport};
use crate::config::RefineConfig;
use crate::error::{RefineError, Result};

pub const SUMMARY_FILE: &str = "summary.log";

/// Result of one case in a batch.
#[derive(Debug)]
pub struct CaseOutcome {
    pub case: String,
    pub result: std::result::Result<CaseReport, String>,
}

/// Aggregated batch result.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    /// (case, error message)
    pub failed: Vec<(String, String)>,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: &[CaseOutcome]) -> Self {
        let mut summary = BatchSummary {
            total: outcomes.len(),
            ..Default::default()
        };
        for o in outcomes {
            match &o.result {
                Ok(_) => summary.succeeded += 1,
                Err(e) => summary.failed.push((o.case.clone(), e.clone())),
            }
        }
        summary
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "total: {}", self.total);
        let _ = writeln!(out, "succeeded: {}", self.succeeded);
        let _ = writeln!(out, "failed: {}", self.failed.len());
        for (case, err) in &self.failed {
            let _ = writeln!(out, "  {case}: {err}");
        }
        out
    }
}

/// Case directories directly under `input_root`, sorted by name.
///
/// Hidden directories are ignored.
pub fn list_cases(input_root: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(input_root).map_err(|e| RefineError::io(input_root, e))?;
    let mut cases = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| RefineError::io(input_root, e))?;
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if path.is_dir() && !hidden {
            cases.push(path);
        }
    }
    cases.sort();
    Ok(cases)
}

/// Run one case, turning errors and panics into an outcome.
pub fn run_case(case_dir: &Path, output_root: &Path, config: &RefineConfig) -> CaseOutcome {
    let case = case_name(case_dir);
    let result = match catch_unwind(AssertUnwindSafe(|| process_case(case_dir, output_root, config))) {
        Ok(Ok(report)) => Ok(report),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(format!("panicked: {msg}"))
        }
    };
    if let Err(e) = &result {
        error!(case = %case, "case failed: {}", e);
    }
    CaseOutcome { case, result }
}

/// Refine every case under `input_root` and write `summary.log`.
///
/// Only failures to list the input or write the summary are errors; case
/// failures are reported in the summary.
pub fn run_batch(input_root: &Path, output_root: &Path, config: &RefineConfig) -> Result<BatchSummary> {
    let cases = list_cases(input_root)?;
    fs::create_dir_all(output_root).map_err(|e| RefineError::io(output_root, e))?;
    info!(cases = cases.len(), threads = rayon::current_num_threads(), "starting batch");

    let outcomes: Vec<CaseOutcome> = cases
        .par_iter()
        .map(|dir| run_case(dir, output_root, config))
        .collect();

    let summary = BatchSummary::from_outcomes(&outcomes);
    let path = output_root.join(SUMMARY_FILE);
    fs::write(&path, summary.render()).map_err(|e| RefineError::io(&path, e))?;
    info!(
        total = summary.total,
        succeeded = summary.succeeded,
        failed = summary.failed.len(),
        "batch finished"
    );
    Ok(summary)
}
