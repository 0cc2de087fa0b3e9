//! Per-case processing log
//!
//! Records which filters ran, which were skipped and why, and component
//! counts before and after. Every entry is also emitted through `tracing`;
//! the rendered text is what ends up in the case's `refine.log`.

use std::fmt;

use tracing::{info, warn};

/// Pipeline stage an entry refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Combine,
    LungOverlap,
    LiverHorizontal,
    LiverVertical,
    ComponentFilter,
    FemurRelabel,
    FemurPositional,
    PancreasMerge,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Combine => "combine",
            Stage::LungOverlap => "lung_overlap",
            Stage::LiverHorizontal => "liver_horizontal",
            Stage::LiverVertical => "liver_vertical",
            Stage::ComponentFilter => "component_filter",
            Stage::FemurRelabel => "femur_relabel",
            Stage::FemurPositional => "femur_positional",
            Stage::PancreasMerge => "pancreas_merge",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Applied,
    Skipped,
}

#[derive(Clone, Debug)]
pub struct LogEntry {
    pub stage: Stage,
    pub organ: Option<String>,
    pub status: Status,
    pub detail: String,
}

/// Ordered log of everything done to one case.
#[derive(Clone, Debug, Default)]
pub struct CaseLog {
    case: String,
    entries: Vec<LogEntry>,
}

impl CaseLog {
    pub fn new(case: impl Into<String>) -> Self {
        Self { case: case.into(), entries: Vec::new() }
    }

    pub fn case(&self) -> &str {
        &self.case
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn applied(&mut self, stage: Stage, organ: Option<&str>, detail: impl Into<String>) {
        let detail = detail.into();
        info!(case = %self.case, %stage, organ = organ.unwrap_or("-"), "{}", detail);
        self.push(stage, organ, Status::Applied, detail);
    }

    pub fn skipped(&mut self, stage: Stage, organ: Option<&str>, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(case = %self.case, %stage, organ = organ.unwrap_or("-"), "skipped: {}", reason);
        self.push(stage, organ, Status::Skipped, reason);
    }

    fn push(&mut self, stage: Stage, organ: Option<&str>, status: Status, detail: String) {
        self.entries.push(LogEntry {
            stage,
            organ: organ.map(str::to_string),
            status,
            detail,
        });
    }

    /// Whether any entry for `stage` was skipped.
    pub fn was_skipped(&self, stage: Stage) -> bool {
        self.entries.iter().any(|e| e.stage == stage && e.status == Status::Skipped)
    }

    /// Whether any entry for `stage` was applied.
    pub fn was_applied(&self, stage: Stage) -> bool {
        self.entries.iter().any(|e| e.stage == stage && e.status == Status::Applied)
    }

    /// Plain-text rendering, one line per entry.
    pub fn render(&self) -> String {
        let mut out = format!("case: {}\n", self.case);
        for e in &self.entries {
            let status = match e.status {
                Status::Applied => "applied",
                Status::Skipped => "skipped",
            };
            match &e.organ {
                Some(organ) => out.push_str(&format!("[{status}] {} ({organ}): {}\n", e.stage, e.detail)),
                None => out.push_str(&format!("[{status}] {}: {}\n", e.stage, e.detail)),
            }
        }
        out
    }
}
