//! Per-case organ registry
//!
//! The label space is built fresh for every case from the masks that are
//! actually present: organ names are sorted and numbered from 1. Anatomical
//! roles are resolved by name through [`AnatomyNames`], so nothing
//! downstream depends on a hardcoded label id.

use std::collections::BTreeMap;

use crate::config::{AnatomyNames, RefineConfig};
use crate::error::{RefineError, Result};
use crate::volume::LabelId;

/// Which anatomical filter targets an organ.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnatomicalFilter {
    Liver,
    Lung,
    Femur,
    Pancreas,
}

/// Refinement parameters for one organ.
#[derive(Clone, Debug, PartialEq)]
pub struct OrganParams {
    pub min_size_ratio: f64,
    pub min_merge_ratio: f64,
    /// Run the generic connected-component refiner on this organ.
    pub refine: bool,
    pub filter: Option<AnatomicalFilter>,
}

/// One registered organ.
#[derive(Clone, Debug, PartialEq)]
pub struct OrganEntry {
    pub name: String,
    pub label: LabelId,
    pub params: OrganParams,
}

/// Organ name to label id assignment plus parameters for one case.
#[derive(Clone, Debug, Default)]
pub struct OrganRegistry {
    entries: Vec<OrganEntry>,
    by_name: BTreeMap<String, usize>,
}

impl OrganRegistry {
    /// Build the registry for the given organ names.
    ///
    /// Duplicates are collapsed. Ids follow ascending name order, so the same
    /// set of masks always yields the same assignment.
    pub fn build<S: AsRef<str>>(names: &[S], config: &RefineConfig) -> Result<Self> {
        let mut sorted: Vec<&str> = names.iter().map(|n| n.as_ref()).collect();
        sorted.sort_unstable();
        sorted.dedup();

        if sorted.len() > LabelId::MAX as usize {
            return Err(RefineError::TooManyOrgans { count: sorted.len() });
        }

        let mut registry = OrganRegistry::default();
        for (i, name) in sorted.into_iter().enumerate() {
            let params = organ_params(name, config);
            registry.by_name.insert(name.to_string(), i);
            registry.entries.push(OrganEntry {
                name: name.to_string(),
                label: (i + 1) as LabelId,
                params,
            });
        }
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending label order.
    pub fn entries(&self) -> &[OrganEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&OrganEntry> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    pub fn label(&self, name: &str) -> Option<LabelId> {
        self.get(name).map(|e| e.label)
    }

    pub fn name_of(&self, label: LabelId) -> Option<&str> {
        if label == 0 {
            return None;
        }
        self.entries.get(label as usize - 1).map(|e| e.name.as_str())
    }

    /// All registered label ids.
    pub fn labels(&self) -> Vec<LabelId> {
        self.entries.iter().map(|e| e.label).collect()
    }

    /// Name → id table, as written to `label_map.json`.
    pub fn label_map(&self) -> BTreeMap<String, LabelId> {
        self.entries.iter().map(|e| (e.name.clone(), e.label)).collect()
    }

    /// Compositing order, highest priority first.
    ///
    /// Organs named in `priority` come first in list order; the rest follow
    /// by ascending label id.
    pub fn priority_order(&self, priority: &[String]) -> Vec<&OrganEntry> {
        let mut order: Vec<&OrganEntry> = Vec::with_capacity(self.entries.len());
        for name in priority {
            if let Some(e) = self.get(name) {
                if !order.iter().any(|o| o.label == e.label) {
                    order.push(e);
                }
            }
        }
        for e in &self.entries {
            if !order.iter().any(|o| o.label == e.label) {
                order.push(e);
            }
        }
        order
    }
}

fn anatomical_role(name: &str, anatomy: &AnatomyNames) -> Option<AnatomicalFilter> {
    if name == anatomy.liver {
        Some(AnatomicalFilter::Liver)
    } else if name == anatomy.lung_left || name == anatomy.lung_right {
        Some(AnatomicalFilter::Lung)
    } else if name == anatomy.femur_left || name == anatomy.femur_right {
        Some(AnatomicalFilter::Femur)
    } else if name == anatomy.pancreas {
        Some(AnatomicalFilter::Pancreas)
    } else {
        None
    }
}

fn organ_params(name: &str, config: &RefineConfig) -> OrganParams {
    let o = config.organs.get(name);
    OrganParams {
        min_size_ratio: o.and_then(|o| o.min_size_ratio).unwrap_or(config.min_size_ratio),
        min_merge_ratio: o.and_then(|o| o.min_merge_ratio).unwrap_or(config.min_merge_ratio),
        refine: o.and_then(|o| o.refine).unwrap_or(true),
        filter: anatomical_role(name, &config.anatomy),
    }
}
