//! Organ-Refine: anatomical refinement of multi-organ CT segmentations
//!
//! Takes the independent per-organ binary masks produced by an automated
//! segmenter, composites them into one label volume and corrects the
//! systematic mistakes such segmenters make.
//!
//! # Modules
//! - `registry`: per-case organ → label id assignment and parameters
//! - `combine`: priority compositing of masks into one label volume
//! - `components`: 6-connected component labeling and contact counting
//! - `refine`: size/merge filter and the lung, liver, femur and pancreas filters
//! - `pipeline`: stage sequencing over a single case
//! - `case`, `batch`: case directory I/O and parallel dispatch
//! - `class_map`: fixed class map merge for downstream tools

// Core modules
pub mod error;
pub mod config;
pub mod volume;
pub mod components;

// Refinement
pub mod registry;
pub mod combine;
pub mod refine;
pub mod report;
pub mod pipeline;

// I/O modules
pub mod nifti_io;
pub mod case;
pub mod batch;
pub mod class_map;

pub use config::{load_config, RefineConfig};
pub use error::{RefineError, Result};
