//! Refinement filters operating on a case's masks and combined volume
//!
//! - `size`: generic connected-component size/merge filter
//! - `lung`: left/right lung overlap resolution around a midline
//! - `liver`: liver extent limited by lung and bladder geometry
//! - `femur`: femur left/right classification and fragment removal
//! - `pancreas`: positional merging of pancreas fragments

pub mod size;
pub mod lung;
pub mod liver;
pub mod femur;
pub mod pancreas;

pub use size::{refine_organ, RefineOutcome};
pub use lung::{resolve_lung_overlap, LungParams, LungResolution, MidlineSource};
pub use liver::{filter_liver, ConstraintResult, LiverOutcome, LiverParams, LiverSkip};
pub use femur::{classify_femurs, FemurOutcome, FemurParams};
pub use pancreas::{merge_pancreas, Band, PancreasOutcome, PancreasParams};
