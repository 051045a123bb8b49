//! Pure nutrition logic shared by the photo and text pipelines.

pub mod heuristics;
pub mod qc;
pub mod types;
pub mod units;

pub use heuristics::{apply_heuristics, HeuristicsConfig, PortionPriors};
pub use qc::{validate, QcConfig};
pub use types::{NormalizedItem, QualityBlock, RawItem, Unit};
