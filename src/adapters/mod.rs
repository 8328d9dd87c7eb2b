//! Adapters layer: Concrete implementations of ports.
//!
//! These modules contain the integration with files and external formats:
//! - `artifacts`: bundle loading, SHA-256 manifest and Ed25519 signature checks
//! - `background`: SHAP background CSV reader
//! - `forest`: tree-ensemble survival models (GBSA, RSF)
//! - `render`: HTML pages and SVG waterfall charts
//! - `sanitize`: PII filtering for logs
//! - `scaler`: pre-fitted standard scaler
//! - `shap`: permutation-sampling Shapley explainer

pub mod artifacts;
pub mod background;
pub mod forest;
pub mod render;
pub mod sanitize;
pub mod scaler;
pub mod shap;

pub use artifacts::{ArtifactBundle, IntegrityPolicy};
pub use scaler::StandardScaler;
pub use shap::PermutationExplainer;
