//! Ports layer: Trait definitions for external capabilities.
//!
//! Following Hexagonal Architecture, these traits define the boundaries
//! between the application and the model artifacts it consumes.

mod explainer;
mod scorer;

pub use explainer::Explainer;
pub use scorer::{interpolate_at, SurvivalCurve, SurvivalScorer};
