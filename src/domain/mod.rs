//! Domain layer: Core business types and logic.
//!
//! This module contains pure Rust types with no I/O.
//! All inputs are validated at construction.

mod background;
mod patient;
mod prediction;

pub use background::BackgroundSet;
pub use patient::{
    describe_field_errors, FeatureSpec, FieldError, FieldProblem, Outcome, PatientFeatures,
    RawValue, ScaledFeatures, ALL_CAUSE_FEATURES, CARDIOVASCULAR_FEATURES, CATEGORICAL_FEATURES,
};
pub use prediction::{
    round2, Attribution, AttributionSet, OutcomeAssessment, OutcomeRisk, RiskEstimate, RiskReport,
    TIME_HORIZON_MONTHS,
};
