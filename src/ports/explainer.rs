//! Explainer port: Trait for local feature attribution.

use super::SurvivalScorer;
use crate::domain::{AttributionSet, BackgroundSet, PatientFeatures, ScaledFeatures};
use crate::RiskCalcError;

/// Trait for explaining a single prediction against a background set.
pub trait Explainer: Send + Sync {
    /// Attribute `scorer`'s risk at `horizon` for one patient to its features.
    ///
    /// # Arguments
    /// * `scorer` - Model whose output is explained
    /// * `background` - Reference rows in the scorer's feature order
    /// * `patient` - Raw patient values (reported alongside contributions)
    /// * `scaled` - The same patient in model input space
    /// * `horizon` - Risk horizon in months
    ///
    /// # Errors
    /// Returns `RiskCalcError::Explainer` if the background does not match
    /// the scorer, or `RiskCalcError::Model` if an evaluation fails.
    fn explain(
        &self,
        scorer: &dyn SurvivalScorer,
        background: &BackgroundSet,
        patient: &PatientFeatures,
        scaled: &ScaledFeatures,
        horizon: f64,
    ) -> Result<AttributionSet, RiskCalcError>;
}
