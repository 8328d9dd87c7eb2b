//! SHAP background sample sets.

use super::{FeatureSpec, Outcome};

/// Fixed reference rows (already in scaled model-input space) used as the
/// baseline distribution for attributions.
///
/// Loaded once at startup and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundSet {
    outcome: Outcome,
    spec: FeatureSpec,
    rows: Vec<Vec<f64>>,
}

impl BackgroundSet {
    /// Create a background set from rows in `spec` order.
    ///
    /// # Errors
    /// Returns error if a row has the wrong width or a non-finite value.
    pub fn from_rows(
        outcome: Outcome,
        spec: FeatureSpec,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self, String> {
        for (i, row) in rows.iter().enumerate() {
            if row.len() != spec.len() {
                return Err(format!(
                    "background row {i} has {} values, expected {}",
                    row.len(),
                    spec.len()
                ));
            }
            if let Some(j) = row.iter().position(|v| !v.is_finite()) {
                return Err(format!(
                    "background row {i} has a non-finite value for {}",
                    spec.names()[j]
                ));
            }
        }
        Ok(Self { outcome, spec, rows })
    }

    #[must_use]
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    #[must_use]
    pub fn spec(&self) -> &FeatureSpec {
        &self.spec
    }

    #[must_use]
    pub fn row(&self, index: usize) -> Option<&[f64]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
