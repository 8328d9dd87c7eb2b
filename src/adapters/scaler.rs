//! Standard scaler adapter.
//!
//! Applies the pre-fitted per-feature mean/scale transform exported by the
//! training pipeline: `x_scaled = (x - mean) / scale`. Categorical features
//! are listed as passthrough and reach the models unchanged.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{FeatureSpec, PatientFeatures, ScaledFeatures};
use crate::RiskCalcError;

/// Scaler parameters as exported by the training pipeline (`scaler.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerParams {
    pub feature_names: Vec<String>,
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
    #[serde(default)]
    pub passthrough: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
enum Transform {
    Standardize { mean: f64, scale: f64 },
    Passthrough,
}

/// Pre-fitted standard scaler. Immutable after load.
#[derive(Debug, Clone)]
pub struct StandardScaler {
    transforms: HashMap<String, Transform>,
}

impl StandardScaler {
    /// Build a scaler from exported parameters.
    ///
    /// # Errors
    /// Returns `RiskCalcError::Artifact` if lengths differ, a scale is zero or
    /// non-finite, or a feature is listed twice.
    pub fn from_params(params: ScalerParams) -> Result<Self, RiskCalcError> {
        let n = params.feature_names.len();
        if params.mean.len() != n || params.scale.len() != n {
            return Err(RiskCalcError::Artifact(format!(
                "scaler parameter lengths do not match: {} names, {} means, {} scales",
                n,
                params.mean.len(),
                params.scale.len()
            )));
        }

        let mut transforms = HashMap::with_capacity(n + params.passthrough.len());
        for ((name, &mean), &scale) in params
            .feature_names
            .iter()
            .zip(params.mean.iter())
            .zip(params.scale.iter())
        {
            if !mean.is_finite() || !scale.is_finite() || scale == 0.0 {
                return Err(RiskCalcError::Artifact(format!(
                    "invalid scaler parameters for {name}: mean={mean}, scale={scale}"
                )));
            }
            if transforms
                .insert(name.clone(), Transform::Standardize { mean, scale })
                .is_some()
            {
                return Err(RiskCalcError::Artifact(format!(
                    "scaler lists {name} more than once"
                )));
            }
        }
        for name in params.passthrough {
            if transforms.insert(name.clone(), Transform::Passthrough).is_some() {
                return Err(RiskCalcError::Artifact(format!(
                    "scaler lists {name} as both scaled and passthrough"
                )));
            }
        }

        Ok(Self { transforms })
    }

    /// Load `scaler.json`.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or holds invalid parameters.
    pub fn from_path(path: &Path) -> Result<Self, RiskCalcError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RiskCalcError::Artifact(format!("failed to read scaler {}: {e}", path.display()))
        })?;
        let params: ScalerParams = serde_json::from_str(&content).map_err(|e| {
            RiskCalcError::Artifact(format!("invalid scaler {}: {e}", path.display()))
        })?;
        Self::from_params(params)
    }

    /// Names in `spec` the scaler neither standardizes nor passes through.
    #[must_use]
    pub fn uncovered<'a>(&self, spec: &'a FeatureSpec) -> Vec<&'a str> {
        spec.names()
            .iter()
            .filter(|n| !self.transforms.contains_key(n.as_str()))
            .map(String::as_str)
            .collect()
    }

    /// Whether `name` is standardized (as opposed to passed through).
    #[must_use]
    pub fn is_scaled(&self, name: &str) -> bool {
        matches!(
            self.transforms.get(name),
            Some(Transform::Standardize { .. })
        )
    }

    /// Scale a patient's features into the order of `spec`.
    ///
    /// # Errors
    /// Returns `RiskCalcError::Model` if a feature of `spec` is absent from the
    /// patient or unknown to the scaler.
    pub fn transform(
        &self,
        patient: &PatientFeatures,
        spec: &FeatureSpec,
    ) -> Result<ScaledFeatures, RiskCalcError> {
        let mut out = Vec::with_capacity(spec.len());
        for name in spec.names() {
            let raw = patient.get(name).ok_or_else(|| {
                RiskCalcError::Model(format!("feature {name} absent after validation"))
            })?;
            let value = match self.transforms.get(name) {
                Some(Transform::Standardize { mean, scale }) => (raw - mean) / scale,
                Some(Transform::Passthrough) => raw,
                None => {
                    return Err(RiskCalcError::Model(format!(
                        "scaler has no parameters for {name}"
                    )))
                }
            };
            out.push(value);
        }
        Ok(ScaledFeatures::new(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scaler() -> StandardScaler {
        StandardScaler::from_params(ScalerParams {
            feature_names: vec!["Age".into(), "SBP".into()],
            mean: vec![60.0, 130.0],
            scale: vec![10.0, 20.0],
            passthrough: vec!["Gender".into()],
        })
        .expect("valid scaler")
    }

    #[test]
    fn test_transform_scales_and_passes_through() {
        let spec = FeatureSpec::new(vec!["Gender".into(), "SBP".into(), "Age".into()])
            .expect("spec");
        let patient = PatientFeatures::from_values(&spec, vec![1.0, 150.0, 45.0]).expect("values");

        let scaled = scaler().transform(&patient, &spec).expect("Should scale");
        assert_eq!(scaled.as_slice(), &[1.0, 1.0, -1.5]);
    }

    #[test]
    fn test_transform_uses_target_spec_order() {
        let full = FeatureSpec::new(vec!["Age".into(), "SBP".into(), "Gender".into()])
            .expect("spec");
        let patient = PatientFeatures::from_values(&full, vec![70.0, 130.0, 0.0]).expect("values");
        let target = FeatureSpec::new(vec!["SBP".into(), "Age".into()]).expect("spec");

        let scaled = scaler().transform(&patient, &target).expect("Should scale");
        assert_eq!(scaled.as_slice(), &[0.0, 1.0]);
    }

    #[test]
    fn test_uncovered_features() {
        let spec = FeatureSpec::new(vec!["Age".into(), "BUN".into()]).expect("spec");
        assert_eq!(scaler().uncovered(&spec), vec!["BUN"]);
        assert!(scaler().is_scaled("Age"));
        assert!(!scaler().is_scaled("Gender"));
    }

    #[test]
    fn test_rejects_zero_scale() {
        let err = StandardScaler::from_params(ScalerParams {
            feature_names: vec!["Age".into()],
            mean: vec![60.0],
            scale: vec![0.0],
            passthrough: vec![],
        })
        .expect_err("zero scale");
        assert!(err.to_string().contains("Age"));
    }

    #[test]
    fn test_rejects_double_listing() {
        assert!(StandardScaler::from_params(ScalerParams {
            feature_names: vec!["Age".into()],
            mean: vec![60.0],
            scale: vec![10.0],
            passthrough: vec!["Age".into()],
        })
        .is_err());
    }
}
