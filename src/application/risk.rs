//! Risk service: validates a patient, scores both outcomes and explains them.
//!
//! The service is built once at startup from a loaded artifact bundle and
//! shared read-only across requests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::adapters::{ArtifactBundle, StandardScaler};
use crate::domain::{
    BackgroundSet, FeatureSpec, Outcome, OutcomeAssessment, OutcomeRisk, PatientFeatures,
    RawValue, RiskReport, TIME_HORIZON_MONTHS,
};
use crate::ports::{Explainer, SurvivalScorer};
use crate::RiskCalcError;

/// A scorer together with the background set used to explain it.
#[derive(Clone)]
pub struct OutcomeModel {
    pub scorer: Arc<dyn SurvivalScorer>,
    pub background: Arc<BackgroundSet>,
}

impl OutcomeModel {
    #[must_use]
    pub fn new(scorer: Arc<dyn SurvivalScorer>, background: BackgroundSet) -> Self {
        Self {
            scorer,
            background: Arc::new(background),
        }
    }

    #[must_use]
    pub fn feature_spec(&self) -> &FeatureSpec {
        self.scorer.feature_spec()
    }
}

/// Service for computing mortality risk with explanations.
pub struct RiskService {
    scaler: StandardScaler,
    all_cause: OutcomeModel,
    cardiovascular: OutcomeModel,
    explainer: Arc<dyn Explainer>,
    input_spec: FeatureSpec,
}

impl RiskService {
    /// Create a service, checking that the parts fit together.
    ///
    /// # Errors
    /// Returns `RiskCalcError::Artifact` if a model predicts the wrong outcome,
    /// a background set does not match its model, or the scaler misses a
    /// model feature.
    pub fn new(
        scaler: StandardScaler,
        all_cause: OutcomeModel,
        cardiovascular: OutcomeModel,
        explainer: Arc<dyn Explainer>,
    ) -> Result<Self, RiskCalcError> {
        for (outcome, model) in [
            (Outcome::AllCause, &all_cause),
            (Outcome::Cardiovascular, &cardiovascular),
        ] {
            if model.scorer.outcome() != outcome {
                return Err(RiskCalcError::Artifact(format!(
                    "{outcome} slot holds a {} model",
                    model.scorer.outcome()
                )));
            }
            if model.background.outcome() != outcome
                || model.background.spec() != model.feature_spec()
            {
                return Err(RiskCalcError::Artifact(format!(
                    "{outcome} background set does not match the model features"
                )));
            }
            if model.background.is_empty() {
                return Err(RiskCalcError::Artifact(format!(
                    "{outcome} background set has no rows"
                )));
            }
            let uncovered = scaler.uncovered(model.feature_spec());
            if !uncovered.is_empty() {
                return Err(RiskCalcError::Artifact(format!(
                    "scaler has no entry for {outcome} features: {}",
                    uncovered.join(", ")
                )));
            }
        }

        let input_spec = FeatureSpec::union([all_cause.feature_spec(), cardiovascular.feature_spec()]);
        tracing::info!(
            "Risk service ready ({} input fields, horizon {} months)",
            input_spec.len(),
            TIME_HORIZON_MONTHS
        );

        Ok(Self {
            scaler,
            all_cause,
            cardiovascular,
            explainer,
            input_spec,
        })
    }

    /// Create a service from a loaded bundle.
    ///
    /// # Errors
    /// See [`RiskService::new`].
    pub fn from_bundle(
        bundle: ArtifactBundle,
        explainer: Arc<dyn Explainer>,
    ) -> Result<Self, RiskCalcError> {
        Self::new(
            bundle.scaler,
            OutcomeModel::new(bundle.all_cause.scorer, bundle.all_cause.background),
            OutcomeModel::new(bundle.cardiovascular.scorer, bundle.cardiovascular.background),
            explainer,
        )
    }

    /// Every field either model needs, all-cause order first.
    #[must_use]
    pub fn input_spec(&self) -> &FeatureSpec {
        &self.input_spec
    }

    #[must_use]
    pub fn model(&self, outcome: Outcome) -> &OutcomeModel {
        match outcome {
            Outcome::AllCause => &self.all_cause,
            Outcome::Cardiovascular => &self.cardiovascular,
        }
    }

    /// Validate raw input against every field of both models.
    ///
    /// # Errors
    /// Returns `RiskCalcError::Validation` listing each invalid field.
    pub fn validate(
        &self,
        raw: &HashMap<String, RawValue>,
    ) -> Result<PatientFeatures, RiskCalcError> {
        PatientFeatures::from_raw(&self.input_spec, raw).map_err(RiskCalcError::Validation)
    }

    /// Score and explain one outcome for an already validated patient.
    ///
    /// # Errors
    /// Returns error if scaling, scoring, or explanation fails.
    pub fn explain_outcome(
        &self,
        outcome: Outcome,
        patient: &PatientFeatures,
    ) -> Result<OutcomeAssessment, RiskCalcError> {
        let model = self.model(outcome);
        let scaled = self.scaler.transform(patient, model.feature_spec())?;
        let survival = model.scorer.survival_at(&scaled, TIME_HORIZON_MONTHS)?;
        let attribution = self.explainer.explain(
            model.scorer.as_ref(),
            &model.background,
            patient,
            &scaled,
            TIME_HORIZON_MONTHS,
        )?;
        Ok(OutcomeAssessment {
            outcome,
            risk: OutcomeRisk::from_survival(survival),
            attribution,
        })
    }

    /// Full assessment of both outcomes. Nothing is returned unless both
    /// outcomes succeed.
    ///
    /// # Errors
    /// Returns `RiskCalcError::Validation` for bad input, other variants for
    /// server-side failures.
    pub fn assess(&self, raw: &HashMap<String, RawValue>) -> Result<RiskReport, RiskCalcError> {
        let started = Instant::now();
        let patient = self.validate(raw)?;

        let all_cause = self.explain_outcome(Outcome::AllCause, &patient)?;
        let cardiovascular = self.explain_outcome(Outcome::Cardiovascular, &patient)?;
        let report = RiskReport::new(all_cause, cardiovascular);

        tracing::info!(
            "Assessed report {} (all_cause={:.4}, cardiovascular={:.4}) in {:?}",
            report.id,
            report.estimate.all_cause.mortality_risk,
            report.estimate.cardiovascular.mortality_risk,
            started.elapsed()
        );
        Ok(report)
    }

    /// Assessment of a single outcome; only that model's fields are required.
    ///
    /// # Errors
    /// Returns `RiskCalcError::Validation` for bad input, other variants for
    /// server-side failures.
    pub fn assess_outcome(
        &self,
        outcome: Outcome,
        raw: &HashMap<String, RawValue>,
    ) -> Result<OutcomeAssessment, RiskCalcError> {
        let started = Instant::now();
        let patient = PatientFeatures::from_raw(self.model(outcome).feature_spec(), raw)
            .map_err(RiskCalcError::Validation)?;
        let assessment = self.explain_outcome(outcome, &patient)?;

        tracing::info!(
            "Assessed {} risk={:.4} in {:?}",
            outcome,
            assessment.risk.mortality_risk,
            started.elapsed()
        );
        Ok(assessment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::scaler::ScalerParams;
    use crate::adapters::PermutationExplainer;
    use crate::domain::ScaledFeatures;
    use crate::ports::SurvivalCurve;

    /// Survival falls linearly with the first feature.
    struct LinearScorer {
        outcome: Outcome,
        spec: FeatureSpec,
    }

    impl SurvivalScorer for LinearScorer {
        fn outcome(&self) -> Outcome {
            self.outcome
        }

        fn feature_spec(&self) -> &FeatureSpec {
            &self.spec
        }

        fn survival_curve(&self, x: &ScaledFeatures) -> Result<SurvivalCurve, RiskCalcError> {
            let s = (0.8 - 0.1 * x.as_slice()[0]).clamp(0.0, 1.0);
            SurvivalCurve::new(vec![240.0], vec![s]).map_err(RiskCalcError::Model)
        }
    }

    fn spec(names: &[&str]) -> FeatureSpec {
        FeatureSpec::new(names.iter().map(|s| (*s).to_string()).collect()).expect("spec")
    }

    fn model(outcome: Outcome, names: &[&str]) -> OutcomeModel {
        let spec = spec(names);
        let background =
            BackgroundSet::from_rows(outcome, spec.clone(), vec![vec![0.0; names.len()]])
                .expect("background");
        OutcomeModel::new(Arc::new(LinearScorer { outcome, spec }), background)
    }

    fn scaler() -> StandardScaler {
        StandardScaler::from_params(ScalerParams {
            feature_names: vec!["Age".into(), "SBP".into()],
            mean: vec![60.0, 130.0],
            scale: vec![10.0, 20.0],
            passthrough: vec!["smoking".into()],
        })
        .expect("scaler")
    }

    fn service() -> RiskService {
        RiskService::new(
            scaler(),
            model(Outcome::AllCause, &["Age", "smoking"]),
            model(Outcome::Cardiovascular, &["SBP", "Age"]),
            Arc::new(PermutationExplainer::default()),
        )
        .expect("service")
    }

    fn raw(pairs: &[(&str, f64)]) -> HashMap<String, RawValue> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), RawValue::from(*v)))
            .collect()
    }

    #[test]
    fn test_input_spec_is_union() {
        assert_eq!(service().input_spec().names(), ["Age", "smoking", "SBP"]);
    }

    #[test]
    fn test_assess_both_outcomes() {
        let report = service()
            .assess(&raw(&[("Age", 70.0), ("smoking", 1.0), ("SBP", 150.0)]))
            .expect("report");
        // Age 70 scales to 1.0, SBP 150 to 1.0.
        assert!((report.estimate.all_cause.mortality_risk - 0.3).abs() < 1e-12);
        assert!((report.estimate.cardiovascular.mortality_risk - 0.3).abs() < 1e-12);
        assert_eq!(report.assessments.len(), 2);
    }

    #[test]
    fn test_missing_field_is_validation_error() {
        let err = service()
            .assess(&raw(&[("Age", 70.0), ("smoking", 1.0)]))
            .expect_err("SBP missing");
        assert!(err.is_client_error());
        assert_eq!(err.to_string(), "Invalid patient input: Missing value for SBP");
    }

    #[test]
    fn test_single_outcome_needs_only_its_fields() {
        let assessment = service()
            .assess_outcome(Outcome::AllCause, &raw(&[("Age", 60.0), ("smoking", 0.0)]))
            .expect("assessment");
        assert!((assessment.risk.mortality_risk - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_swapped_models() {
        let result = RiskService::new(
            scaler(),
            model(Outcome::Cardiovascular, &["SBP"]),
            model(Outcome::AllCause, &["Age"]),
            Arc::new(PermutationExplainer::default()),
        );
        assert!(matches!(result, Err(RiskCalcError::Artifact(_))));
    }

    #[test]
    fn test_rejects_unscaled_feature() {
        let result = RiskService::new(
            scaler(),
            model(Outcome::AllCause, &["Age", "BUN"]),
            model(Outcome::Cardiovascular, &["SBP"]),
            Arc::new(PermutationExplainer::default()),
        );
        let err = result.err().expect("BUN is not in the scaler");
        assert!(err.to_string().contains("BUN"));
    }
}
