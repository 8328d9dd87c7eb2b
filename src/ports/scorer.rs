//! Scorer port: Trait for pre-fitted survival models.
//!
//! Abstracts the concrete model family (boosting, random forest) from the
//! risk service.

use crate::domain::{FeatureSpec, Outcome, ScaledFeatures};
use crate::RiskCalcError;

/// Read a step function sampled at `times` at time `t`.
///
/// Before the first time point the first value is returned, after the last
/// the last value; in between values are linearly interpolated.
/// Returns `None` when `times` is empty.
pub fn interpolate_at(times: &[f64], t: f64, value_at: impl Fn(usize) -> f64) -> Option<f64> {
    let last = times.len().checked_sub(1)?;
    if t <= times[0] {
        return Some(value_at(0));
    }
    if t >= times[last] {
        return Some(value_at(last));
    }

    // times[hi - 1] < t <= times[hi], hi in 1..=last
    let hi = times.partition_point(|&x| x < t);
    if times[hi] == t {
        return Some(value_at(hi));
    }
    let lo = hi - 1;
    let w = (t - times[lo]) / (times[hi] - times[lo]);
    let (a, b) = (value_at(lo), value_at(hi));
    Some(a + w * (b - a))
}

/// Survival probability as a function of time.
#[derive(Debug, Clone, PartialEq)]
pub struct SurvivalCurve {
    times: Vec<f64>,
    survival: Vec<f64>,
}

impl SurvivalCurve {
    /// Create a curve.
    ///
    /// # Errors
    /// Returns error if the series are empty, differ in length, contain
    /// non-finite values, or times are not strictly increasing.
    pub fn new(times: Vec<f64>, survival: Vec<f64>) -> Result<Self, String> {
        if times.is_empty() {
            return Err("survival curve has no time points".into());
        }
        if times.len() != survival.len() {
            return Err(format!(
                "survival curve length mismatch: {} times, {} values",
                times.len(),
                survival.len()
            ));
        }
        if times.iter().chain(survival.iter()).any(|v| !v.is_finite()) {
            return Err("survival curve contains non-finite values".into());
        }
        if times.windows(2).any(|w| w[0] >= w[1]) {
            return Err("survival curve times must be strictly increasing".into());
        }
        Ok(Self { times, survival })
    }

    #[must_use]
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    #[must_use]
    pub fn survival(&self) -> &[f64] {
        &self.survival
    }

    /// Survival probability at time `t`.
    #[must_use]
    pub fn at(&self, t: f64) -> f64 {
        interpolate_at(&self.times, t, |i| self.survival[i]).unwrap_or(1.0)
    }
}

/// Trait for a pre-fitted survival model.
///
/// Implementations are immutable after load and shared across requests.
pub trait SurvivalScorer: Send + Sync {
    /// Outcome this model predicts.
    fn outcome(&self) -> Outcome;

    /// Features the model was fitted on, in input order.
    fn feature_spec(&self) -> &FeatureSpec;

    /// Full survival curve for one scaled input.
    ///
    /// # Errors
    /// Returns `RiskCalcError::Model` if the input does not fit the model.
    fn survival_curve(&self, x: &ScaledFeatures) -> Result<SurvivalCurve, RiskCalcError>;

    /// Survival probability at `horizon`, in [0, 1].
    ///
    /// # Errors
    /// Returns `RiskCalcError::Model` if the input does not fit the model.
    fn survival_at(&self, x: &ScaledFeatures, horizon: f64) -> Result<f64, RiskCalcError> {
        Ok(self.survival_curve(x)?.at(horizon).clamp(0.0, 1.0))
    }

    /// Probability of the event before `horizon`, in [0, 1].
    ///
    /// # Errors
    /// Returns `RiskCalcError::Model` if the input does not fit the model.
    fn risk_at(&self, x: &ScaledFeatures, horizon: f64) -> Result<f64, RiskCalcError> {
        Ok(1.0 - self.survival_at(x, horizon)?)
    }
}
