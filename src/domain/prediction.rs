//! Risk estimate and attribution types.
//!
//! Represents the output of the survival models and the explainer.

use serde::{Deserialize, Serialize};

use super::Outcome;

/// Risk horizon in months (20 years).
pub const TIME_HORIZON_MONTHS: f64 = 240.0;

/// Round to two decimals, the precision reported to clients.
#[must_use]
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Survival and mortality probability for one outcome at the horizon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRisk {
    /// Probability of surviving past the horizon (0.0 to 1.0)
    pub survival_probability: f64,

    /// Probability of the event before the horizon (0.0 to 1.0)
    pub mortality_risk: f64,
}

impl OutcomeRisk {
    /// Create a risk from a survival probability, clamped to [0, 1].
    #[must_use]
    pub fn from_survival(survival: f64) -> Self {
        let survival_probability = survival.clamp(0.0, 1.0);
        Self {
            survival_probability,
            mortality_risk: 1.0 - survival_probability,
        }
    }

    #[must_use]
    pub fn mortality_percent(&self) -> f64 {
        round2(self.mortality_risk * 100.0)
    }

    #[must_use]
    pub fn survival_percent(&self) -> f64 {
        round2(self.survival_probability * 100.0)
    }
}

/// All-cause and cardiovascular mortality risk for one patient.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskEstimate {
    pub all_cause: OutcomeRisk,
    pub cardiovascular: OutcomeRisk,
}

impl RiskEstimate {
    #[must_use]
    pub fn get(&self, outcome: Outcome) -> &OutcomeRisk {
        match outcome {
            Outcome::AllCause => &self.all_cause,
            Outcome::Cardiovascular => &self.cardiovascular,
        }
    }
}

/// Signed contribution of one feature to a prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    pub feature: String,
    /// Raw (unscaled) patient value, for display
    pub value: f64,
    pub contribution: f64,
}

/// Per-feature attributions explaining one prediction against a background.
///
/// `base_value + sum(contribution)` reconstructs `prediction`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionSet {
    pub outcome: Outcome,
    /// Mean model output over the background rows used
    pub base_value: f64,
    /// Model output for this patient
    pub prediction: f64,
    pub attributions: Vec<Attribution>,
}

impl AttributionSet {
    /// Sum of all contributions.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.attributions.iter().map(|a| a.contribution).sum()
    }

    /// Part of `prediction - base_value` not covered by the contributions.
    #[must_use]
    pub fn residual(&self) -> f64 {
        self.prediction - self.base_value - self.total()
    }

    /// Attributions ordered by decreasing magnitude (ties keep feature order).
    #[must_use]
    pub fn ranked(&self) -> Vec<&Attribution> {
        let mut out: Vec<&Attribution> = self.attributions.iter().collect();
        out.sort_by(|a, b| b.contribution.abs().total_cmp(&a.contribution.abs()));
        out
    }
}

/// Risk and explanation for one outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeAssessment {
    pub outcome: Outcome,
    pub risk: OutcomeRisk,
    pub attribution: AttributionSet,
}

/// Complete result of one risk request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskReport {
    /// Unique identifier, for correlating logs
    pub id: String,

    pub estimate: RiskEstimate,

    /// One assessment per outcome, all-cause first
    pub assessments: Vec<OutcomeAssessment>,

    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl RiskReport {
    /// Create a report from the two outcome assessments.
    #[must_use]
    pub fn new(all_cause: OutcomeAssessment, cardiovascular: OutcomeAssessment) -> Self {
        Self {
            id: uuid_v4(),
            estimate: RiskEstimate {
                all_cause: all_cause.risk,
                cardiovascular: cardiovascular.risk,
            },
            assessments: vec![all_cause, cardiovascular],
            created_at: chrono::Utc::now(),
        }
    }

    #[must_use]
    pub fn assessment(&self, outcome: Outcome) -> Option<&OutcomeAssessment> {
        self.assessments.iter().find(|a| a.outcome == outcome)
    }
}

/// Generate a random UUID v4 string.
fn uuid_v4() -> String {
    use rand::Rng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    let mut rng = ChaCha20Rng::from_entropy();
    let bytes: [u8; 16] = rng.gen();

    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3],
        bytes[4], bytes[5],
        (bytes[6] & 0x0f) | 0x40, bytes[7],
        (bytes[8] & 0x3f) | 0x80, bytes[9],
        bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15]
    )
}
