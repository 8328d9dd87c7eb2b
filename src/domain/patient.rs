//! Patient input types for CKD mortality risk prediction.
//!
//! Feature names follow the columns the survival models were fitted on.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Mortality outcome predicted by one of the two survival models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// All-cause death (gradient-boosted survival model)
    AllCause,
    /// Cardiovascular death (random survival forest)
    Cardiovascular,
}

impl Outcome {
    /// Both outcomes in display order.
    pub const ALL: [Outcome; 2] = [Outcome::AllCause, Outcome::Cardiovascular];

    /// Wire name, also used as the `model_type` request value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AllCause => "all_cause",
            Self::Cardiovascular => "cardiovascular",
        }
    }

    /// Human-readable title.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::AllCause => "All-cause mortality",
            Self::Cardiovascular => "Cardiovascular mortality",
        }
    }

    /// Parse a `model_type` value.
    #[must_use]
    pub fn from_model_type(s: &str) -> Option<Self> {
        match s.trim() {
            "all_cause" => Some(Self::AllCause),
            "cardiovascular" | "cardio" => Some(Self::Cardiovascular),
            _ => None,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Features of the all-cause model, in fitted order.
pub const ALL_CAUSE_FEATURES: [&str; 13] = [
    "WBC",
    "Dyslipidemia",
    "DBP",
    "Creatinine",
    "Glucose",
    "Gender",
    "TG",
    "SBP",
    "Age",
    "MCV",
    "smoking",
    "Platelet",
    "CI",
];

/// Features of the cardiovascular model, in fitted order.
pub const CARDIOVASCULAR_FEATURES: [&str; 7] =
    ["WBC", "DBP", "UricAcid", "SBP", "BUN", "Age", "CI"];

/// Binary features that are never passed through the scaler.
pub const CATEGORICAL_FEATURES: [&str; 4] = ["Gender", "smoking", "HighCholesterol", "Dyslipidemia"];

/// Ordered list of feature names a model was fitted on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct FeatureSpec {
    names: Vec<String>,
}

impl FeatureSpec {
    /// Create a feature spec.
    ///
    /// # Errors
    /// Returns error if the list is empty or contains duplicates.
    pub fn new(names: Vec<String>) -> Result<Self, String> {
        if names.is_empty() {
            return Err("feature list is empty".to_string());
        }
        let mut seen = HashSet::with_capacity(names.len());
        for name in &names {
            if name.trim().is_empty() {
                return Err("feature list contains a blank name".to_string());
            }
            if !seen.insert(name.as_str()) {
                return Err(format!("duplicate feature name: {name}"));
            }
        }
        Ok(Self { names })
    }

    /// Default feature list for an outcome.
    #[must_use]
    pub fn default_for(outcome: Outcome) -> Self {
        let names: &[&str] = match outcome {
            Outcome::AllCause => &ALL_CAUSE_FEATURES,
            Outcome::Cardiovascular => &CARDIOVASCULAR_FEATURES,
        };
        Self {
            names: names.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Order-preserving union of several specs (first occurrence wins).
    #[must_use]
    pub fn union<'a>(specs: impl IntoIterator<Item = &'a FeatureSpec>) -> Self {
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for spec in specs {
            for name in &spec.names {
                if seen.insert(name.clone()) {
                    names.push(name.clone());
                }
            }
        }
        Self { names }
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

impl TryFrom<Vec<String>> for FeatureSpec {
    type Error = String;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(names)
    }
}

impl From<FeatureSpec> for Vec<String> {
    fn from(spec: FeatureSpec) -> Self {
        spec.names
    }
}

/// What is wrong with a single input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "problem", rename_all = "snake_case")]
pub enum FieldProblem {
    Missing,
    NotNumeric { raw: String },
    NotFinite,
}

/// Validation failure for one named field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    #[serde(flatten)]
    pub problem: FieldProblem,
}

impl FieldError {
    fn new(field: &str, problem: FieldProblem) -> Self {
        Self {
            field: field.to_string(),
            problem,
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.problem {
            FieldProblem::Missing => write!(f, "Missing value for {}", self.field),
            FieldProblem::NotNumeric { raw } => {
                write!(f, "Value for {} is not a number: {raw:?}", self.field)
            }
            FieldProblem::NotFinite => write!(f, "Value for {} must be finite", self.field),
        }
    }
}

/// Join field errors into one message.
#[must_use]
pub fn describe_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// An input value as it arrived: a form string or a JSON number.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Number(f64),
    Text(String),
}

impl RawValue {
    /// Convert a JSON value. `null` counts as absent.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(v) => Some(Self::Number(v)),
                None => Some(Self::Text(n.to_string())),
            },
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            other => Some(Self::Text(other.to_string())),
        }
    }

    fn parse(&self) -> Result<f64, FieldProblem> {
        let value = match self {
            Self::Number(v) => *v,
            Self::Text(s) => {
                let trimmed = s.trim();
                // Blank form inputs are submitted as empty strings.
                if trimmed.is_empty() {
                    return Err(FieldProblem::Missing);
                }
                trimmed.parse::<f64>().map_err(|_| FieldProblem::NotNumeric {
                    raw: s.clone(),
                })?
            }
        };
        if value.is_finite() {
            Ok(value)
        } else {
            Err(FieldProblem::NotFinite)
        }
    }
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for RawValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// Validated patient features in the order of a [`FeatureSpec`].
///
/// Values are not range-checked: out-of-range but numeric inputs go to the
/// models as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct PatientFeatures {
    spec: FeatureSpec,
    values: Vec<f64>,
}

impl PatientFeatures {
    /// Build features from raw inputs, collecting every invalid field.
    ///
    /// Keys that are not part of `spec` are ignored.
    ///
    /// # Errors
    /// Returns one [`FieldError`] per missing or non-numeric field, in spec order.
    pub fn from_raw(
        spec: &FeatureSpec,
        raw: &HashMap<String, RawValue>,
    ) -> Result<Self, Vec<FieldError>> {
        let mut values = Vec::with_capacity(spec.len());
        let mut errors = Vec::new();

        for name in spec.names() {
            let parsed = raw
                .get(name)
                .ok_or(FieldProblem::Missing)
                .and_then(RawValue::parse);
            match parsed {
                Ok(v) => values.push(v),
                Err(problem) => errors.push(FieldError::new(name, problem)),
            }
        }

        if errors.is_empty() {
            Ok(Self {
                spec: spec.clone(),
                values,
            })
        } else {
            Err(errors)
        }
    }

    /// Create features from already-parsed values.
    ///
    /// # Errors
    /// Returns error if the value count does not match the spec.
    pub fn from_values(spec: &FeatureSpec, values: Vec<f64>) -> Result<Self, String> {
        if values.len() != spec.len() {
            return Err(format!(
                "Expected {} features, got {}",
                spec.len(),
                values.len()
            ));
        }
        Ok(Self {
            spec: spec.clone(),
            values,
        })
    }

    #[must_use]
    pub fn spec(&self) -> &FeatureSpec {
        &self.spec
    }

    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Value of a named feature, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.spec.index_of(name).map(|i| self.values[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.spec
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }
}

/// Features after the scaler transform, in one model's fitted order.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaledFeatures {
    values: Vec<f64>,
}

impl ScaledFeatures {
    #[must_use]
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Overwrite one coordinate. Used when building perturbed inputs.
    pub fn set(&mut self, index: usize, value: f64) {
        self.values[index] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, RawValue> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), RawValue::from(*v)))
            .collect()
    }

    #[test]
    fn test_from_raw_in_spec_order() {
        let spec = FeatureSpec::default_for(Outcome::Cardiovascular);
        let input = raw(&[
            ("Age", "71"),
            ("WBC", "6.2"),
            ("DBP", "80"),
            ("UricAcid", "7.1"),
            ("SBP", "142"),
            ("BUN", "28"),
            ("CI", "2"),
            ("unrelated", "whatever"),
        ]);

        let features = PatientFeatures::from_raw(&spec, &input).expect("Should parse");
        assert_eq!(features.values().len(), 7);
        assert!((features.values()[0] - 6.2).abs() < f64::EPSILON);
        assert_eq!(features.get("Age"), Some(71.0));
        assert_eq!(features.get("unrelated"), None);
    }

    #[test]
    fn test_from_raw_collects_every_error() {
        let spec = FeatureSpec::default_for(Outcome::Cardiovascular);
        let input = raw(&[
            ("WBC", "6.2"),
            ("DBP", ""),
            ("UricAcid", "high"),
            ("SBP", "NaN"),
            ("BUN", "28"),
            ("CI", "2"),
        ]);

        let errors = PatientFeatures::from_raw(&spec, &input).expect_err("Must fail");
        assert_eq!(errors.len(), 4);
        assert_eq!(errors[0].field, "DBP");
        assert_eq!(errors[0].problem, FieldProblem::Missing);
        assert!(matches!(errors[1].problem, FieldProblem::NotNumeric { .. }));
        assert_eq!(errors[2].problem, FieldProblem::NotFinite);
        assert_eq!(errors[3].field, "Age");
        assert_eq!(errors[3].to_string(), "Missing value for Age");
    }

    #[test]
    fn test_out_of_range_values_pass_through() {
        let spec = FeatureSpec::new(vec!["Age".into(), "SBP".into()]).expect("valid spec");
        let mut input = HashMap::new();
        input.insert("Age".to_string(), RawValue::Number(-5.0));
        input.insert("SBP".to_string(), RawValue::Number(900.0));

        let features = PatientFeatures::from_raw(&spec, &input).expect("No bounds validation");
        assert_eq!(features.values(), &[-5.0, 900.0]);
    }

    #[test]
    fn test_json_null_counts_as_missing() {
        assert_eq!(RawValue::from_json(&serde_json::Value::Null), None);
        assert_eq!(
            RawValue::from_json(&serde_json::json!(3.5)),
            Some(RawValue::Number(3.5))
        );
        assert_eq!(
            RawValue::from_json(&serde_json::json!("4")),
            Some(RawValue::Text("4".into()))
        );
    }

    #[test]
    fn test_feature_spec_rejects_duplicates() {
        assert!(FeatureSpec::new(vec!["Age".into(), "Age".into()]).is_err());
        assert!(FeatureSpec::new(vec![]).is_err());
    }

    #[test]
    fn test_union_preserves_first_occurrence() {
        let a = FeatureSpec::default_for(Outcome::AllCause);
        let c = FeatureSpec::default_for(Outcome::Cardiovascular);
        let u = FeatureSpec::union([&a, &c]);

        assert_eq!(u.len(), 15);
        assert_eq!(&u.names()[..13], a.names());
        assert_eq!(&u.names()[13..], &["UricAcid".to_string(), "BUN".to_string()]);
    }

    #[test]
    fn test_outcome_model_type() {
        assert_eq!(Outcome::from_model_type("all_cause"), Some(Outcome::AllCause));
        assert_eq!(
            Outcome::from_model_type("cardiovascular"),
            Some(Outcome::Cardiovascular)
        );
        assert_eq!(Outcome::from_model_type("other"), None);
    }
}
