#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use ckd_risk::adapters::artifacts::{
    ALL_CAUSE_BACKGROUND_FILE, ALL_CAUSE_MODEL_FILE, CARDIOVASCULAR_BACKGROUND_FILE,
    CARDIOVASCULAR_MODEL_FILE, SCALER_FILE,
};
use ckd_risk::adapters::{ArtifactBundle, IntegrityPolicy, PermutationExplainer};
use ckd_risk::application::{OutcomeModel, RiskService};
use ckd_risk::domain::{
    FeatureSpec, Outcome, RawValue, ScaledFeatures, ALL_CAUSE_FEATURES, CARDIOVASCULAR_FEATURES,
};
use ckd_risk::ports::{SurvivalCurve, SurvivalScorer};
use ckd_risk::RiskCalcError;

pub const TIMES: [f64; 5] = [12.0, 60.0, 120.0, 240.0, 300.0];

/// A complete artifact bundle in a temp dir. Every model is monotone: older
/// age, higher creatinine, smoking and higher SBP never lower the risk.
pub struct Fixture {
    _tmp: TempDir,
    pub dir: std::path::PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let tmp = TempDir::new().expect("create temp dir");
        let dir = tmp.path().join("artifacts");
        fs::create_dir_all(dir.join("models")).expect("create models dir");

        let fixture = Self { _tmp: tmp, dir };
        fixture.write_json(SCALER_FILE, &scaler_json());
        fixture.write_json(ALL_CAUSE_MODEL_FILE, &gbsa_json());
        fixture.write_json(CARDIOVASCULAR_MODEL_FILE, &rsf_json());
        fixture.write(ALL_CAUSE_BACKGROUND_FILE, &background_csv(&ALL_CAUSE_FEATURES, 30));
        fixture.write(
            CARDIOVASCULAR_BACKGROUND_FILE,
            &background_csv(&CARDIOVASCULAR_FEATURES, 30),
        );
        fixture
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn write(&self, rel: &str, content: &str) {
        fs::write(self.dir.join(rel), content).expect("write fixture file");
    }

    pub fn write_json(&self, rel: &str, value: &Value) {
        self.write(rel, &serde_json::to_string_pretty(value).expect("serialize fixture"));
    }

    pub fn load(&self) -> ArtifactBundle {
        ArtifactBundle::load(&self.dir, &IntegrityPolicy::default()).expect("load fixture bundle")
    }

    pub fn service(&self) -> RiskService {
        RiskService::from_bundle(self.load(), Arc::new(PermutationExplainer::default()))
            .expect("build service")
    }

    /// Service whose cardiovascular model fails on every evaluation.
    pub fn failing_service(&self) -> RiskService {
        let bundle = self.load();
        let cardio = bundle.cardiovascular;
        RiskService::new(
            bundle.scaler,
            OutcomeModel::new(bundle.all_cause.scorer, bundle.all_cause.background),
            OutcomeModel::new(Arc::new(FailingScorer(cardio.scorer)), cardio.background),
            Arc::new(PermutationExplainer::default()),
        )
        .expect("build failing service")
    }
}

pub const SCORER_FAILURE: &str = "tree evaluation exploded";

/// Keeps the wrapped model's outcome and features but never scores.
pub struct FailingScorer(pub Arc<dyn SurvivalScorer>);

impl SurvivalScorer for FailingScorer {
    fn outcome(&self) -> Outcome {
        self.0.outcome()
    }

    fn feature_spec(&self) -> &FeatureSpec {
        self.0.feature_spec()
    }

    fn survival_curve(&self, _x: &ScaledFeatures) -> Result<SurvivalCurve, RiskCalcError> {
        Err(RiskCalcError::Model(SCORER_FAILURE.into()))
    }
}

pub fn scaler_json() -> Value {
    json!({
        "feature_names": ["WBC", "DBP", "Creatinine", "Glucose", "TG", "SBP", "Age",
                          "MCV", "Platelet", "CI", "UricAcid", "BUN"],
        "mean":  [7.0, 75.0, 2.0, 110.0, 150.0, 135.0, 60.0, 90.0, 230.0, 3.0, 7.0, 30.0],
        "scale": [2.0, 10.0, 1.0, 30.0, 60.0, 20.0, 12.0, 6.0, 60.0, 2.0, 1.5, 12.0],
        "passthrough": ["Gender", "smoking", "Dyslipidemia", "HighCholesterol"]
    })
}

fn stump(feature: usize, threshold: f64, low: Value, high: Value) -> Value {
    json!({"nodes": [
        {"split": {"feature": feature, "threshold": threshold, "left": 1, "right": 2}},
        {"leaf": low},
        {"leaf": high}
    ]})
}

/// All-cause model. Feature indices: Creatinine 3, Age 8, smoking 10.
pub fn gbsa_json() -> Value {
    json!({
        "kind": "gradient_boosted_survival",
        "outcome": "all_cause",
        "feature_names": ALL_CAUSE_FEATURES,
        "unique_times": TIMES,
        "baseline_cumulative_hazard": [0.01, 0.05, 0.1, 0.2, 0.25],
        "init_score": 0.0,
        "learning_rate": 0.5,
        "trees": [
            stump(8, 0.0, json!(-0.8), json!(0.8)),
            {"nodes": [
                {"split": {"feature": 8, "threshold": 1.0, "left": 1, "right": 4}},
                {"split": {"feature": 8, "threshold": -1.0, "left": 2, "right": 3}},
                {"leaf": -0.4},
                {"leaf": 0.0},
                {"leaf": 0.6}
            ]},
            stump(3, 0.0, json!(-0.3), json!(0.5)),
            stump(10, 0.5, json!(0.0), json!(0.3))
        ]
    })
}

/// Cardiovascular model. Feature indices: SBP 3, Age 5.
pub fn rsf_json() -> Value {
    json!({
        "kind": "random_survival_forest",
        "outcome": "cardiovascular",
        "feature_names": CARDIOVASCULAR_FEATURES,
        "unique_times": TIMES,
        "trees": [
            stump(5, 0.0, json!([0.99, 0.97, 0.94, 0.88, 0.85]), json!([0.97, 0.90, 0.80, 0.62, 0.55])),
            stump(3, 0.0, json!([0.99, 0.98, 0.95, 0.90, 0.87]), json!([0.96, 0.88, 0.78, 0.60, 0.52])),
            stump(5, 1.0, json!([0.99, 0.96, 0.92, 0.85, 0.80]), json!([0.95, 0.85, 0.70, 0.50, 0.42]))
        ]
    })
}

/// Background rows in scaled space, with a leading index column.
pub fn background_csv(features: &[&str], rows: usize) -> String {
    let mut out = format!(",{}\n", features.join(","));
    for i in 0..rows {
        let cells: Vec<String> = features
            .iter()
            .enumerate()
            .map(|(j, name)| {
                if matches!(*name, "Gender" | "smoking" | "Dyslipidemia") {
                    format!("{}", (i + j) % 2)
                } else {
                    format!("{:.2}", ((i * 7 + j * 3) % 11) as f64 / 5.0 - 1.0)
                }
            })
            .collect();
        out.push_str(&format!("{i},{}\n", cells.join(",")));
    }
    out
}

fn patient(pairs: &[(&str, f64)]) -> HashMap<String, RawValue> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), RawValue::from(*v)))
        .collect()
}

pub fn young_patient() -> HashMap<String, RawValue> {
    patient(&[
        ("WBC", 6.5),
        ("Dyslipidemia", 0.0),
        ("DBP", 70.0),
        ("Creatinine", 0.8),
        ("Glucose", 90.0),
        ("Gender", 0.0),
        ("TG", 110.0),
        ("SBP", 110.0),
        ("Age", 30.0),
        ("MCV", 90.0),
        ("smoking", 0.0),
        ("Platelet", 250.0),
        ("CI", 1.0),
        ("UricAcid", 5.0),
        ("BUN", 14.0),
    ])
}

pub fn elderly_patient() -> HashMap<String, RawValue> {
    patient(&[
        ("WBC", 9.5),
        ("Dyslipidemia", 1.0),
        ("DBP", 95.0),
        ("Creatinine", 4.5),
        ("Glucose", 160.0),
        ("Gender", 1.0),
        ("TG", 240.0),
        ("SBP", 175.0),
        ("Age", 85.0),
        ("MCV", 94.0),
        ("smoking", 1.0),
        ("Platelet", 180.0),
        ("CI", 6.0),
        ("UricAcid", 9.0),
        ("BUN", 60.0),
    ])
}

/// The same patient as submitted through the HTML form.
pub fn as_form(raw: &HashMap<String, RawValue>) -> HashMap<String, String> {
    raw.iter()
        .map(|(k, v)| {
            let text = match v {
                RawValue::Number(n) => n.to_string(),
                RawValue::Text(s) => s.clone(),
            };
            (k.clone(), text)
        })
        .collect()
}

/// The same patient as a JSON API body.
pub fn as_json(raw: &HashMap<String, RawValue>, model_type: &str) -> Value {
    let mut body = serde_json::Map::new();
    body.insert("model_type".into(), json!(model_type));
    for (k, v) in raw {
        let value = match v {
            RawValue::Number(n) => json!(n),
            RawValue::Text(s) => json!(s),
        };
        body.insert(k.clone(), value);
    }
    Value::Object(body)
}
