//! HTML and SVG rendering.
//!
//! Produces the single-page form, the result view, and a SHAP-style
//! waterfall chart per outcome. Output is self-contained (inline CSS, inline
//! SVG) so the service ships without a template directory.

mod chart;

use std::fmt::Write as _;

use base64::Engine;

use crate::domain::{
    FeatureSpec, FieldError, OutcomeAssessment, RiskReport, CATEGORICAL_FEATURES,
    TIME_HORIZON_MONTHS,
};
use crate::RiskCalcError;

pub use chart::{waterfall_svg, DEFAULT_MAX_DISPLAY};

/// Escape text for use in HTML content and attribute values.
#[must_use]
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Base64 encoding of an SVG document, as returned in `shap_plot`.
#[must_use]
pub fn svg_base64(svg: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(svg.as_bytes())
}

/// Display label and unit hint for a model feature.
#[must_use]
pub fn feature_label(name: &str) -> (&str, &'static str) {
    match name {
        "Age" => ("Age", "years"),
        "Gender" => ("Gender", "0 = female, 1 = male"),
        "smoking" => ("Smoking", "0 = no, 1 = yes"),
        "Dyslipidemia" => ("Dyslipidemia", "0 = no, 1 = yes"),
        "HighCholesterol" => ("High cholesterol", "0 = no, 1 = yes"),
        "SBP" => ("Systolic blood pressure", "mmHg"),
        "DBP" => ("Diastolic blood pressure", "mmHg"),
        "WBC" => ("White blood cell count", "10^3/uL"),
        "Platelet" => ("Platelet count", "10^3/uL"),
        "MCV" => ("Mean corpuscular volume", "fL"),
        "Creatinine" => ("Serum creatinine", "mg/dL"),
        "BUN" => ("Blood urea nitrogen", "mg/dL"),
        "UricAcid" => ("Uric acid", "mg/dL"),
        "Glucose" => ("Fasting glucose", "mg/dL"),
        "TG" => ("Triglycerides", "mg/dL"),
        "CI" => ("CI", ""),
        other => (other, ""),
    }
}

const STYLE: &str = r#"
body { font-family: -apple-system, "Segoe UI", Helvetica, Arial, sans-serif; margin: 0; background: #f5f7fa; color: #1f2933; }
main { max-width: 960px; margin: 0 auto; padding: 24px; }
h1 { font-size: 1.6rem; margin-bottom: 4px; }
.subtitle { color: #52606d; margin-top: 0; }
form { display: grid; grid-template-columns: repeat(auto-fill, minmax(260px, 1fr)); gap: 12px 20px; background: #fff; padding: 20px; border-radius: 8px; }
label { display: flex; flex-direction: column; font-weight: 600; font-size: 0.9rem; }
label span { font-weight: 400; color: #7b8794; font-size: 0.8rem; }
input { margin-top: 4px; padding: 6px 8px; border: 1px solid #cbd2d9; border-radius: 4px; font-size: 1rem; }
button { grid-column: 1 / -1; padding: 10px; font-size: 1rem; background: #2563eb; color: #fff; border: none; border-radius: 6px; cursor: pointer; }
.cards { display: grid; grid-template-columns: repeat(auto-fit, minmax(300px, 1fr)); gap: 20px; }
.card { background: #fff; border-radius: 8px; padding: 20px; }
.risk { font-size: 2.4rem; font-weight: 700; color: #b91c1c; margin: 8px 0; }
.errors { background: #fef2f2; border: 1px solid #fecaca; border-radius: 8px; padding: 12px 20px; color: #991b1b; }
.note { color: #7b8794; font-size: 0.8rem; }
"#;

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n<main>\n{body}</main>\n</body>\n</html>\n",
        escape_html(title)
    )
}

fn horizon_years() -> f64 {
    TIME_HORIZON_MONTHS / 12.0
}

/// The input form, one field per feature in `spec`.
#[must_use]
pub fn index_page(spec: &FeatureSpec) -> String {
    let mut body = String::new();
    let _ = write!(
        body,
        "<h1>CKD Mortality Risk Calculator</h1>\n\
         <p class=\"subtitle\">Predicts {:.0}-year all-cause and cardiovascular mortality risk.</p>\n\
         <form method=\"post\" action=\"/predict\">\n",
        horizon_years()
    );
    for name in spec.names() {
        let (label, hint) = feature_label(name);
        let step = if CATEGORICAL_FEATURES.contains(&name.as_str()) {
            "1"
        } else {
            "any"
        };
        let _ = writeln!(
            body,
            "<label>{}<span>{}</span><input type=\"number\" name=\"{}\" step=\"{step}\" required></label>",
            escape_html(label),
            escape_html(hint),
            escape_html(name)
        );
    }
    body.push_str("<button type=\"submit\">Calculate risk</button>\n</form>\n");
    page("CKD Mortality Risk Calculator", &body)
}

fn assessment_card(assessment: &OutcomeAssessment) -> Result<String, RiskCalcError> {
    let mut card = String::new();
    let _ = write!(
        card,
        "<section class=\"card\">\n<h2>{}</h2>\n\
         <div class=\"risk\">{:.2}%</div>\n\
         <p>{:.0}-year mortality risk &middot; survival probability {:.2}%</p>\n",
        escape_html(assessment.outcome.label()),
        assessment.risk.mortality_percent(),
        horizon_years(),
        assessment.risk.survival_percent()
    );
    card.push_str(&waterfall_svg(&assessment.attribution, DEFAULT_MAX_DISPLAY)?);
    card.push_str("\n</section>\n");
    Ok(card)
}

/// Result view with both outcomes.
pub fn result_page(report: &RiskReport) -> Result<String, RiskCalcError> {
    let mut body = String::from("<h1>Risk assessment</h1>\n<div class=\"cards\">\n");
    for assessment in &report.assessments {
        body.push_str(&assessment_card(assessment)?);
    }
    let _ = write!(
        body,
        "</div>\n<p class=\"note\">Bars show each feature's contribution to the predicted risk \
         relative to the average over the reference population. Report {}.</p>\n\
         <p><a href=\"/\">New calculation</a></p>\n",
        escape_html(&report.id)
    );
    Ok(page("Risk assessment", &body))
}

/// Client error view listing every invalid field.
#[must_use]
pub fn validation_error_page(errors: &[FieldError]) -> String {
    let mut body = String::from(
        "<h1>Please check your input</h1>\n<div class=\"errors\">\n<ul>\n",
    );
    for e in errors {
        let _ = writeln!(body, "<li>{}</li>", escape_html(&e.to_string()));
    }
    body.push_str("</ul>\n</div>\n<p><a href=\"/\">Back to the form</a></p>\n");
    page("Invalid input", &body)
}

/// Opaque server error view.
#[must_use]
pub fn server_error_page() -> String {
    page(
        "Error",
        "<h1>Something went wrong</h1>\n<p>The risk could not be calculated. Please try again.</p>\n\
         <p><a href=\"/\">Back to the form</a></p>\n",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FieldProblem, Outcome};

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">&'"#),
            "&lt;a href=&quot;x&quot;&gt;&amp;&#39;"
        );
    }

    #[test]
    fn test_index_page_has_every_field() {
        let spec = FeatureSpec::default_for(Outcome::AllCause);
        let html = index_page(&spec);
        for name in spec.names() {
            assert!(html.contains(&format!("name=\"{name}\"")), "missing {name}");
        }
        assert!(html.contains("action=\"/predict\""));
    }

    #[test]
    fn test_validation_page_escapes_raw_input() {
        let errors = vec![FieldError {
            field: "Age".into(),
            problem: FieldProblem::NotNumeric {
                raw: "<script>".into(),
            },
        }];
        let html = validation_error_page(&errors);
        assert!(!html.contains("<script>"));
        assert!(html.contains("Age"));
    }

    #[test]
    fn test_svg_base64_roundtrip() {
        let encoded = svg_base64("<svg/>");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .expect("valid base64");
        assert_eq!(decoded, b"<svg/>");
    }
}
