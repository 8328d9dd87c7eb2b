//! Web surface: HTML form, result page, and JSON API.
//!
//! Routes:
//! - `GET /` input form
//! - `POST /predict` urlencoded form, HTML result with both outcomes; a JSON
//!   body is answered as `/api/predict`
//! - `POST /api/predict` JSON body with `model_type`, JSON result for one outcome
//! - `GET /health` liveness

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Form, FromRequest, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;

use crate::adapters::render::{
    index_page, result_page, server_error_page, svg_base64, validation_error_page, waterfall_svg,
    DEFAULT_MAX_DISPLAY,
};
use crate::application::RiskService;
use crate::domain::{round2, FieldError, Outcome, OutcomeAssessment, RawValue};
use crate::RiskCalcError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RiskService>,
}

impl AppState {
    #[must_use]
    pub fn new(service: RiskService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/predict", post(predict))
        .route("/api/predict", post(predict_json))
        .route("/health", get(health))
        .with_state(state)
}

/// Run CPU-bound work off the async executor.
async fn run_blocking<T, F>(work: F) -> Result<T, RiskCalcError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, RiskCalcError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| RiskCalcError::Model(format!("assessment task did not complete: {e}")))?
}

pub async fn index(State(state): State<AppState>) -> Html<String> {
    Html(index_page(state.service.input_spec()))
}

pub async fn predict_form(
    State(state): State<AppState>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let raw: HashMap<String, RawValue> = form
        .into_iter()
        .map(|(k, v)| (k, RawValue::from(v)))
        .collect();
    let service = Arc::clone(&state.service);

    let rendered = run_blocking(move || service.assess(&raw).and_then(|r| result_page(&r)));
    match rendered.await {
        Ok(page) => Html(page).into_response(),
        Err(RiskCalcError::Validation(errors)) => {
            tracing::info!("Rejected form with {} invalid field(s)", errors.len());
            (StatusCode::BAD_REQUEST, Html(validation_error_page(&errors))).into_response()
        }
        Err(e) => {
            tracing::error!("Risk assessment failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Html(server_error_page())).into_response()
        }
    }
}

/// One attribution in the JSON response, in percentage points.
#[derive(Debug, Serialize)]
pub struct AttributionOut {
    pub feature: String,
    pub value: f64,
    pub contribution: f64,
}

/// JSON result for one outcome. Percentages are rounded to two decimals.
#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub model_type: Outcome,
    pub mortality_risk: f64,
    pub survival_probability: f64,
    /// Mean risk over the background set, percent
    pub base_value: f64,
    pub attributions: Vec<AttributionOut>,
    /// Base64-encoded SVG waterfall chart
    pub shap_plot: String,
}

impl TryFrom<&OutcomeAssessment> for PredictResponse {
    type Error = RiskCalcError;

    fn try_from(a: &OutcomeAssessment) -> Result<Self, Self::Error> {
        let attributions = a
            .attribution
            .ranked()
            .into_iter()
            .map(|x| AttributionOut {
                feature: x.feature.clone(),
                value: x.value,
                contribution: x.contribution * 100.0,
            })
            .collect();
        Ok(Self {
            model_type: a.outcome,
            mortality_risk: a.risk.mortality_percent(),
            survival_probability: a.risk.survival_percent(),
            base_value: round2(a.attribution.base_value * 100.0),
            attributions,
            shap_plot: svg_base64(&waterfall_svg(&a.attribution, DEFAULT_MAX_DISPLAY)?),
        })
    }
}

/// JSON API error.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Service(RiskCalcError),
}

impl From<RiskCalcError> for ApiError {
    fn from(e: RiskCalcError) -> Self {
        Self::Service(e)
    }
}

fn validation_body(errors: &[FieldError]) -> serde_json::Value {
    json!({
        "error": crate::domain::describe_field_errors(errors),
        "fields": errors,
    })
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            Self::Service(RiskCalcError::Validation(errors)) => {
                (StatusCode::BAD_REQUEST, Json(validation_body(&errors))).into_response()
            }
            Self::Service(e) => {
                tracing::error!("Risk assessment failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

pub async fn predict_json(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<PredictResponse>, ApiError> {
    let serde_json::Value::Object(fields) = body else {
        return Err(ApiError::BadRequest("request body must be a JSON object".into()));
    };

    let outcome = match fields.get("model_type") {
        None | Some(serde_json::Value::Null) => Outcome::AllCause,
        Some(serde_json::Value::String(s)) => Outcome::from_model_type(s)
            .ok_or_else(|| ApiError::BadRequest(format!("unknown model_type: {s:?}")))?,
        Some(_) => return Err(ApiError::BadRequest("model_type must be a string".into())),
    };

    let raw: HashMap<String, RawValue> = fields
        .iter()
        .filter(|(k, _)| k.as_str() != "model_type")
        .filter_map(|(k, v)| RawValue::from_json(v).map(|r| (k.clone(), r)))
        .collect();
    let service = Arc::clone(&state.service);

    let response = run_blocking(move || {
        let assessment = service.assess_outcome(outcome, &raw)?;
        PredictResponse::try_from(&assessment)
    })
    .await?;
    Ok(Json(response))
}

fn is_json(request: &Request) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim_start().starts_with("application/json"))
}

/// `POST /predict`: HTML form submissions, or JSON bodies from API clients.
pub async fn predict(State(state): State<AppState>, request: Request) -> Response {
    if is_json(&request) {
        match Json::<serde_json::Value>::from_request(request, &state).await {
            Ok(body) => predict_json(State(state), body).await.into_response(),
            Err(rejection) => rejection.into_response(),
        }
    } else {
        match Form::<HashMap<String, String>>::from_request(request, &state).await {
            Ok(form) => predict_form(State(state), form).await,
            Err(rejection) => rejection.into_response(),
        }
    }
}

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let outcomes: Vec<&str> = Outcome::ALL.iter().map(|o| o.as_str()).collect();
    Json(json!({
        "status": "ok",
        "outcomes": outcomes,
        "input_fields": state.service.input_spec().len(),
    }))
}
