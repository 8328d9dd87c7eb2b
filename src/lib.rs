//! # ckd-risk
//!
//! 20-year mortality risk calculator for chronic kidney disease patients.
//!
//! This crate provides:
//! - Survival-model scoring (gradient-boosted survival, random survival forest)
//! - Sampling-based SHAP feature attributions against fixed background sets
//! - A single-page web form and JSON API served with axum
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture:
//! - `domain`: Core business types (patient features, risk estimates, attributions)
//! - `ports`: Trait definitions for scoring and explanation
//! - `adapters`: Concrete implementations (tree ensembles, scaler, explainer, artifacts, rendering)
//! - `application`: The risk assessment use case
//! - `http`: Web surface

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod http;
pub mod ports;

pub use domain::{Outcome, PatientFeatures, RiskEstimate, RiskReport};

/// Result type for ckd-risk operations
pub type Result<T> = std::result::Result<T, RiskCalcError>;

/// Main error type for ckd-risk
#[derive(Debug, thiserror::Error)]
pub enum RiskCalcError {
    #[error("Invalid patient input: {}", domain::describe_field_errors(.0))]
    Validation(Vec<domain::FieldError>),

    #[error("Artifact error: {0}")]
    Artifact(String),

    #[error("Model evaluation failed: {0}")]
    Model(String),

    #[error("Explainer failed: {0}")]
    Explainer(String),

    #[error("Rendering failed: {0}")]
    Render(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RiskCalcError {
    /// Whether the caller is at fault (bad input) rather than the server.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
