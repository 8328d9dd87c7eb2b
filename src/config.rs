//! Server configuration from environment variables.
//!
//! | Variable | Default |
//! |---|---|
//! | `PORT` | 10000 |
//! | `RISKCALC_BIND_ADDR` | `0.0.0.0` |
//! | `RISKCALC_ARTIFACT_DIR` | `artifacts` |
//! | `RISKCALC_SHAP_PERMUTATIONS` | 8 |
//! | `RISKCALC_SHAP_MAX_BACKGROUND` | 50 |
//! | `RISKCALC_SHAP_SEED` | 42 |
//! | `RISKCALC_REQUIRE_SIGNED_ARTIFACTS` | false |
//! | `RISKCALC_ARTIFACT_PUBKEY_B64` / `RISKCALC_ARTIFACT_PUBKEY_B64_FILE` | unset |

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use crate::adapters::shap::{DEFAULT_MAX_BACKGROUND, DEFAULT_PERMUTATIONS, DEFAULT_SEED};
use crate::adapters::{IntegrityPolicy, PermutationExplainer};
use crate::RiskCalcError;

pub const DEFAULT_PORT: u16 = 10000;
pub const DEFAULT_ARTIFACT_DIR: &str = "artifacts";

const PUBKEY_ENV: &str = "RISKCALC_ARTIFACT_PUBKEY_B64";
const PUBKEY_FILE_ENV: &str = "RISKCALC_ARTIFACT_PUBKEY_B64_FILE";

/// Runtime settings for the web service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
    pub artifact_dir: PathBuf,
    pub shap_permutations: usize,
    pub shap_max_background: usize,
    pub shap_seed: u64,
    pub integrity: IntegrityPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            artifact_dir: PathBuf::from(DEFAULT_ARTIFACT_DIR),
            shap_permutations: DEFAULT_PERMUTATIONS,
            shap_max_background: DEFAULT_MAX_BACKGROUND,
            shap_seed: DEFAULT_SEED,
            integrity: IntegrityPolicy::default(),
        }
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, RiskCalcError> {
    match value.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" => Ok(true),
        "0" | "false" | "FALSE" | "no" | "NO" | "" => Ok(false),
        other => Err(RiskCalcError::Config(format!(
            "{name} must be true or false, got {other:?}"
        ))),
    }
}

fn parse_value<T: FromStr>(name: &str, value: &str) -> Result<T, RiskCalcError> {
    value
        .trim()
        .parse()
        .map_err(|_| RiskCalcError::Config(format!("{name} has an invalid value: {value:?}")))
}

impl ServerConfig {
    /// Read configuration from the process environment.
    ///
    /// # Errors
    /// Returns `RiskCalcError::Config` for unparsable values or an unreadable
    /// public key file.
    pub fn from_env() -> Result<Self, RiskCalcError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`; unset variables keep defaults.
    ///
    /// # Errors
    /// See [`ServerConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RiskCalcError> {
        let mut config = Self::default();

        if let Some(v) = lookup("PORT") {
            config.port = parse_value("PORT", &v)?;
        }
        if let Some(v) = lookup("RISKCALC_BIND_ADDR") {
            config.bind_addr = parse_value("RISKCALC_BIND_ADDR", &v)?;
        }
        if let Some(v) = lookup("RISKCALC_ARTIFACT_DIR").filter(|v| !v.trim().is_empty()) {
            config.artifact_dir = PathBuf::from(v.trim());
        }
        if let Some(v) = lookup("RISKCALC_SHAP_PERMUTATIONS") {
            config.shap_permutations = parse_value("RISKCALC_SHAP_PERMUTATIONS", &v)?;
        }
        if let Some(v) = lookup("RISKCALC_SHAP_MAX_BACKGROUND") {
            config.shap_max_background = parse_value("RISKCALC_SHAP_MAX_BACKGROUND", &v)?;
        }
        if let Some(v) = lookup("RISKCALC_SHAP_SEED") {
            config.shap_seed = parse_value("RISKCALC_SHAP_SEED", &v)?;
        }
        if let Some(v) = lookup("RISKCALC_REQUIRE_SIGNED_ARTIFACTS") {
            config.integrity.require_signed = parse_bool("RISKCALC_REQUIRE_SIGNED_ARTIFACTS", &v)?;
        }

        // The file variant wins, as with mounted secrets.
        config.integrity.verifying_key_b64 = match lookup(PUBKEY_FILE_ENV) {
            Some(path) => Some(std::fs::read_to_string(path.trim()).map_err(|e| {
                RiskCalcError::Config(format!("failed to read {PUBKEY_FILE_ENV}: {e}"))
            })?),
            None => lookup(PUBKEY_ENV),
        }
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty());

        if config.shap_permutations == 0 || config.shap_max_background == 0 {
            return Err(RiskCalcError::Config(
                "RISKCALC_SHAP_PERMUTATIONS and RISKCALC_SHAP_MAX_BACKGROUND must be positive"
                    .into(),
            ));
        }

        Ok(config)
    }

    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    #[must_use]
    pub fn explainer(&self) -> PermutationExplainer {
        PermutationExplainer::new(self.shap_permutations, self.shap_max_background, self.shap_seed)
    }
}
