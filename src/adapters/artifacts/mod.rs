//! Artifact bundle loading and integrity verification.
//!
//! A bundle is a directory holding the scaler, one model per outcome and one
//! background CSV per outcome. It may carry a `manifest.json` binding each
//! file to its SHA-256 digest, and an `artifacts.sig` Ed25519 signature over
//! the manifest bytes (written by the `sign_artifacts` binary).
//!
//! # Integrity policy
//!
//! - Manifest present: every listed file must exist and match its digest.
//! - Signature present and a public key configured: the signature must verify.
//! - `require_signed`: manifest, signature and key are all mandatory and the
//!   manifest must bind every file the service loads.
//!
//! Without a manifest the bundle loads with a warning.
//!
//! A model may ship gzip-compressed as `<model>.gz`; the plain file wins when
//! both exist, and the manifest binds whichever one is loaded.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path};
use std::sync::Arc;

use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::background::load_background;
use super::forest::load_scorer;
use super::scaler::StandardScaler;
use crate::domain::{BackgroundSet, Outcome};
use crate::ports::SurvivalScorer;
use crate::RiskCalcError;

pub const SCALER_FILE: &str = "scaler.json";
pub const ALL_CAUSE_MODEL_FILE: &str = "models/all_cause_gbsa.json";
pub const CARDIOVASCULAR_MODEL_FILE: &str = "models/cardiovascular_rsf.json";
pub const ALL_CAUSE_BACKGROUND_FILE: &str = "shap_background_all_cause.csv";
pub const CARDIOVASCULAR_BACKGROUND_FILE: &str = "shap_background_cardio.csv";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const SIGNATURE_FILE: &str = "artifacts.sig";

/// Every file the service loads from a bundle.
pub const BUNDLE_FILES: [&str; 5] = [
    SCALER_FILE,
    ALL_CAUSE_MODEL_FILE,
    CARDIOVASCULAR_MODEL_FILE,
    ALL_CAUSE_BACKGROUND_FILE,
    CARDIOVASCULAR_BACKGROUND_FILE,
];

const MANIFEST_VERSION: u32 = 1;

const COMPRESSED_SUFFIX: &str = ".gz";

#[must_use]
pub fn model_file(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::AllCause => ALL_CAUSE_MODEL_FILE,
        Outcome::Cardiovascular => CARDIOVASCULAR_MODEL_FILE,
    }
}

#[must_use]
pub fn background_file(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::AllCause => ALL_CAUSE_BACKGROUND_FILE,
        Outcome::Cardiovascular => CARDIOVASCULAR_BACKGROUND_FILE,
    }
}

/// The model file as present in `dir`: `rel` itself, or `rel.gz` when only
/// the compressed form exists.
#[must_use]
pub fn resolve_model_file(dir: &Path, rel: &str) -> String {
    let compressed = format!("{rel}{COMPRESSED_SUFFIX}");
    if !dir.join(rel).is_file() && dir.join(&compressed).is_file() {
        compressed
    } else {
        rel.to_string()
    }
}

/// [`BUNDLE_FILES`] with each model resolved against `dir`.
#[must_use]
pub fn bundle_files(dir: &Path) -> Vec<String> {
    BUNDLE_FILES
        .iter()
        .map(|rel| {
            if Outcome::ALL.iter().any(|o| model_file(*o) == *rel) {
                resolve_model_file(dir, rel)
            } else {
                (*rel).to_string()
            }
        })
        .collect()
}

fn artifact_err(msg: impl Into<String>) -> RiskCalcError {
    RiskCalcError::Artifact(msg.into())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// SHA-256 of a file as lowercase hex.
///
/// # Errors
/// Returns `RiskCalcError::Artifact` if the file cannot be read.
pub fn sha256_file_hex(path: &Path) -> Result<String, RiskCalcError> {
    let bytes = fs::read(path)
        .map_err(|e| artifact_err(format!("failed to read {}: {e}", path.display())))?;
    Ok(to_hex(&Sha256::digest(&bytes)))
}

// Digests are compared without early exit.
fn digest_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y.to_ascii_lowercase()))
        == 0
}

/// Manifest entries must stay inside the bundle directory.
fn check_relative(rel: &str) -> Result<(), RiskCalcError> {
    let path = Path::new(rel);
    let escapes = path.is_absolute()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
    if rel.is_empty() || escapes {
        return Err(artifact_err(format!(
            "manifest entry {rel:?} is not a plain relative path"
        )));
    }
    Ok(())
}

/// `manifest.json`: digests of the bundle files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub files: BTreeMap<String, String>,
}

impl ArtifactManifest {
    /// Hash `files` (paths relative to `dir`) into a new manifest.
    ///
    /// # Errors
    /// Returns `RiskCalcError::Artifact` if a path is not relative or a file
    /// cannot be read.
    pub fn build(dir: &Path, files: &[&str]) -> Result<Self, RiskCalcError> {
        let mut digests = BTreeMap::new();
        for rel in files {
            check_relative(rel)?;
            digests.insert((*rel).to_string(), sha256_file_hex(&dir.join(rel))?);
        }
        Ok(Self {
            version: MANIFEST_VERSION,
            created_at: Some(Utc::now()),
            files: digests,
        })
    }

    /// Parse manifest bytes and check the version.
    ///
    /// # Errors
    /// Returns `RiskCalcError::Artifact` on malformed JSON, an unsupported
    /// version, or an empty file list.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, RiskCalcError> {
        let manifest: Self = serde_json::from_slice(bytes)
            .map_err(|e| artifact_err(format!("invalid {MANIFEST_FILE}: {e}")))?;
        if manifest.version != MANIFEST_VERSION {
            return Err(artifact_err(format!(
                "unsupported manifest version {}",
                manifest.version
            )));
        }
        if manifest.files.is_empty() {
            return Err(artifact_err(format!("{MANIFEST_FILE} lists no files")));
        }
        Ok(manifest)
    }

    #[must_use]
    pub fn binds(&self, rel: &str) -> bool {
        self.files.contains_key(rel)
    }

    /// Re-hash every listed file under `dir` and compare.
    ///
    /// # Errors
    /// Returns `RiskCalcError::Artifact` naming the first missing or altered file.
    pub fn verify_files(&self, dir: &Path) -> Result<(), RiskCalcError> {
        for (rel, expected) in &self.files {
            check_relative(rel)?;
            let actual = sha256_file_hex(&dir.join(rel))?;
            if !digest_eq(&actual, expected) {
                return Err(artifact_err(format!("hash mismatch for {rel}")));
            }
        }
        Ok(())
    }
}

/// Hash the bundle in `dir` into a fresh `manifest.json` and return the
/// bytes written. A previous `artifacts.sig` no longer covers these bytes and
/// is removed.
///
/// # Errors
/// Returns `RiskCalcError::Artifact` if a bundle file cannot be read, or
/// `RiskCalcError::Io` if the manifest cannot be written.
pub fn write_manifest(dir: &Path) -> Result<Vec<u8>, RiskCalcError> {
    let files = bundle_files(dir);
    let refs: Vec<&str> = files.iter().map(String::as_str).collect();
    let manifest = ArtifactManifest::build(dir, &refs)?;
    let bytes = serde_json::to_vec_pretty(&manifest)?;
    fs::write(dir.join(MANIFEST_FILE), &bytes)?;

    let sig_path = dir.join(SIGNATURE_FILE);
    if sig_path.is_file() {
        fs::remove_file(&sig_path)?;
        tracing::info!("Removed stale {}", SIGNATURE_FILE);
    }
    Ok(bytes)
}

/// Decode a base64 Ed25519 public key.
///
/// # Errors
/// Returns `RiskCalcError::Config` if the key is not 32 bytes of valid base64
/// or not a valid curve point.
pub fn verifying_key_from_b64(b64: &str) -> Result<VerifyingKey, RiskCalcError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64.trim())
        .map_err(|_| RiskCalcError::Config("artifact public key is not valid base64".into()))?;
    let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
        RiskCalcError::Config(format!(
            "artifact public key must be 32 bytes, got {}",
            bytes.len()
        ))
    })?;
    VerifyingKey::from_bytes(&key)
        .map_err(|_| RiskCalcError::Config("artifact public key is not a valid Ed25519 key".into()))
}

/// Verify `signature` (raw 64 bytes) over `manifest`.
///
/// # Errors
/// Returns `RiskCalcError::Artifact` if the signature is malformed or invalid.
pub fn verify_signature(
    key: &VerifyingKey,
    manifest: &[u8],
    signature: &[u8],
) -> Result<(), RiskCalcError> {
    let bytes: [u8; 64] = signature.try_into().map_err(|_| {
        artifact_err(format!(
            "{SIGNATURE_FILE} must be 64 bytes, got {}",
            signature.len()
        ))
    })?;
    key.verify(manifest, &Signature::from_bytes(&bytes))
        .map_err(|_| artifact_err(format!("{SIGNATURE_FILE} does not verify {MANIFEST_FILE}")))
}

/// How strictly a bundle is checked before loading.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityPolicy {
    pub require_signed: bool,
    pub verifying_key_b64: Option<String>,
}

/// Check manifest and signature under `policy`. Returns the verified
/// manifest, if any.
///
/// # Errors
/// Returns `RiskCalcError::Artifact` when the bundle fails verification and
/// `RiskCalcError::Config` for an unusable public key.
pub fn verify_bundle(
    dir: &Path,
    policy: &IntegrityPolicy,
) -> Result<Option<ArtifactManifest>, RiskCalcError> {
    let manifest_path = dir.join(MANIFEST_FILE);
    let sig_path = dir.join(SIGNATURE_FILE);
    let key = policy
        .verifying_key_b64
        .as_deref()
        .map(verifying_key_from_b64)
        .transpose()?;

    if policy.require_signed {
        if key.is_none() {
            return Err(RiskCalcError::Config(
                "signed artifacts required but no public key configured".into(),
            ));
        }
        if !manifest_path.is_file() || !sig_path.is_file() {
            return Err(artifact_err(format!(
                "signed artifacts required: {MANIFEST_FILE} and {SIGNATURE_FILE} must exist in {}",
                dir.display()
            )));
        }
    }

    if !manifest_path.is_file() {
        tracing::warn!(
            "No {} in {:?}; loading artifacts without integrity checks",
            MANIFEST_FILE,
            dir
        );
        return Ok(None);
    }

    let manifest_bytes = fs::read(&manifest_path)
        .map_err(|e| artifact_err(format!("failed to read {MANIFEST_FILE}: {e}")))?;

    // Signature covers the raw bytes, so it is checked before parsing.
    match (&key, sig_path.is_file()) {
        (Some(key), true) => {
            let sig = fs::read(&sig_path)
                .map_err(|e| artifact_err(format!("failed to read {SIGNATURE_FILE}: {e}")))?;
            verify_signature(key, &manifest_bytes, &sig)?;
            tracing::info!("Verified {} signature", SIGNATURE_FILE);
        }
        (None, true) => {
            tracing::warn!(
                "{} present but no public key configured; signature not checked",
                SIGNATURE_FILE
            );
        }
        (_, false) => {
            tracing::warn!("{} is not signed", MANIFEST_FILE);
        }
    }

    let manifest = ArtifactManifest::from_slice(&manifest_bytes)?;
    if policy.require_signed {
        let unbound: Vec<String> = bundle_files(dir)
            .into_iter()
            .filter(|f| !manifest.binds(f))
            .collect();
        if !unbound.is_empty() {
            return Err(artifact_err(format!(
                "{MANIFEST_FILE} does not bind: {}",
                unbound.join(", ")
            )));
        }
    }
    manifest.verify_files(dir)?;
    tracing::info!(
        "Verified {} artifact digests in {:?}",
        manifest.files.len(),
        dir
    );
    Ok(Some(manifest))
}

/// Scorer and background set for one outcome.
#[derive(Clone)]
pub struct OutcomeArtifacts {
    pub scorer: Arc<dyn SurvivalScorer>,
    pub background: BackgroundSet,
}

/// Everything the risk service needs, loaded and cross-checked.
#[derive(Clone)]
pub struct ArtifactBundle {
    pub scaler: StandardScaler,
    pub all_cause: OutcomeArtifacts,
    pub cardiovascular: OutcomeArtifacts,
    pub manifest: Option<ArtifactManifest>,
}

impl std::fmt::Debug for ArtifactBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactBundle")
            .field("all_cause_features", &self.all_cause.scorer.feature_spec().len())
            .field(
                "cardiovascular_features",
                &self.cardiovascular.scorer.feature_spec().len(),
            )
            .field("verified", &self.manifest.is_some())
            .finish()
    }
}

impl ArtifactBundle {
    /// Verify and load the bundle in `dir`.
    ///
    /// # Errors
    /// Returns `RiskCalcError::Artifact` for any missing, malformed,
    /// inconsistent, or tampered file.
    pub fn load(dir: &Path, policy: &IntegrityPolicy) -> Result<Self, RiskCalcError> {
        if !dir.is_dir() {
            return Err(artifact_err(format!(
                "artifact directory {} does not exist",
                dir.display()
            )));
        }
        let manifest = verify_bundle(dir, policy)?;

        let scaler = StandardScaler::from_path(&dir.join(SCALER_FILE))?;
        let all_cause = Self::load_outcome(dir, Outcome::AllCause, &scaler)?;
        let cardiovascular = Self::load_outcome(dir, Outcome::Cardiovascular, &scaler)?;

        tracing::info!("Artifact bundle loaded from {:?}", dir);
        Ok(Self {
            scaler,
            all_cause,
            cardiovascular,
            manifest,
        })
    }

    fn load_outcome(
        dir: &Path,
        outcome: Outcome,
        scaler: &StandardScaler,
    ) -> Result<OutcomeArtifacts, RiskCalcError> {
        let model = resolve_model_file(dir, model_file(outcome));
        let scorer = load_scorer(&dir.join(model), outcome)?;
        let spec = scorer.feature_spec();

        let uncovered = scaler.uncovered(spec);
        if !uncovered.is_empty() {
            return Err(artifact_err(format!(
                "{SCALER_FILE} has no entry for {outcome} features: {}",
                uncovered.join(", ")
            )));
        }

        let background = load_background(&dir.join(background_file(outcome)), outcome, spec)?;
        Ok(OutcomeArtifacts { scorer, background })
    }
}
