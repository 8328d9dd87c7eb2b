//! Artifact bundle signing utility.
//!
//! Hashes the bundle files into `manifest.json` and, when a signing key is
//! available, writes an Ed25519 signature over the manifest to `artifacts.sig`.
//! An existing signature is removed whenever the manifest is rewritten.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin sign_artifacts -- <artifact_dir> [--unsigned]
//! ```
//!
//! The signing key is a base64 32-byte Ed25519 seed read from
//! `RISKCALC_SIGNING_KEY_B64_FILE`, the Docker secret
//! `/run/secrets/riskcalc_signing_key_b64`, or (debug builds only)
//! `RISKCALC_SIGNING_KEY_B64`. Seed material is zeroized after use.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose;
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use ckd_risk::adapters::artifacts::{write_manifest, MANIFEST_FILE, SIGNATURE_FILE};

const KEY_FILE_ENV: &str = "RISKCALC_SIGNING_KEY_B64_FILE";
const KEY_ENV: &str = "RISKCALC_SIGNING_KEY_B64";
const DOCKER_SECRET_PATH: &str = "/run/secrets/riskcalc_signing_key_b64";

#[derive(Zeroize, ZeroizeOnDrop)]
struct Seed([u8; 32]);

fn non_empty(secret: String) -> Result<Zeroizing<String>, String> {
    let secret = Zeroizing::new(secret);
    let trimmed = secret.trim_end_matches(['\n', '\r']);
    if trimmed.is_empty() {
        return Err("Empty signing key".to_string());
    }
    Ok(Zeroizing::new(trimmed.to_string()))
}

/// Base64 seed from the first configured source, if any.
fn read_signing_seed_b64() -> Result<Option<Zeroizing<String>>, String> {
    if let Ok(path) = env::var(KEY_FILE_ENV) {
        let content = fs::read_to_string(path.trim())
            .map_err(|e| format!("Failed reading signing key file: {e}"))?;
        return non_empty(content).map(Some);
    }

    if Path::new(DOCKER_SECRET_PATH).exists() {
        let content = fs::read_to_string(DOCKER_SECRET_PATH)
            .map_err(|e| format!("Failed reading docker secret: {e}"))?;
        return non_empty(content).map(Some);
    }

    if cfg!(debug_assertions) {
        if let Ok(v) = env::var(KEY_ENV) {
            return non_empty(v).map(Some);
        }
    }

    Ok(None)
}

fn decode_seed(b64: &str) -> Result<Seed, String> {
    let raw = Zeroizing::new(
        general_purpose::STANDARD
            .decode(b64.trim())
            .map_err(|e| format!("Invalid base64 in signing key: {e}"))?,
    );
    if raw.len() != 32 {
        return Err(format!(
            "Signing key seed must be 32 bytes after base64 decode (got {})",
            raw.len()
        ));
    }
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&raw);
    Ok(Seed(seed))
}

fn usage() -> String {
    "Usage: sign_artifacts <artifact_dir> [--unsigned]".to_string()
}

fn parse_args() -> Result<(PathBuf, bool), String> {
    let mut dir: Option<PathBuf> = None;
    let mut unsigned = false;

    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--unsigned" => unsigned = true,
            "-h" | "--help" => return Err(usage()),
            _ if dir.is_none() => dir = Some(PathBuf::from(arg)),
            _ => return Err(usage()),
        }
    }

    Ok((dir.ok_or_else(usage)?, unsigned))
}

fn main() -> Result<(), String> {
    let (dir, unsigned) = parse_args()?;
    if !dir.is_dir() {
        return Err(format!("{} is not a directory", dir.display()));
    }

    let manifest_bytes = write_manifest(&dir)
        .map_err(|e| format!("Failed to write {MANIFEST_FILE}: {e}"))?;
    println!("Wrote manifest: {:?}", dir.join(MANIFEST_FILE));

    if unsigned {
        println!("Skipping signature (--unsigned)");
        return Ok(());
    }

    let Some(seed_b64) = read_signing_seed_b64()? else {
        println!("No signing key configured ({KEY_FILE_ENV}); manifest left unsigned");
        return Ok(());
    };

    let seed = decode_seed(&seed_b64)?;
    let signing_key = SigningKey::from_bytes(&seed.0);
    drop(seed);

    let sig_path = dir.join(SIGNATURE_FILE);
    fs::write(&sig_path, signing_key.sign(&manifest_bytes).to_bytes())
        .map_err(|e| format!("Failed to write {sig_path:?}: {e}"))?;

    println!("Wrote signature: {sig_path:?}");
    println!(
        "RISKCALC_ARTIFACT_PUBKEY_B64={}",
        general_purpose::STANDARD.encode(signing_key.verifying_key().as_bytes())
    );
    Ok(())
}
