//! Background CSV loader.
//!
//! Reads the SHAP background files written by the training pipeline. Columns
//! are matched by header name; extra columns (such as a leading index column)
//! are ignored.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, Trim};

use crate::domain::{BackgroundSet, FeatureSpec, Outcome};
use crate::RiskCalcError;

/// Parse background rows from any CSV source. Cells may be quoted; a leading
/// UTF-8 byte order mark is ignored.
///
/// # Errors
/// Returns `RiskCalcError::Artifact` if the header is missing, a feature column
/// is absent, a row is malformed, or a cell cannot be parsed as a number.
pub fn read_background<R: Read>(
    reader: R,
    outcome: Outcome,
    spec: &FeatureSpec,
    source: &str,
) -> Result<BackgroundSet, RiskCalcError> {
    let csv_err = |e: csv::Error| RiskCalcError::Artifact(format!("{source}: {e}"));
    let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(reader);

    let header = reader.headers().map_err(csv_err)?;
    if header.is_empty() {
        return Err(RiskCalcError::Artifact(format!("{source}: empty CSV")));
    }
    let columns: Vec<&str> = header
        .iter()
        .map(|c| c.trim_start_matches('\u{feff}'))
        .collect();

    let mut indices = Vec::with_capacity(spec.len());
    let mut missing = Vec::new();
    for name in spec.names() {
        match columns.iter().position(|c| c == name) {
            Some(i) => indices.push(i),
            None => missing.push(name.as_str()),
        }
    }
    if !missing.is_empty() {
        return Err(RiskCalcError::Artifact(format!(
            "{source}: missing background columns: {}",
            missing.join(", ")
        )));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        let line = record.position().map_or(0, csv::Position::line);
        let mut row = Vec::with_capacity(indices.len());
        for (&col, name) in indices.iter().zip(spec.names()) {
            let cell = record.get(col).unwrap_or("");
            let value = cell.parse::<f64>().map_err(|_| {
                RiskCalcError::Artifact(format!(
                    "{source}: line {line}: column {name} is not a number: {cell:?}"
                ))
            })?;
            row.push(value);
        }
        rows.push(row);
    }

    BackgroundSet::from_rows(outcome, spec.clone(), rows)
        .map_err(|e| RiskCalcError::Artifact(format!("{source}: {e}")))
}

/// Load a background CSV file.
///
/// # Errors
/// Returns error if the file cannot be opened or parsed.
pub fn load_background(
    path: &Path,
    outcome: Outcome,
    spec: &FeatureSpec,
) -> Result<BackgroundSet, RiskCalcError> {
    let file = File::open(path).map_err(|e| {
        RiskCalcError::Artifact(format!("failed to open background {}: {e}", path.display()))
    })?;
    let set = read_background(file, outcome, spec, &path.display().to_string())?;
    tracing::info!(
        "Loaded {} background rows for {} from {:?}",
        set.len(),
        outcome,
        path
    );
    Ok(set)
}
