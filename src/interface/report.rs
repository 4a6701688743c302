use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use log::info;
use serde::Serialize;

use crate::core::domain::STRESS_COMPONENTS;
use crate::engine::objective::StructureComparison;
use crate::fit::{CrossValidation, FitResult};

const STRESS_NAMES: [&str; STRESS_COMPONENTS] = ["xx", "yy", "zz", "xy", "yz", "zx"];
const AXES: [&str; 3] = ["x", "y", "z"];

#[derive(Serialize)]
struct FitSummary<'a> {
    identifier: &'a str,
    /// 1-indexed, as in the identifier.
    structures: Vec<usize>,
    parameters: Vec<Parameter<'a>>,
    error: f64,
    generations: usize,
    evaluations: usize,
    converged: bool,
    written_at: String,
}

#[derive(Serialize)]
struct ValidationSummary<'a> {
    fitted: &'a str,
    identifier: &'a str,
    structures: Vec<usize>,
    error: f64,
    written_at: String,
}

#[derive(Serialize)]
struct Parameter<'a> {
    label: &'a str,
    value: f64,
}

#[derive(Serialize)]
struct ForceRow<'a> {
    structure: usize,
    atom: usize,
    component: &'a str,
    reference: f64,
    predicted: f64,
}

#[derive(Serialize)]
struct StressRow<'a> {
    structure: usize,
    component: &'a str,
    reference: f64,
    predicted: f64,
}

/// Writes `result` under `<root>/<identifier>/` and returns that directory.
///
/// Produces `fit.json` (parameters and run summary), `forces.csv` and
/// `stresses.csv` (reference against predicted values). Structure numbers in
/// every file are 1-indexed.
pub fn write_fit_result(root: &Path, result: &FitResult) -> Result<PathBuf> {
    let dir = root.join(&result.identifier);
    fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    // 1. Summary
    let summary = FitSummary {
        identifier: &result.identifier,
        structures: result.subset.iter().map(|i| i + 1).collect(),
        parameters: result
            .labels
            .iter()
            .zip(&result.best_vector)
            .map(|(label, &value)| Parameter { label, value })
            .collect(),
        error: result.error,
        generations: result.generations,
        evaluations: result.evaluations,
        converged: result.converged,
        written_at: Local::now().to_rfc3339(),
    };
    let json = serde_json::to_string_pretty(&summary)?;
    fs::write(dir.join("fit.json"), json).context("Failed to write fit.json")?;

    // 2. Comparisons
    write_forces(&dir, &result.comparisons)?;
    write_stresses(&dir, &result.comparisons)?;

    info!("Wrote fit {} to {}", result.identifier, dir.display());
    Ok(dir)
}

/// Writes `cv` under `<root>/<fitted>/cv/<identifier>/` and returns that directory.
///
/// Same comparison files as a fit, with `validation.json` in place of `fit.json`.
pub fn write_cross_validation(root: &Path, cv: &CrossValidation) -> Result<PathBuf> {
    let dir = root.join(&cv.fitted).join("cv").join(&cv.identifier);
    fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let summary = ValidationSummary {
        fitted: &cv.fitted,
        identifier: &cv.identifier,
        structures: cv.subset.iter().map(|i| i + 1).collect(),
        error: cv.error,
        written_at: Local::now().to_rfc3339(),
    };
    let json = serde_json::to_string_pretty(&summary)?;
    fs::write(dir.join("validation.json"), json).context("Failed to write validation.json")?;

    write_forces(&dir, &cv.comparisons)?;
    write_stresses(&dir, &cv.comparisons)?;

    info!("Wrote validation of {} on {} to {}", cv.fitted, cv.identifier, dir.display());
    Ok(dir)
}

fn write_forces(dir: &Path, comparisons: &[StructureComparison]) -> Result<()> {
    let mut forces = csv::Writer::from_path(dir.join("forces.csv")).context("Failed to create forces.csv")?;
    for cmp in comparisons {
        for (atom, (r, p)) in cmp.reference_forces.iter().zip(&cmp.predicted_forces).enumerate() {
            for (k, component) in AXES.iter().enumerate() {
                forces.serialize(ForceRow {
                    structure: cmp.pool_index + 1,
                    atom: atom + 1,
                    component,
                    reference: r[k],
                    predicted: p[k],
                })?;
            }
        }
    }
    forces.flush()?;
    Ok(())
}

fn write_stresses(dir: &Path, comparisons: &[StructureComparison]) -> Result<()> {
    let mut stresses =
        csv::Writer::from_path(dir.join("stresses.csv")).context("Failed to create stresses.csv")?;
    for cmp in comparisons {
        for (k, component) in STRESS_NAMES.iter().enumerate() {
            stresses.serialize(StressRow {
                structure: cmp.pool_index + 1,
                component,
                reference: cmp.reference_stress[k],
                predicted: cmp.predicted_stress[k],
            })?;
        }
    }
    stresses.flush()?;
    Ok(())
}
