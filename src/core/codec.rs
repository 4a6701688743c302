use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::core::error::{FitError, ValidationReport, Violation};
use crate::core::labels::{BuckinghamTerm, ParamLabel};
use crate::core::potential::{PotentialSpec, SpeciesPair, SpeciesValue};

/// Inclusive search range for one free parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct Bounds {
    pub low: f64,
    pub high: f64,
}

impl Bounds {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    pub fn width(&self) -> f64 {
        self.high - self.low
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }
}

impl From<(f64, f64)> for Bounds {
    fn from((low, high): (f64, f64)) -> Self {
        Self { low, high }
    }
}

impl From<Bounds> for (f64, f64) {
    fn from(b: Bounds) -> Self {
        (b.low, b.high)
    }
}

/// Builds the concrete potential for one candidate vector.
///
/// Works on a copy of `base`. Charge separations, springs and pair coefficients
/// are applied in label order; `q_scaling` is applied last so it scales the
/// already separated core/shell charges.
pub fn decode(
    base: &PotentialSpec,
    labels: &[ParamLabel],
    values: &[f64],
) -> Result<PotentialSpec, FitError> {
    if labels.len() != values.len() {
        return Err(FitError::InvalidArgument(format!(
            "{} labels but {} values",
            labels.len(),
            values.len()
        )));
    }

    let mut spec = base.clone();
    let mut scaling = None;

    for (label, &value) in labels.iter().zip(values) {
        match label {
            ParamLabel::ChargeSeparation(x) => match spec.charges.get_mut(x) {
                Some(SpeciesValue::CoreShell { core, shell }) => {
                    *core += value;
                    *shell -= value;
                }
                _ => {
                    return Err(FitError::invalid_label(
                        &label.to_string(),
                        format!("{} has no core/shell charge split", x),
                    ))
                }
            },
            ParamLabel::ChargeScaling => scaling = Some(value),
            ParamLabel::Spring(pair) => match spec.springs.get_mut(pair) {
                Some(spring) if pair.is_homonuclear() => spring.k2 = value,
                _ => {
                    return Err(FitError::invalid_label(
                        &label.to_string(),
                        format!("no core-shell spring defined for {}", pair),
                    ))
                }
            },
            ParamLabel::Pair { pair, term } => match spec.pair_potentials.get_mut(pair) {
                Some(buck) => match term {
                    BuckinghamTerm::A => buck.a = value,
                    BuckinghamTerm::Rho => buck.rho = value,
                    BuckinghamTerm::C => buck.c = value,
                },
                None => {
                    return Err(FitError::invalid_label(
                        &label.to_string(),
                        format!("no Buckingham potential defined for {}", pair),
                    ))
                }
            },
        }
    }

    if let Some(factor) = scaling {
        if !base.has_charged_species() {
            return Err(FitError::invalid_label("q_scaling", "no species carries a charge"));
        }
        spec.scale_charges(factor);
    }

    Ok(spec)
}

/// Parses raw label strings and decodes in one step.
pub fn decode_labels(
    base: &PotentialSpec,
    labels: &[String],
    values: &[f64],
) -> Result<PotentialSpec, FitError> {
    let parsed = labels.iter().map(|l| l.parse()).collect::<Result<Vec<ParamLabel>, _>>()?;
    decode(base, &parsed, values)
}

/// Pre-flight check of labels and bounds against the base potential.
///
/// Collects every violation before failing, so the caller gets one report.
pub fn validate(labels: &[String], bounds: &[Bounds], base: &PotentialSpec) -> Result<(), FitError> {
    let mut report = ValidationReport::default();

    if labels.len() != bounds.len() {
        report.push(Violation::general(format!(
            "{} labels but {} bounds; every label needs exactly one (low, high) pair",
            labels.len(),
            bounds.len()
        )));
    }

    let mut seen = HashSet::new();
    for (i, raw) in labels.iter().enumerate() {
        let parsed = match raw.parse::<ParamLabel>() {
            Ok(label) => label,
            Err(e) => {
                report.push(Violation::for_label(raw, e.to_string()));
                continue;
            }
        };

        if !seen.insert(parsed.clone()) {
            report.push(Violation::for_label(raw, "parameter is listed more than once"));
        }

        if let Err(reason) = parsed.resolve(base) {
            report.push(Violation::for_label(raw, reason));
        }

        if let Some(b) = bounds.get(i) {
            check_bounds(raw, &parsed, b, base, &mut report);
        }
    }

    report.into_result()
}

fn check_bounds(
    raw: &str,
    label: &ParamLabel,
    b: &Bounds,
    base: &PotentialSpec,
    report: &mut ValidationReport,
) {
    if !b.low.is_finite() || !b.high.is_finite() {
        report.push(Violation::for_label(raw, format!("bounds ({}, {}) are not finite", b.low, b.high)));
        return;
    }
    if b.low >= b.high {
        report.push(Violation::for_label(
            raw,
            format!("lower bound {} is not below upper bound {}", b.low, b.high),
        ));
    }

    match label {
        ParamLabel::ChargeSeparation(x) => {
            if b.low <= 0.0 {
                report.push(Violation::for_label(raw, "dq bounds must be greater than zero"));
            }
            if let Some(q) = base.charge(x) {
                let limit = 2.0 * q.total().abs();
                if limit > 0.0 && b.high > limit {
                    report.push(Violation::for_label(
                        raw,
                        format!("dq upper bound {} exceeds twice the formal charge of {}", b.high, x),
                    ));
                }
            }
        }
        ParamLabel::ChargeScaling => {
            if b.low <= 0.0 || b.high > 1.0 {
                report.push(Violation::for_label(raw, "charge scaling bounds must lie in (0, 1]"));
            }
        }
        ParamLabel::Spring(_) => {
            if b.low <= 0.0 {
                report.push(Violation::for_label(raw, "spring bounds must be greater than zero"));
            }
        }
        ParamLabel::Pair { term: BuckinghamTerm::A | BuckinghamTerm::Rho, .. } => {
            if b.low <= 0.0 {
                report.push(Violation::for_label(raw, "Buckingham a and rho bounds must be greater than zero"));
            }
        }
        ParamLabel::Pair { term: BuckinghamTerm::C, .. } => {
            if b.low < 0.0 {
                report.push(Violation::for_label(raw, "Buckingham c bounds must not be negative"));
            }
        }
    }
}

/// Generates the conventional label list for a potential: charge labels for
/// every core-shell species plus `q_scaling`, every spring, and `a`/`rho` for
/// the requested pairs.
pub fn default_labels(base: &PotentialSpec, charges: bool, springs: bool, pairs: &[SpeciesPair]) -> Vec<String> {
    let mut labels = Vec::new();
    if charges {
        for (species, &is_cs) in &base.core_shell {
            if is_cs {
                labels.push(ParamLabel::ChargeSeparation(species.clone()).to_string());
            }
        }
        labels.push(ParamLabel::ChargeScaling.to_string());
    }
    if springs {
        for pair in base.springs.keys() {
            labels.push(ParamLabel::Spring(pair.clone()).to_string());
        }
    }
    for pair in pairs {
        for term in [BuckinghamTerm::A, BuckinghamTerm::Rho] {
            labels.push(ParamLabel::Pair { pair: pair.clone(), term }.to_string());
        }
    }
    labels
}
