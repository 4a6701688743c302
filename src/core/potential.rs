use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::core::error::{FitError, ValidationReport, Violation};

// --- Per-species values ---

/// A per-species quantity: a single value for rigid ions, or a core/shell split
/// for polarisable species.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SpeciesValue {
    Scalar(f64),
    CoreShell { core: f64, shell: f64 },
}

impl SpeciesValue {
    /// Net value (core + shell for split species).
    pub fn total(&self) -> f64 {
        match *self {
            SpeciesValue::Scalar(v) => v,
            SpeciesValue::CoreShell { core, shell } => core + shell,
        }
    }

    pub fn is_split(&self) -> bool {
        matches!(self, SpeciesValue::CoreShell { .. })
    }

    fn scale(&mut self, factor: f64) {
        match self {
            SpeciesValue::Scalar(v) => *v *= factor,
            SpeciesValue::CoreShell { core, shell } => {
                *core *= factor;
                *shell *= factor;
            }
        }
    }
}

// --- Pair keys ---

/// An unordered pair of species. Always stored with the two names sorted, so
/// `Li-O` and `O-Li` are the same key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SpeciesPair {
    first: String,
    second: String,
}

impl SpeciesPair {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self { first: a.to_string(), second: b.to_string() }
        } else {
            Self { first: b.to_string(), second: a.to_string() }
        }
    }

    pub fn first(&self) -> &str {
        &self.first
    }

    pub fn second(&self) -> &str {
        &self.second
    }

    pub fn is_homonuclear(&self) -> bool {
        self.first == self.second
    }
}

impl fmt::Display for SpeciesPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.first, self.second)
    }
}

impl FromStr for SpeciesPair {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('-') {
            Some((a, b)) if !a.trim().is_empty() && !b.trim().is_empty() => {
                Ok(SpeciesPair::new(a.trim(), b.trim()))
            }
            _ => Err(format!("'{}' is not a species pair of the form A-B", s)),
        }
    }
}

impl TryFrom<String> for SpeciesPair {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SpeciesPair> for String {
    fn from(p: SpeciesPair) -> Self {
        p.to_string()
    }
}

// --- Interaction terms ---

/// The three coefficients of a Buckingham pair potential,
/// `V(r) = a * exp(-r / rho) - c / r^6`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 3]", into = "[f64; 3]")]
pub struct Buckingham {
    pub a: f64,
    pub rho: f64,
    pub c: f64,
}

impl Buckingham {
    pub fn new(a: f64, rho: f64, c: f64) -> Self {
        Self { a, rho, c }
    }
}

impl From<[f64; 3]> for Buckingham {
    fn from([a, rho, c]: [f64; 3]) -> Self {
        Self { a, rho, c }
    }
}

impl From<Buckingham> for [f64; 3] {
    fn from(b: Buckingham) -> Self {
        [b.a, b.rho, b.c]
    }
}

/// Core-shell spring, `E = k2/2 * r^2 + k4/24 * r^4`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Spring {
    pub k2: f64,
    pub k4: f64,
}

impl Spring {
    pub fn new(k2: f64, k4: f64) -> Self {
        Self { k2, k4 }
    }
}

impl From<[f64; 2]> for Spring {
    fn from([k2, k4]: [f64; 2]) -> Self {
        Self { k2, k4 }
    }
}

impl From<Spring> for [f64; 2] {
    fn from(s: Spring) -> Self {
        [s.k2, s.k4]
    }
}

// --- The full description ---

/// Everything the mechanics engine needs to know about the potential.
///
/// Springs are keyed by the species' self-pair (`O-O`), matching the label
/// vocabulary `O-O spring`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PotentialSpec {
    pub core_shell: BTreeMap<String, bool>,
    pub charges: BTreeMap<String, SpeciesValue>,
    pub masses: BTreeMap<String, SpeciesValue>,
    #[serde(rename = "potentials")]
    pub pair_potentials: BTreeMap<SpeciesPair, Buckingham>,
    #[serde(rename = "cs_springs", default)]
    pub springs: BTreeMap<SpeciesPair, Spring>,
}

impl PotentialSpec {
    pub fn is_core_shell(&self, species: &str) -> bool {
        self.core_shell.get(species).copied().unwrap_or(false)
    }

    pub fn has_species(&self, species: &str) -> bool {
        self.core_shell.contains_key(species)
    }

    pub fn charge(&self, species: &str) -> Option<&SpeciesValue> {
        self.charges.get(species)
    }

    pub fn spring(&self, species: &str) -> Option<&Spring> {
        self.springs.get(&SpeciesPair::new(species, species))
    }

    pub fn pair(&self, pair: &SpeciesPair) -> Option<&Buckingham> {
        self.pair_potentials.get(pair)
    }

    /// True if any species carries a non-zero net charge.
    pub fn has_charged_species(&self) -> bool {
        self.charges.values().any(|q| q.total() != 0.0)
    }

    pub(crate) fn scale_charges(&mut self, factor: f64) {
        for q in self.charges.values_mut() {
            q.scale(factor);
        }
    }

    /// Checks the internal consistency of the five facets.
    ///
    /// Every species must be declared in `core_shell` and carry a charge and a
    /// mass whose shape (scalar or split) matches its core-shell flag. Springs may
    /// only exist for core-shell species, and every core-shell species needs one.
    /// All problems are reported together.
    pub fn check_schema(&self) -> Result<(), FitError> {
        let mut report = ValidationReport::default();

        for (species, &is_cs) in &self.core_shell {
            for (facet, map) in [("charges", &self.charges), ("masses", &self.masses)] {
                match map.get(species) {
                    None => report.push(Violation::general(format!(
                        "species {} has no entry in {}",
                        species, facet
                    ))),
                    Some(v) if v.is_split() != is_cs => report.push(Violation::general(format!(
                        "species {} is {} but its {} entry is {}",
                        species,
                        if is_cs { "core-shell" } else { "a rigid ion" },
                        facet,
                        if v.is_split() { "a core/shell split" } else { "a scalar" }
                    ))),
                    Some(_) => {}
                }
            }
            if is_cs && self.spring(species).is_none() {
                report.push(Violation::general(format!(
                    "core-shell species {} has no spring",
                    species
                )));
            }
        }

        for (facet, keys) in [
            ("charges", self.charges.keys().collect::<Vec<_>>()),
            ("masses", self.masses.keys().collect::<Vec<_>>()),
        ] {
            for species in keys {
                if !self.has_species(species) {
                    report.push(Violation::general(format!(
                        "{} lists {} which is not declared in core_shell",
                        facet, species
                    )));
                }
            }
        }

        for pair in self.pair_potentials.keys() {
            for species in [pair.first(), pair.second()] {
                if !self.has_species(species) {
                    report.push(Violation::general(format!(
                        "potential {} uses undeclared species {}",
                        pair, species
                    )));
                }
            }
        }

        for pair in self.springs.keys() {
            if !pair.is_homonuclear() {
                report.push(Violation::general(format!(
                    "spring {} must join a species to itself",
                    pair
                )));
            } else if !self.is_core_shell(pair.first()) {
                report.push(Violation::general(format!(
                    "spring {} given for {} which is not core-shell",
                    pair,
                    pair.first()
                )));
            }
        }

        report.into_result()
    }
}
