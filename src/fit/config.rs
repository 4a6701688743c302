use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::codec::Bounds;
use crate::core::error::FitError;
use crate::core::potential::PotentialSpec;
use crate::engine::evaluator::EngineConfig;
use crate::fit::FitSettings;
use crate::solvers::de::DeSettings;

/// How many subsets to fit and how large they are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub num_fits: usize,
    pub subset_size: usize,
    /// Fixed seed for both sampling and optimization; entropy when absent.
    pub seed: Option<u64>,
    /// Held-out sets scored against every finished fit; 0 disables.
    pub validation_sets: usize,
    /// Structures per held-out set; defaults to `subset_size`.
    pub validation_size: Option<usize>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self { num_fits: 1, subset_size: 1, seed: None, validation_sets: 0, validation_size: None }
    }
}

/// A complete fit description as read from JSON.
///
/// ```json
/// {
///   "potential": { "core_shell": {"O": true}, "charges": {...}, ... },
///   "labels": ["dq_O", "q_scaling"],
///   "bounds": [[0.01, 4.0], [0.3, 1.0]],
///   "sampling": { "num_fits": 5, "subset_size": 3, "seed": 7 }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitConfig {
    pub potential: PotentialSpec,
    pub labels: Vec<String>,
    pub bounds: Vec<Bounds>,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub optimizer: DeSettings,
    #[serde(default)]
    pub settings: FitSettings,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl FitConfig {
    /// Reads and parses `path`, then checks the potential's schema.
    pub fn load(path: &Path) -> Result<Self, FitError> {
        let text = fs::read_to_string(path)
            .map_err(|source| FitError::Io { path: path.display().to_string(), source })?;
        let config = Self::from_json(&text)
            .map_err(|source| FitError::Parse { path: path.display().to_string(), source })?;
        config.potential.check_schema()?;
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
