use anyhow::Result;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::core::domain::{Structure, STRESS_COMPONENTS};
use crate::core::potential::PotentialSpec;

/// Forces and stress predicted by the mechanics engine for one structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// One force per atom of the structure (cores only for core-shell species), eV/Å.
    pub forces: Vec<Vector3<f64>>,
    /// Stress in the same units and component order as the reference data.
    pub stress: [f64; STRESS_COMPONENTS],
}

/// Immutable engine settings, fixed when the engine is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path to the engine binary.
    pub executable: String,
    /// Keyword line placed at the top of every input deck.
    pub keywords: String,
    /// Short-range cutoff for pair potentials (Å).
    pub cutoff: f64,
    /// Factor converting engine stress to reference units (GPa -> kBar by default).
    pub stress_scale: f64,
    /// Parent directory for per-session scratch areas; system temp dir when unset.
    pub scratch_root: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            executable: "gulp".to_string(),
            keywords: "gradients conp".to_string(),
            cutoff: 10.0,
            stress_scale: 10.0,
            scratch_root: None,
        }
    }
}

/// A physics engine able to open working sessions.
/// Implementations must be Thread-Safe (Sync).
pub trait MechanicsEngine: Send + Sync {
    /// Prepares a working area for `structures`.
    ///
    /// Geometry-dependent setup happens here, once; the returned session is then
    /// driven many times with different potentials.
    fn open_session(&self, structures: &[Structure]) -> Result<Box<dyn EngineSession>>;

    /// Returns the name of the engine (e.g., "GULP 6.1").
    fn name(&self) -> &str;
}

/// Exclusive, reusable working state of one engine worker.
///
/// Dropping the session tears down everything it created.
pub trait EngineSession: Send {
    /// Replaces the potential used by subsequent `compute` calls.
    fn set_potential(&mut self, spec: &PotentialSpec) -> Result<()>;

    /// Single-point forces and stress of structure `index` (position in the slice
    /// the session was opened with) under the current potential.
    fn compute(&mut self, index: usize) -> Result<Prediction>;
}
