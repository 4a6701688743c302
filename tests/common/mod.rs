#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use nalgebra::{Point3, Vector3};
use shellfit::core::domain::{Lattice, Structure, TrainingPool};
use shellfit::core::potential::{Buckingham, PotentialSpec, SpeciesPair, SpeciesValue, Spring};
use shellfit::engine::evaluator::{EngineSession, MechanicsEngine, Prediction};

/// Net Li charge of the fixture potential; the stub scales its predictions by
/// the ratio of the current Li charge to this value.
pub const LI_CHARGE: f64 = 1.0;

/// Li/Ni/O potential with O as the only core-shell species.
pub fn lno_potential() -> PotentialSpec {
    let mut spec = PotentialSpec::default();
    spec.core_shell = BTreeMap::from([
        ("Li".to_string(), false),
        ("Ni".to_string(), false),
        ("O".to_string(), true),
    ]);
    spec.charges = BTreeMap::from([
        ("Li".to_string(), SpeciesValue::Scalar(LI_CHARGE)),
        ("Ni".to_string(), SpeciesValue::Scalar(3.0)),
        ("O".to_string(), SpeciesValue::CoreShell { core: 0.8, shell: -2.8 }),
    ]);
    spec.masses = BTreeMap::from([
        ("Li".to_string(), SpeciesValue::Scalar(6.941)),
        ("Ni".to_string(), SpeciesValue::Scalar(58.693)),
        ("O".to_string(), SpeciesValue::CoreShell { core: 14.3991, shell: 1.5999 }),
    ]);
    spec.pair_potentials = BTreeMap::from([
        (SpeciesPair::new("Li", "O"), Buckingham::new(663.111, 0.3035, 0.0)),
        (SpeciesPair::new("Ni", "O"), Buckingham::new(1393.34, 0.3025, 0.0)),
        (SpeciesPair::new("O", "O"), Buckingham::new(25804.4, 0.1455, 0.0)),
    ]);
    spec.springs = BTreeMap::from([(SpeciesPair::new("O", "O"), Spring::new(65.0, 0.0))]);
    spec
}

/// A small LiNiO2-like cell whose reference data depends on `tag`.
pub fn lno_structure(tag: usize) -> Structure {
    let t = tag as f64;
    let lattice = Lattice::orthorhombic(2.9, 2.9, 14.2).expect("valid lattice");
    let species = ["Li", "Ni", "O", "O"].iter().map(|s| s.to_string()).collect();
    let positions = vec![
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(1.45, 1.45, 7.1),
        Point3::new(0.0, 0.0, 3.7),
        Point3::new(1.45, 1.45, 10.5),
    ];
    let forces = vec![
        Vector3::new(0.1 + 0.01 * t, -0.2, 0.05),
        Vector3::new(-0.3, 0.1, 0.2 - 0.02 * t),
        Vector3::new(0.05, 0.15, -0.1),
        Vector3::new(0.15, -0.05, -0.15 + 0.01 * t),
    ];
    let stress = [1.5 + t, -2.0, 0.7, 0.1, -0.3 * t, 0.25];
    Structure::new(lattice, species, positions, forces, stress).expect("valid structure")
}

pub fn lno_pool(n: usize) -> TrainingPool {
    TrainingPool::new((0..n).map(lno_structure).collect())
}

/// Deterministic stand-in for an external mechanics engine.
///
/// Predicts the reference forces and stress scaled by `q(Li) / LI_CHARGE`, so
/// the error vanishes exactly when the Li charge equals its nominal value.
/// Can be told to fail on a given structure (position in the opened slice),
/// to refuse opening sessions, or to reject every potential.
#[derive(Default)]
pub struct StubEngine {
    pub fail_on: Option<usize>,
    pub refuse_sessions: bool,
    pub reject_potential: bool,
    pub sessions: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
}

impl StubEngine {
    pub fn failing_on(index: usize) -> Self {
        Self { fail_on: Some(index), ..Default::default() }
    }
}

impl MechanicsEngine for StubEngine {
    fn open_session(&self, structures: &[Structure]) -> Result<Box<dyn EngineSession>> {
        if self.refuse_sessions {
            bail!("stub engine refuses to open a session");
        }
        self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubSession {
            structures: structures.to_vec(),
            factor: None,
            fail_on: self.fail_on,
            reject_potential: self.reject_potential,
            closed: self.closed.clone(),
        }))
    }

    fn name(&self) -> &str {
        "Stub Engine"
    }
}

pub struct StubSession {
    structures: Vec<Structure>,
    factor: Option<f64>,
    fail_on: Option<usize>,
    reject_potential: bool,
    closed: Arc<AtomicUsize>,
}

impl EngineSession for StubSession {
    fn set_potential(&mut self, spec: &PotentialSpec) -> Result<()> {
        if self.reject_potential {
            bail!("stub engine rejects the potential");
        }
        let q = spec.charge("Li").map(|q| q.total()).unwrap_or(0.0);
        self.factor = Some(q / LI_CHARGE);
        Ok(())
    }

    fn compute(&mut self, index: usize) -> Result<Prediction> {
        if self.fail_on == Some(index) {
            bail!("stub engine told to fail on structure {}", index);
        }
        let Some(f) = self.factor else {
            bail!("compute called before set_potential");
        };
        let s = &self.structures[index];
        Ok(Prediction {
            forces: s.reference_forces().iter().map(|v| v * f).collect(),
            stress: s.reference_stress().map(|x| x * f),
        })
    }
}

impl Drop for StubSession {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Engine returning the same prediction for every structure.
pub struct FixedEngine {
    pub prediction: Prediction,
}

struct FixedSession(Prediction);

impl MechanicsEngine for FixedEngine {
    fn open_session(&self, _structures: &[Structure]) -> Result<Box<dyn EngineSession>> {
        Ok(Box::new(FixedSession(self.prediction.clone())))
    }

    fn name(&self) -> &str {
        "Fixed Engine"
    }
}

impl EngineSession for FixedSession {
    fn set_potential(&mut self, _spec: &PotentialSpec) -> Result<()> {
        Ok(())
    }

    fn compute(&mut self, _index: usize) -> Result<Prediction> {
        Ok(self.0.clone())
    }
}

pub fn stub() -> Arc<dyn MechanicsEngine> {
    Arc::new(StubEngine::default())
}
