use log::debug;
use nalgebra::Vector3;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::core::codec;
use crate::core::domain::{Structure, TrainingPool, STRESS_COMPONENTS};
use crate::core::error::FitError;
use crate::core::labels::ParamLabel;
use crate::core::potential::PotentialSpec;
use crate::engine::evaluator::{MechanicsEngine, Prediction};
use crate::engine::pool::SessionPool;
use crate::solvers::Objective;

/// Default weight of the stress term; forces and stresses differ by orders of
/// magnitude.
pub const DEFAULT_STRESS_WEIGHT: f64 = 0.001;

/// The two summed residual terms before weighting.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ErrorTerms {
    /// Σ over structures of the mean squared force residual.
    pub force: f64,
    /// Σ over structures of the mean squared stress residual.
    pub stress: f64,
}

impl ErrorTerms {
    pub fn total(&self, weight: f64) -> f64 {
        self.force + weight * self.stress
    }

    /// Adds one structure's residuals.
    pub fn accumulate(
        &mut self,
        reference_forces: &[Vector3<f64>],
        predicted_forces: &[Vector3<f64>],
        reference_stress: &[f64; STRESS_COMPONENTS],
        predicted_stress: &[f64; STRESS_COMPONENTS],
    ) {
        let n_components = (3 * reference_forces.len()) as f64;
        let force_sq: f64 = reference_forces
            .iter()
            .zip(predicted_forces)
            .map(|(r, p)| (p - r).norm_squared())
            .sum();
        let stress_sq: f64 = reference_stress
            .iter()
            .zip(predicted_stress)
            .map(|(r, p)| (p - r) * (p - r))
            .sum();

        self.force += force_sq / n_components;
        self.stress += stress_sq / STRESS_COMPONENTS as f64;
    }
}

/// Reference and predicted data for one structure of a fit.
#[derive(Debug, Clone, PartialEq)]
pub struct StructureComparison {
    /// Index into the training pool.
    pub pool_index: usize,
    pub reference_forces: Vec<Vector3<f64>>,
    pub predicted_forces: Vec<Vector3<f64>>,
    pub reference_stress: [f64; STRESS_COMPONENTS],
    pub predicted_stress: [f64; STRESS_COMPONENTS],
}

/// The chi-squared objective for one structure subset.
///
/// Owns replicated copies of the selected structures and a pool of engine
/// sessions for the lifetime of one fit-run. Dropping it tears the sessions down.
pub struct ChiSquaredObjective {
    base: Arc<PotentialSpec>,
    labels: Vec<ParamLabel>,
    pool_indices: Vec<usize>,
    sessions: SessionPool,
    weight: f64,
    evaluations: AtomicUsize,
}

impl ChiSquaredObjective {
    /// Binds the objective to `subset` of `pool`.
    ///
    /// Labels are parsed and resolved once here. When `supercell` is given each
    /// structure is replicated by those multipliers before the engine sees it.
    pub fn new(
        engine: Arc<dyn MechanicsEngine>,
        base: Arc<PotentialSpec>,
        labels: &[String],
        pool: &TrainingPool,
        subset: &[usize],
        supercell: Option<[usize; 3]>,
        weight: f64,
    ) -> Result<Self, FitError> {
        let labels = ParamLabel::parse_all(labels, &base)?;
        if subset.is_empty() {
            return Err(FitError::InvalidArgument("structure subset is empty".into()));
        }

        let mut structures = Vec::with_capacity(subset.len());
        for &index in subset {
            let s = pool.get(index).ok_or_else(|| {
                FitError::InvalidArgument(format!(
                    "structure index {} is outside the training pool of {}",
                    index,
                    pool.len()
                ))
            })?;
            structures.push(match supercell {
                Some(mult) => s.supercell(mult)?,
                None => s.clone(),
            });
        }
        let structures: Arc<[Structure]> = structures.into();

        Ok(Self {
            base,
            labels,
            pool_indices: subset.to_vec(),
            sessions: SessionPool::new(engine, structures),
            weight,
            evaluations: AtomicUsize::new(0),
        })
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::Relaxed)
    }

    pub fn sessions_opened(&self) -> usize {
        self.sessions.sessions_opened()
    }

    /// Runs the engine on every structure for `candidate`, handing each result to
    /// `visit` in structure order.
    fn run<F>(&self, candidate: &[f64], mut visit: F) -> Result<(), FitError>
    where
        F: FnMut(usize, &Structure, Prediction),
    {
        let spec = codec::decode(&self.base, &self.labels, candidate)?;

        let mut session = self.sessions.acquire().map_err(FitError::Session)?;
        session.set_potential(&spec).map_err(FitError::Session)?;

        for (i, structure) in self.sessions.structures().iter().enumerate() {
            let pool_index = self.pool_indices[i];
            let prediction = session
                .compute(i)
                .map_err(|source| FitError::Engine { structure: pool_index, source })?;

            if prediction.forces.len() != structure.num_atoms() {
                return Err(FitError::Engine {
                    structure: pool_index,
                    source: anyhow::anyhow!(
                        "engine returned {} forces for {} atoms",
                        prediction.forces.len(),
                        structure.num_atoms()
                    ),
                });
            }
            visit(pool_index, structure, prediction);
        }

        self.evaluations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Force and stress terms for `candidate`, unweighted.
    pub fn error_terms(&self, candidate: &[f64]) -> Result<ErrorTerms, FitError> {
        let mut terms = ErrorTerms::default();
        self.run(candidate, |_, structure, p| {
            terms.accumulate(
                structure.reference_forces(),
                &p.forces,
                structure.reference_stress(),
                &p.stress,
            );
        })?;
        Ok(terms)
    }

    /// The scalar error `force + weight * stress` for `candidate`.
    pub fn evaluate(&self, candidate: &[f64]) -> Result<f64, FitError> {
        Ok(self.error_terms(candidate)?.total(self.weight))
    }

    /// Re-runs `candidate` and returns the per-structure comparison data along
    /// with the scalar error.
    pub fn evaluate_detailed(
        &self,
        candidate: &[f64],
    ) -> Result<(f64, Vec<StructureComparison>), FitError> {
        let mut terms = ErrorTerms::default();
        let mut comparisons = Vec::with_capacity(self.pool_indices.len());

        self.run(candidate, |pool_index, structure, p| {
            terms.accumulate(
                structure.reference_forces(),
                &p.forces,
                structure.reference_stress(),
                &p.stress,
            );
            comparisons.push(StructureComparison {
                pool_index,
                reference_forces: structure.reference_forces().to_vec(),
                predicted_forces: p.forces,
                reference_stress: *structure.reference_stress(),
                predicted_stress: p.stress,
            });
        })?;

        debug!(
            "Detailed evaluation on {}: force term {:.6e}, stress term {:.6e}",
            self.sessions.engine_name(),
            terms.force,
            terms.stress
        );
        Ok((terms.total(self.weight), comparisons))
    }
}

impl Objective for ChiSquaredObjective {
    fn evaluate(&self, candidate: &[f64]) -> Result<f64, FitError> {
        ChiSquaredObjective::evaluate(self, candidate)
    }
}
