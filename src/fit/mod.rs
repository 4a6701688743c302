use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crossbeam_channel::Sender;
use log::info;
use serde::{Deserialize, Serialize};

use crate::core::codec::{self, Bounds};
use crate::core::domain::{subset_identifier, TrainingPool};
use crate::core::error::FitError;
use crate::core::potential::PotentialSpec;
use crate::core::random::Seed;
use crate::engine::evaluator::MechanicsEngine;
use crate::engine::objective::{ChiSquaredObjective, StructureComparison, DEFAULT_STRESS_WEIGHT};
use crate::solvers::de::{DeSettings, DifferentialEvolution};
use crate::solvers::SolverEvent;

pub mod config;

/// Settings of the objective side of a fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitSettings {
    /// Weight of the stress term relative to the force term.
    pub weight: f64,
    /// Replicate every structure by these multipliers before evaluation.
    pub supercell: Option<[usize; 3]>,
    /// Evaluation workers; 0 uses one per core.
    pub threads: usize,
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            weight: DEFAULT_STRESS_WEIGHT,
            supercell: None,
            threads: 0,
        }
    }
}

/// Everything a fit of one structure subset produced.
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    /// Sorted 0-based pool indices.
    pub subset: Vec<usize>,
    /// Destination name for persistence, e.g. "1-3-10".
    pub identifier: String,
    pub labels: Vec<String>,
    pub best_vector: Vec<f64>,
    pub error: f64,
    pub comparisons: Vec<StructureComparison>,
    pub generations: usize,
    pub evaluations: usize,
    pub converged: bool,
}

/// A fitted potential scored on structures it was not fitted to.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossValidation {
    /// Identifier of the fit whose parameters were scored.
    pub fitted: String,
    /// Sorted 0-based pool indices of the held-out structures.
    pub subset: Vec<usize>,
    pub identifier: String,
    pub error: f64,
    pub comparisons: Vec<StructureComparison>,
}

/// Fits a potential to structure subsets of a training pool, one subset at a time.
pub struct FitRun {
    pool: Arc<TrainingPool>,
    base: Arc<PotentialSpec>,
    engine: Arc<dyn MechanicsEngine>,
    settings: FitSettings,
    optimizer: DeSettings,
    events: Option<Sender<SolverEvent>>,
    cancel: Option<Arc<AtomicBool>>,
}

impl FitRun {
    pub fn new(
        pool: Arc<TrainingPool>,
        base: Arc<PotentialSpec>,
        engine: Arc<dyn MechanicsEngine>,
        settings: FitSettings,
        optimizer: DeSettings,
    ) -> Self {
        Self { pool, base, engine, settings, optimizer, events: None, cancel: None }
    }

    pub fn with_events(mut self, tx: Sender<SolverEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Fits every subset in order, stopping at the first failure.
    pub fn run(
        &self,
        subsets: &[Vec<usize>],
        labels: &[String],
        bounds: &[Bounds],
        seed: &mut Seed,
    ) -> Result<Vec<FitResult>, FitError> {
        let mut results = Vec::with_capacity(subsets.len());
        for subset in subsets {
            results.push(self.fit_subset(subset, labels, bounds, seed)?);
        }
        Ok(results)
    }

    /// Fits one subset: validate, optimize, re-evaluate the winner in detail.
    ///
    /// Engine sessions live only for the duration of this call.
    pub fn fit_subset(
        &self,
        subset: &[usize],
        labels: &[String],
        bounds: &[Bounds],
        seed: &mut Seed,
    ) -> Result<FitResult, FitError> {
        // 1. Pre-flight
        codec::validate(labels, bounds, &self.base)?;

        let mut subset = subset.to_vec();
        subset.sort_unstable();
        let identifier = subset_identifier(&subset);
        info!("Fitting {} parameter(s) on structures {}", labels.len(), identifier);

        // 2. Objective bound to this subset
        let objective = ChiSquaredObjective::new(
            self.engine.clone(),
            self.base.clone(),
            labels,
            &self.pool,
            &subset,
            self.settings.supercell,
            self.settings.weight,
        )?;

        let mut solver = DifferentialEvolution::new(self.optimizer.clone());
        if let Some(tx) = &self.events {
            solver = solver.with_events(tx.clone());
        }
        if let Some(flag) = &self.cancel {
            solver = solver.with_cancel(flag.clone());
        }

        // 3. Optimize on the configured worker pool
        let workers = self.worker_pool()?;
        let minimum = match &workers {
            Some(p) => p.install(|| solver.minimize(&objective, bounds, seed))?,
            None => solver.minimize(&objective, bounds, seed)?,
        };

        // 4. Detailed pass for the winner
        let (error, comparisons) = objective.evaluate_detailed(&minimum.vector)?;
        info!(
            "Structures {}: error {:.6e} after {} evaluations on {} session(s)",
            identifier,
            error,
            objective.evaluations(),
            objective.sessions_opened()
        );

        Ok(FitResult {
            subset,
            identifier,
            labels: labels.to_vec(),
            best_vector: minimum.vector,
            error,
            comparisons,
            generations: minimum.generations,
            evaluations: minimum.evaluations,
            converged: minimum.converged,
        })
    }

    /// Scores the parameters of `fit` on `held_out` with the same objective.
    ///
    /// Held-out structures may not overlap the fitted subset.
    pub fn cross_validate(&self, fit: &FitResult, held_out: &[usize]) -> Result<CrossValidation, FitError> {
        let mut subset = held_out.to_vec();
        subset.sort_unstable();
        if let Some(shared) = subset.iter().find(|i| fit.subset.contains(i)) {
            return Err(FitError::InvalidArgument(format!(
                "structure {} is part of fit {} and cannot validate it",
                shared + 1,
                fit.identifier
            )));
        }
        let identifier = subset_identifier(&subset);

        let objective = ChiSquaredObjective::new(
            self.engine.clone(),
            self.base.clone(),
            &fit.labels,
            &self.pool,
            &subset,
            self.settings.supercell,
            self.settings.weight,
        )?;
        let (error, comparisons) = objective.evaluate_detailed(&fit.best_vector)?;
        info!("Fit {} on held-out structures {}: error {:.6e}", fit.identifier, identifier, error);

        Ok(CrossValidation { fitted: fit.identifier.clone(), subset, identifier, error, comparisons })
    }

    fn worker_pool(&self) -> Result<Option<rayon::ThreadPool>, FitError> {
        if self.settings.threads == 0 {
            return Ok(None);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.threads)
            .thread_name(|i| format!("fit-worker-{}", i))
            .build()?;
        Ok(Some(pool))
    }
}
