use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Sender;
use log::{debug, info};
use rand::prelude::*;
use rand::seq::index;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::codec::Bounds;
use crate::core::error::FitError;
use crate::core::random::Seed;
use crate::solvers::{GenStats, Objective, SolverEvent};

/// Smallest population for which `best1bin` always finds two distinct donors.
const MIN_POPULATION: usize = 5;

/// Tuning of the differential evolution search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeSettings {
    /// Population size is this factor times the number of free parameters.
    pub population_factor: usize,
    /// Maximum number of generations after the initial population.
    pub max_iterations: usize,
    /// Differential weight range; a fresh weight is drawn each generation.
    pub mutation: (f64, f64),
    /// Crossover probability.
    pub recombination: f64,
    /// Relative convergence tolerance on the population spread.
    pub tol: f64,
    /// Absolute convergence tolerance on the population spread.
    pub atol: f64,
}

impl Default for DeSettings {
    fn default() -> Self {
        Self {
            population_factor: 25,
            max_iterations: 1000,
            mutation: (0.5, 1.0),
            recombination: 0.7,
            tol: 0.01,
            atol: 0.0,
        }
    }
}

/// Outcome of one minimization.
#[derive(Debug, Clone, PartialEq)]
pub struct Minimum {
    pub vector: Vec<f64>,
    pub error: f64,
    pub generations: usize,
    pub evaluations: usize,
    pub converged: bool,
}

/// Differential evolution (`best1bin`, deferred updating) over a box.
///
/// The search runs in the unit cube and candidates are mapped onto the bounds
/// only when handed to the objective, so every vector the objective sees lies
/// inside its bounds. Each generation is built entirely from the previous one
/// and scored in parallel; results are gathered in candidate order, which keeps
/// a seeded run reproducible whatever the thread count.
pub struct DifferentialEvolution {
    settings: DeSettings,
    events: Option<Sender<SolverEvent>>,
    cancel: Option<Arc<AtomicBool>>,
}

impl DifferentialEvolution {
    pub fn new(settings: DeSettings) -> Self {
        Self { settings, events: None, cancel: None }
    }

    /// Publishes progress on `tx`.
    pub fn with_events(mut self, tx: Sender<SolverEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Stops at the next generation boundary once `flag` is set.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn minimize<O: Objective + ?Sized>(
        &self,
        objective: &O,
        bounds: &[Bounds],
        seed: &mut Seed,
    ) -> Result<Minimum, FitError> {
        seed.with_rng(|rng| self.minimize_with_rng(objective, bounds, rng))
    }

    pub fn minimize_with_rng<O: Objective + ?Sized>(
        &self,
        objective: &O,
        bounds: &[Bounds],
        rng: &mut ChaCha8Rng,
    ) -> Result<Minimum, FitError> {
        self.check_inputs(bounds)?;

        let dim = bounds.len();
        let np = (self.settings.population_factor * dim).max(MIN_POPULATION);
        let start = Instant::now();

        info!("Differential evolution: {} parameters, population {}", dim, np);
        self.emit(SolverEvent::Log(format!("Initializing population of {}...", np)));

        // 1. Initialization Phase
        let mut population = latin_hypercube(np, dim, rng);
        let mut energies = score(objective, &population, bounds)?;
        let mut evaluations = np;

        let mut best_idx = argmin(&energies);
        let mut best_error = energies[best_idx];
        self.emit(SolverEvent::NewBest {
            vector: to_parameters(&population[best_idx], bounds),
            error: best_error,
        });

        // 2. Evolution Loop
        let mut generations = 0;
        let mut converged = false;

        for gen in 1..=self.settings.max_iterations {
            if self.cancelled() {
                self.emit(SolverEvent::Log(format!("Cancelled before generation {}", gen)));
                self.emit(SolverEvent::Finished);
                return Err(FitError::Cancelled { generation: gen - 1 });
            }

            let (lo, hi) = self.settings.mutation;
            let scale = if hi > lo { rng.gen_range(lo..=hi) } else { lo };

            // A. Build the whole trial generation from the current one
            let best = population[best_idx].clone();
            let trials: Vec<Vec<f64>> = (0..np)
                .map(|i| self.best1bin(i, &population, &best, scale, rng))
                .collect();

            // B. Score
            let trial_energies = score(objective, &trials, bounds)?;
            evaluations += np;

            // C. Selection
            for (i, (trial, e)) in trials.into_iter().zip(trial_energies).enumerate() {
                if e <= energies[i] {
                    population[i] = trial;
                    energies[i] = e;
                }
            }

            generations = gen;
            best_idx = argmin(&energies);

            if energies[best_idx] < best_error {
                best_error = energies[best_idx];
                self.emit(SolverEvent::NewBest {
                    vector: to_parameters(&population[best_idx], bounds),
                    error: best_error,
                });
            }

            // D. Telemetry
            let (mean, spread) = mean_and_std(&energies);
            let worst = energies.iter().cloned().fold(f64::MIN, f64::max);
            debug!(
                "Generation {}: best {:.6e}, mean {:.6e}, spread {:.3e}",
                gen, best_error, mean, spread
            );
            self.emit(SolverEvent::GenerationUpdate(GenStats {
                generation: gen,
                best_error,
                mean_error: mean,
                worst_error: worst,
                spread,
                pop_size: np,
                evaluations,
                mutation_scale: scale,
            }));

            // E. Convergence
            if spread.is_finite() && spread <= self.settings.atol + self.settings.tol * mean.abs() {
                converged = true;
                break;
            }
        }

        info!(
            "Differential evolution finished: error {:.6e} after {} generations, {} evaluations ({:.1}s){}",
            best_error,
            generations,
            evaluations,
            start.elapsed().as_secs_f64(),
            if converged { ", converged" } else { "" }
        );
        self.emit(SolverEvent::Log(format!("DE Finished. Total Evals: {}", evaluations)));
        self.emit(SolverEvent::Finished);

        Ok(Minimum {
            vector: to_parameters(&population[best_idx], bounds),
            error: best_error,
            generations,
            evaluations,
            converged,
        })
    }

    // --- Helpers ---

    fn check_inputs(&self, bounds: &[Bounds]) -> Result<(), FitError> {
        if bounds.is_empty() {
            return Err(FitError::InvalidArgument("no parameters to optimize".into()));
        }
        for (i, b) in bounds.iter().enumerate() {
            if !(b.low.is_finite() && b.high.is_finite() && b.low < b.high) {
                return Err(FitError::InvalidArgument(format!(
                    "bounds #{} ({}, {}) must be finite with low < high",
                    i, b.low, b.high
                )));
            }
        }
        let s = &self.settings;
        if s.population_factor == 0 {
            return Err(FitError::InvalidArgument("population_factor must be positive".into()));
        }
        if !(0.0..=2.0).contains(&s.mutation.0) || !(s.mutation.0..=2.0).contains(&s.mutation.1) {
            return Err(FitError::InvalidArgument(format!(
                "mutation range {:?} must satisfy 0 <= low <= high <= 2",
                s.mutation
            )));
        }
        if !(0.0..=1.0).contains(&s.recombination) {
            return Err(FitError::InvalidArgument("recombination must lie in [0, 1]".into()));
        }
        Ok(())
    }

    /// `best + F * (x_r0 - x_r1)` with binomial crossover against candidate `i`.
    fn best1bin(
        &self,
        i: usize,
        population: &[Vec<f64>],
        best: &[f64],
        scale: f64,
        rng: &mut ChaCha8Rng,
    ) -> Vec<f64> {
        let dim = best.len();
        let donors: Vec<usize> = index::sample(rng, population.len(), 3)
            .into_iter()
            .filter(|&r| r != i)
            .take(2)
            .collect();
        let (r0, r1) = (donors[0], donors[1]);

        let fill_point = rng.gen_range(0..dim);
        let mut trial = population[i].clone();
        for j in 0..dim {
            let cross: f64 = rng.gen();
            if cross < self.settings.recombination || j == fill_point {
                trial[j] = best[j] + scale * (population[r0][j] - population[r1][j]);
            }
        }

        // Out-of-box values are redrawn uniformly
        for v in trial.iter_mut() {
            if !(0.0..=1.0).contains(v) {
                *v = rng.gen();
            }
        }
        trial
    }

    fn emit(&self, event: SolverEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().map(|f| f.load(Ordering::Relaxed)).unwrap_or(false)
    }
}

/// Stratified initial population in the unit cube: each dimension is split into
/// `n` equal bins and every bin holds exactly one member.
fn latin_hypercube(n: usize, dim: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<f64>> {
    let seg = 1.0 / n as f64;
    let mut population = vec![vec![0.0; dim]; n];
    let mut order: Vec<usize> = (0..n).collect();

    for j in 0..dim {
        order.shuffle(rng);
        for (i, &bin) in order.iter().enumerate() {
            population[i][j] = (bin as f64 + rng.gen::<f64>()) * seg;
        }
    }
    population
}

fn to_parameters(unit: &[f64], bounds: &[Bounds]) -> Vec<f64> {
    unit.iter()
        .zip(bounds)
        .map(|(u, b)| (b.low + u * b.width()).clamp(b.low, b.high))
        .collect()
}

/// Scores every member in parallel. Non-finite errors rank last.
fn score<O: Objective + ?Sized>(
    objective: &O,
    members: &[Vec<f64>],
    bounds: &[Bounds],
) -> Result<Vec<f64>, FitError> {
    members
        .par_iter()
        .map(|u| {
            let x = to_parameters(u, bounds);
            objective
                .evaluate(&x)
                .map(|e| if e.is_finite() { e } else { f64::INFINITY })
        })
        .collect()
}

fn argmin(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v < values[best] {
            best = i;
        }
    }
    best
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, var.sqrt())
}
