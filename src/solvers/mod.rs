use crate::core::error::FitError;

/// Detailed statistics for a single generation.
/// Used for telemetry and progress reporting.
#[derive(Debug, Clone, Default)]
pub struct GenStats {
    pub generation: usize,
    pub best_error: f64,
    pub mean_error: f64,
    pub worst_error: f64,
    /// Standard deviation of the population errors; drives convergence.
    pub spread: f64,
    pub pop_size: usize,
    /// Objective evaluations so far, across all generations.
    pub evaluations: usize,

    /// The differential weight drawn for this generation (dithered).
    pub mutation_scale: f64,
}

/// Events emitted by solvers to whoever is watching the fit.
#[derive(Debug, Clone)]
pub enum SolverEvent {
    /// Diagnostic log message.
    Log(String),

    /// A completed generation with full statistics.
    GenerationUpdate(GenStats),

    /// A candidate that beats the best error seen so far.
    NewBest { vector: Vec<f64>, error: f64 },

    /// Solver has finished its run.
    Finished,
}

/// A scalar cost over a bounded parameter vector.
///
/// Implementations are shared across evaluation workers, so `evaluate` takes
/// `&self`; any per-call state must be owned by the call.
pub trait Objective: Sync {
    fn evaluate(&self, candidate: &[f64]) -> Result<f64, FitError>;
}

impl<F> Objective for F
where
    F: Fn(&[f64]) -> Result<f64, FitError> + Sync,
{
    fn evaluate(&self, candidate: &[f64]) -> Result<f64, FitError> {
        self(candidate)
    }
}

pub mod de;
