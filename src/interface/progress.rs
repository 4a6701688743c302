use std::time::Instant;

use crossbeam_channel::Receiver;
use log::{debug, info};

use crate::solvers::SolverEvent;

/// Follows the `SolverEvent` stream of a fit and reports it through the log.
///
/// Generation lines are throttled to every `report_every` generations; new
/// best errors are always reported.
pub struct ProgressTracker {
    pub generation: usize,
    pub evaluations: usize,
    pub best_error: Option<f64>,
    pub best_vector: Vec<f64>,
    report_every: usize,
    started: Instant,
}

impl ProgressTracker {
    pub fn new(report_every: usize) -> Self {
        Self {
            generation: 0,
            evaluations: 0,
            best_error: None,
            best_vector: Vec::new(),
            report_every: report_every.max(1),
            started: Instant::now(),
        }
    }

    /// Blocks until every sender is gone, handling events as they arrive.
    pub fn follow(&mut self, rx: Receiver<SolverEvent>) {
        for event in rx.iter() {
            self.handle_event(event);
        }
    }

    pub fn handle_event(&mut self, event: SolverEvent) {
        match event {
            SolverEvent::Log(msg) => debug!("{}", msg),

            SolverEvent::GenerationUpdate(stats) => {
                self.generation = stats.generation;
                self.evaluations = stats.evaluations;
                if stats.generation % self.report_every == 0 {
                    info!(
                        "Gen {:>5} | best {:.6e} | mean {:.6e} | spread {:.3e} | F {:.3} | {} evals | {:.0}s",
                        stats.generation,
                        stats.best_error,
                        stats.mean_error,
                        stats.spread,
                        stats.mutation_scale,
                        stats.evaluations,
                        self.started.elapsed().as_secs_f64()
                    );
                }
            }

            SolverEvent::NewBest { vector, error } => {
                info!(">>> New best error: {:.6e} at {:?}", error, vector);
                self.best_error = Some(error);
                self.best_vector = vector;
            }

            // One fit-run ended; the next subset starts from scratch.
            SolverEvent::Finished => {
                self.generation = 0;
                self.evaluations = 0;
                self.best_error = None;
                self.best_vector.clear();
            }
        }
    }
}
