use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::unbounded;
use log::{error, info, LevelFilter};

use shellfit::core::domain::TrainingPool;
use shellfit::core::error::FitError;
use shellfit::core::random::Seed;
use shellfit::core::sampling;
use shellfit::engine::evaluator::MechanicsEngine;
use shellfit::engine::external::gulp::GulpEngine;
use shellfit::fit::config::FitConfig;
use shellfit::fit::FitRun;
use shellfit::interface::progress::ProgressTracker;
use shellfit::interface::report;

// --- CLI Definitions ---

#[derive(Parser, Debug)]
#[command(author, version, about = "Fit Buckingham and core-shell potentials to DFT forces and stresses", long_about = None)]
struct Args {
    /// Fit description (potential, labels, bounds, sampling, optimizer, engine)
    #[arg(short, long)]
    config: PathBuf,

    /// Training pool of reference structures (JSON)
    #[arg(short, long)]
    pool: PathBuf,

    /// Directory receiving one sub-directory per fitted subset
    #[arg(short, long, default_value = "results")]
    output: PathBuf,

    /// Number of worker threads for parallel evaluation (0 = one per core)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Seed for subset sampling and optimization
    #[arg(long)]
    seed: Option<u64>,

    /// Number of subsets to fit
    #[arg(long)]
    fits: Option<usize>,

    /// Structures per subset
    #[arg(long)]
    subset_size: Option<usize>,

    /// Held-out structure sets scored against every fit
    #[arg(long)]
    validation_sets: Option<usize>,

    /// Print generation lines every N generations
    #[arg(long, default_value_t = 10)]
    report_every: usize,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

// --- Initialization Helpers ---

fn setup_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_secs()
        .init();
}

fn load_inputs(args: &Args) -> Result<(FitConfig, TrainingPool)> {
    let mut config = FitConfig::load(&args.config)?;
    let pool = TrainingPool::load_json(&args.pool)?;

    // CLI overrides
    if let Some(t) = args.threads {
        config.settings.threads = t;
    }
    if args.seed.is_some() {
        config.sampling.seed = args.seed;
    }
    if let Some(n) = args.fits {
        config.sampling.num_fits = n;
    }
    if let Some(k) = args.subset_size {
        config.sampling.subset_size = k;
    }
    if let Some(v) = args.validation_sets {
        config.sampling.validation_sets = v;
    }

    if pool.is_empty() {
        bail!("Training pool {} holds no structures", args.pool.display());
    }
    Ok((config, pool))
}

// --- Main ---

fn main() -> Result<()> {
    // 1. Parsing & Logging
    let args = Args::parse();
    setup_logging(args.verbose);

    // 2. Inputs
    let (config, pool) = load_inputs(&args)?;
    info!(
        "Loaded {} structures; fitting {} parameter(s): {}",
        pool.len(),
        config.labels.len(),
        config.labels.join(", ")
    );

    // 3. Pre-flight Checks
    let gulp = GulpEngine::new(config.engine.clone());
    gulp.check_available()?;
    let engine: Arc<dyn MechanicsEngine> = Arc::new(gulp);

    // 4. Subsets
    let mut seed = Seed::from(config.sampling.seed);
    let subsets = sampling::sample(
        config.sampling.num_fits,
        pool.len(),
        config.sampling.subset_size,
        &mut seed,
    )?;
    info!("Sampled {} subset(s) of {} structures", subsets.len(), config.sampling.subset_size);

    // 5. Reporter Thread
    let (tx, rx) = unbounded();
    let report_every = args.report_every;
    let reporter = thread::Builder::new()
        .name("Fit-Reporter".to_string())
        .spawn(move || {
            let mut tracker = ProgressTracker::new(report_every);
            tracker.follow(rx);
        })
        .context("Failed to spawn reporter thread")?;

    // 6. Fit every subset, persisting as we go
    let pool_size = pool.len();
    let run = FitRun::new(
        Arc::new(pool),
        Arc::new(config.potential.clone()),
        engine,
        config.settings.clone(),
        config.optimizer.clone(),
    )
    .with_events(tx);

    let validation_size = config.sampling.validation_size.unwrap_or(config.sampling.subset_size);
    let mut written = 0;
    let mut failures = 0;
    for subset in &subsets {
        let result = match run.fit_subset(subset, &config.labels, &config.bounds, &mut seed) {
            Ok(result) => result,
            Err(e) => {
                // Validation problems are the same for every subset.
                if matches!(e, FitError::Validation(_)) {
                    return Err(e.into());
                }
                error!("Fit of subset {:?} failed: {}", subset, e);
                failures += 1;
                continue;
            }
        };
        report::write_fit_result(&args.output, &result)?;
        written += 1;

        // 7. Cross-validation on structures outside the fitted subset
        if config.sampling.validation_sets == 0 {
            continue;
        }
        let held_out = sampling::validation_sets(
            config.sampling.validation_sets,
            pool_size,
            validation_size,
            &result.subset,
            &mut seed,
        )?;
        for set in &held_out {
            match run.cross_validate(&result, set) {
                Ok(cv) => {
                    report::write_cross_validation(&args.output, &cv)?;
                }
                Err(e) => {
                    error!("Validation of fit {} on {:?} failed: {}", result.identifier, set, e);
                    failures += 1;
                }
            }
        }
    }

    drop(run);
    if reporter.join().is_err() {
        error!("Reporter thread panicked");
    }
    info!("{} of {} fit(s) written to {}", written, subsets.len(), args.output.display());

    if failures > 0 {
        bail!("{} fit(s) or validation(s) failed", failures);
    }
    Ok(())
}
