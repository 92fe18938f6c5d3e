use crate::core::io::checkpoint::Checkpoint;
use crate::core::io::counts::CountSample;
use crate::core::io::model::ModelDescription;
use crate::engine::config::SimulationConfig;
use crate::engine::error::EngineError;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::setup;
use crate::engine::world::{RunStatistics, World};
use tracing::{info, instrument};

#[derive(Debug, Clone)]
pub struct SimulationResult {
    /// The world after the last iteration, ready to be checkpointed or inspected.
    pub world: World,
    pub observable_names: Vec<String>,
    pub samples: Vec<CountSample>,
    pub stats: RunStatistics,
}

/// Builds a world from a model without running it.
///
/// # Errors
///
/// Any [`EngineError`] raised while validating the model.
#[instrument(skip_all, name = "world_setup")]
pub fn build_world(model: &ModelDescription, config: &SimulationConfig) -> Result<World, EngineError> {
    setup::build_world(model, config.clone())
}

/// Runs a simulation until `config.iterations` iterations have completed.
///
/// With a checkpoint the world continues from the checkpointed iteration, and the
/// observables are sampled at every multiple of `count_interval` reached from there;
/// a fresh world performs its time-zero releases and is sampled before its first iteration.
///
/// # Errors
///
/// Setup errors, an incompatible checkpoint, or an internal error during an iteration.
#[instrument(skip_all, name = "simulation_workflow")]
pub fn run(
    model: &ModelDescription,
    config: &SimulationConfig,
    reporter: &ProgressReporter,
    checkpoint: Option<&Checkpoint>,
) -> Result<SimulationResult, EngineError> {
    reporter.report(Progress::PhaseStart {
        name: "Initialization",
    });
    let mut world = build_world(model, config)?;
    if let Some(checkpoint) = checkpoint {
        world.restore(checkpoint)?;
        reporter.report(Progress::Message(format!(
            "Resumed at iteration {}",
            world.iteration()
        )));
    }
    reporter.report(Progress::PhaseFinish);

    let interval = config.count_interval.max(1);
    let mut samples = Vec::new();
    if checkpoint.is_none() {
        let placed = world.release_immediate()?;
        if placed > 0 {
            reporter.report(Progress::Message(format!("Released {placed} molecule(s) at t=0")));
        }
        samples.push(world.sample_counts());
    }

    let remaining = config.iterations.saturating_sub(world.iteration());
    info!(
        start = world.iteration(),
        iterations = remaining,
        molecules = world.live_molecule_count(),
        "Starting simulation"
    );
    reporter.report(Progress::PhaseStart { name: "Simulation" });
    reporter.report(Progress::TaskStart {
        total_steps: remaining,
    });
    for _ in 0..remaining {
        world.run_iteration()?;
        if world.iteration() % interval == 0 {
            samples.push(world.sample_counts());
        }
        reporter.report(Progress::Iteration {
            iteration: world.iteration(),
            time_seconds: world.time_seconds(),
            live_molecules: world.live_molecule_count(),
        });
        reporter.report(Progress::TaskIncrement);
    }
    reporter.report(Progress::TaskFinish);
    reporter.report(Progress::PhaseFinish);

    let stats = world.stats();
    info!(
        iteration = world.iteration(),
        molecules = world.live_molecule_count(),
        reactions = stats.reactions,
        escaped = stats.escaped,
        "Simulation finished"
    );

    Ok(SimulationResult {
        observable_names: world.observable_names(),
        samples,
        stats,
        world,
    })
}
