use crate::cli::RunArgs;
use crate::config::PartialSimulationConfig;
use crate::error::Result;
use crate::utils::progress::CliProgressHandler;
use cellsim::core::io::checkpoint::Checkpoint;
use cellsim::core::io::counts::CountWriter;
use cellsim::core::io::model::ModelDescription;
use cellsim::engine::progress::ProgressReporter;
use cellsim::workflows::simulate::{self, SimulationResult};
use std::path::Path;
use tracing::{info, warn};

pub fn run(args: RunArgs) -> Result<()> {
    info!("Loading model from {:?}", &args.model);
    let model = ModelDescription::load(&args.model)?;

    let partial_config = PartialSimulationConfig::load(args.config.as_deref())?;
    info!("Merging configuration from file and CLI arguments...");
    let config = partial_config.merge_with_cli(&args.set_values, (&args).into())?;

    let checkpoint = match &args.resume {
        Some(path) => {
            info!("Resuming from checkpoint {:?}", path);
            Some(Checkpoint::load(path)?)
        }
        None => None,
    };

    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    println!("Starting simulation of {} iteration(s)...", config.iterations);
    let mut result = simulate::run(&model, &config, &reporter, checkpoint.as_ref())?;

    match &args.output {
        Some(path) => {
            write_counts(path, &result)?;
            println!("✓ Counts written to: {}", path.display());
        }
        None => print_last_sample(&result),
    }

    let hits = result.world.drain_wall_hits();
    if !hits.is_empty() {
        info!(hits = hits.len(), "Wall hits recorded during the run");
    }

    if let Some(path) = &args.save_checkpoint {
        result.world.snapshot().save(path)?;
        println!("✓ Checkpoint written to: {}", path.display());
    }

    let stats = &result.stats;
    if stats.escaped > 0 {
        warn!(escaped = stats.escaped, "Molecules left the partitioned volume and were removed");
    }
    println!(
        "Finished at iteration {} ({:.4e} s): {} molecules, {} reactions.",
        result.world.iteration(),
        result.world.time_seconds(),
        result.world.live_molecule_count(),
        stats.reactions
    );
    Ok(())
}

fn write_counts(path: &Path, result: &SimulationResult) -> Result<()> {
    let mut writer = CountWriter::create(path, &result.observable_names)?;
    for sample in &result.samples {
        writer.write(sample)?;
    }
    writer.flush()?;
    info!(rows = result.samples.len(), "Counts written to {:?}", path);
    Ok(())
}

fn print_last_sample(result: &SimulationResult) {
    let Some(sample) = result.samples.last() else {
        return;
    };
    for (name, value) in result.observable_names.iter().zip(&sample.values) {
        println!("  {name:<24} {value}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const MODEL: &str = r#"
        [[species]]
        name = "A"
        diffusion-constant = 1e-6

        [[species]]
        name = "B"
        diffusion-constant = 1e-6

        [[reactions]]
        name = "decay"
        reactants = ["A"]
        products = ["B"]
        rate = 1e4

        [[releases]]
        species = "A"
        count = 100
        shape = { type = "sphere", center = [0.0, 0.0, 0.0], radius = 0.5 }

        [[counts]]
        name = "A_total"
        species = "A"

        [[counts]]
        name = "B_total"
        species = "B"
    "#;

    fn args(dir: &Path, iterations: u64) -> RunArgs {
        let model = dir.join("model.toml");
        fs::write(&model, MODEL).unwrap();
        RunArgs {
            model,
            config: None,
            output: Some(dir.join("counts.csv")),
            iterations: Some(iterations),
            seed: Some(11),
            time_unit: None,
            resume: None,
            save_checkpoint: None,
            set_values: vec!["simulation.count-interval=5".to_string()],
        }
    }

    #[test]
    fn run_writes_counts_csv() {
        let dir = tempdir().unwrap();
        run(args(dir.path(), 20)).unwrap();

        let content = fs::read_to_string(dir.path().join("counts.csv")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "iteration,time,A_total,B_total");
        assert_eq!(lines.len(), 1 + 5);
        assert!(lines[1].starts_with("0,"));
        assert!(lines[1].ends_with(",100,0"));
        for line in &lines[1..] {
            let fields: Vec<u64> = line.split(',').skip(2).map(|v| v.parse().unwrap()).collect();
            assert_eq!(fields.iter().sum::<u64>(), 100);
        }
    }

    #[test]
    fn saved_checkpoint_can_be_resumed() {
        let dir = tempdir().unwrap();
        let checkpoint = dir.path().join("state.json");
        let mut first = args(dir.path(), 10);
        first.save_checkpoint = Some(checkpoint.clone());
        run(first).unwrap();
        assert!(checkpoint.exists());

        let mut resumed = args(dir.path(), 20);
        resumed.resume = Some(checkpoint);
        resumed.output = Some(dir.path().join("resumed.csv"));
        run(resumed).unwrap();

        let content = fs::read_to_string(dir.path().join("resumed.csv")).unwrap();
        let iterations: Vec<&str> = content
            .lines()
            .skip(1)
            .filter_map(|l| l.split(',').next())
            .collect();
        assert_eq!(iterations, vec!["15", "20"]);
    }

    #[test]
    fn missing_model_file_is_an_error() {
        let dir = tempdir().unwrap();
        let mut bad = args(dir.path(), 5);
        bad.model = dir.path().join("absent.toml");
        assert!(run(bad).is_err());
    }
}
