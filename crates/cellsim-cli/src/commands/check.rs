use crate::cli::CheckArgs;
use crate::config::{CommandLineOverrides, PartialSimulationConfig};
use crate::error::Result;
use cellsim::core::io::model::ModelDescription;
use cellsim::engine::world::World;
use cellsim::workflows::simulate;
use std::fmt::Write;
use tracing::info;

pub fn run(args: CheckArgs) -> Result<()> {
    info!("Loading model from {:?}", &args.model);
    let model = ModelDescription::load(&args.model)?;
    let config = PartialSimulationConfig::load(args.config.as_deref())?
        .merge_with_cli(&args.set_values, CommandLineOverrides::default())?;

    let world = simulate::build_world(&model, &config)?;
    print!("{}", summary(&world));
    println!("✓ Model is valid.");
    Ok(())
}

/// Human-readable description of a freshly built world: its size and the nesting of
/// counted objects.
fn summary(world: &World) -> String {
    let geometry = world.geometry();
    let volumes = world.counted_volumes();
    let mut out = String::new();

    let _ = writeln!(
        out,
        "{} species, {} reaction rule(s), {} object(s), {} wall(s), {} release site(s), {} observable(s)",
        world.species().len(),
        world.reactions().rules().len(),
        geometry.objects().len(),
        geometry.walls().len(),
        world.releases().len(),
        world.observables().len(),
    );

    let hierarchy = volumes.hierarchy();
    if hierarchy.is_empty() {
        let _ = writeln!(out, "No counted volumes.");
    } else {
        let _ = writeln!(out, "Counted volumes:");
        for (object, depth) in hierarchy {
            let _ = writeln!(out, "{}- {}", "  ".repeat(depth + 1), geometry.object(object).name);
        }
    }
    for &object in volumes.excluded() {
        let _ = writeln!(
            out,
            "  ! {} is not closed and is not counted",
            geometry.object(object).name
        );
    }
    out
}
