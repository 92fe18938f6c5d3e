use super::reactions::{Encounter, fire};
use crate::core::models::ids::MoleculeId;
use crate::engine::error::EngineError;
use crate::engine::world::World;
use tracing::trace;

/// Services a queued unimolecular action.
///
/// Flagged molecules get a fresh lifetime measured from `time`; entries whose time no
/// longer matches the molecule's pending time are stale and dropped. A reaction whose
/// products cannot be placed is retried after a newly sampled lifetime.
pub fn run(world: &mut World, id: MoleculeId, time: f64) -> Result<(), EngineError> {
    let Some(molecule) = world.partition.get(id) else {
        return Ok(());
    };
    if molecule.is_defunct() {
        return Ok(());
    }
    if molecule.flags.reschedule_unimol {
        world.reschedule_unimolecular(id, time);
        return Ok(());
    }
    if molecule.unimol_rx_time != Some(time) {
        return Ok(());
    }

    let species = molecule.species;
    let pathway = match world.reactions.unimolecular(species) {
        Some(class) => class
            .select_unimolecular(&mut world.rng)
            .map(|i| class.pathway(i).clone()),
        None => None,
    };
    let Some(pathway) = pathway else {
        world.reschedule_unimolecular(id, time);
        return Ok(());
    };

    let encounter = Encounter {
        reactants: vec![id],
        time,
        contact: None,
    };
    if !fire(world, &encounter, &pathway)? {
        trace!(molecule = %id, reaction = %pathway.name, "Unimolecular reaction blocked; resampling");
        world.reschedule_unimolecular(id, time);
    }
    Ok(())
}
