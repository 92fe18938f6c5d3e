use crate::core::io::counts::CountSample;
use crate::core::models::molecule::{Molecule, MoleculeLocation};
use crate::engine::world::{Observable, World};

/// Samples every observable at the current time.
pub fn run(world: &World) -> CountSample {
    let mut values = vec![0u64; world.observables.len()];
    for molecule in world.partition.live() {
        for (value, observable) in values.iter_mut().zip(&world.observables) {
            if counts(world, observable, molecule) {
                *value += 1;
            }
        }
    }
    CountSample {
        iteration: world.iteration,
        time: world.time_seconds(),
        values,
    }
}

fn counts(world: &World, observable: &Observable, molecule: &Molecule) -> bool {
    if !observable.matches.get(molecule.species.index()).copied().unwrap_or(false) {
        return false;
    }
    let Some(object) = observable.object else {
        return true;
    };
    match &molecule.location {
        MoleculeLocation::Volume { position, .. } => {
            let volume = molecule.counted_volume;
            if world.counted_volumes.is_counted(object) && !volume.is_sentinel() {
                world.counted_volumes.encloses(volume, object)
            } else {
                world.geometry.point_in_object(object, position)
            }
        }
        MoleculeLocation::Surface { wall, .. } => world.geometry.wall(*wall).object == object,
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::setup::tests::{cube_object_toml, world_from_toml};

    #[test]
    fn counts_by_pattern_and_object() {
        let toml = format!(
            r#"
            [[species]]
            name = "A"

            [[species]]
            name = "B"

            [[species]]
            name = "S"
            kind = "surface"

            [[releases]]
            species = "A"
            count = 7
            shape = {{ type = "point", position = [0.0, 0.0, 0.0] }}

            [[releases]]
            species = "A"
            count = 3
            shape = {{ type = "point", position = [3.0, 0.0, 0.0] }}

            [[releases]]
            species = "B"
            count = 2
            shape = {{ type = "point", position = [0.1, 0.0, 0.0] }}

            [[releases]]
            species = "S'"
            count = 4
            shape = {{ type = "region", object = "box" }}

            [[counts]]
            name = "a_total"
            species = "A"

            [[counts]]
            name = "a_in_box"
            species = "A"
            object = "box"

            [[counts]]
            name = "all_in_box"
            species = ".*"
            object = "box"
            {}
            "#,
            cube_object_toml("box", 1.0, None)
        );
        let mut world = world_from_toml(&toml, 1e-6, 1);
        world.run_iteration().unwrap();
        let sample = world.sample_counts();
        assert_eq!(sample.iteration, 1);
        assert!((sample.time - 1e-6).abs() < 1e-18);
        assert_eq!(sample.values, vec![10, 7, 13]);
    }
}
