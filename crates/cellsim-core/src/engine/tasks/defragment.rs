use crate::engine::world::World;
use tracing::debug;

/// Drops tombstoned molecules from the arena and their stale queue entries.
///
/// # Return
///
/// The number of molecules reclaimed.
pub fn run(world: &mut World) -> usize {
    let reclaimed = world.partition.defragment();
    if reclaimed > 0 {
        let partition = &world.partition;
        world.scheduler.retain(|id| partition.get(id).is_some());
        debug!(reclaimed, pending = world.scheduler.len(), "Defragmented molecule arena");
    }
    reclaimed
}

#[cfg(test)]
mod tests {
    use crate::engine::setup::tests::world_from_toml;

    #[test]
    fn tombstones_are_reclaimed_without_touching_live_molecules() {
        let mut world = world_from_toml(
            r#"
            [[species]]
            name = "A"
            diffusion-constant = 1e-6

            [[releases]]
            species = "A"
            count = 10
            shape = { type = "point", position = [0.0, 0.0, 0.0] }
            "#,
            1e-6,
            3,
        );
        world.run_iteration().unwrap();
        let ids: Vec<_> = world.partition().live_ids();
        for id in &ids[..4] {
            world.retire(*id);
        }
        assert_eq!(world.partition().n_defunct(), 4);
        assert_eq!(world.defragment(), 4);
        assert_eq!(world.partition().len(), 6);
        assert_eq!(world.partition().n_defunct(), 0);
        assert!(world.molecule(ids[4]).is_some());
        world.run_iteration().unwrap();
        assert_eq!(world.live_molecule_count(), 6);
    }
}
