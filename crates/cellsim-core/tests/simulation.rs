use cellsim::core::io::checkpoint::Checkpoint;
use cellsim::core::io::model::ModelDescription;
use cellsim::engine::config::{SimulationConfig, SimulationConfigBuilder};
use cellsim::engine::progress::{Progress, ProgressReporter};
use cellsim::workflows::simulate;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

fn cube(name: &str, center: [f64; 3], half: f64, counted: bool) -> String {
    let vertices: Vec<String> = (0..8)
        .map(|i| {
            let c = |axis: usize, bit: i32| center[axis] + if i & bit == 0 { -half } else { half };
            format!("[{:?}, {:?}, {:?}]", c(0, 1), c(1, 2), c(2, 4))
        })
        .collect();
    format!(
        r#"
        [[objects]]
        name = "{name}"
        counted = {counted}
        vertices = [{}]
        triangles = [[0, 2, 1], [1, 2, 3], [4, 5, 6], [5, 7, 6], [0, 1, 4], [1, 5, 4],
                     [2, 6, 3], [3, 6, 7], [0, 4, 2], [2, 4, 6], [1, 3, 5], [3, 7, 5]]
        "#,
        vertices.join(", ")
    )
}

fn reacting_model() -> ModelDescription {
    let toml = format!(
        r#"
        [[species]]
        name = "A"
        diffusion-constant = 1e-6

        [[species]]
        name = "B"
        diffusion-constant = 1e-6

        [[species]]
        name = "C"
        diffusion-constant = 5e-7

        [[species]]
        name = "S"
        kind = "surface"
        diffusion-constant = 1e-8

        [[reactions]]
        name = "bind"
        reactants = ["A", "B"]
        products = ["C"]
        rate = 1e10

        [[reactions]]
        name = "unbind"
        reactants = ["C"]
        products = ["A", "B"]
        rate = 2e4

        [[releases]]
        species = "A"
        count = 150
        shape = {{ type = "object", object = "cell" }}

        [[releases]]
        species = "B"
        count = 150
        shape = {{ type = "object", object = "cell" }}

        [[releases]]
        species = "S'"
        count = 40
        shape = {{ type = "region", object = "cell" }}

        [[counts]]
        name = "A"
        species = "A"

        [[counts]]
        name = "C"
        species = "C"

        [[counts]]
        name = "S_on_cell"
        species = "S"
        object = "cell"
        {}
        "#,
        cube("cell", [0.0, 0.0, 0.0], 0.3, true)
    );
    ModelDescription::from_toml_str(&toml, "reacting").unwrap()
}

fn config(iterations: u64) -> SimulationConfig {
    SimulationConfigBuilder::new()
        .time_unit(1e-6)
        .grid_density(10_000.0)
        .partition_edge_length(4.0)
        .subparts_per_dim(8)
        .seed(2024)
        .iterations(iterations)
        .count_interval(5)
        .defragmentation_interval(7)
        .build()
        .unwrap()
}

#[test]
fn reactions_conserve_mass_and_counts_are_sampled() {
    let result = simulate::run(&reacting_model(), &config(40), &ProgressReporter::new(), None).unwrap();
    assert_eq!(result.observable_names, vec!["A", "C", "S_on_cell"]);
    assert_eq!(result.samples.len(), 1 + 40 / 5);
    assert_eq!(result.samples[0].values, vec![150, 0, 40]);
    for sample in &result.samples {
        assert_eq!(sample.values[0] + sample.values[1], 150);
        assert_eq!(sample.values[2], 40);
    }
    assert!(result.stats.reactions > 0);
    assert_eq!(result.stats.escaped, 0);
    assert_eq!(result.world.iteration(), 40);
}

#[test]
fn checkpoint_round_trip_reproduces_the_trajectory() {
    let model = reacting_model();
    let mut original = simulate::build_world(&model, &config(0)).unwrap();
    for _ in 0..15 {
        original.run_iteration().unwrap();
    }
    original.modify_rate("unbind", 5e4).unwrap();

    let dir = tempdir().unwrap();
    let path = dir.path().join("state.json");
    original.snapshot().save(&path).unwrap();
    let checkpoint = Checkpoint::load(&path).unwrap();

    let mut restored = simulate::build_world(&model, &config(0)).unwrap();
    restored.restore(&checkpoint).unwrap();

    for _ in 0..25 {
        original.run_iteration().unwrap();
        restored.run_iteration().unwrap();
        assert_eq!(original.sample_counts(), restored.sample_counts());
    }
    let a = original.snapshot();
    let b = restored.snapshot();
    assert_eq!(a.molecules, b.molecules);
    assert_eq!(a.pending_actions, b.pending_actions);
    assert_eq!(a.rates, b.rates);
    assert_eq!(a.next_molecule_id, b.next_molecule_id);
}

#[test]
fn resumed_workflow_matches_uninterrupted_run() {
    let model = reacting_model();
    let reporter = ProgressReporter::new();
    let full = simulate::run(&model, &config(30), &reporter, None).unwrap();

    let first = simulate::run(&model, &config(12), &reporter, None).unwrap();
    let checkpoint = first.world.snapshot();
    let resumed = simulate::run(&model, &config(30), &reporter, Some(&checkpoint)).unwrap();

    assert_eq!(resumed.world.iteration(), 30);
    assert_eq!(full.world.snapshot().molecules, resumed.world.snapshot().molecules);
    let tail: Vec<_> = full.samples.iter().filter(|s| s.iteration > 12).cloned().collect();
    assert_eq!(tail, resumed.samples);
}

#[test]
fn non_diffusing_molecules_stay_put() {
    let toml = r#"
        [[species]]
        name = "X"

        [[releases]]
        species = "X"
        count = 12
        shape = { type = "box", min = [-1.0, -1.0, -1.0], max = [1.0, 1.0, 1.0] }
    "#;
    let model = ModelDescription::from_toml_str(toml, "static").unwrap();
    let mut world = simulate::build_world(&model, &config(0)).unwrap();
    let x = world.species().by_name("X").unwrap();
    assert_eq!(x.space_step, 0.0);
    assert_eq!(x.time_step, 1.0);

    world.run_iteration().unwrap();
    let before: Vec<_> = world.partition().live().map(|m| m.volume_position().unwrap()).collect();
    for _ in 0..10 {
        world.run_iteration().unwrap();
    }
    let after: Vec<_> = world.partition().live().map(|m| m.volume_position().unwrap()).collect();
    assert_eq!(before.len(), 12);
    assert_eq!(before, after);
    assert_eq!(world.stats().diffusion_steps, 0);
}

#[test]
fn nested_counted_objects_form_a_direct_parent_chain() {
    let toml = format!(
        "{}{}{}{}",
        cube("outer", [0.0, 0.0, 0.0], 1.5, true),
        cube("middle", [0.1, 0.0, 0.0], 1.0, true),
        cube("inner", [0.2, 0.1, 0.0], 0.4, true),
        cube("side", [0.7, -0.6, 0.6], 0.2, true),
    );
    let model = ModelDescription::from_toml_str(&toml, "nested").unwrap();
    let world = simulate::build_world(&model, &config(0)).unwrap();
    let geometry = world.geometry();
    let id = |name: &str| geometry.object_by_name(name).unwrap().id;
    let volumes = world.counted_volumes();

    assert_eq!(volumes.parent(id("outer")), None);
    assert_eq!(volumes.parent(id("middle")), Some(id("outer")));
    assert_eq!(volumes.parent(id("inner")), Some(id("middle")));
    assert_eq!(volumes.parent(id("side")), Some(id("middle")));
    assert_eq!(volumes.depth(id("inner")), 2);
}

#[test]
fn progress_reports_every_iteration() {
    let iterations = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&iterations);
    let reporter = ProgressReporter::with_callback(Box::new(move |event| {
        if let Progress::Iteration { iteration, .. } = event {
            sink.lock().unwrap().push(iteration);
        }
    }));
    simulate::run(&reacting_model(), &config(6), &reporter, None).unwrap();
    assert_eq!(*iterations.lock().unwrap(), vec![1, 2, 3, 4, 5, 6]);
}
