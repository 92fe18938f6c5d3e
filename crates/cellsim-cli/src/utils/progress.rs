use cellsim::engine::progress::{Progress, ProgressCallback};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

const SPINNER_TICK_MS: u64 = 100;
const ITERATION_TEMPLATE: &str =
    "{prefix:.bold} [{bar:36.cyan/blue}] {pos}/{len} it {msg} ({per_sec}, {eta} left)";

/// Draws simulation progress on stderr: a spinner while the world is being set up and an
/// iteration bar whose message tracks simulated time and population.
#[derive(Clone)]
pub struct CliProgressHandler {
    pb: Arc<Mutex<ProgressBar>>,
}

impl CliProgressHandler {
    pub fn new() -> Self {
        let pb = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
        pb.set_style(spinner_style());
        pb.finish_and_clear();
        Self {
            pb: Arc::new(Mutex::new(pb)),
        }
    }

    pub fn get_callback(&self) -> ProgressCallback<'static> {
        let pb = Arc::clone(&self.pb);
        Box::new(move |event: Progress| match pb.lock() {
            Ok(guard) => apply(&guard, event),
            Err(_) => warn!("Progress bar mutex was poisoned; dropping progress event."),
        })
    }
}

impl Default for CliProgressHandler {
    fn default() -> Self {
        Self::new()
    }
}

fn apply(pb: &ProgressBar, event: Progress) {
    match event {
        Progress::PhaseStart { name } => {
            pb.reset();
            pb.set_length(0);
            pb.set_style(spinner_style());
            pb.set_prefix(name);
            pb.set_message(format!("{name}..."));
            pb.enable_steady_tick(Duration::from_millis(SPINNER_TICK_MS));
        }
        Progress::TaskStart { total_steps } => {
            pb.disable_steady_tick();
            pb.reset();
            pb.set_length(total_steps);
            pb.set_style(iteration_style());
            pb.set_message(String::new());
        }
        Progress::Iteration {
            time_seconds,
            live_molecules,
            ..
        } => pb.set_message(format!("t={time_seconds:.3e}s n={live_molecules}")),
        Progress::TaskIncrement => pb.inc(1),
        Progress::TaskFinish => {
            if let Some(total) = pb.length() {
                pb.set_position(total);
            }
            pb.finish();
        }
        Progress::PhaseFinish => {
            pb.disable_steady_tick();
            pb.finish_with_message("✓ Done");
        }
        Progress::Message(text) => {
            if pb.is_finished() {
                pb.set_message(text);
            } else {
                pb.println(format!("  {text}"));
            }
        }
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn iteration_style() -> ProgressStyle {
    ProgressStyle::with_template(ITERATION_TEMPLATE)
        .map(|style| style.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}
