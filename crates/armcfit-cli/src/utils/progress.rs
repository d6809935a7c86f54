use armcfit::engine::progress::{Progress, ProgressCallback};
use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

const SPINNER_TICK_MS: u64 = 80;

/// One line summary of a finished ARMC block, shown next to the step bar.
pub fn block_status(iteration: usize, blocks: usize, acceptance_rate: f64, phi: f64) -> String {
    format!(
        "block {}/{} | acc {:.2} | phi {:.4}",
        iteration + 1,
        blocks,
        acceptance_rate,
        phi
    )
}

struct BarState {
    pb: ProgressBar,
    /// Status of the most recent block; kept as the final message of the loop phase.
    last_block: Option<String>,
}

/// Renders ARMC controller events as a single `indicatif` bar on stderr.
///
/// The seed evaluation shows as a spinner, the Monte Carlo loop as a step bar whose message
/// tracks the acceptance rate and phi of the last finished block.
#[derive(Clone)]
pub struct CliProgressHandler {
    state: Arc<Mutex<BarState>>,
}

impl CliProgressHandler {
    pub fn new() -> Self {
        let pb = ProgressBar::new(0).with_style(Self::spinner_style());
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb.finish_and_clear();

        Self {
            state: Arc::new(Mutex::new(BarState {
                pb,
                last_block: None,
            })),
        }
    }

    pub fn get_callback(&self) -> ProgressCallback<'static> {
        let state = self.state.clone();

        Box::new(move |progress: Progress| {
            let Ok(mut state) = state.lock() else {
                warn!("Progress bar mutex was poisoned. Cannot update progress.");
                return;
            };
            let pb = state.pb.clone();

            match progress {
                Progress::PhaseStart { name } => {
                    state.last_block = None;
                    pb.reset();
                    pb.set_length(0);
                    pb.set_style(Self::spinner_style());
                    pb.set_prefix(name);
                    pb.set_message(format!("{name}..."));
                    pb.enable_steady_tick(Duration::from_millis(SPINNER_TICK_MS));
                }
                Progress::TaskStart { total_steps } => {
                    pb.disable_steady_tick();
                    pb.set_style(Self::bar_style());
                    pb.set_length(total_steps);
                    pb.set_position(0);
                    pb.set_message(String::new());
                }
                Progress::TaskIncrement => pb.inc(1),
                Progress::BlockFinished {
                    iteration,
                    blocks,
                    acceptance_rate,
                    phi,
                } => {
                    let status = block_status(iteration, blocks, acceptance_rate, phi);
                    pb.set_message(status.clone());
                    state.last_block = Some(status);
                }
                Progress::TaskFinish => {
                    if let Some(len) = pb.length() {
                        pb.set_position(len);
                    }
                }
                Progress::PhaseFinish => {
                    pb.disable_steady_tick();
                    let message = match state.last_block.take() {
                        Some(status) => format!("✓ {status}"),
                        None => format!("✓ {}", pb.prefix()),
                    };
                    pb.finish_with_message(message);
                }
                Progress::Message(msg) => {
                    if pb.is_finished() {
                        pb.set_message(msg);
                    } else {
                        pb.println(format!("  {msg}"));
                    }
                }
            }
        })
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "{prefix:<16} [{bar:40.cyan/blue}] step {pos}/{len} ({eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .with_key("eta", |state: &ProgressState, w: &mut dyn std::fmt::Write| {
            let _ = write!(w, "{:.1}s", state.eta().as_secs_f64());
        })
        .progress_chars("##-")
    }
}

impl Default for CliProgressHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armcfit::workflows::armc::{LOOP_PHASE, SEED_PHASE};

    fn bar(handler: &CliProgressHandler) -> ProgressBar {
        handler.state.lock().unwrap().pb.clone()
    }

    #[test]
    fn block_status_is_one_based_and_rounded() {
        assert_eq!(block_status(0, 4, 0.5, 1.0), "block 1/4 | acc 0.50 | phi 1.0000");
        assert_eq!(
            block_status(3, 4, 1.0 / 3.0, 0.123456),
            "block 4/4 | acc 0.33 | phi 0.1235"
        );
    }

    #[test]
    fn seed_phase_finishes_with_its_name() {
        let handler = CliProgressHandler::new();
        let callback = handler.get_callback();

        callback(Progress::PhaseStart { name: SEED_PHASE });
        assert_eq!(bar(&handler).message(), "Seed Evaluation...");
        assert!(!bar(&handler).is_finished());

        callback(Progress::PhaseFinish);
        let pb = bar(&handler);
        assert!(pb.is_finished());
        assert_eq!(pb.message(), "✓ Seed Evaluation");
    }

    #[test]
    fn loop_phase_shows_the_latest_block_status() {
        let handler = CliProgressHandler::new();
        let callback = handler.get_callback();

        callback(Progress::PhaseStart { name: SEED_PHASE });
        callback(Progress::PhaseFinish);

        callback(Progress::PhaseStart { name: LOOP_PHASE });
        callback(Progress::TaskStart { total_steps: 4 });
        for _ in 0..2 {
            callback(Progress::TaskIncrement);
        }
        callback(Progress::BlockFinished {
            iteration: 0,
            blocks: 2,
            acceptance_rate: 0.5,
            phi: 1.0,
        });
        {
            let pb = bar(&handler);
            assert_eq!(pb.prefix(), "Monte Carlo");
            assert_eq!((pb.position(), pb.length()), (2, Some(4)));
            assert_eq!(pb.message(), "block 1/2 | acc 0.50 | phi 1.0000");
        }

        for _ in 0..2 {
            callback(Progress::TaskIncrement);
        }
        callback(Progress::BlockFinished {
            iteration: 1,
            blocks: 2,
            acceptance_rate: 0.0,
            phi: 0.5,
        });
        callback(Progress::TaskFinish);
        callback(Progress::PhaseFinish);

        let pb = bar(&handler);
        assert!(pb.is_finished());
        assert_eq!(pb.position(), 4);
        assert_eq!(pb.message(), "✓ block 2/2 | acc 0.00 | phi 0.5000");
    }

    #[test]
    fn resumed_loop_counts_only_remaining_steps() {
        let handler = CliProgressHandler::new();
        let callback = handler.get_callback();

        // A restart replays the stored steps without events and then reports the rest.
        callback(Progress::PhaseStart { name: LOOP_PHASE });
        callback(Progress::TaskStart { total_steps: 3 });
        callback(Progress::TaskIncrement);
        callback(Progress::TaskFinish);
        callback(Progress::PhaseFinish);

        let pb = bar(&handler);
        assert_eq!((pb.position(), pb.length()), (3, Some(3)));
        assert_eq!(pb.message(), "✓ Monte Carlo");
    }
}
