use crate::config::EngineSettings;
use armcfit::core::forcefield::params::Forcefield;
use armcfit::core::io::traits::TrajectoryFile;
use armcfit::core::io::xyz::XyzFile;
use armcfit::core::models::trajectory::Trajectory;
use armcfit::engine::params::ParamStore;
use armcfit::engine::simulation::{EvaluationFailure, SimulationEngine};
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tokio::runtime::Handle;
use tracing::{debug, trace};

/// File the candidate forcefield is written to inside each evaluation directory.
pub const FORCEFIELD_FILE: &str = "forcefield.toml";
/// Environment variable pointing the command at [`FORCEFIELD_FILE`].
pub const FORCEFIELD_ENV: &str = "ARMCFIT_FORCEFIELD";

const STDERR_TAIL: usize = 512;

/// Runs an external MD command once per candidate parameter state.
///
/// Each evaluation gets its own directory under the work directory holding the candidate
/// forcefield; the command runs there and must leave an XYZ trajectory behind.
pub struct CommandEngine {
    settings: EngineSettings,
    forcefield: Forcefield,
    handle: Handle,
    evaluations: usize,
}

impl CommandEngine {
    pub fn new(settings: EngineSettings, forcefield: Forcefield, handle: Handle) -> Self {
        Self {
            settings,
            forcefield,
            handle,
            evaluations: 0,
        }
    }

    fn prepare(&self, dir: &Path, params: &ParamStore) -> Result<PathBuf, EvaluationFailure> {
        let crashed = |what: &str, e: &dyn std::fmt::Display| {
            EvaluationFailure::Crashed(format!("{what} in '{}': {e}", dir.display()))
        };
        std::fs::create_dir_all(dir).map_err(|e| crashed("cannot create work directory", &e))?;

        let forcefield = params
            .apply_to(&self.forcefield)
            .map_err(|e| crashed("cannot apply parameters", &e))?;
        let content = forcefield
            .to_toml_string()
            .map_err(|e| crashed("cannot serialise forcefield", &e))?;
        let path = dir.join(FORCEFIELD_FILE);
        std::fs::write(&path, content).map_err(|e| crashed("cannot write forcefield", &e))?;
        Ok(path)
    }

    async fn spawn(&self, dir: &Path, forcefield: &Path) -> Result<Output, EvaluationFailure> {
        let (program, args) = self
            .settings
            .command
            .split_first()
            .ok_or_else(|| EvaluationFailure::Crashed("empty engine command".to_string()))?;
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(dir)
            .env(FORCEFIELD_ENV, forcefield)
            .kill_on_drop(true);

        let output = command.output();
        let result = match self.settings.timeout {
            Some(limit) => tokio::time::timeout(limit, output)
                .await
                .map_err(|_| EvaluationFailure::TimedOut(limit))?,
            None => output.await,
        };
        result.map_err(|e| EvaluationFailure::Crashed(format!("cannot start '{program}': {e}")))
    }
}

fn stderr_tail(output: &Output) -> String {
    let text = String::from_utf8_lossy(&output.stderr);
    let text = text.trim();
    let start = text
        .char_indices()
        .rev()
        .nth(STDERR_TAIL)
        .map(|(i, _)| i)
        .unwrap_or(0);
    text[start..].to_string()
}

impl SimulationEngine for CommandEngine {
    fn evaluate(&mut self, params: &ParamStore) -> Result<Trajectory, EvaluationFailure> {
        self.evaluations += 1;
        let dir = self
            .settings
            .workdir
            .join(format!("eval-{:06}", self.evaluations));
        let forcefield = self.prepare(&dir, params)?;

        debug!(dir = %dir.display(), "Running engine command.");
        let output = self.handle.block_on(self.spawn(&dir, &forcefield))?;
        if !output.status.success() {
            return Err(EvaluationFailure::Crashed(format!(
                "command exited with {}: {}",
                output.status,
                stderr_tail(&output)
            )));
        }

        let trajectory_path = dir.join(&self.settings.trajectory);
        let (trajectory, _) = XyzFile::read_from_path(&trajectory_path).map_err(|e| {
            EvaluationFailure::NotConverged(format!(
                "no usable trajectory at '{}': {e}",
                trajectory_path.display()
            ))
        })?;
        trace!(frames = trajectory.frame_count(), "Engine trajectory loaded.");
        Ok(trajectory)
    }
}
