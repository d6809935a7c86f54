use crate::core::forcefield::nonbonded::{NonBondedError, NonBondedEvaluator};
use crate::core::forcefield::params::Forcefield;
use crate::engine::cache::PesCache;
use crate::engine::config::{ArmcConfig, ConfigError};
use crate::engine::error::EngineError;
use crate::engine::moves::{MoveGenerator, MoveOutcome};
use crate::engine::params::{ParamStore, StateKey};
use crate::engine::pes::{PesError, PesEvaluation, ReferenceSet};
use crate::engine::phi::BiasState;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::simulation::{EvaluationFailure, SimulationEngine};
use crate::engine::store::{ChannelLayout, IterationRecord, RunLayout, RunStore, StepStatus};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{Dispatch, debug, info, instrument, trace, warn};

/// Phase reported while the initial parameters are evaluated.
pub const SEED_PHASE: &str = "Seed Evaluation";
/// Phase reported for the nested Monte Carlo loop.
pub const LOOP_PHASE: &str = "Monte Carlo";

/// Everything the controller reads but never mutates.
pub struct ArmcContext<'a> {
    pub config: &'a ArmcConfig,
    pub forcefield: &'a Forcefield,
    pub evaluator: &'a NonBondedEvaluator,
    pub reference: &'a ReferenceSet,
    pub reporter: &'a ProgressReporter<'a>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArmcSummary {
    pub param_names: Vec<String>,
    /// Steps executed by this call, excluding replayed ones.
    pub steps_run: usize,
    pub total_steps: usize,
    pub accepted: usize,
    pub final_phi: f64,
    pub final_params: Vec<f64>,
    pub best_params: Vec<f64>,
    pub best_error: f64,
    pub cache_size: usize,
}

/// Adaptive-rate Monte Carlo driver.
///
/// Owns the parameter state, the evaluation cache and the bias state. Each sub-iteration
/// proposes a move, resolves the proposal's descriptors from the cache or the engine, and
/// accepts it when its bias-augmented error is lower than the current state's. Every step is
/// appended to the [`RunStore`] before the next one starts.
pub struct ArmcController<'a, E: SimulationEngine> {
    ctx: ArmcContext<'a>,
    engine: E,
    params: ParamStore,
    moves: MoveGenerator,
    cache: PesCache,
    bias: BiasState,
    current_key: StateKey,
    consecutive_failures: usize,
    accepted: usize,
    dispatch: Option<Dispatch>,
}

enum Resolution {
    Hit,
    Evaluated,
    Failed(EvaluationFailure),
}

impl<'a, E: SimulationEngine> ArmcController<'a, E> {
    /// Validates the setup; every configuration problem surfaces here, before any engine call.
    pub fn new(ctx: ArmcContext<'a>, params: ParamStore, engine: E) -> Result<Self, EngineError> {
        let config = ctx.config;
        params.check_bounds()?;

        if ctx.reference.channels() != config.channels.as_slice() {
            return Err(ConfigError::InvalidValue {
                name: "channels",
                reason: "reference descriptors were built for different channels".to_string(),
            }
            .into());
        }

        if ctx.evaluator.config() != &config.evaluator {
            return Err(ConfigError::InvalidValue {
                name: "evaluator",
                reason: format!(
                    "evaluator was built with {:?}, but the run configuration asks for {:?}",
                    ctx.evaluator.config(),
                    config.evaluator
                ),
            }
            .into());
        }

        let forcefield = params.apply_to(ctx.forcefield)?;
        ctx.evaluator
            .validate_table(&forcefield.pair_table(ctx.evaluator.pairs()))?;

        let moves = MoveGenerator::new(
            &params,
            config.moves.range.clone(),
            config.moves.bounds_policy,
            config.moves.max_move_attempts,
        )?;
        let bias = BiasState::new(
            config.phi.phi,
            config.phi.gamma,
            config.phi.a_target,
            config.phi.updater,
            config.monte_carlo.sub_iter_len,
        );
        let current_key = params.key(config.moves.key_decimals)?;

        Ok(Self {
            ctx,
            engine,
            params,
            moves,
            cache: PesCache::new(),
            bias,
            current_key,
            consecutive_failures: 0,
            accepted: 0,
            dispatch: None,
        })
    }

    /// Routes this controller's log events to `dispatch` instead of the global subscriber.
    pub fn with_logger(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    pub fn params(&self) -> &ParamStore {
        &self.params
    }

    pub fn cache(&self) -> &PesCache {
        &self.cache
    }

    pub fn phi(&self) -> f64 {
        self.bias.phi()
    }

    /// The store layout this controller writes.
    pub fn layout(&self) -> RunLayout {
        RunLayout {
            sub_iter_len: self.ctx.config.monte_carlo.sub_iter_len,
            param_columns: self.params.key_paths(),
            channels: self
                .ctx
                .reference
                .channels()
                .iter()
                .zip(self.ctx.reference.descriptors())
                .map(|(c, d)| ChannelLayout {
                    name: c.name.clone(),
                    kind: c.kind,
                    rows: d.rows(),
                    columns: d.columns().to_vec(),
                })
                .collect(),
        }
    }

    /// Runs (or resumes) the fit until `iter_len / sub_iter_len` blocks are complete.
    pub fn run(&mut self, store: &mut RunStore) -> Result<ArmcSummary, EngineError> {
        match self.dispatch.clone() {
            Some(dispatch) => {
                tracing::dispatcher::with_default(&dispatch, || self.run_inner(store))
            }
            None => self.run_inner(store),
        }
    }

    #[instrument(skip_all, name = "armc_run")]
    fn run_inner(&mut self, store: &mut RunStore) -> Result<ArmcSummary, EngineError> {
        let expected = self.layout();
        if store.layout() != &expected {
            return Err(EngineError::RestartMismatch(format!(
                "store at '{}' was written with a different parameter, channel or block layout",
                store.dir().display()
            )));
        }

        let config = self.ctx.config;
        let mc = &config.monte_carlo;
        let (blocks, omega) = (mc.block_count(), mc.sub_iter_len);
        let total_steps = mc.total_steps();
        if mc.remainder() > 0 {
            info!(
                dropped = mc.remainder(),
                "iter_len is not a multiple of sub_iter_len; trailing iterations are dropped."
            );
        }

        let records = store.records()?;
        if records.is_empty() {
            self.seed(store)?;
        } else {
            self.restore(&records)?;
        }

        let first = store.next_step();
        let reporter = self.ctx.reporter;
        reporter.report(Progress::PhaseStart { name: LOOP_PHASE });
        reporter.report(Progress::TaskStart {
            total_steps: (total_steps + 1).saturating_sub(first) as u64,
        });
        info!(
            blocks,
            sub_iter_len = omega,
            start_step = first,
            phi = self.bias.phi(),
            "Starting ARMC loop."
        );

        let mut steps_run = 0;
        for step in first..=total_steps {
            let (i, j) = ((step - 1) / omega, (step - 1) % omega);
            self.step(i, j, step, store)?;
            steps_run += 1;
            reporter.report(Progress::TaskIncrement);

            if j + 1 == omega {
                let rate = self.bias.end_block();
                info!(
                    iteration = i,
                    acceptance_rate = rate,
                    phi = self.bias.phi(),
                    "Block finished."
                );
                reporter.report(Progress::BlockFinished {
                    iteration: i,
                    blocks,
                    acceptance_rate: rate,
                    phi: self.bias.phi(),
                });
            }
        }

        reporter.report(Progress::TaskFinish);
        reporter.report(Progress::PhaseFinish);

        let summary = self.summary(steps_run, total_steps)?;
        info!(
            steps_run,
            accepted = summary.accepted,
            best_error = summary.best_error,
            "ARMC run complete."
        );
        Ok(summary)
    }

    fn summary(&self, steps_run: usize, total_steps: usize) -> Result<ArmcSummary, EngineError> {
        let (_, best) = self
            .cache
            .best()
            .ok_or_else(|| EngineError::Internal("cache is empty after seeding".to_string()))?;
        Ok(ArmcSummary {
            param_names: self.params.key_paths(),
            steps_run,
            total_steps,
            accepted: self.accepted,
            final_phi: self.bias.phi(),
            final_params: self.params.values(),
            best_params: best.params.clone(),
            best_error: best.evaluation.total_error(),
            cache_size: self.cache.len(),
        })
    }

    fn step_rng(&self, step: usize) -> StdRng {
        match self.ctx.config.monte_carlo.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(step as u64)),
            None => StdRng::from_entropy(),
        }
    }

    /// Evaluates the initial parameters; failure is fatal since there is nothing to compare to.
    fn seed(&mut self, store: &mut RunStore) -> Result<(), EngineError> {
        self.ctx.reporter.report(Progress::PhaseStart { name: SEED_PHASE });
        info!("Evaluating initial parameters.");

        let values = self.params.values();
        let evaluation = self
            .evaluate_with_retries()?
            .map_err(EngineError::SeedEvaluation)?;
        let phi = self.bias.phi();
        let key = self.current_key.clone();
        self.cache.put(key.clone(), values.clone(), evaluation);
        self.cache.update(&key, phi);
        let entry = self
            .cache
            .get(&key)
            .ok_or_else(|| EngineError::Internal("seed entry missing from cache".to_string()))?;

        store.append(&IterationRecord {
            step: 0,
            iteration: 0,
            sub_iteration: 0,
            params: values.clone(),
            trial_params: values,
            descriptors: Some(entry.evaluation.descriptors.clone()),
            aux_errors: Some(entry.evaluation.errors.clone()),
            error_old: None,
            error_new: Some(entry.biased_error()),
            accepted: true,
            status: StepStatus::Seed,
            phi,
        })?;
        info!(aux_error = entry.evaluation.total_error(), "Seed evaluation stored.");
        self.ctx.reporter.report(Progress::PhaseFinish);
        Ok(())
    }

    /// Rebuilds parameters, cache and bias state by replaying durable records in order.
    fn restore(&mut self, records: &[IterationRecord]) -> Result<(), EngineError> {
        let decimals = self.ctx.config.moves.key_decimals;
        let omega = self.ctx.config.monte_carlo.sub_iter_len;
        info!(records = records.len(), "Restoring run state from store.");

        let mismatch = |step: usize, what: &str| {
            EngineError::RestartMismatch(format!("step {step}: {what}"))
        };

        for record in records {
            if record.params.len() != self.params.len() || record.trial_params.len() != self.params.len() {
                return Err(mismatch(record.step, "parameter vector length differs"));
            }
            if record.phi != self.bias.phi() {
                return Err(mismatch(
                    record.step,
                    &format!("stored phi {} but replay gives {}", record.phi, self.bias.phi()),
                ));
            }
            let trial_key = StateKey::quantize(&record.trial_params, decimals)?;
            let current_key = StateKey::quantize(&record.params, decimals)?;

            if let (Some(descriptors), Some(errors)) = (&record.descriptors, &record.aux_errors) {
                if !self.cache.contains(&trial_key) {
                    self.cache.put(
                        trial_key.clone(),
                        record.trial_params.clone(),
                        PesEvaluation {
                            descriptors: descriptors.clone(),
                            errors: errors.clone(),
                        },
                    );
                }
            }

            match record.status {
                StepStatus::Seed => {
                    if record.step != 0 {
                        return Err(mismatch(record.step, "seed record after step 0"));
                    }
                    self.cache.update(&trial_key, record.phi);
                }
                StepStatus::Evaluated | StepStatus::CacheHit => {
                    self.consecutive_failures = 0;
                    let reinforced = if record.accepted {
                        self.accepted += 1;
                        &trial_key
                    } else {
                        &current_key
                    };
                    if !self.cache.update(reinforced, record.phi) {
                        return Err(mismatch(record.step, "reinforced state is not cached"));
                    }
                }
                StepStatus::Failed | StepStatus::OutOfBounds => {
                    if record.status == StepStatus::Failed {
                        self.consecutive_failures += 1;
                    }
                    if !self.cache.update(&current_key, record.phi) {
                        return Err(mismatch(record.step, "current state is not cached"));
                    }
                }
            }

            if record.step == 0 {
                if record.status != StepStatus::Seed {
                    return Err(mismatch(0, "first record is not a seed evaluation"));
                }
            } else {
                self.bias.record(record.accepted);
                if record.sub_iteration + 1 == omega {
                    self.bias.end_block();
                }
            }

            self.params.set_values(&record.params)?;
            self.current_key = current_key;
        }

        debug!(
            cache_size = self.cache.len(),
            phi = self.bias.phi(),
            "Replay finished."
        );
        Ok(())
    }

    /// One engine round trip: simulate, reduce to energies, extract descriptors and score them.
    ///
    /// The outer `Result` carries fatal errors; the inner one recoverable evaluation failures.
    fn evaluate_once(&mut self) -> Result<Result<PesEvaluation, EvaluationFailure>, EngineError> {
        let trajectory = match self.engine.evaluate(&self.params) {
            Ok(t) => t,
            Err(failure) => return Ok(Err(failure)),
        };
        let forcefield = self.params.apply_to(self.ctx.forcefield)?;
        let table = forcefield.pair_table(self.ctx.evaluator.pairs());
        let energies = match self.ctx.evaluator.evaluate(&trajectory, &table) {
            Ok(e) => e,
            Err(e @ NonBondedError::NonFiniteEnergy { .. }) => {
                return Ok(Err(EvaluationFailure::NumericAnomaly(e.to_string())));
            }
            Err(e) => return Err(e.into()),
        };
        let descriptors = self.ctx.reference.extract(&energies);
        match self.ctx.reference.score(descriptors) {
            Ok(evaluation) => Ok(Ok(evaluation)),
            Err(e @ PesError::NonFinite { .. }) => {
                Ok(Err(EvaluationFailure::NumericAnomaly(e.to_string())))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn evaluate_with_retries(
        &mut self,
    ) -> Result<Result<PesEvaluation, EvaluationFailure>, EngineError> {
        let retries = self.ctx.config.monte_carlo.max_evaluation_retries;
        let mut attempt = 0;
        loop {
            match self.evaluate_once()? {
                Ok(evaluation) => return Ok(Ok(evaluation)),
                Err(failure) if attempt < retries => {
                    attempt += 1;
                    warn!(%failure, attempt, retries, "Evaluation failed; retrying.");
                }
                Err(failure) => return Ok(Err(failure)),
            }
        }
    }

    fn resolve(&mut self, key: &StateKey, values: &[f64]) -> Result<Resolution, EngineError> {
        if self.cache.contains(key) {
            trace!("Cache hit.");
            return Ok(Resolution::Hit);
        }
        match self.evaluate_with_retries()? {
            Ok(evaluation) => {
                self.cache.put(key.clone(), values.to_vec(), evaluation);
                Ok(Resolution::Evaluated)
            }
            Err(failure) => Ok(Resolution::Failed(failure)),
        }
    }

    fn biased_error(&self, key: &StateKey) -> Result<f64, EngineError> {
        self.cache
            .get(key)
            .map(|e| e.biased_error())
            .ok_or_else(|| EngineError::Internal("state missing from cache".to_string()))
    }

    fn step(
        &mut self,
        iteration: usize,
        sub_iteration: usize,
        step: usize,
        store: &mut RunStore,
    ) -> Result<(), EngineError> {
        let phi = self.bias.phi();
        let decimals = self.ctx.config.moves.key_decimals;
        let old_key = self.current_key.clone();
        let old_values = self.params.values();
        let error_old = self.biased_error(&old_key)?;

        let mut rng = self.step_rng(step);
        let outcome = self.moves.propose(&mut self.params, &mut rng)?;
        let trial_values = self.params.values();

        let mut record = IterationRecord {
            step,
            iteration,
            sub_iteration,
            params: old_values.clone(),
            trial_params: trial_values.clone(),
            descriptors: None,
            aux_errors: None,
            error_old: Some(error_old),
            error_new: None,
            accepted: false,
            status: StepStatus::OutOfBounds,
            phi,
        };

        let mut abort = None;
        match outcome {
            MoveOutcome::Exhausted { attempts } => {
                debug!(step, attempts, "No in-bounds move found; rejecting.");
                self.reject(&old_key, &old_values, phi)?;
            }
            MoveOutcome::Proposed(mv) => {
                let new_key = self.params.key(decimals)?;
                trace!(step, unit = %mv.unit, factor = mv.factor, "Move proposed.");
                match self.resolve(&new_key, &trial_values)? {
                    Resolution::Failed(failure) => {
                        self.consecutive_failures += 1;
                        record.status = StepStatus::Failed;
                        self.reject(&old_key, &old_values, phi)?;

                        let threshold = self.ctx.config.monte_carlo.failure_warning_threshold;
                        if self.consecutive_failures >= threshold {
                            warn!(
                                %failure,
                                consecutive = self.consecutive_failures,
                                "Repeated evaluation failures."
                            );
                        } else {
                            debug!(%failure, step, "Evaluation failed; move rejected.");
                        }
                        if let Some(max) = self.ctx.config.monte_carlo.max_consecutive_failures {
                            if self.consecutive_failures >= max {
                                abort = Some(self.consecutive_failures);
                            }
                        }
                    }
                    resolution => {
                        self.consecutive_failures = 0;
                        record.status = match resolution {
                            Resolution::Hit => StepStatus::CacheHit,
                            _ => StepStatus::Evaluated,
                        };
                        let error_new = self.biased_error(&new_key)?;
                        let accepted = error_new < error_old;

                        if accepted {
                            self.bias.record(true);
                            self.cache.update(&new_key, phi);
                            self.current_key = new_key.clone();
                            self.accepted += 1;
                        } else {
                            self.reject(&old_key, &old_values, phi)?;
                        }

                        let entry = self.cache.get(&new_key).ok_or_else(|| {
                            EngineError::Internal("proposal missing from cache".to_string())
                        })?;
                        record.descriptors = Some(entry.evaluation.descriptors.clone());
                        record.aux_errors = Some(entry.evaluation.errors.clone());
                        record.error_new = Some(error_new);
                        record.accepted = accepted;
                        debug!(step, accepted, error_old, error_new, "Step evaluated.");
                    }
                }
            }
        }

        record.params = self.params.values();
        store.append(&record)?;

        match abort {
            Some(count) => Err(EngineError::TooManyFailures { count }),
            None => Ok(()),
        }
    }

    fn reject(&mut self, old_key: &StateKey, old_values: &[f64], phi: f64) -> Result<(), EngineError> {
        self.bias.record(false);
        self.params.set_values(old_values)?;
        self.current_key = old_key.clone();
        self.cache.update(old_key, phi);
        Ok(())
    }
}
