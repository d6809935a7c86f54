use super::moves::{BoundsPolicy, MoveRange, MoveRangeError};
use super::pes::{PesChannel, PesKind};
use super::phi::PhiUpdater;
use crate::core::forcefield::nonbonded::{DistanceMode, EvaluatorConfig, NonBondedError};
use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use thiserror::Error;

pub const DEFAULT_ITER_LEN: usize = 50_000;
pub const DEFAULT_SUB_ITER_LEN: usize = 100;
pub const DEFAULT_PHI: f64 = 1.0;
pub const DEFAULT_GAMMA: f64 = 2.0;
pub const DEFAULT_A_TARGET: f64 = 0.25;
pub const DEFAULT_KEY_DECIMALS: u32 = 8;
pub const DEFAULT_MAX_MOVE_ATTEMPTS: usize = 100;
pub const DEFAULT_FAILURE_WARNING_THRESHOLD: usize = 5;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid value for '{name}': {reason}")]
    InvalidValue { name: &'static str, reason: String },
    #[error("Invalid move range: {0}")]
    MoveRange(#[from] MoveRangeError),
    #[error("Invalid evaluator settings: {0}")]
    Evaluator(#[from] NonBondedError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonteCarloConfig {
    /// Total number of sub-iterations requested.
    pub iter_len: usize,
    /// Sub-iterations per phi block.
    pub sub_iter_len: usize,
    /// Base seed; `None` draws from entropy.
    pub seed: Option<u64>,
    pub max_evaluation_retries: usize,
    pub failure_warning_threshold: usize,
    pub max_consecutive_failures: Option<usize>,
}

impl MonteCarloConfig {
    /// Number of outer iterations, `iter_len / sub_iter_len`.
    #[inline]
    pub fn block_count(&self) -> usize {
        self.iter_len / self.sub_iter_len
    }

    /// Sub-iterations lost to integer division.
    #[inline]
    pub fn remainder(&self) -> usize {
        self.iter_len % self.sub_iter_len
    }

    #[inline]
    pub fn total_steps(&self) -> usize {
        self.block_count() * self.sub_iter_len
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhiConfig {
    pub phi: f64,
    pub gamma: f64,
    pub a_target: f64,
    pub updater: PhiUpdater,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MoveConfig {
    pub range: MoveRange,
    pub bounds_policy: BoundsPolicy,
    pub max_move_attempts: usize,
    pub key_decimals: u32,
}

/// Immutable run configuration.
///
/// Equality is structural; hashing uses a fingerprint computed once at build time.
#[derive(Debug, Clone)]
pub struct ArmcConfig {
    pub monte_carlo: MonteCarloConfig,
    pub phi: PhiConfig,
    pub moves: MoveConfig,
    pub evaluator: EvaluatorConfig,
    pub channels: Vec<PesChannel>,
    fingerprint: u64,
}

impl ArmcConfig {
    pub fn builder() -> ArmcConfigBuilder {
        ArmcConfigBuilder::new()
    }

    #[inline]
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    fn compute_fingerprint(&self) -> u64 {
        let mut h = DefaultHasher::new();
        let mc = &self.monte_carlo;
        (mc.iter_len, mc.sub_iter_len, mc.seed).hash(&mut h);
        (
            mc.max_evaluation_retries,
            mc.failure_warning_threshold,
            mc.max_consecutive_failures,
        )
            .hash(&mut h);
        for v in [self.phi.phi, self.phi.gamma, self.phi.a_target] {
            v.to_bits().hash(&mut h);
        }
        self.phi.updater.hash(&mut h);
        for f in self.moves.range.factors() {
            f.to_bits().hash(&mut h);
        }
        (
            self.moves.bounds_policy,
            self.moves.max_move_attempts,
            self.moves.key_decimals,
        )
            .hash(&mut h);
        match self.evaluator.distance_mode {
            DistanceMode::Dense => 0u8.hash(&mut h),
            DistanceMode::Neighbors {
                cutoff,
                max_neighbors,
            } => {
                1u8.hash(&mut h);
                cutoff.to_bits().hash(&mut h);
                max_neighbors.hash(&mut h);
            }
        }
        self.evaluator.max_array_size.hash(&mut h);
        self.evaluator.pairs.hash(&mut h);
        self.channels.hash(&mut h);
        h.finish()
    }
}

impl PartialEq for ArmcConfig {
    fn eq(&self, other: &Self) -> bool {
        self.monte_carlo == other.monte_carlo
            && self.phi == other.phi
            && self.moves == other.moves
            && self.evaluator == other.evaluator
            && self.channels == other.channels
    }
}

// Built configs hold only finite floats.
impl Eq for ArmcConfig {}

impl Hash for ArmcConfig {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fingerprint.hash(state);
    }
}

#[derive(Default)]
pub struct ArmcConfigBuilder {
    iter_len: Option<usize>,
    sub_iter_len: Option<usize>,
    seed: Option<u64>,
    max_evaluation_retries: Option<usize>,
    failure_warning_threshold: Option<usize>,
    max_consecutive_failures: Option<usize>,
    phi: Option<f64>,
    gamma: Option<f64>,
    a_target: Option<f64>,
    phi_updater: Option<PhiUpdater>,
    move_range: Option<MoveRange>,
    bounds_policy: Option<BoundsPolicy>,
    max_move_attempts: Option<usize>,
    key_decimals: Option<u32>,
    evaluator: Option<EvaluatorConfig>,
    channels: Option<Vec<PesChannel>>,
}

impl ArmcConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter_len(mut self, n: usize) -> Self {
        self.iter_len = Some(n);
        self
    }
    pub fn sub_iter_len(mut self, n: usize) -> Self {
        self.sub_iter_len = Some(n);
        self
    }
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
    pub fn max_evaluation_retries(mut self, n: usize) -> Self {
        self.max_evaluation_retries = Some(n);
        self
    }
    pub fn failure_warning_threshold(mut self, n: usize) -> Self {
        self.failure_warning_threshold = Some(n);
        self
    }
    pub fn max_consecutive_failures(mut self, n: usize) -> Self {
        self.max_consecutive_failures = Some(n);
        self
    }
    pub fn phi(mut self, phi: f64) -> Self {
        self.phi = Some(phi);
        self
    }
    pub fn gamma(mut self, gamma: f64) -> Self {
        self.gamma = Some(gamma);
        self
    }
    pub fn a_target(mut self, a_target: f64) -> Self {
        self.a_target = Some(a_target);
        self
    }
    pub fn phi_updater(mut self, updater: PhiUpdater) -> Self {
        self.phi_updater = Some(updater);
        self
    }
    pub fn move_range(mut self, range: MoveRange) -> Self {
        self.move_range = Some(range);
        self
    }
    pub fn bounds_policy(mut self, policy: BoundsPolicy) -> Self {
        self.bounds_policy = Some(policy);
        self
    }
    pub fn max_move_attempts(mut self, n: usize) -> Self {
        self.max_move_attempts = Some(n);
        self
    }
    pub fn key_decimals(mut self, decimals: u32) -> Self {
        self.key_decimals = Some(decimals);
        self
    }
    pub fn evaluator(mut self, evaluator: EvaluatorConfig) -> Self {
        self.evaluator = Some(evaluator);
        self
    }
    pub fn channels(mut self, channels: Vec<PesChannel>) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn build(self) -> Result<ArmcConfig, ConfigError> {
        let monte_carlo = MonteCarloConfig {
            iter_len: self.iter_len.unwrap_or(DEFAULT_ITER_LEN),
            sub_iter_len: self.sub_iter_len.unwrap_or(DEFAULT_SUB_ITER_LEN),
            seed: self.seed,
            max_evaluation_retries: self.max_evaluation_retries.unwrap_or(0),
            failure_warning_threshold: self
                .failure_warning_threshold
                .unwrap_or(DEFAULT_FAILURE_WARNING_THRESHOLD),
            max_consecutive_failures: self.max_consecutive_failures,
        };
        let phi = PhiConfig {
            phi: self.phi.unwrap_or(DEFAULT_PHI),
            gamma: self.gamma.unwrap_or(DEFAULT_GAMMA),
            a_target: self.a_target.unwrap_or(DEFAULT_A_TARGET),
            updater: self.phi_updater.unwrap_or_default(),
        };
        let moves = MoveConfig {
            range: self.move_range.unwrap_or_default(),
            bounds_policy: self.bounds_policy.unwrap_or_default(),
            max_move_attempts: self.max_move_attempts.unwrap_or(DEFAULT_MAX_MOVE_ATTEMPTS),
            key_decimals: self.key_decimals.unwrap_or(DEFAULT_KEY_DECIMALS),
        };
        let evaluator = self.evaluator.unwrap_or_default();
        let channels = self
            .channels
            .ok_or(ConfigError::MissingParameter("channels"))?;

        validate(&monte_carlo, &phi, &moves, &channels)?;
        evaluator.validate()?;

        let mut config = ArmcConfig {
            monte_carlo,
            phi,
            moves,
            evaluator,
            channels,
            fingerprint: 0,
        };
        config.fingerprint = config.compute_fingerprint();
        Ok(config)
    }
}

/// The default pair of channels: electrostatic and Lennard-Jones energies.
pub fn default_channels() -> Vec<PesChannel> {
    vec![
        PesChannel::new("elstat", PesKind::Electrostatic),
        PesChannel::new("lj", PesKind::LennardJones),
    ]
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        name,
        reason: reason.into(),
    }
}

fn validate(
    mc: &MonteCarloConfig,
    phi: &PhiConfig,
    moves: &MoveConfig,
    channels: &[PesChannel],
) -> Result<(), ConfigError> {
    if mc.sub_iter_len == 0 {
        return Err(invalid("sub_iter_len", "must be at least 1"));
    }
    if mc.iter_len < mc.sub_iter_len {
        return Err(invalid(
            "iter_len",
            format!(
                "{} is smaller than sub_iter_len {}, leaving no iterations",
                mc.iter_len, mc.sub_iter_len
            ),
        ));
    }
    if mc.max_consecutive_failures == Some(0) {
        return Err(invalid("max_consecutive_failures", "must be at least 1"));
    }
    if !(phi.phi.is_finite() && phi.phi > 0.0) {
        return Err(invalid("phi", format!("must be positive, got {}", phi.phi)));
    }
    if !(phi.gamma.is_finite() && phi.gamma > 0.0) {
        return Err(invalid("gamma", format!("must be positive, got {}", phi.gamma)));
    }
    if !(phi.a_target > 0.0 && phi.a_target <= 1.0) {
        return Err(invalid(
            "a_target",
            format!("must lie in (0, 1], got {}", phi.a_target),
        ));
    }
    if moves.max_move_attempts == 0 {
        return Err(invalid("max_move_attempts", "must be at least 1"));
    }
    if moves.key_decimals > 15 {
        return Err(invalid(
            "key_decimals",
            format!("at most 15 decimals are meaningful, got {}", moves.key_decimals),
        ));
    }
    if channels.is_empty() {
        return Err(invalid("channels", "at least one channel is required"));
    }
    let mut names = HashSet::new();
    for c in channels {
        if c.name.is_empty() || c.name.contains(['/', '\\', '.']) {
            return Err(invalid(
                "channels",
                format!("'{}' is not a valid channel name", c.name),
            ));
        }
        if !names.insert(c.name.as_str()) {
            return Err(invalid("channels", format!("duplicate channel '{}'", c.name)));
        }
    }
    Ok(())
}
