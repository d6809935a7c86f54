use crate::cli::RunArgs;
use crate::error::{CliError, Result};
use armcfit::core::forcefield::nonbonded::{DEFAULT_MAX_ARRAY_SIZE, DistanceMode, EvaluatorConfig};
use armcfit::core::forcefield::pair_table::AtomPair;
use armcfit::core::forcefield::params::{Forcefield, ParamGroup};
use armcfit::engine::config::{self as core_config, ArmcConfig, ArmcConfigBuilder};
use armcfit::engine::moves::{BoundsPolicy, MoveRange};
use armcfit::engine::params::ParamRecord;
use armcfit::engine::pes::{PesChannel, PesKind};
use armcfit::engine::phi::PhiUpdater;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

const DEFAULT_CUTOFF: f64 = 10.0;
const DEFAULT_MAX_NEIGHBORS: usize = 64;
const DEFAULT_TRAJECTORY_NAME: &str = "trajectory.xyz";
const DEFAULT_OUTPUT: &str = "armc";
const DEFAULT_WORKDIR: &str = "work";

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialMonteCarloConfig {
    iter_len: Option<usize>,
    sub_iter_len: Option<usize>,
    seed: Option<u64>,
    max_evaluation_retries: Option<usize>,
    failure_warning_threshold: Option<usize>,
    max_consecutive_failures: Option<usize>,
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
enum PartialPhiUpdater {
    Geometric,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialPhiConfig {
    phi: Option<f64>,
    gamma: Option<f64>,
    a_target: Option<f64>,
    updater: Option<PartialPhiUpdater>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "kebab-case")]
enum PartialBoundsPolicy {
    Reject,
    Clamp,
}

impl FromStr for PartialBoundsPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "reject" => Ok(Self::Reject),
            "clamp" => Ok(Self::Clamp),
            other => Err(format!("unknown bounds policy '{other}'")),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(deny_unknown_fields)]
struct PartialSymmetricRange {
    start: f64,
    stop: f64,
    step: f64,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialMoveConfig {
    range: Option<Vec<f64>>,
    symmetric: Option<PartialSymmetricRange>,
    bounds_policy: Option<PartialBoundsPolicy>,
    max_move_attempts: Option<usize>,
    key_decimals: Option<u32>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "kebab-case")]
enum PartialDistanceMode {
    Dense,
    Neighbors,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialEvaluatorConfig {
    mode: Option<PartialDistanceMode>,
    cutoff: Option<f64>,
    max_neighbors: Option<usize>,
    max_array_size: Option<usize>,
    /// Atom-type pairs to evaluate, e.g. `["Cd Se", "Se Se"]`.
    pairs: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
struct PartialChannel {
    name: String,
    kind: PesKind,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialEngineConfig {
    command: Option<Vec<String>>,
    trajectory: Option<String>,
    timeout_secs: Option<f64>,
    workdir: Option<PathBuf>,
}

/// One `[[param]]` table: which forcefield value to tune and how.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ParamSpec {
    pub group: ParamGroup,
    pub label: String,
    /// Starting value; seeded from the forcefield when absent.
    pub value: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Multiplicity in the neutrality sum; defaults to the atom type's count in the topology.
    pub count: Option<usize>,
    #[serde(default)]
    pub frozen: bool,
    pub link: Option<String>,
    #[serde(default)]
    pub neutral: bool,
}

impl ParamSpec {
    /// Resolves the starting value and multiplicity against the loaded inputs.
    pub fn to_record(
        &self,
        forcefield: &Forcefield,
        type_counts: &BTreeMap<String, usize>,
    ) -> Result<ParamRecord> {
        let value = match self.value {
            Some(v) => v,
            None => forcefield
                .get(self.group, &self.label)
                .map_err(|e| CliError::Config(format!("param '{}.{}': {e}", self.group, self.label)))?,
        };
        let mut record = ParamRecord::new(self.group, self.label.clone(), value)
            .bounds(
                self.min.unwrap_or(f64::NEG_INFINITY),
                self.max.unwrap_or(f64::INFINITY),
            )
            .frozen(self.frozen)
            .neutral(self.neutral);

        let is_pair = AtomPair::parse(&self.label).is_some();
        let count = match (self.count, is_pair) {
            (Some(c), _) => c,
            (None, true) => 1,
            (None, false) => type_counts.get(&self.label).copied().unwrap_or(1),
        };
        record = record.count(count);
        if let Some(link) = &self.link {
            record = record.link(link.clone());
        }
        Ok(record)
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct PartialRunConfig {
    topology: Option<PathBuf>,
    forcefield: Option<PathBuf>,
    reference: Option<PathBuf>,
    output: Option<PathBuf>,
    monte_carlo: Option<PartialMonteCarloConfig>,
    phi: Option<PartialPhiConfig>,
    moves: Option<PartialMoveConfig>,
    evaluator: Option<PartialEvaluatorConfig>,
    channels: Option<Vec<PartialChannel>>,
    engine: Option<PartialEngineConfig>,
    #[serde(default)]
    param: Vec<ParamSpec>,
}

/// How the external MD engine is invoked.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub command: Vec<String>,
    pub trajectory: String,
    pub timeout: Option<Duration>,
    pub workdir: PathBuf,
}

/// Fully merged run settings: the core configuration plus everything the CLI resolves itself.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub armc: ArmcConfig,
    pub topology: PathBuf,
    pub forcefield: PathBuf,
    pub reference: PathBuf,
    pub output: PathBuf,
    pub engine: EngineSettings,
    pub params: Vec<ParamSpec>,
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| CliError::Config(format!("Invalid value for {key}: {value}")))
}

/// Parses `"A B"` labels into pairs; any label that is not two atom types is an error.
pub fn parse_pairs(labels: &[String]) -> Result<Vec<AtomPair>> {
    labels
        .iter()
        .map(|label| {
            AtomPair::parse(label)
                .ok_or_else(|| CliError::Config(format!("Invalid atom pair '{label}'")))
        })
        .collect()
}

fn resolve(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

impl PartialRunConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content).map_err(|e| CliError::parsing(path, e))
    }

    fn from_toml_str(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Applies CLI overrides and builds the validated settings. Relative paths resolve against
    /// `base`, normally the directory holding the run file.
    pub fn merge_with_cli(mut self, args: &RunArgs, base: &Path) -> Result<RunSettings> {
        self.apply_set_values(&args.set_values)?;

        let required = |value: Option<PathBuf>, key: &str| -> Result<PathBuf> {
            value.map(|p| resolve(base, p)).ok_or_else(|| {
                CliError::Config(format!("`{key}` is required in the run file."))
            })
        };
        let topology = required(self.topology.take(), "topology")?;
        let forcefield = required(self.forcefield.take(), "forcefield")?;
        let reference = required(self.reference.take(), "reference")?;
        let output = match &args.output {
            Some(p) => p.clone(),
            None => resolve(
                base,
                self.output.take().unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT)),
            ),
        };

        if self.param.is_empty() {
            return Err(CliError::Config(
                "at least one `[[param]]` table is required".to_string(),
            ));
        }

        let mut builder = ArmcConfigBuilder::new();
        builder = Self::merge_monte_carlo(builder, self.monte_carlo.take(), args);
        builder = Self::merge_phi(builder, self.phi.take());
        builder = Self::merge_moves(builder, self.moves.take())?;
        builder = builder.evaluator(Self::merge_evaluator(self.evaluator.take())?);
        builder = builder.channels(match self.channels.take() {
            Some(channels) => channels
                .into_iter()
                .map(|c| PesChannel::new(c.name, c.kind))
                .collect(),
            None => core_config::default_channels(),
        });
        let armc = builder.build().map_err(|e| CliError::Config(e.to_string()))?;

        let engine = Self::merge_engine(self.engine.take(), &output)?;

        Ok(RunSettings {
            armc,
            topology,
            forcefield,
            reference,
            output,
            engine,
            params: self.param,
        })
    }

    fn merge_monte_carlo(
        mut builder: ArmcConfigBuilder,
        partial: Option<PartialMonteCarloConfig>,
        args: &RunArgs,
    ) -> ArmcConfigBuilder {
        let partial = partial.unwrap_or_default();
        if let Some(n) = args.iter_len.or(partial.iter_len) {
            builder = builder.iter_len(n);
        }
        if let Some(n) = partial.sub_iter_len {
            builder = builder.sub_iter_len(n);
        }
        if let Some(seed) = args.seed.or(partial.seed) {
            builder = builder.seed(seed);
        }
        if let Some(n) = partial.max_evaluation_retries {
            builder = builder.max_evaluation_retries(n);
        }
        if let Some(n) = partial.failure_warning_threshold {
            builder = builder.failure_warning_threshold(n);
        }
        if let Some(n) = partial.max_consecutive_failures {
            builder = builder.max_consecutive_failures(n);
        }
        builder
    }

    fn merge_phi(
        mut builder: ArmcConfigBuilder,
        partial: Option<PartialPhiConfig>,
    ) -> ArmcConfigBuilder {
        let partial = partial.unwrap_or_default();
        if let Some(v) = partial.phi {
            builder = builder.phi(v);
        }
        if let Some(v) = partial.gamma {
            builder = builder.gamma(v);
        }
        if let Some(v) = partial.a_target {
            builder = builder.a_target(v);
        }
        if let Some(PartialPhiUpdater::Geometric) = partial.updater {
            builder = builder.phi_updater(PhiUpdater::Geometric);
        }
        builder
    }

    fn merge_moves(
        mut builder: ArmcConfigBuilder,
        partial: Option<PartialMoveConfig>,
    ) -> Result<ArmcConfigBuilder> {
        let partial = partial.unwrap_or_default();
        let range = match (partial.range, partial.symmetric) {
            (Some(_), Some(_)) => {
                return Err(CliError::Config(
                    "`moves.range` and `moves.symmetric` are mutually exclusive".to_string(),
                ));
            }
            (Some(factors), None) => Some(MoveRange::new(factors)),
            (None, Some(s)) => Some(MoveRange::symmetric(s.start, s.stop, s.step)),
            (None, None) => None,
        };
        if let Some(range) = range {
            let range = range.map_err(|e| CliError::Config(format!("moves: {e}")))?;
            builder = builder.move_range(range);
        }
        if let Some(policy) = partial.bounds_policy {
            builder = builder.bounds_policy(match policy {
                PartialBoundsPolicy::Reject => BoundsPolicy::Reject,
                PartialBoundsPolicy::Clamp => BoundsPolicy::Clamp,
            });
        }
        if let Some(n) = partial.max_move_attempts {
            builder = builder.max_move_attempts(n);
        }
        if let Some(d) = partial.key_decimals {
            builder = builder.key_decimals(d);
        }
        Ok(builder)
    }

    fn merge_evaluator(partial: Option<PartialEvaluatorConfig>) -> Result<EvaluatorConfig> {
        let partial = partial.unwrap_or_default();
        let distance_mode = match partial.mode.unwrap_or(PartialDistanceMode::Dense) {
            PartialDistanceMode::Dense => DistanceMode::Dense,
            PartialDistanceMode::Neighbors => DistanceMode::Neighbors {
                cutoff: partial.cutoff.unwrap_or(DEFAULT_CUTOFF),
                max_neighbors: partial.max_neighbors.unwrap_or(DEFAULT_MAX_NEIGHBORS),
            },
        };
        Ok(EvaluatorConfig {
            distance_mode,
            max_array_size: partial.max_array_size.unwrap_or(DEFAULT_MAX_ARRAY_SIZE),
            pairs: partial.pairs.as_deref().map(parse_pairs).transpose()?,
        })
    }

    fn merge_engine(partial: Option<PartialEngineConfig>, output: &Path) -> Result<EngineSettings> {
        let partial = partial.unwrap_or_default();
        let command = partial
            .command
            .filter(|c| !c.is_empty())
            .ok_or_else(|| CliError::Config("`engine.command` is required.".to_string()))?;
        let timeout = match partial.timeout_secs {
            Some(secs) if !(secs.is_finite() && secs > 0.0) => {
                return Err(CliError::Config(format!(
                    "`engine.timeout-secs` must be positive, got {secs}"
                )));
            }
            Some(secs) => Some(Duration::from_secs_f64(secs)),
            None => None,
        };
        let workdir = match partial.workdir {
            Some(p) if p.is_absolute() => p,
            Some(p) => output.join(p),
            None => output.join(DEFAULT_WORKDIR),
        };
        Ok(EngineSettings {
            command,
            trajectory: partial
                .trajectory
                .unwrap_or_else(|| DEFAULT_TRAJECTORY_NAME.to_string()),
            timeout,
            workdir,
        })
    }

    fn apply_set_values(&mut self, set_values: &[String]) -> Result<()> {
        for kv_pair in set_values {
            let Some((key, value)) = kv_pair.split_once('=') else {
                return Err(CliError::Config(format!(
                    "Invalid --set format: '{}'. Expected KEY=VALUE.",
                    kv_pair
                )));
            };
            let mc = || PartialMonteCarloConfig::default();
            match key {
                "output" => self.output = Some(PathBuf::from(value)),
                "monte-carlo.iter-len" => {
                    self.monte_carlo.get_or_insert_with(mc).iter_len = Some(parse_value(key, value)?)
                }
                "monte-carlo.sub-iter-len" => {
                    self.monte_carlo.get_or_insert_with(mc).sub_iter_len =
                        Some(parse_value(key, value)?)
                }
                "monte-carlo.seed" => {
                    self.monte_carlo.get_or_insert_with(mc).seed = Some(parse_value(key, value)?)
                }
                "monte-carlo.max-evaluation-retries" => {
                    self.monte_carlo.get_or_insert_with(mc).max_evaluation_retries =
                        Some(parse_value(key, value)?)
                }
                "monte-carlo.max-consecutive-failures" => {
                    self.monte_carlo.get_or_insert_with(mc).max_consecutive_failures =
                        Some(parse_value(key, value)?)
                }
                "phi.phi" => {
                    self.phi.get_or_insert_with(Default::default).phi = Some(parse_value(key, value)?)
                }
                "phi.gamma" => {
                    self.phi.get_or_insert_with(Default::default).gamma =
                        Some(parse_value(key, value)?)
                }
                "phi.a-target" => {
                    self.phi.get_or_insert_with(Default::default).a_target =
                        Some(parse_value(key, value)?)
                }
                "moves.bounds-policy" => {
                    let policy = value.parse().map_err(CliError::Config)?;
                    self.moves.get_or_insert_with(Default::default).bounds_policy = Some(policy)
                }
                "moves.max-move-attempts" => {
                    self.moves.get_or_insert_with(Default::default).max_move_attempts =
                        Some(parse_value(key, value)?)
                }
                "moves.key-decimals" => {
                    self.moves.get_or_insert_with(Default::default).key_decimals =
                        Some(parse_value(key, value)?)
                }
                "evaluator.cutoff" => {
                    let evaluator = self.evaluator.get_or_insert_with(Default::default);
                    evaluator.mode = Some(PartialDistanceMode::Neighbors);
                    evaluator.cutoff = Some(parse_value(key, value)?)
                }
                "evaluator.max-neighbors" => {
                    let evaluator = self.evaluator.get_or_insert_with(Default::default);
                    evaluator.mode = Some(PartialDistanceMode::Neighbors);
                    evaluator.max_neighbors = Some(parse_value(key, value)?)
                }
                "evaluator.pairs" => {
                    self.evaluator.get_or_insert_with(Default::default).pairs = Some(
                        value.split(',').map(|p| p.trim().to_string()).collect(),
                    )
                }
                "evaluator.max-array-size" => {
                    self.evaluator.get_or_insert_with(Default::default).max_array_size =
                        Some(parse_value(key, value)?)
                }
                "engine.timeout-secs" => {
                    self.engine.get_or_insert_with(Default::default).timeout_secs =
                        Some(parse_value(key, value)?)
                }
                _ => {
                    return Err(CliError::Config(format!(
                        "Unsupported configuration key for --set: '{}'",
                        key
                    )));
                }
            }
        }
        Ok(())
    }
}
