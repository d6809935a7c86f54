use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "ARMCFIT CLI - Adaptive Rate Monte Carlo fitting of non-bonded forcefield parameters against reference potential-energy-surface descriptors.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Set the number of threads for parallel computation.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run (or resume) an ARMC parameter fit described by a TOML run file.
    Run(RunArgs),
    /// Evaluate per-pair non-bonded energies of an XYZ trajectory.
    Energy(EnergyArgs),
    /// Summarise a run store: acceptance per block, phi history and best error.
    Inspect(InspectArgs),
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the run configuration file in TOML format.
    #[arg(required = true, value_name = "PATH")]
    pub config: PathBuf,

    /// Resume the run stored in the output directory instead of starting a new one.
    #[arg(long)]
    pub restart: bool,

    /// Override the output (run store) directory.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Override `monte-carlo.iter-len`.
    #[arg(long, value_name = "INT")]
    pub iter_len: Option<usize>,

    /// Override `monte-carlo.seed`.
    #[arg(long, value_name = "INT")]
    pub seed: Option<u64>,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S phi.gamma=1.5
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceModeArg {
    Dense,
    Neighbors,
}

/// Arguments for the `energy` subcommand.
#[derive(Args, Debug)]
pub struct EnergyArgs {
    /// Path to the topology file (TOML).
    #[arg(short, long, required = true, value_name = "PATH")]
    pub topology: PathBuf,

    /// Path to the forcefield parameter file (TOML).
    #[arg(short, long, required = true, value_name = "PATH")]
    pub forcefield: PathBuf,

    /// Path to the multi-frame XYZ trajectory.
    #[arg(short = 'x', long, required = true, value_name = "PATH")]
    pub trajectory: PathBuf,

    /// How inter-atomic distances are gathered.
    #[arg(long, value_enum, default_value_t = DistanceModeArg::Dense)]
    pub mode: DistanceModeArg,

    /// Neighbor cutoff in Angstrom (neighbors mode only).
    #[arg(long, value_name = "FLOAT", default_value_t = 10.0)]
    pub cutoff: f64,

    /// Maximum neighbors per atom (neighbors mode only).
    #[arg(long, value_name = "INT", default_value_t = 64)]
    pub max_neighbors: usize,

    /// Evaluate only this atom-type pair (e.g. "Cd Se"). Can be used multiple times.
    #[arg(long = "pair", value_name = "PAIR")]
    pub pairs: Vec<String>,

    /// Write the per-frame energies as CSV instead of printing frame averages.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

/// Arguments for the `inspect` subcommand.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Run store directory.
    #[arg(required = true, value_name = "PATH")]
    pub store: PathBuf,

    /// Print the raw rows of one dataset (e.g. `param`, `aux_error`, `pes.elstat`).
    #[arg(short, long, value_name = "NAME")]
    pub dataset: Option<String>,

    /// First step to print (inclusive).
    #[arg(long, value_name = "STEP", requires = "dataset")]
    pub from: Option<usize>,

    /// Last step to print (exclusive).
    #[arg(long, value_name = "STEP", requires = "dataset")]
    pub to: Option<usize>,
}
