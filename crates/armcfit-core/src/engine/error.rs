use thiserror::Error;

use super::config::ConfigError;
use super::params::ParamError;
use super::pes::PesError;
use super::simulation::EvaluationFailure;
use super::store::StoreError;
use crate::core::forcefield::nonbonded::NonBondedError;
use crate::core::forcefield::params::ForcefieldError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("Parameter error: {source}")]
    Parameters {
        #[from]
        source: ParamError,
    },

    #[error("Forcefield error: {source}")]
    Forcefield {
        #[from]
        source: ForcefieldError,
    },

    #[error("Non-bonded evaluation failed: {source}")]
    NonBonded {
        #[from]
        source: NonBondedError,
    },

    #[error("PES descriptor error: {source}")]
    Pes {
        #[from]
        source: PesError,
    },

    #[error("Persistence failed: {source}")]
    Persistence {
        #[from]
        source: StoreError,
    },

    #[error("Seed evaluation of the initial parameters failed: {0}")]
    SeedEvaluation(EvaluationFailure),

    #[error("Aborting after {count} consecutive failed evaluations")]
    TooManyFailures { count: usize },

    #[error("Run store does not match this configuration: {0}")]
    RestartMismatch(String),

    #[error("Internal logic error: {0}")]
    Internal(String),
}
