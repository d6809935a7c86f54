//! # Force Field Module
//!
//! Non-bonded parameters and energies for the systems being fitted.
//!
//! ## Key Components
//!
//! - [`params`] - Per-atom-type charge, σ and ε with pair overrides, loaded from TOML
//! - [`pair_table`] - Symmetric atom-pair parameter table built with combination rules
//! - [`potentials`] - Coulomb and Lennard-Jones 12-6 pair potentials
//! - [`nonbonded`] - Trajectory reduction into per-pair electrostatic and Lennard-Jones tables
//!
//! ## Usage
//!
//! ```ignore
//! use armcfit::core::forcefield::nonbonded::{EvaluatorConfig, NonBondedEvaluator};
//!
//! let evaluator = NonBondedEvaluator::from_topology(&topology, EvaluatorConfig::default())?;
//! let table = forcefield.pair_table(evaluator.pairs());
//! let energies = evaluator.evaluate(&trajectory, &table)?;
//! ```

pub mod nonbonded;
pub mod pair_table;
pub mod params;
pub(crate) mod potentials;
