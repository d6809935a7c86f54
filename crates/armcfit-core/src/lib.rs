//! # ARMCFIT Core Library
//!
//! A library for fitting non-bonded forcefield parameters (partial charges and Lennard-Jones
//! σ/ε) with Adaptive Rate Monte Carlo (ARMC), so that a cheap classical simulation reproduces
//! potential-energy-surface descriptors computed from a higher-fidelity reference trajectory.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture:
//!
//! - **[`core`]: The Foundation.** Stateless data models (`Trajectory`, `Topology`), the
//!   non-bonded forcefield (`potentials`, `pair_table`, the batched `nonbonded` evaluator)
//!   and trajectory I/O.
//!
//! - **[`engine`]: The Logic Core.** The stateful building blocks of the Monte Carlo search:
//!   the parameter store, move proposals, the memoisation cache, the bias (phi) controller,
//!   PES descriptors and the durable run store.
//!
//! - **[`workflows`]: The Public API.** The ARMC controller that ties the engine and core
//!   together, including restart-by-replay.

pub mod core;
pub mod engine;
pub mod workflows;
