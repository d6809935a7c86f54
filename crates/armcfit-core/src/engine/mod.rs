//! # Engine Module
//!
//! The building blocks of the adaptive-rate Monte Carlo fit: the parameter state that is being
//! optimised, the moves that perturb it, the bias that steers acceptance, and the durable
//! record of every step.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Immutable run settings built with [`config::ArmcConfigBuilder`]
//! - **Parameters** ([`params`]) - Bounded, grouped, optionally linked tunable scalars
//! - **Moves** ([`moves`]) - Multiplicative move proposals from a discrete factor table
//! - **Memoisation** ([`cache`]) - Evaluations keyed by quantised parameter state
//! - **Bias** ([`phi`]) - Phi recalibration toward a target acceptance rate
//! - **Descriptors** ([`pes`]) - PES channels, reference descriptors and auxiliary errors
//! - **Simulation** ([`simulation`]) - The engine seam that turns parameters into trajectories
//! - **Persistence** ([`store`]) - Append-only per-dataset run store with crash recovery
//! - **Progress Monitoring** ([`progress`]) - Progress reporting callbacks
//! - **Error Handling** ([`error`]) - Aggregated engine error type

pub mod cache;
pub mod config;
pub mod error;
pub mod moves;
pub mod params;
pub mod pes;
pub mod phi;
pub mod progress;
pub mod simulation;
pub mod store;
