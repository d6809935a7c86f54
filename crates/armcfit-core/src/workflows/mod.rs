//! # Workflows Module
//!
//! High-level entry points that orchestrate a complete parameter fit.
//!
//! ## Overview
//!
//! A workflow owns the mutable search state and drives the engine layer: it seeds the run,
//! proposes moves, resolves each proposal through the memoisation cache or the simulation
//! engine, applies the biased Metropolis-style acceptance rule and recalibrates phi after
//! every block. Every step is committed to the run store before the next one begins, so an
//! interrupted fit resumes by replaying what was written.
//!
//! ## Architecture
//!
//! - **ARMC Workflow** ([`armc`]) - The adaptive-rate Monte Carlo controller, including
//!   restart-by-replay and run summaries.
//!
//! ## Key Capabilities
//!
//! - **Fail-fast validation** of parameters, pair coverage and channel layout before any
//!   engine call
//! - **Recoverable evaluation failures** with bounded retries and an optional abort threshold
//! - **Deterministic seeding** per step, so resumed runs reproduce uninterrupted ones
//! - **Progress monitoring** through phase, task and status events

pub mod armc;
