//! # Core Module
//!
//! Stateless building blocks shared by the optimisation engine.
//!
//! - **System Representation** ([`models`]) - Trajectories and the atom-type / fragment topology
//! - **Energy Calculations** ([`forcefield`]) - Pair parameters, potentials and the non-bonded evaluator
//! - **File I/O** ([`io`]) - Multi-frame XYZ trajectory reading and writing

pub mod forcefield;
pub mod io;
pub mod models;
