//! Reading and writing trajectory file formats.
//!
//! Formats implement the [`traits::TrajectoryFile`] trait, which provides path-based helpers on
//! top of reader/writer primitives.

pub mod traits;
pub mod xyz;
