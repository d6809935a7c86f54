//! Data models describing the simulated system: per-frame coordinates and the static
//! atom-type / fragment metadata supplied once at setup.

pub mod topology;
pub mod trajectory;
