use crate::core::forcefield::nonbonded::{EnergyTable, EnergyTables};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum PesError {
    #[error("Expected {expected} descriptors, got {found}")]
    ChannelCount { expected: usize, found: usize },
    #[error(
        "Descriptor '{channel}' has shape {found_rows}x{found_cols}, reference is {expected_rows}x{expected_cols}"
    )]
    ShapeMismatch {
        channel: String,
        expected_rows: usize,
        expected_cols: usize,
        found_rows: usize,
        found_cols: usize,
    },
    #[error("Descriptor '{channel}' contains non-finite values")]
    NonFinite { channel: String },
}

/// Which quantity a channel extracts from the non-bonded energy tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PesKind {
    Electrostatic,
    LennardJones,
}

impl fmt::Display for PesKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PesKind::Electrostatic => f.write_str("electrostatic"),
            PesKind::LennardJones => f.write_str("lennard-jones"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PesChannel {
    pub name: String,
    pub kind: PesKind,
}

impl PesChannel {
    pub fn new(name: impl Into<String>, kind: PesKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Frame-averaged per-pair energy as a one-row descriptor.
    pub fn extract(&self, energies: &EnergyTables) -> Descriptor {
        let table: &EnergyTable = match self.kind {
            PesKind::Electrostatic => &energies.electrostatic,
            PesKind::LennardJones => &energies.lennard_jones,
        };
        Descriptor::new(
            table.pairs().iter().map(ToString::to_string).collect(),
            1,
            table.mean_per_pair(),
        )
    }
}

/// A rows × named-columns array, stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    columns: Vec<String>,
    rows: usize,
    values: Vec<f64>,
}

impl Descriptor {
    pub fn new(columns: Vec<String>, rows: usize, values: Vec<f64>) -> Self {
        debug_assert_eq!(columns.len() * rows, values.len());
        Self {
            columns,
            rows,
            values,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn row(&self, row: usize) -> &[f64] {
        let width = self.columns.len();
        &self.values[row * width..(row + 1) * width]
    }

    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    fn same_shape(&self, other: &Descriptor) -> bool {
        self.rows == other.rows && self.columns.len() == other.columns.len()
    }

    /// Sum over columns of the Euclidean norm of the column difference.
    pub fn distance(&self, other: &Descriptor) -> f64 {
        let width = self.columns.len();
        (0..width)
            .map(|c| {
                (0..self.rows)
                    .map(|r| {
                        let d = self.values[r * width + c] - other.values[r * width + c];
                        d * d
                    })
                    .sum::<f64>()
                    .sqrt()
            })
            .sum()
    }
}

/// Descriptors and per-channel auxiliary errors of one evaluated parameter state.
#[derive(Debug, Clone, PartialEq)]
pub struct PesEvaluation {
    pub descriptors: Vec<Descriptor>,
    pub errors: Vec<f64>,
}

impl PesEvaluation {
    pub fn total_error(&self) -> f64 {
        self.errors.iter().sum()
    }
}

/// Reference descriptors, one per channel, that candidates are scored against.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSet {
    channels: Vec<PesChannel>,
    descriptors: Vec<Descriptor>,
}

impl ReferenceSet {
    pub fn new(channels: Vec<PesChannel>, descriptors: Vec<Descriptor>) -> Result<Self, PesError> {
        if channels.len() != descriptors.len() {
            return Err(PesError::ChannelCount {
                expected: channels.len(),
                found: descriptors.len(),
            });
        }
        if let Some(channel) = channels
            .iter()
            .zip(&descriptors)
            .find(|(_, d)| !d.is_finite())
            .map(|(c, _)| c)
        {
            return Err(PesError::NonFinite {
                channel: channel.name.clone(),
            });
        }
        Ok(Self {
            channels,
            descriptors,
        })
    }

    pub fn from_energies(
        channels: Vec<PesChannel>,
        energies: &EnergyTables,
    ) -> Result<Self, PesError> {
        let descriptors = channels.iter().map(|c| c.extract(energies)).collect();
        Self::new(channels, descriptors)
    }

    pub fn channels(&self) -> &[PesChannel] {
        &self.channels
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    pub fn extract(&self, energies: &EnergyTables) -> Vec<Descriptor> {
        self.channels.iter().map(|c| c.extract(energies)).collect()
    }

    pub fn score(&self, candidate: Vec<Descriptor>) -> Result<PesEvaluation, PesError> {
        if candidate.len() != self.descriptors.len() {
            return Err(PesError::ChannelCount {
                expected: self.descriptors.len(),
                found: candidate.len(),
            });
        }
        let mut errors = Vec::with_capacity(candidate.len());
        for ((channel, reference), current) in
            self.channels.iter().zip(&self.descriptors).zip(&candidate)
        {
            if !reference.same_shape(current) {
                return Err(PesError::ShapeMismatch {
                    channel: channel.name.clone(),
                    expected_rows: reference.rows,
                    expected_cols: reference.columns.len(),
                    found_rows: current.rows,
                    found_cols: current.columns.len(),
                });
            }
            if !current.is_finite() {
                return Err(PesError::NonFinite {
                    channel: channel.name.clone(),
                });
            }
            errors.push(current.distance(reference));
        }
        Ok(PesEvaluation {
            descriptors: candidate,
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(rows: usize, values: Vec<f64>) -> Descriptor {
        let cols = values.len() / rows;
        Descriptor::new((0..cols).map(|c| format!("c{c}")).collect(), rows, values)
    }

    fn reference() -> ReferenceSet {
        ReferenceSet::new(
            vec![PesChannel::new("elstat", PesKind::Electrostatic)],
            vec![descriptor(2, vec![0.0, 0.0, 0.0, 0.0])],
        )
        .unwrap()
    }

    #[test]
    fn distance_sums_column_norms() {
        let a = descriptor(2, vec![3.0, 1.0, 4.0, 0.0]);
        let b = descriptor(2, vec![0.0, 0.0, 0.0, 0.0]);
        // Column 0: |(3,4)| = 5; column 1: |(1,0)| = 1.
        assert!((a.distance(&b) - 6.0).abs() < 1e-12);
    }

    #[test]
    fn score_returns_per_channel_errors() {
        let eval = reference()
            .score(vec![descriptor(2, vec![3.0, 1.0, 4.0, 0.0])])
            .unwrap();
        assert_eq!(eval.errors.len(), 1);
        assert!((eval.total_error() - 6.0).abs() < 1e-12);
    }

    #[test]
    fn score_rejects_shape_mismatch_and_non_finite_values() {
        assert!(matches!(
            reference().score(vec![descriptor(1, vec![0.0, 0.0])]),
            Err(PesError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            reference().score(vec![descriptor(2, vec![f64::NAN, 0.0, 0.0, 0.0])]),
            Err(PesError::NonFinite { .. })
        ));
        assert!(matches!(
            reference().score(vec![]),
            Err(PesError::ChannelCount { expected: 1, found: 0 })
        ));
    }

    #[test]
    fn reference_must_be_finite() {
        let result = ReferenceSet::new(
            vec![PesChannel::new("lj", PesKind::LennardJones)],
            vec![descriptor(1, vec![f64::INFINITY])],
        );
        assert_eq!(
            result,
            Err(PesError::NonFinite {
                channel: "lj".to_string()
            })
        );
    }
}
