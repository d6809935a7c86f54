//! Reduction of a trajectory into per-frame, per-atom-type-pair non-bonded energies.

mod batch;
mod distance;

pub use batch::{batch_step, frame_batches};

use self::distance::{DistanceBlock, Exclusion, dense_block, neighbor_block};
use super::pair_table::{AtomPair, AtomPairTable, PairParams};
use super::potentials::{coulomb, lennard_jones_12_6};
use crate::core::models::topology::Topology;
use crate::core::models::trajectory::Trajectory;
use itertools::Itertools;
use nalgebra::Point3;
use thiserror::Error;
use tracing::{debug, instrument, trace};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

pub const DEFAULT_MAX_ARRAY_SIZE: usize = 100_000_000;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum NonBondedError {
    #[error("No parameters for atom pair(s): {}", .0.iter().map(|p| format!("'{p}'")).join(", "))]
    MissingPairParameters(Vec<AtomPair>),
    #[error(
        "Atom pair '{pair}' has {count} atoms of one type, not divisible into {fragments} fragments"
    )]
    IndivisibleFragments {
        pair: AtomPair,
        count: usize,
        fragments: usize,
    },
    #[error("Atom index {index} is out of range for a trajectory with {atom_count} atoms")]
    AtomIndexOutOfRange { index: usize, atom_count: usize },
    #[error("Invalid evaluator configuration: {0}")]
    InvalidConfig(String),
    #[error("Non-finite {channel} energy for pair '{pair}' in frame {frame}")]
    NonFiniteEnergy {
        channel: &'static str,
        pair: AtomPair,
        frame: usize,
    },
}

/// How inter-atomic distances are gathered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DistanceMode {
    /// All pairs, no cutoff.
    Dense,
    /// At most `max_neighbors` partners within `cutoff`, found with a k-d tree.
    Neighbors { cutoff: f64, max_neighbors: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatorConfig {
    pub distance_mode: DistanceMode,
    pub max_array_size: usize,
    /// Evaluate only these atom-type pairs; `None` keeps every combination.
    pub pairs: Option<Vec<AtomPair>>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            distance_mode: DistanceMode::Dense,
            max_array_size: DEFAULT_MAX_ARRAY_SIZE,
            pairs: None,
        }
    }
}

impl EvaluatorConfig {
    pub fn validate(&self) -> Result<(), NonBondedError> {
        if self.max_array_size == 0 {
            return Err(NonBondedError::InvalidConfig(
                "max_array_size must be at least 1".to_string(),
            ));
        }
        if let DistanceMode::Neighbors {
            cutoff,
            max_neighbors,
        } = self.distance_mode
        {
            if !(cutoff.is_finite() && cutoff > 0.0) {
                return Err(NonBondedError::InvalidConfig(format!(
                    "cutoff must be a positive finite distance, got {cutoff}"
                )));
            }
            if max_neighbors == 0 {
                return Err(NonBondedError::InvalidConfig(
                    "max_neighbors must be at least 1".to_string(),
                ));
            }
        }
        if self.pairs.as_ref().is_some_and(Vec::is_empty) {
            return Err(NonBondedError::InvalidConfig(
                "the pair selection is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Atom indices on either side of one atom-type pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PairSlice {
    pub pair: AtomPair,
    pub a: Vec<usize>,
    pub b: Vec<usize>,
    pub touches_core: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NeighborSliceTable {
    slices: Vec<PairSlice>,
}

impl NeighborSliceTable {
    pub fn new(slices: Vec<PairSlice>) -> Self {
        Self { slices }
    }

    /// One slice per unordered combination of atom types, in sorted type order.
    pub fn from_topology(topology: &Topology) -> Self {
        let by_type = topology.type_indices();
        let slices = by_type
            .keys()
            .combinations_with_replacement(2)
            .map(|types| {
                let (ta, tb) = (types[0], types[1]);
                PairSlice {
                    pair: AtomPair::new(ta.as_str(), tb.as_str()),
                    a: by_type[ta].clone(),
                    b: by_type[tb].clone(),
                    touches_core: topology.is_core_type(ta) || topology.is_core_type(tb),
                }
            })
            .collect();
        Self { slices }
    }

    /// Drops every slice whose pair is not in `keep`.
    ///
    /// Fails if `keep` names a pair with no slice, since such a pair would silently
    /// evaluate to nothing.
    pub fn retain_pairs(&mut self, keep: &[AtomPair]) -> Result<(), NonBondedError> {
        if let Some(unknown) = keep
            .iter()
            .find(|pair| !self.slices.iter().any(|s| s.pair == **pair))
        {
            return Err(NonBondedError::InvalidConfig(format!(
                "selected pair '{unknown}' does not occur in the topology"
            )));
        }
        self.slices.retain(|s| keep.contains(&s.pair));
        Ok(())
    }

    pub fn slices(&self) -> &[PairSlice] {
        &self.slices
    }

    pub fn pairs(&self) -> impl Iterator<Item = &AtomPair> {
        self.slices.iter().map(|s| &s.pair)
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }
}

/// Energies indexed by (frame, pair), stored frame-major.
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyTable {
    pairs: Vec<AtomPair>,
    frame_count: usize,
    values: Vec<f64>,
}

impl EnergyTable {
    fn zeros(pairs: Vec<AtomPair>, frame_count: usize) -> Self {
        let values = vec![0.0; pairs.len() * frame_count];
        Self {
            pairs,
            frame_count,
            values,
        }
    }

    pub fn pairs(&self) -> &[AtomPair] {
        &self.pairs
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    #[inline]
    pub fn get(&self, frame: usize, pair: usize) -> f64 {
        self.values[frame * self.pairs.len() + pair]
    }

    fn set(&mut self, frame: usize, pair: usize, value: f64) {
        let width = self.pairs.len();
        self.values[frame * width + pair] = value;
    }

    pub fn frame(&self, frame: usize) -> &[f64] {
        let width = self.pairs.len();
        &self.values[frame * width..(frame + 1) * width]
    }

    pub fn column(&self, pair: usize) -> Vec<f64> {
        (0..self.frame_count).map(|f| self.get(f, pair)).collect()
    }

    /// Per-pair energy averaged over all frames.
    pub fn mean_per_pair(&self) -> Vec<f64> {
        let n = self.frame_count as f64;
        (0..self.pairs.len())
            .map(|p| (0..self.frame_count).map(|f| self.get(f, p)).sum::<f64>() / n)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnergyTables {
    pub electrostatic: EnergyTable,
    pub lennard_jones: EnergyTable,
}

#[derive(Debug, Clone)]
pub struct NonBondedEvaluator {
    config: EvaluatorConfig,
    slices: NeighborSliceTable,
    fragment_count: usize,
}

impl NonBondedEvaluator {
    pub fn new(
        slices: NeighborSliceTable,
        fragment_count: usize,
        config: EvaluatorConfig,
    ) -> Result<Self, NonBondedError> {
        config.validate()?;
        if fragment_count == 0 {
            return Err(NonBondedError::InvalidConfig(
                "fragment count must be at least 1".to_string(),
            ));
        }
        for slice in slices.slices().iter().filter(|s| !s.touches_core) {
            for side in [&slice.a, &slice.b] {
                if side.len() % fragment_count != 0 {
                    return Err(NonBondedError::IndivisibleFragments {
                        pair: slice.pair.clone(),
                        count: side.len(),
                        fragments: fragment_count,
                    });
                }
            }
        }
        Ok(Self {
            config,
            slices,
            fragment_count,
        })
    }

    /// Builds slices for every type combination in `topology`, restricted to
    /// `config.pairs` when a selection is given.
    pub fn from_topology(
        topology: &Topology,
        config: EvaluatorConfig,
    ) -> Result<Self, NonBondedError> {
        let mut slices = NeighborSliceTable::from_topology(topology);
        if let Some(keep) = &config.pairs {
            slices.retain_pairs(keep)?;
            debug!(pairs = slices.len(), "Pair selection applied.");
        }
        Self::new(slices, topology.fragment_count(), config)
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    pub fn slices(&self) -> &NeighborSliceTable {
        &self.slices
    }

    pub fn pairs(&self) -> impl Iterator<Item = &AtomPair> {
        self.slices.pairs()
    }

    pub fn pair_labels(&self) -> Vec<String> {
        self.pairs().map(ToString::to_string).collect()
    }

    /// Fails with every pair that `table` does not cover.
    pub fn validate_table(&self, table: &AtomPairTable) -> Result<(), NonBondedError> {
        let missing = table.missing(self.slices.pairs());
        if missing.is_empty() {
            Ok(())
        } else {
            Err(NonBondedError::MissingPairParameters(missing))
        }
    }

    #[instrument(skip_all, name = "nonbonded_evaluate")]
    pub fn evaluate(
        &self,
        trajectory: &Trajectory,
        table: &AtomPairTable,
    ) -> Result<EnergyTables, NonBondedError> {
        self.validate_table(table)?;
        self.validate_indices(trajectory.atom_count())?;

        let pairs: Vec<AtomPair> = self.slices.pairs().cloned().collect();
        let frame_count = trajectory.frame_count();
        let mut electrostatic = EnergyTable::zeros(pairs.clone(), frame_count);
        let mut lennard_jones = EnergyTable::zeros(pairs, frame_count);

        for (p, slice) in self.slices.slices().iter().enumerate() {
            // Checked by validate_table above.
            let params = table
                .get(&slice.pair)
                .copied()
                .ok_or_else(|| NonBondedError::MissingPairParameters(vec![slice.pair.clone()]))?;
            let totals = self.evaluate_slice(trajectory, slice, params);
            let scale = if slice.pair.is_same_type() { 0.5 } else { 1.0 };

            for (frame, (elstat, lj)) in totals.into_iter().enumerate() {
                let (elstat, lj) = (elstat * scale, lj * scale);
                if !elstat.is_finite() {
                    return Err(NonBondedError::NonFiniteEnergy {
                        channel: "electrostatic",
                        pair: slice.pair.clone(),
                        frame,
                    });
                }
                if !lj.is_finite() {
                    return Err(NonBondedError::NonFiniteEnergy {
                        channel: "lennard-jones",
                        pair: slice.pair.clone(),
                        frame,
                    });
                }
                electrostatic.set(frame, p, elstat);
                lennard_jones.set(frame, p, lj);
            }
            trace!(pair = %slice.pair, "Pair energies computed.");
        }

        debug!(
            frames = frame_count,
            pairs = self.slices.len(),
            "Non-bonded evaluation finished."
        );
        Ok(EnergyTables {
            electrostatic,
            lennard_jones,
        })
    }

    fn validate_indices(&self, atom_count: usize) -> Result<(), NonBondedError> {
        let max_index = self
            .slices
            .slices()
            .iter()
            .flat_map(|s| s.a.iter().chain(s.b.iter()))
            .copied()
            .max();
        match max_index {
            Some(index) if index >= atom_count => {
                Err(NonBondedError::AtomIndexOutOfRange { index, atom_count })
            }
            _ => Ok(()),
        }
    }

    fn exclusion_for(&self, slice: &PairSlice) -> Exclusion {
        if slice.touches_core {
            Exclusion::ZeroDistance
        } else {
            Exclusion::SameFragment {
                a_len: (slice.a.len() / self.fragment_count).max(1),
                b_len: (slice.b.len() / self.fragment_count).max(1),
            }
        }
    }

    fn block_width(&self, slice: &PairSlice) -> usize {
        match self.config.distance_mode {
            DistanceMode::Dense => slice.b.len(),
            DistanceMode::Neighbors { max_neighbors, .. } => max_neighbors.min(slice.b.len()),
        }
    }

    fn distance_block(&self, frame: &[Point3<f64>], slice: &PairSlice) -> DistanceBlock {
        match self.config.distance_mode {
            DistanceMode::Dense => dense_block(frame, &slice.a, &slice.b),
            DistanceMode::Neighbors {
                cutoff,
                max_neighbors,
            } => neighbor_block(frame, &slice.a, &slice.b, cutoff, max_neighbors),
        }
    }

    /// Summed (electrostatic, Lennard-Jones) energy of one pair for every frame, before the
    /// same-type halving.
    fn evaluate_slice(
        &self,
        trajectory: &Trajectory,
        slice: &PairSlice,
        params: PairParams,
    ) -> Vec<(f64, f64)> {
        let exclusion = self.exclusion_for(slice);
        let block_size = slice.a.len() * self.block_width(slice);
        let batches = frame_batches(
            trajectory.frame_count(),
            block_size,
            self.config.max_array_size,
        );

        let mut totals = Vec::with_capacity(trajectory.frame_count());
        for range in batches {
            trace!(pair = %slice.pair, start = range.start, end = range.end, "Evaluating frame batch.");

            let frame_energy = |frame: usize| {
                let mut block = self.distance_block(&trajectory.frames()[frame], slice);
                block.apply_exclusion(exclusion);
                block
                    .distances()
                    .iter()
                    .fold((0.0, 0.0), |(elstat, lj), &d| {
                        (
                            elstat + coulomb(d, params.charge_product),
                            lj + lennard_jones_12_6(d, params.sigma, params.epsilon),
                        )
                    })
            };

            #[cfg(not(feature = "parallel"))]
            let batch: Vec<(f64, f64)> = range.map(frame_energy).collect();

            #[cfg(feature = "parallel")]
            let batch: Vec<(f64, f64)> = range.into_par_iter().map(frame_energy).collect();

            totals.extend(batch);
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::forcefield::potentials::COULOMB_CONSTANT;

    const TOLERANCE: f64 = 1e-9;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn params(q: f64, sigma: f64, epsilon: f64) -> PairParams {
        PairParams {
            charge_product: q,
            sigma,
            epsilon,
        }
    }

    fn unit_table(pairs: &[AtomPair]) -> AtomPairTable {
        pairs
            .iter()
            .map(|p| (p.clone(), params(1.0, 1.0, 1.0)))
            .collect()
    }

    fn topology() -> Topology {
        // A | (B C) (B C)
        Topology::new(strings(&["A"]), strings(&["B", "C"]), 2).unwrap()
    }

    fn trajectory() -> Trajectory {
        let frames = (0..5)
            .map(|f| {
                let s = 1.0 + 0.1 * f as f64;
                vec![
                    Point3::new(0.0, 0.0, 0.0),
                    Point3::new(s, 0.0, 0.0),
                    Point3::new(s, 1.0, 0.0),
                    Point3::new(-s, 0.5, 0.0),
                    Point3::new(-s, 1.5, 0.3),
                ]
            })
            .collect();
        Trajectory::new(frames).unwrap()
    }

    fn pair_index(evaluator: &NonBondedEvaluator, a: &str, b: &str) -> usize {
        let target = AtomPair::new(a, b);
        evaluator.pairs().position(|p| *p == target).unwrap()
    }

    #[test]
    fn slice_table_covers_every_type_combination() {
        let table = NeighborSliceTable::from_topology(&topology());
        let labels: Vec<String> = table.pairs().map(ToString::to_string).collect();
        assert_eq!(labels, vec!["A A", "A B", "A C", "B B", "B C", "C C"]);
        let bc = &table.slices()[4];
        assert_eq!(bc.a, vec![1, 3]);
        assert_eq!(bc.b, vec![2, 4]);
        assert!(!bc.touches_core);
        assert!(table.slices()[1].touches_core);
    }

    #[test]
    fn missing_pair_parameters_are_reported_before_evaluation() {
        let evaluator =
            NonBondedEvaluator::from_topology(&topology(), EvaluatorConfig::default()).unwrap();
        let mut pairs: Vec<AtomPair> = evaluator.pairs().cloned().collect();
        pairs.retain(|p| *p != AtomPair::new("B", "C"));
        let table = unit_table(&pairs);

        let result = evaluator.evaluate(&trajectory(), &table);
        assert_eq!(
            result,
            Err(NonBondedError::MissingPairParameters(vec![AtomPair::new(
                "B", "C"
            )]))
        );
    }

    #[test]
    fn same_fragment_contacts_are_excluded() {
        let evaluator =
            NonBondedEvaluator::from_topology(&topology(), EvaluatorConfig::default()).unwrap();
        let pairs: Vec<AtomPair> = evaluator.pairs().cloned().collect();
        let tables = evaluator.evaluate(&trajectory(), &unit_table(&pairs)).unwrap();

        let traj = trajectory();
        let frame = traj.frame(0).unwrap();
        // B-C only across fragments: atoms (1,4) and (3,2).
        let expected = COULOMB_CONSTANT
            * (1.0 / nalgebra::distance(&frame[1], &frame[4])
                + 1.0 / nalgebra::distance(&frame[3], &frame[2]));
        let p = pair_index(&evaluator, "B", "C");
        assert!((tables.electrostatic.get(0, p) - expected).abs() < TOLERANCE);
    }

    #[test]
    fn same_type_pairs_are_halved_and_symmetric() {
        let evaluator =
            NonBondedEvaluator::from_topology(&topology(), EvaluatorConfig::default()).unwrap();
        let pairs: Vec<AtomPair> = evaluator.pairs().cloned().collect();
        let tables = evaluator.evaluate(&trajectory(), &unit_table(&pairs)).unwrap();

        let traj = trajectory();
        let frame = traj.frame(2).unwrap();
        // B-B: the two B atoms sit in different fragments; each ordered pair counted once.
        let d = nalgebra::distance(&frame[1], &frame[3]);
        let p = pair_index(&evaluator, "B", "B");
        assert!((tables.electrostatic.get(2, p) - COULOMB_CONSTANT / d).abs() < TOLERANCE);
        let rho6 = (1.0 / d).powi(6);
        assert!((tables.lennard_jones.get(2, p) - 4.0 * (rho6 * rho6 - rho6)).abs() < TOLERANCE);
    }

    #[test]
    fn core_self_pair_excludes_only_zero_distance() {
        let topo = Topology::new(strings(&["A", "A"]), strings(&["B"]), 1).unwrap();
        let evaluator =
            NonBondedEvaluator::from_topology(&topo, EvaluatorConfig::default()).unwrap();
        let traj = Trajectory::new(vec![vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(5.0, 0.0, 0.0),
        ]])
        .unwrap();
        let pairs: Vec<AtomPair> = evaluator.pairs().cloned().collect();
        let tables = evaluator.evaluate(&traj, &unit_table(&pairs)).unwrap();
        let p = pair_index(&evaluator, "A", "A");
        assert!((tables.electrostatic.get(0, p) - 0.5 * COULOMB_CONSTANT).abs() < TOLERANCE);
    }

    #[test]
    fn batching_does_not_change_results() {
        let pairs: Vec<AtomPair> = NeighborSliceTable::from_topology(&topology())
            .pairs()
            .cloned()
            .collect();
        let table: AtomPairTable = pairs
            .iter()
            .enumerate()
            .map(|(i, p)| (p.clone(), params(0.3 - 0.1 * i as f64, 1.1, 0.2)))
            .collect();

        let unbatched =
            NonBondedEvaluator::from_topology(&topology(), EvaluatorConfig::default()).unwrap();
        let batched = NonBondedEvaluator::from_topology(
            &topology(),
            EvaluatorConfig {
                max_array_size: 3,
                ..EvaluatorConfig::default()
            },
        )
        .unwrap();

        let traj = trajectory();
        assert_eq!(
            unbatched.evaluate(&traj, &table).unwrap(),
            batched.evaluate(&traj, &table).unwrap()
        );
    }

    #[test]
    fn neighbor_mode_with_wide_cutoff_matches_dense_mode() {
        let pairs: Vec<AtomPair> = NeighborSliceTable::from_topology(&topology())
            .pairs()
            .cloned()
            .collect();
        let table = unit_table(&pairs);
        let dense =
            NonBondedEvaluator::from_topology(&topology(), EvaluatorConfig::default()).unwrap();
        let neighbors = NonBondedEvaluator::from_topology(
            &topology(),
            EvaluatorConfig {
                distance_mode: DistanceMode::Neighbors {
                    cutoff: 100.0,
                    max_neighbors: 10,
                },
                ..EvaluatorConfig::default()
            },
        )
        .unwrap();

        let traj = trajectory();
        let a = dense.evaluate(&traj, &table).unwrap();
        let b = neighbors.evaluate(&traj, &table).unwrap();
        for f in 0..traj.frame_count() {
            for p in 0..pairs.len() {
                assert!((a.electrostatic.get(f, p) - b.electrostatic.get(f, p)).abs() < 1e-9);
                assert!((a.lennard_jones.get(f, p) - b.lennard_jones.get(f, p)).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn neighbor_mode_respects_cutoff() {
        let topo = Topology::new(strings(&["A"]), strings(&["B"]), 2).unwrap();
        let evaluator = NonBondedEvaluator::from_topology(
            &topo,
            EvaluatorConfig {
                distance_mode: DistanceMode::Neighbors {
                    cutoff: 1.5,
                    max_neighbors: 4,
                },
                ..EvaluatorConfig::default()
            },
        )
        .unwrap();
        let traj = Trajectory::new(vec![vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(3.0, 0.0, 0.0),
        ]])
        .unwrap();
        let pairs: Vec<AtomPair> = evaluator.pairs().cloned().collect();
        let tables = evaluator.evaluate(&traj, &unit_table(&pairs)).unwrap();
        let p = pair_index(&evaluator, "A", "B");
        assert!((tables.electrostatic.get(0, p) - COULOMB_CONSTANT).abs() < TOLERANCE);
    }

    #[test]
    fn overlapping_fragment_atoms_surface_as_non_finite_energy() {
        let topo = Topology::new(vec![], strings(&["B"]), 2).unwrap();
        let evaluator =
            NonBondedEvaluator::from_topology(&topo, EvaluatorConfig::default()).unwrap();
        let traj = Trajectory::new(vec![vec![Point3::origin(), Point3::origin()]]).unwrap();
        let pairs: Vec<AtomPair> = evaluator.pairs().cloned().collect();
        let result = evaluator.evaluate(&traj, &unit_table(&pairs));
        assert!(matches!(
            result,
            Err(NonBondedError::NonFiniteEnergy { frame: 0, .. })
        ));
    }

    #[test]
    fn indivisible_fragments_are_rejected() {
        let slices = NeighborSliceTable::new(vec![PairSlice {
            pair: AtomPair::new("B", "B"),
            a: vec![0, 1, 2],
            b: vec![0, 1, 2],
            touches_core: false,
        }]);
        let result = NonBondedEvaluator::new(slices, 2, EvaluatorConfig::default());
        assert!(matches!(
            result,
            Err(NonBondedError::IndivisibleFragments { count: 3, .. })
        ));
    }

    #[test]
    fn short_trajectory_is_rejected() {
        let evaluator =
            NonBondedEvaluator::from_topology(&topology(), EvaluatorConfig::default()).unwrap();
        let traj = Trajectory::new(vec![vec![Point3::origin(); 3]]).unwrap();
        let pairs: Vec<AtomPair> = evaluator.pairs().cloned().collect();
        assert_eq!(
            evaluator.evaluate(&traj, &unit_table(&pairs)),
            Err(NonBondedError::AtomIndexOutOfRange {
                index: 4,
                atom_count: 3
            })
        );
    }

    #[test]
    fn invalid_neighbor_config_is_rejected() {
        let config = EvaluatorConfig {
            distance_mode: DistanceMode::Neighbors {
                cutoff: -1.0,
                max_neighbors: 3,
            },
            max_array_size: 10,
            pairs: None,
        };
        assert!(matches!(
            config.validate(),
            Err(NonBondedError::InvalidConfig(_))
        ));
    }

    #[test]
    fn mean_per_pair_averages_over_frames() {
        let evaluator =
            NonBondedEvaluator::from_topology(&topology(), EvaluatorConfig::default()).unwrap();
        let pairs: Vec<AtomPair> = evaluator.pairs().cloned().collect();
        let tables = evaluator.evaluate(&trajectory(), &unit_table(&pairs)).unwrap();
        let means = tables.electrostatic.mean_per_pair();
        let p = pair_index(&evaluator, "A", "B");
        let column = tables.electrostatic.column(p);
        let expected = column.iter().sum::<f64>() / column.len() as f64;
        assert!((means[p] - expected).abs() < TOLERANCE);
    }

    #[test]
    fn pair_selection_drops_unselected_pairs() {
        let config = EvaluatorConfig {
            pairs: Some(vec![AtomPair::new("B", "A"), AtomPair::new("C", "C")]),
            ..EvaluatorConfig::default()
        };
        let evaluator = NonBondedEvaluator::from_topology(&topology(), config).unwrap();
        assert_eq!(evaluator.pair_labels(), vec!["A B", "C C"]);

        // Only the selected pairs need parameters.
        let table = unit_table(&[AtomPair::new("A", "B"), AtomPair::new("C", "C")]);
        assert!(evaluator.validate_table(&table).is_ok());
        let tables = evaluator.evaluate(&trajectory(), &table).unwrap();
        assert_eq!(tables.electrostatic.pairs().len(), 2);
        assert_eq!(tables.lennard_jones.pairs().len(), 2);
    }

    #[test]
    fn pair_selection_must_name_topology_pairs() {
        let unknown = EvaluatorConfig {
            pairs: Some(vec![AtomPair::new("A", "X")]),
            ..EvaluatorConfig::default()
        };
        assert!(matches!(
            NonBondedEvaluator::from_topology(&topology(), unknown),
            Err(NonBondedError::InvalidConfig(_))
        ));

        let empty = EvaluatorConfig {
            pairs: Some(vec![]),
            ..EvaluatorConfig::default()
        };
        assert!(matches!(
            empty.validate(),
            Err(NonBondedError::InvalidConfig(_))
        ));
    }
}
