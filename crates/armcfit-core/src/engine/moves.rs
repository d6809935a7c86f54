use super::params::{MoveUnit, ParamError, ParamStore};
use rand::Rng;
use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum MoveRangeError {
    #[error("Move range is empty")]
    Empty,
    #[error("Move factor {0} is not a positive finite number")]
    InvalidFactor(f64),
    #[error("Move range consists only of 1.0 and can never change a parameter")]
    Identity,
    #[error("Invalid symmetric range: {0}")]
    InvalidSymmetric(String),
}

/// Ordered set of multiplicative move factors.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveRange {
    factors: Vec<f64>,
}

impl MoveRange {
    pub fn new(factors: Vec<f64>) -> Result<Self, MoveRangeError> {
        if factors.is_empty() {
            return Err(MoveRangeError::Empty);
        }
        if let Some(&bad) = factors.iter().find(|f| !(f.is_finite() && **f > 0.0)) {
            return Err(MoveRangeError::InvalidFactor(bad));
        }
        if factors.iter().all(|&f| f == 1.0) {
            return Err(MoveRangeError::Identity);
        }
        Ok(Self { factors })
    }

    /// `1 - x` and `1 + x` for `x` in `start, start + step, ...` below `stop`, sorted ascending.
    pub fn symmetric(start: f64, stop: f64, step: f64) -> Result<Self, MoveRangeError> {
        if !(step.is_finite() && step > 0.0) {
            return Err(MoveRangeError::InvalidSymmetric(format!(
                "step must be positive, got {step}"
            )));
        }
        if !(start.is_finite() && stop.is_finite() && start < stop && start >= 0.0) {
            return Err(MoveRangeError::InvalidSymmetric(format!(
                "need 0 <= start < stop, got start={start}, stop={stop}"
            )));
        }
        let count = ((stop - start) / step).ceil() as usize;
        let offsets: Vec<f64> = (0..count).map(|i| start + i as f64 * step).collect();

        let mut factors: Vec<f64> = offsets.iter().rev().map(|x| 1.0 - x).collect();
        factors.extend(offsets.iter().map(|x| 1.0 + x));
        Self::new(factors)
    }

    pub fn factors(&self) -> &[f64] {
        &self.factors
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }
}

impl Default for MoveRange {
    /// 0.900..0.995 and 1.005..1.100 in steps of 0.005.
    fn default() -> Self {
        let offsets = (0..20).map(|i| 0.005 + 0.005 * i as f64);
        let mut factors: Vec<f64> = offsets.clone().rev().map(|x| 1.0 - x).collect();
        factors.extend(offsets.map(|x| 1.0 + x));
        Self { factors }
    }
}

/// How a proposal that leaves a parameter's bounds is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BoundsPolicy {
    /// Discard the draw and try again.
    #[default]
    Reject,
    /// Clamp the offending values to their bounds.
    Clamp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Move {
    pub unit: String,
    pub factor: f64,
    pub attempts: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome {
    /// The store now holds the proposed values.
    Proposed(Move),
    /// Every attempt violated the bounds; the store is unchanged.
    Exhausted { attempts: usize },
}

#[derive(Debug, Clone)]
pub struct MoveGenerator {
    range: MoveRange,
    policy: BoundsPolicy,
    max_attempts: usize,
    units: Vec<MoveUnit>,
}

impl MoveGenerator {
    pub fn new(
        store: &ParamStore,
        range: MoveRange,
        policy: BoundsPolicy,
        max_attempts: usize,
    ) -> Result<Self, ParamError> {
        let units = store.movable_units();
        if units.is_empty() {
            return Err(ParamError::NoMovableParameters);
        }
        Ok(Self {
            range,
            policy,
            max_attempts: max_attempts.max(1),
            units,
        })
    }

    pub fn units(&self) -> &[MoveUnit] {
        &self.units
    }

    /// Picks one unit and one factor uniformly and applies the move to `store`.
    pub fn propose<R: Rng + ?Sized>(
        &self,
        store: &mut ParamStore,
        rng: &mut R,
    ) -> Result<MoveOutcome, ParamError> {
        for attempt in 1..=self.max_attempts {
            // Both collections are validated non-empty at construction.
            let unit = self
                .units
                .choose(rng)
                .ok_or(ParamError::NoMovableParameters)?;
            let factor = *self
                .range
                .factors()
                .choose(rng)
                .ok_or(ParamError::NoMovableParameters)?;

            let mut values = match store.scaled_values(unit, factor) {
                Ok(values) => values,
                Err(ParamError::NeutralityUnsatisfiable) => {
                    trace!(unit = %unit.name, factor, attempt, "Neutrality cannot be kept; redrawing.");
                    continue;
                }
                Err(e) => return Err(e),
            };

            if !store.within_bounds(&values) {
                match self.policy {
                    BoundsPolicy::Reject => {
                        trace!(unit = %unit.name, factor, attempt, "Move leaves bounds; redrawing.");
                        continue;
                    }
                    BoundsPolicy::Clamp => store.clamp(&mut values),
                }
            }

            store.set_values(&values)?;
            return Ok(MoveOutcome::Proposed(Move {
                unit: unit.name.clone(),
                factor,
                attempts: attempt,
            }));
        }
        Ok(MoveOutcome::Exhausted {
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::forcefield::params::ParamGroup;
    use crate::engine::params::ParamRecord;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn default_range_is_symmetric_without_identity() {
        let range = MoveRange::default();
        assert_eq!(range.len(), 40);
        assert!((range.factors()[0] - 0.9).abs() < 1e-12);
        assert!((range.factors()[19] - 0.995).abs() < 1e-12);
        assert!((range.factors()[20] - 1.005).abs() < 1e-12);
        assert!((range.factors()[39] - 1.1).abs() < 1e-12);
        assert!(range.factors().iter().all(|&f| f != 1.0));
    }

    #[test]
    fn symmetric_matches_default_range() {
        let range = MoveRange::symmetric(0.005, 0.1001, 0.005).unwrap();
        assert_eq!(range.len(), MoveRange::default().len());
        for (a, b) in range.factors().iter().zip(MoveRange::default().factors()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn malformed_ranges_are_rejected() {
        assert_eq!(MoveRange::new(vec![]), Err(MoveRangeError::Empty));
        assert_eq!(MoveRange::new(vec![1.0, 1.0]), Err(MoveRangeError::Identity));
        assert_eq!(
            MoveRange::new(vec![0.9, -1.0]),
            Err(MoveRangeError::InvalidFactor(-1.0))
        );
        assert!(matches!(
            MoveRange::new(vec![f64::NAN]),
            Err(MoveRangeError::InvalidFactor(_))
        ));
        assert!(MoveRange::symmetric(0.1, 0.05, 0.01).is_err());
    }

    #[test]
    fn propose_keeps_values_within_bounds_under_reject() {
        let mut store = ParamStore::new(vec![
            ParamRecord::new(ParamGroup::Sigma, "A", 1.0).bounds(0.95, 1.05),
            ParamRecord::new(ParamGroup::Epsilon, "A", 1.0).bounds(0.0, 10.0),
        ])
        .unwrap();
        let generator = MoveGenerator::new(
            &store,
            MoveRange::new(vec![0.9, 1.1]).unwrap(),
            BoundsPolicy::Reject,
            10,
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..50 {
            let before = store.values();
            match generator.propose(&mut store, &mut rng).unwrap() {
                MoveOutcome::Proposed(_) => {}
                MoveOutcome::Exhausted { .. } => assert_eq!(store.values(), before),
            }
            store.check_bounds().unwrap();
        }
        assert_eq!(store.values()[0], 1.0);
    }

    #[test]
    fn propose_reports_exhaustion_when_no_move_fits() {
        let mut store = ParamStore::new(vec![
            ParamRecord::new(ParamGroup::Sigma, "A", 1.0).bounds(1.0, 1.0),
        ])
        .unwrap();
        let generator = MoveGenerator::new(
            &store,
            MoveRange::new(vec![0.9, 1.1]).unwrap(),
            BoundsPolicy::Reject,
            3,
        )
        .unwrap();
        let outcome = generator
            .propose(&mut store, &mut StdRng::seed_from_u64(1))
            .unwrap();
        assert_eq!(outcome, MoveOutcome::Exhausted { attempts: 3 });
        assert_eq!(store.values(), vec![1.0]);
    }

    #[test]
    fn clamp_policy_pins_values_to_bounds() {
        let mut store = ParamStore::new(vec![
            ParamRecord::new(ParamGroup::Sigma, "A", 1.0).bounds(1.0, 1.0),
        ])
        .unwrap();
        let generator = MoveGenerator::new(
            &store,
            MoveRange::new(vec![1.5]).unwrap(),
            BoundsPolicy::Clamp,
            1,
        )
        .unwrap();
        let outcome = generator
            .propose(&mut store, &mut StdRng::seed_from_u64(1))
            .unwrap();
        assert!(matches!(outcome, MoveOutcome::Proposed(Move { factor, .. }) if factor == 1.5));
        assert_eq!(store.values(), vec![1.0]);
    }

    #[test]
    fn linked_parameters_move_by_the_same_factor() {
        let mut store = ParamStore::new(vec![
            ParamRecord::new(ParamGroup::Sigma, "A", 2.0).link("g"),
            ParamRecord::new(ParamGroup::Sigma, "B", 4.0).link("g"),
        ])
        .unwrap();
        let generator = MoveGenerator::new(
            &store,
            MoveRange::new(vec![1.1]).unwrap(),
            BoundsPolicy::Reject,
            1,
        )
        .unwrap();
        generator
            .propose(&mut store, &mut StdRng::seed_from_u64(3))
            .unwrap();
        let v = store.values();
        assert!((v[0] - 2.2).abs() < 1e-12);
        assert!((v[1] - 4.4).abs() < 1e-12);
    }

    #[test]
    fn all_frozen_store_has_no_moves() {
        let store = ParamStore::new(vec![
            ParamRecord::new(ParamGroup::Sigma, "A", 1.0).frozen(true),
        ])
        .unwrap();
        assert!(matches!(
            MoveGenerator::new(&store, MoveRange::default(), BoundsPolicy::Reject, 1),
            Err(ParamError::NoMovableParameters)
        ));
    }
}
