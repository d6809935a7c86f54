use crate::core::forcefield::params::{Forcefield, ForcefieldError, ParamGroup};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ParamError {
    #[error("Parameter '{key_path}' = {value} lies outside [{min}, {max}]")]
    OutOfBounds {
        key_path: String,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("Parameter '{key_path}' has invalid bounds [{min}, {max}]")]
    InvalidBounds { key_path: String, min: f64, max: f64 },
    #[error("Parameter '{0}' is defined more than once")]
    Duplicate(String),
    #[error("Expected {expected} parameter values, got {found}")]
    LengthMismatch { expected: usize, found: usize },
    #[error("Charge neutrality cannot be kept: no adjustable neutral charge outside the move")]
    NeutralityUnsatisfiable,
    #[error("No unfrozen parameters to move")]
    NoMovableParameters,
    #[error("Value {value} cannot be keyed at {decimals} decimals without overflow")]
    KeyOverflow { value: f64, decimals: u32 },
    #[error("Forcefield lookup failed: {0}")]
    Forcefield(#[from] ForcefieldError),
}

/// One tunable scalar together with its bounds and grouping metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamRecord {
    pub group: ParamGroup,
    /// Atom type (`"Cd"`) or atom pair (`"Cd Se"`).
    pub label: String,
    pub key_path: String,
    pub unit: String,
    pub value: f64,
    pub min: f64,
    pub max: f64,
    /// Number of atoms carrying this value; weights the charge-neutrality sum.
    pub count: usize,
    pub frozen: bool,
    /// Parameters sharing a link name always move by the same factor.
    pub link: Option<String>,
    /// Whether this charge takes part in the neutrality constraint.
    pub neutral: bool,
}

impl ParamRecord {
    pub fn new(group: ParamGroup, label: impl Into<String>, value: f64) -> Self {
        let label = label.into();
        Self {
            key_path: format!("{group}.{label}"),
            unit: default_unit(group).to_string(),
            group,
            label,
            value,
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
            count: 1,
            frozen: false,
            link: None,
            neutral: false,
        }
    }

    pub fn bounds(mut self, min: f64, max: f64) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn frozen(mut self, frozen: bool) -> Self {
        self.frozen = frozen;
        self
    }

    pub fn link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn neutral(mut self, neutral: bool) -> Self {
        self.neutral = neutral;
        self
    }

    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    fn is_neutral_charge(&self) -> bool {
        self.neutral && self.group == ParamGroup::Charge
    }
}

fn default_unit(group: ParamGroup) -> &'static str {
    match group {
        ParamGroup::Charge => "e",
        ParamGroup::Sigma => "angstrom",
        ParamGroup::Epsilon => "kcal/mol",
    }
}

/// Canonical cache key: every parameter value rounded to a fixed number of decimals.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateKey(Vec<i64>);

impl StateKey {
    /// Fails when a scaled value does not fit an `i64`, since a saturating cast would merge
    /// distinct states into one key.
    pub fn quantize(values: &[f64], decimals: u32) -> Result<Self, ParamError> {
        let scale = 10f64.powi(decimals as i32);
        values
            .iter()
            .map(|&value| {
                let scaled = (value * scale).round();
                // i64::MAX as f64 rounds up to 2^63, which is already out of range.
                if scaled.is_finite() && scaled >= i64::MIN as f64 && scaled < i64::MAX as f64 {
                    Ok(scaled as i64)
                } else {
                    Err(ParamError::KeyOverflow { value, decimals })
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.0
    }
}

/// The set of parameters a move acts on: one unlinked parameter or a whole link group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveUnit {
    pub name: String,
    pub members: Vec<usize>,
}

/// Ordered, validated collection of [`ParamRecord`]s.
///
/// Records are kept sorted by group and label so the value vector, and hence the cache key,
/// has a stable layout.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamStore {
    records: Vec<ParamRecord>,
}

impl ParamStore {
    pub fn new(mut records: Vec<ParamRecord>) -> Result<Self, ParamError> {
        records.sort_by(|a, b| (a.group, &a.label).cmp(&(b.group, &b.label)));

        let mut seen = HashSet::new();
        for r in &records {
            if !seen.insert((r.group, r.label.clone())) {
                return Err(ParamError::Duplicate(r.key_path.clone()));
            }
            if r.min.is_nan() || r.max.is_nan() || r.min > r.max {
                return Err(ParamError::InvalidBounds {
                    key_path: r.key_path.clone(),
                    min: r.min,
                    max: r.max,
                });
            }
            if !r.value.is_finite() || !r.contains(r.value) {
                return Err(ParamError::OutOfBounds {
                    key_path: r.key_path.clone(),
                    value: r.value,
                    min: r.min,
                    max: r.max,
                });
            }
        }
        Ok(Self { records })
    }

    /// Seeds every record's value from `forcefield`, ignoring whatever value it carried.
    pub fn seeded_from(
        forcefield: &Forcefield,
        records: Vec<ParamRecord>,
    ) -> Result<Self, ParamError> {
        let records = records
            .into_iter()
            .map(|mut r| {
                r.value = forcefield.get(r.group, &r.label)?;
                Ok(r)
            })
            .collect::<Result<Vec<_>, ParamError>>()?;
        Self::new(records)
    }

    pub fn records(&self) -> &[ParamRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn values(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.value).collect()
    }

    pub fn key_paths(&self) -> Vec<String> {
        self.records.iter().map(|r| r.key_path.clone()).collect()
    }

    pub fn key(&self, decimals: u32) -> Result<StateKey, ParamError> {
        StateKey::quantize(&self.values(), decimals)
    }

    /// Replaces all values at once.
    ///
    /// Bounds are not checked; callers decide how out-of-range candidates are handled.
    pub fn set_values(&mut self, values: &[f64]) -> Result<(), ParamError> {
        if values.len() != self.records.len() {
            return Err(ParamError::LengthMismatch {
                expected: self.records.len(),
                found: values.len(),
            });
        }
        for (r, &v) in self.records.iter_mut().zip(values) {
            r.value = v;
        }
        Ok(())
    }

    pub fn within_bounds(&self, values: &[f64]) -> bool {
        values.len() == self.records.len()
            && self
                .records
                .iter()
                .zip(values)
                .all(|(r, &v)| v.is_finite() && r.contains(v))
    }

    pub fn clamp(&self, values: &mut [f64]) {
        for (r, v) in self.records.iter().zip(values.iter_mut()) {
            *v = v.clamp(r.min, r.max);
        }
    }

    pub fn check_bounds(&self) -> Result<(), ParamError> {
        for r in &self.records {
            if !r.contains(r.value) {
                return Err(ParamError::OutOfBounds {
                    key_path: r.key_path.clone(),
                    value: r.value,
                    min: r.min,
                    max: r.max,
                });
            }
        }
        Ok(())
    }

    /// Unfrozen parameters grouped into the units a move acts on, in record order.
    pub fn movable_units(&self) -> Vec<MoveUnit> {
        let mut linked: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        let mut units = Vec::new();
        for (i, r) in self.records.iter().enumerate().filter(|(_, r)| !r.frozen) {
            match &r.link {
                Some(name) => linked.entry(name.as_str()).or_default().push(i),
                None => units.push(MoveUnit {
                    name: r.key_path.clone(),
                    members: vec![i],
                }),
            }
        }
        units.extend(linked.into_iter().map(|(name, members)| MoveUnit {
            name: name.to_string(),
            members,
        }));
        units
    }

    /// Candidate values after multiplying `unit` by `factor`.
    ///
    /// When the unit touches a neutral charge, every other unfrozen neutral charge is rescaled
    /// by a common factor so that `Σ count·q` over the neutral charges is unchanged.
    pub fn scaled_values(&self, unit: &MoveUnit, factor: f64) -> Result<Vec<f64>, ParamError> {
        let mut values = self.values();
        for &i in &unit.members {
            values[i] *= factor;
        }

        let touches_neutral = unit
            .members
            .iter()
            .any(|&i| self.records[i].is_neutral_charge());
        if !touches_neutral {
            return Ok(values);
        }

        let weight = |i: usize| self.records[i].count as f64;
        let delta: f64 = unit
            .members
            .iter()
            .filter(|&&i| self.records[i].is_neutral_charge())
            .map(|&i| weight(i) * (values[i] - self.records[i].value))
            .sum();

        let rest: Vec<usize> = self
            .records
            .iter()
            .enumerate()
            .filter(|(i, r)| r.is_neutral_charge() && !r.frozen && !unit.members.contains(i))
            .map(|(i, _)| i)
            .collect();
        let rest_sum: f64 = rest.iter().map(|&i| weight(i) * values[i]).sum();

        if delta == 0.0 {
            return Ok(values);
        }
        if rest_sum == 0.0 {
            return Err(ParamError::NeutralityUnsatisfiable);
        }
        let scale = (rest_sum - delta) / rest_sum;
        for i in rest {
            values[i] *= scale;
        }
        Ok(values)
    }

    /// Weighted charge sum `Σ count·q` over the neutral charges.
    pub fn neutral_charge_sum(&self) -> f64 {
        self.records
            .iter()
            .filter(|r| r.is_neutral_charge())
            .map(|r| r.count as f64 * r.value)
            .sum()
    }

    /// Writes every value into a copy of `forcefield`.
    pub fn apply_to(&self, forcefield: &Forcefield) -> Result<Forcefield, ParamError> {
        let mut ff = forcefield.clone();
        for r in &self.records {
            ff.set(r.group, &r.label, r.value)?;
        }
        Ok(ff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-12;

    fn charges() -> ParamStore {
        ParamStore::new(vec![
            ParamRecord::new(ParamGroup::Charge, "Cd", 0.9)
                .bounds(0.0, 2.0)
                .count(68)
                .neutral(true),
            ParamRecord::new(ParamGroup::Charge, "Se", -0.9)
                .bounds(-2.0, 0.0)
                .count(55)
                .neutral(true),
            ParamRecord::new(ParamGroup::Charge, "O", -0.5)
                .bounds(-1.5, 0.0)
                .count(26)
                .neutral(true),
        ])
        .unwrap()
    }

    #[test]
    fn records_are_sorted_by_group_and_label() {
        let store = ParamStore::new(vec![
            ParamRecord::new(ParamGroup::Sigma, "B", 1.0),
            ParamRecord::new(ParamGroup::Charge, "B", 1.0),
            ParamRecord::new(ParamGroup::Charge, "A", 1.0),
        ])
        .unwrap();
        assert_eq!(
            store.key_paths(),
            vec!["charge.A", "charge.B", "sigma.B"]
        );
    }

    #[test]
    fn new_rejects_out_of_bounds_and_duplicates() {
        let result = ParamStore::new(vec![
            ParamRecord::new(ParamGroup::Charge, "A", 3.0).bounds(0.0, 2.0),
        ]);
        assert!(matches!(result, Err(ParamError::OutOfBounds { .. })));

        let result = ParamStore::new(vec![
            ParamRecord::new(ParamGroup::Charge, "A", 1.0),
            ParamRecord::new(ParamGroup::Charge, "A", 1.0),
        ]);
        assert_eq!(result, Err(ParamError::Duplicate("charge.A".to_string())));

        let result = ParamStore::new(vec![
            ParamRecord::new(ParamGroup::Sigma, "A", 1.0).bounds(2.0, 0.0),
        ]);
        assert!(matches!(result, Err(ParamError::InvalidBounds { .. })));
    }

    #[test]
    fn quantized_key_merges_arithmetically_equal_states() {
        let a = StateKey::quantize(&[0.1 + 0.2, 1.0], 8).unwrap();
        let b = StateKey::quantize(&[0.3, 1.0], 8).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, StateKey::quantize(&[0.3000001, 1.0], 8).unwrap());
    }

    #[test]
    fn large_values_are_rejected_instead_of_sharing_a_key() {
        assert_eq!(
            StateKey::quantize(&[10_000.0], 15),
            Err(ParamError::KeyOverflow {
                value: 10_000.0,
                decimals: 15
            })
        );
        assert!(StateKey::quantize(&[f64::NAN], 2).is_err());

        let a = StateKey::quantize(&[9_000.0], 15).unwrap();
        let b = StateKey::quantize(&[9_000.5], 15).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn movable_units_group_links_and_skip_frozen() {
        let store = ParamStore::new(vec![
            ParamRecord::new(ParamGroup::Sigma, "A", 1.0).link("shared"),
            ParamRecord::new(ParamGroup::Sigma, "B", 1.0).link("shared"),
            ParamRecord::new(ParamGroup::Sigma, "C", 1.0).frozen(true),
            ParamRecord::new(ParamGroup::Epsilon, "A", 1.0),
        ])
        .unwrap();
        let units = store.movable_units();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].name, "epsilon.A");
        assert_eq!(units[1].name, "shared");
        let linked: Vec<&str> = units[1]
            .members
            .iter()
            .map(|&i| store.records()[i].label.as_str())
            .collect();
        assert_eq!(linked, vec!["A", "B"]);
    }

    #[test]
    fn charge_move_preserves_weighted_neutral_sum() {
        let store = charges();
        let before = store.neutral_charge_sum();
        let unit = &store.movable_units()[0];
        let values = store.scaled_values(unit, 1.05).unwrap();

        let mut moved = store.clone();
        moved.set_values(&values).unwrap();
        assert!((moved.neutral_charge_sum() - before).abs() < 1e-9);
        assert!((moved.records()[0].value - 0.945).abs() < TOLERANCE);
    }

    #[test]
    fn non_neutral_move_touches_only_the_unit() {
        let store = ParamStore::new(vec![
            ParamRecord::new(ParamGroup::Sigma, "A", 2.0),
            ParamRecord::new(ParamGroup::Sigma, "B", 3.0),
        ])
        .unwrap();
        let unit = &store.movable_units()[1];
        assert_eq!(store.scaled_values(unit, 0.5).unwrap(), vec![2.0, 1.5]);
    }

    #[test]
    fn neutrality_without_adjustable_partner_fails() {
        let store = ParamStore::new(vec![
            ParamRecord::new(ParamGroup::Charge, "A", 1.0).neutral(true),
            ParamRecord::new(ParamGroup::Charge, "B", -1.0)
                .neutral(true)
                .frozen(true),
        ])
        .unwrap();
        let unit = &store.movable_units()[0];
        assert_eq!(
            store.scaled_values(unit, 1.1),
            Err(ParamError::NeutralityUnsatisfiable)
        );
    }

    #[test]
    fn bounds_checks_and_clamping() {
        let store = charges();
        assert!(store.within_bounds(&[1.0, -0.5, -1.0]));
        assert!(!store.within_bounds(&[2.5, -0.5, -1.0]));
        assert!(!store.within_bounds(&[1.0, -0.5]));

        let mut values = vec![2.5, -0.5, -3.0];
        store.clamp(&mut values);
        assert_eq!(values, vec![2.0, -0.5, -2.0]);
    }

    #[test]
    fn set_values_checks_length() {
        let mut store = charges();
        assert_eq!(
            store.set_values(&[1.0]),
            Err(ParamError::LengthMismatch {
                expected: 3,
                found: 1
            })
        );
    }

    #[test]
    fn seeded_from_and_apply_to_round_trip_through_forcefield() {
        let ff = Forcefield::from_toml_str(
            "[atom-types.A]\ncharge = 0.4\nsigma = 2.0\n[atom-types.B]\ncharge = -0.4\n",
        )
        .unwrap();
        let mut store = ParamStore::seeded_from(
            &ff,
            vec![
                ParamRecord::new(ParamGroup::Charge, "A", 0.0),
                ParamRecord::new(ParamGroup::Sigma, "A B", 0.0),
            ],
        )
        .unwrap();
        assert_eq!(store.values(), vec![0.4, 1.0]);

        store.set_values(&[0.5, 1.2]).unwrap();
        let updated = store.apply_to(&ff).unwrap();
        assert_eq!(updated.get(ParamGroup::Charge, "A").unwrap(), 0.5);
        assert_eq!(updated.get(ParamGroup::Sigma, "B A").unwrap(), 1.2);
        assert_eq!(ff.get(ParamGroup::Charge, "A").unwrap(), 0.4);
    }
}
