use super::params::StateKey;
use super::pes::PesEvaluation;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub params: Vec<f64>,
    pub evaluation: PesEvaluation,
    /// Running bias accumulator added to the raw error.
    pub bias: f64,
}

impl CacheEntry {
    /// Raw auxiliary error plus the accumulated bias.
    #[inline]
    pub fn biased_error(&self) -> f64 {
        self.evaluation.total_error() + self.bias
    }
}

/// Memoised evaluations keyed by quantised parameter state. Entries are never evicted.
#[derive(Debug, Default, Clone)]
pub struct PesCache {
    data: HashMap<StateKey, CacheEntry>,
}

impl PesCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &StateKey) -> Option<&CacheEntry> {
        self.data.get(key)
    }

    pub fn contains(&self, key: &StateKey) -> bool {
        self.data.contains_key(key)
    }

    /// Stores a fresh evaluation with a zero accumulator, replacing any previous entry.
    pub fn put(&mut self, key: StateKey, params: Vec<f64>, evaluation: PesEvaluation) {
        self.data.insert(
            key,
            CacheEntry {
                params,
                evaluation,
                bias: 0.0,
            },
        );
    }

    /// Adds `delta` to the entry's accumulator. Returns `false` if the key is unknown.
    pub fn update(&mut self, key: &StateKey, delta: f64) -> bool {
        match self.data.get_mut(key) {
            Some(entry) => {
                entry.bias += delta;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The entry with the lowest raw auxiliary error.
    pub fn best(&self) -> Option<(&StateKey, &CacheEntry)> {
        self.data.iter().min_by(|(_, a), (_, b)| {
            a.evaluation
                .total_error()
                .partial_cmp(&b.evaluation.total_error())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }
}
