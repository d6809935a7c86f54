use std::collections::BTreeMap;
use std::fmt;

/// An unordered pair of atom types, stored in canonical (sorted) order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AtomPair {
    first: String,
    second: String,
}

impl AtomPair {
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        let (a, b) = (a.into(), b.into());
        if a <= b {
            Self {
                first: a,
                second: b,
            }
        } else {
            Self {
                first: b,
                second: a,
            }
        }
    }

    /// Parses a `"A B"` label as written in the run store and forcefield files.
    pub fn parse(label: &str) -> Option<Self> {
        let mut parts = label.split_whitespace();
        let a = parts.next()?;
        let b = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(a, b))
    }

    pub fn first(&self) -> &str {
        &self.first
    }

    pub fn second(&self) -> &str {
        &self.second
    }

    #[inline]
    pub fn is_same_type(&self) -> bool {
        self.first == self.second
    }

    pub fn contains(&self, atom_type: &str) -> bool {
        self.first == atom_type || self.second == atom_type
    }
}

impl fmt::Display for AtomPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.first, self.second)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairParams {
    pub charge_product: f64,
    pub sigma: f64,
    pub epsilon: f64,
}

/// Per-pair non-bonded parameters, symmetric by construction of [`AtomPair`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AtomPairTable {
    entries: BTreeMap<AtomPair, PairParams>,
}

impl AtomPairTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pair: AtomPair, params: PairParams) {
        self.entries.insert(pair, params);
    }

    pub fn get(&self, pair: &AtomPair) -> Option<&PairParams> {
        self.entries.get(pair)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AtomPair, &PairParams)> {
        self.entries.iter()
    }

    /// Returns every pair from `required` that has no entry.
    pub fn missing<'a>(&self, required: impl IntoIterator<Item = &'a AtomPair>) -> Vec<AtomPair> {
        required
            .into_iter()
            .filter(|p| !self.entries.contains_key(*p))
            .cloned()
            .collect()
    }
}

impl FromIterator<(AtomPair, PairParams)> for AtomPairTable {
    fn from_iter<I: IntoIterator<Item = (AtomPair, PairParams)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
