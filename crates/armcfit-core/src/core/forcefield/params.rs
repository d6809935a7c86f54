use super::pair_table::{AtomPair, AtomPairTable, PairParams};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// The three tunable non-bonded quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamGroup {
    Charge,
    Sigma,
    Epsilon,
}

impl fmt::Display for ParamGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParamGroup::Charge => "charge",
            ParamGroup::Sigma => "sigma",
            ParamGroup::Epsilon => "epsilon",
        };
        f.write_str(s)
    }
}

impl FromStr for ParamGroup {
    type Err = ForcefieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "charge" => Ok(ParamGroup::Charge),
            "sigma" => Ok(ParamGroup::Sigma),
            "epsilon" => Ok(ParamGroup::Epsilon),
            _ => Err(ForcefieldError::UnknownGroup(s.to_string())),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct AtomTypeParams {
    #[serde(default)]
    pub charge: f64,
    #[serde(default)]
    pub sigma: f64,
    #[serde(default)]
    pub epsilon: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct PairOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sigma: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epsilon: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct ForcefieldFile {
    #[serde(default)]
    atom_types: BTreeMap<String, AtomTypeParams>,
    #[serde(default)]
    pairs: BTreeMap<String, PairOverride>,
}

#[derive(Debug, Error)]
pub enum ParamLoadError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    #[error("Invalid atom-pair label '{0}' (expected two atom types separated by whitespace)")]
    InvalidPairLabel(String),
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ForcefieldError {
    #[error("Unknown parameter group '{0}'")]
    UnknownGroup(String),
    #[error("Atom type '{0}' is not defined in the forcefield")]
    UnknownAtomType(String),
    #[error("Group '{group}' cannot target '{label}'")]
    InvalidTarget { group: ParamGroup, label: String },
}

/// Per-atom-type non-bonded parameters with optional per-pair σ/ε overrides.
///
/// Pair parameters follow the combination rules `q_ij = q_i q_j`, `σ_ij = (σ_i + σ_j) / 2` and
/// `ε_ij = √(ε_i ε_j)`; explicit pair overrides take precedence over the combined values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Forcefield {
    atom_types: BTreeMap<String, AtomTypeParams>,
    pair_overrides: BTreeMap<AtomPair, PairOverride>,
}

impl Forcefield {
    pub fn new(atom_types: BTreeMap<String, AtomTypeParams>) -> Self {
        Self {
            atom_types,
            pair_overrides: BTreeMap::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ParamLoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| ParamLoadError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        let file: ForcefieldFile = toml::from_str(&content).map_err(|e| ParamLoadError::Toml {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        Self::from_file(file)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ParamLoadError> {
        let file: ForcefieldFile = toml::from_str(content).map_err(|e| ParamLoadError::Toml {
            path: "<inline>".to_string(),
            source: e,
        })?;
        Self::from_file(file)
    }

    fn from_file(file: ForcefieldFile) -> Result<Self, ParamLoadError> {
        let mut pair_overrides = BTreeMap::new();
        for (label, value) in file.pairs {
            let pair =
                AtomPair::parse(&label).ok_or_else(|| ParamLoadError::InvalidPairLabel(label))?;
            pair_overrides.insert(pair, value);
        }
        Ok(Self {
            atom_types: file.atom_types,
            pair_overrides,
        })
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        let file = ForcefieldFile {
            atom_types: self.atom_types.clone(),
            pairs: self
                .pair_overrides
                .iter()
                .map(|(p, o)| (p.to_string(), *o))
                .collect(),
        };
        toml::to_string(&file)
    }

    pub fn atom_type(&self, name: &str) -> Option<&AtomTypeParams> {
        self.atom_types.get(name)
    }

    pub fn atom_types(&self) -> impl Iterator<Item = (&String, &AtomTypeParams)> {
        self.atom_types.iter()
    }

    pub fn pair_override(&self, pair: &AtomPair) -> Option<&PairOverride> {
        self.pair_overrides.get(pair)
    }

    /// Reads the value addressed by `group` and `label`.
    ///
    /// A single atom type addresses its per-type value; an `"A B"` label addresses the effective
    /// σ or ε of that pair (override if present, otherwise combined).
    pub fn get(&self, group: ParamGroup, label: &str) -> Result<f64, ForcefieldError> {
        match AtomPair::parse(label) {
            Some(pair) => {
                let params = self.combine(&pair)?;
                match group {
                    ParamGroup::Charge => Err(ForcefieldError::InvalidTarget {
                        group,
                        label: label.to_string(),
                    }),
                    ParamGroup::Sigma => Ok(params.sigma),
                    ParamGroup::Epsilon => Ok(params.epsilon),
                }
            }
            None => {
                let t = self
                    .atom_types
                    .get(label)
                    .ok_or_else(|| ForcefieldError::UnknownAtomType(label.to_string()))?;
                Ok(match group {
                    ParamGroup::Charge => t.charge,
                    ParamGroup::Sigma => t.sigma,
                    ParamGroup::Epsilon => t.epsilon,
                })
            }
        }
    }

    pub fn set(&mut self, group: ParamGroup, label: &str, value: f64) -> Result<(), ForcefieldError> {
        match AtomPair::parse(label) {
            Some(pair) => {
                if group == ParamGroup::Charge {
                    return Err(ForcefieldError::InvalidTarget {
                        group,
                        label: label.to_string(),
                    });
                }
                for t in [pair.first(), pair.second()] {
                    if !self.atom_types.contains_key(t) {
                        return Err(ForcefieldError::UnknownAtomType(t.to_string()));
                    }
                }
                let entry = self.pair_overrides.entry(pair).or_default();
                if group == ParamGroup::Sigma {
                    entry.sigma = Some(value);
                } else {
                    entry.epsilon = Some(value);
                }
            }
            None => {
                let t = self
                    .atom_types
                    .get_mut(label)
                    .ok_or_else(|| ForcefieldError::UnknownAtomType(label.to_string()))?;
                match group {
                    ParamGroup::Charge => t.charge = value,
                    ParamGroup::Sigma => t.sigma = value,
                    ParamGroup::Epsilon => t.epsilon = value,
                }
            }
        }
        Ok(())
    }

    fn combine(&self, pair: &AtomPair) -> Result<PairParams, ForcefieldError> {
        let lookup = |name: &str| {
            self.atom_types
                .get(name)
                .ok_or_else(|| ForcefieldError::UnknownAtomType(name.to_string()))
        };
        let a = lookup(pair.first())?;
        let b = lookup(pair.second())?;
        let overrides = self.pair_overrides.get(pair).copied().unwrap_or_default();
        Ok(PairParams {
            charge_product: a.charge * b.charge,
            sigma: overrides.sigma.unwrap_or((a.sigma + b.sigma) / 2.0),
            epsilon: overrides.epsilon.unwrap_or((a.epsilon * b.epsilon).sqrt()),
        })
    }

    /// Builds the pair table for `pairs`.
    ///
    /// Pairs whose atom types are not defined are left out; the evaluator reports them as missing
    /// before any computation.
    pub fn pair_table<'a>(&self, pairs: impl IntoIterator<Item = &'a AtomPair>) -> AtomPairTable {
        pairs
            .into_iter()
            .filter_map(|p| self.combine(p).ok().map(|params| (p.clone(), params)))
            .collect()
    }
}
