use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TopologyError {
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
    #[error("Fragment must contain at least one atom")]
    EmptyFragment,
    #[error("Fragment repeat count must be at least 1")]
    ZeroRepeat,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
struct CoreSection {
    #[serde(default)]
    atoms: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
struct FragmentSection {
    atoms: Vec<String>,
    repeat: usize,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
struct TopologyFile {
    #[serde(default = "empty_core")]
    core: CoreSection,
    fragment: FragmentSection,
}

fn empty_core() -> CoreSection {
    CoreSection { atoms: Vec::new() }
}

/// Atom typing of a core-plus-ligand system.
///
/// Atoms are laid out as the core residue followed by `repeat` copies of one fragment. Residue
/// `0` is the core; fragments are numbered from `1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    atom_types: Vec<String>,
    residue_ids: Vec<usize>,
    core_types: BTreeSet<String>,
    fragment_count: usize,
}

impl Topology {
    pub fn new(
        core: Vec<String>,
        fragment: Vec<String>,
        repeat: usize,
    ) -> Result<Self, TopologyError> {
        if fragment.is_empty() {
            return Err(TopologyError::EmptyFragment);
        }
        if repeat == 0 {
            return Err(TopologyError::ZeroRepeat);
        }

        let core_types: BTreeSet<String> = core.iter().cloned().collect();
        let mut atom_types = core.clone();
        let mut residue_ids = vec![0; core.len()];
        for copy in 1..=repeat {
            atom_types.extend(fragment.iter().cloned());
            residue_ids.extend(std::iter::repeat_n(copy, fragment.len()));
        }

        Ok(Self {
            atom_types,
            residue_ids,
            core_types,
            fragment_count: repeat,
        })
    }

    pub fn load(path: &Path) -> Result<Self, TopologyError> {
        let content = std::fs::read_to_string(path).map_err(|e| TopologyError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            TopologyError::Toml { source, .. } => TopologyError::Toml {
                path: path.to_string_lossy().to_string(),
                source,
            },
            other => other,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, TopologyError> {
        let file: TopologyFile = toml::from_str(content).map_err(|e| TopologyError::Toml {
            path: "<inline>".to_string(),
            source: e,
        })?;
        Self::new(file.core.atoms, file.fragment.atoms, file.fragment.repeat)
    }

    #[inline]
    pub fn atom_count(&self) -> usize {
        self.atom_types.len()
    }

    pub fn atom_types(&self) -> &[String] {
        &self.atom_types
    }

    pub fn residue_ids(&self) -> &[usize] {
        &self.residue_ids
    }

    #[inline]
    pub fn fragment_count(&self) -> usize {
        self.fragment_count
    }

    pub fn core_types(&self) -> &BTreeSet<String> {
        &self.core_types
    }

    #[inline]
    pub fn is_core_type(&self, atom_type: &str) -> bool {
        self.core_types.contains(atom_type)
    }

    /// Atom indices per atom type, in ascending index order.
    pub fn type_indices(&self) -> BTreeMap<String, Vec<usize>> {
        let mut map: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, t) in self.atom_types.iter().enumerate() {
            map.entry(t.clone()).or_default().push(i);
        }
        map
    }

    /// Number of atoms of each type, the weight each per-type charge carries in the total.
    pub fn type_counts(&self) -> BTreeMap<String, usize> {
        self.type_indices()
            .into_iter()
            .map(|(t, idx)| (t, idx.len()))
            .collect()
    }
}
