use crate::error::{CliError, Result};
use armcfit::core::forcefield::params::Forcefield;
use armcfit::core::io::traits::TrajectoryFile;
use armcfit::core::io::xyz::XyzFile;
use armcfit::core::models::topology::Topology;
use armcfit::core::models::trajectory::Trajectory;
use std::path::Path;
use tracing::info;

pub fn load_topology(path: &Path) -> Result<Topology> {
    info!("Loading topology from {:?}", path);
    let topology = Topology::load(path).map_err(|e| CliError::parsing(path, e))?;
    info!(
        atoms = topology.atom_count(),
        fragments = topology.fragment_count(),
        "Topology loaded."
    );
    Ok(topology)
}

pub fn load_forcefield(path: &Path) -> Result<Forcefield> {
    info!("Loading forcefield parameters from {:?}", path);
    Forcefield::load(path).map_err(|e| CliError::parsing(path, e))
}

/// Reads an XYZ trajectory and checks it matches the topology's atom count.
pub fn load_trajectory(path: &Path, topology: &Topology) -> Result<Trajectory> {
    info!("Loading trajectory from {:?}", path);
    let (trajectory, _) = XyzFile::read_from_path(path).map_err(|e| CliError::parsing(path, e))?;
    if trajectory.atom_count() != topology.atom_count() {
        return Err(CliError::Argument(format!(
            "trajectory '{}' has {} atoms per frame but the topology describes {}",
            path.display(),
            trajectory.atom_count(),
            topology.atom_count()
        )));
    }
    info!(frames = trajectory.frame_count(), "Trajectory loaded.");
    Ok(trajectory)
}
