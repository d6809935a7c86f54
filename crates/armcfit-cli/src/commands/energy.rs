use crate::cli::{DistanceModeArg, EnergyArgs};
use crate::config::parse_pairs;
use crate::error::{CliError, Result};
use crate::utils::inputs;
use armcfit::core::forcefield::nonbonded::{
    DEFAULT_MAX_ARRAY_SIZE, DistanceMode, EnergyTables, EvaluatorConfig, NonBondedEvaluator,
};
use armcfit::engine::error::EngineError;
use std::io::Write;
use std::path::Path;
use tracing::info;

pub async fn run(args: EnergyArgs) -> Result<()> {
    let topology = inputs::load_topology(&args.topology)?;
    let forcefield = inputs::load_forcefield(&args.forcefield)?;
    let trajectory = inputs::load_trajectory(&args.trajectory, &topology)?;

    let config = EvaluatorConfig {
        distance_mode: match args.mode {
            DistanceModeArg::Dense => DistanceMode::Dense,
            DistanceModeArg::Neighbors => DistanceMode::Neighbors {
                cutoff: args.cutoff,
                max_neighbors: args.max_neighbors,
            },
        },
        max_array_size: DEFAULT_MAX_ARRAY_SIZE,
        pairs: if args.pairs.is_empty() {
            None
        } else {
            Some(parse_pairs(&args.pairs)?)
        },
    };
    let evaluator =
        NonBondedEvaluator::from_topology(&topology, config).map_err(EngineError::from)?;
    let table = forcefield.pair_table(evaluator.pairs());

    info!("Evaluating non-bonded energies...");
    let energies = tokio::task::block_in_place(|| evaluator.evaluate(&trajectory, &table))
        .map_err(EngineError::from)?;

    match &args.output {
        Some(path) => {
            write_frames_csv(path, &energies)?;
            println!("✓ Per-frame energies written to: {}", path.display());
        }
        None => print_means(&mut std::io::stdout().lock(), &energies)?,
    }
    Ok(())
}

fn print_means(out: &mut impl Write, energies: &EnergyTables) -> Result<()> {
    let pairs = energies.electrostatic.pairs();
    let elstat = energies.electrostatic.mean_per_pair();
    let lj = energies.lennard_jones.mean_per_pair();

    writeln!(out, "{:<16} {:>16} {:>16}", "pair", "elstat", "lj")?;
    for ((pair, e), l) in pairs.iter().zip(&elstat).zip(&lj) {
        writeln!(out, "{:<16} {:>16.6} {:>16.6}", pair.to_string(), e, l)?;
    }
    writeln!(
        out,
        "{:<16} {:>16.6} {:>16.6}",
        "total",
        elstat.iter().sum::<f64>(),
        lj.iter().sum::<f64>()
    )?;
    Ok(())
}

/// One row per frame; columns are `frame`, then `elstat:<pair>` and `lj:<pair>` for every pair.
fn write_frames_csv(path: &Path, energies: &EnergyTables) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| CliError::Other(e.into()))?;
    let pairs = energies.electrostatic.pairs();

    let mut header = vec!["frame".to_string()];
    header.extend(pairs.iter().map(|p| format!("elstat:{p}")));
    header.extend(pairs.iter().map(|p| format!("lj:{p}")));
    writer
        .write_record(&header)
        .map_err(|e| CliError::Other(e.into()))?;

    for frame in 0..energies.electrostatic.frame_count() {
        let mut row = vec![frame.to_string()];
        row.extend(energies.electrostatic.frame(frame).iter().map(f64::to_string));
        row.extend(energies.lennard_jones.frame(frame).iter().map(f64::to_string));
        writer
            .write_record(&row)
            .map_err(|e| CliError::Other(e.into()))?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use armcfit::core::forcefield::params::Forcefield;
    use armcfit::core::models::topology::Topology;
    use armcfit::core::models::trajectory::Trajectory;
    use nalgebra::Point3;
    use tempfile::tempdir;

    fn energies() -> EnergyTables {
        let topology = Topology::new(
            vec!["A".to_string()],
            vec!["B".to_string()],
            2,
        )
        .unwrap();
        let forcefield = Forcefield::from_toml_str(
            "[atom-types.A]\ncharge = 1.0\nsigma = 3.0\nepsilon = 0.1\n\
             [atom-types.B]\ncharge = -0.5\nsigma = 2.0\nepsilon = 0.2\n",
        )
        .unwrap();
        let evaluator =
            NonBondedEvaluator::from_topology(&topology, EvaluatorConfig::default()).unwrap();
        let trajectory = Trajectory::new(vec![
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(3.0, 0.0, 0.0),
                Point3::new(-3.0, 0.0, 0.0),
            ];
            2
        ])
        .unwrap();
        evaluator
            .evaluate(&trajectory, &forcefield.pair_table(evaluator.pairs()))
            .unwrap()
    }

    #[test]
    fn means_are_printed_per_pair_with_totals() {
        let mut out = Vec::new();
        print_means(&mut out, &energies()).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("pair"));
        assert!(lines.iter().any(|l| l.starts_with("A B")));
        assert!(lines.last().unwrap().starts_with("total"));
    }

    #[test]
    fn selected_pairs_need_no_other_parameters() {
        let topology = Topology::new(vec!["A".to_string()], vec!["B".to_string()], 2).unwrap();
        // No B parameters at all: only "A A" is selected, so "A B" and "B B" never look them up.
        let forcefield =
            Forcefield::from_toml_str("[atom-types.A]\ncharge = 1.0\nsigma = 3.0\nepsilon = 0.1\n")
                .unwrap();
        let config = EvaluatorConfig {
            pairs: Some(parse_pairs(&["A A".to_string()]).unwrap()),
            ..EvaluatorConfig::default()
        };
        let evaluator = NonBondedEvaluator::from_topology(&topology, config).unwrap();
        let table = forcefield.pair_table(evaluator.pairs());
        let trajectory = Trajectory::new(vec![vec![Point3::origin(); 3]]).unwrap();
        let energies = evaluator.evaluate(&trajectory, &table).unwrap();

        let mut out = Vec::new();
        print_means(&mut out, &energies).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.lines().any(|l| l.starts_with("A A")));
        assert!(!text.contains("A B"));
    }

    #[test]
    fn frames_csv_has_one_row_per_frame() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("energies.csv");
        let energies = energies();
        write_frames_csv(&path, &energies).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 1 + energies.electrostatic.frame_count());
        assert!(lines[0].starts_with("frame,elstat:"));
    }
}
