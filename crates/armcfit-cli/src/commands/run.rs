use crate::cli::RunArgs;
use crate::config::{PartialRunConfig, RunSettings};
use crate::engine::CommandEngine;
use crate::error::{CliError, Result};
use crate::utils::inputs;
use crate::utils::progress::CliProgressHandler;
use armcfit::core::forcefield::nonbonded::NonBondedEvaluator;
use armcfit::core::forcefield::params::Forcefield;
use armcfit::engine::error::EngineError;
use armcfit::engine::params::ParamStore;
use armcfit::engine::pes::ReferenceSet;
use armcfit::engine::progress::ProgressReporter;
use armcfit::engine::store::RunStore;
use armcfit::workflows::armc::{ArmcContext, ArmcController, ArmcSummary};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

pub const BEST_FORCEFIELD_FILE: &str = "best_forcefield.toml";

pub async fn run(args: RunArgs) -> Result<()> {
    let base = args
        .config
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let partial_config = PartialRunConfig::from_file(&args.config)?;
    info!("Merging configuration from file and CLI arguments...");
    let settings = partial_config.merge_with_cli(&args, &base)?;

    let topology = inputs::load_topology(&settings.topology)?;
    let forcefield = inputs::load_forcefield(&settings.forcefield)?;
    let reference_trajectory = inputs::load_trajectory(&settings.reference, &topology)?;

    let evaluator = NonBondedEvaluator::from_topology(&topology, settings.armc.evaluator.clone())
        .map_err(EngineError::from)?;

    info!("Computing reference descriptors...");
    let reference_table = forcefield.pair_table(evaluator.pairs());
    let reference_energies = evaluator
        .evaluate(&reference_trajectory, &reference_table)
        .map_err(EngineError::from)?;
    let reference = ReferenceSet::from_energies(settings.armc.channels.clone(), &reference_energies)
        .map_err(EngineError::from)?;

    let params = build_params(&settings, &forcefield, &topology.type_counts())?;
    info!(count = params.len(), "Parameter store initialised.");

    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());
    let engine = CommandEngine::new(
        settings.engine.clone(),
        forcefield.clone(),
        tokio::runtime::Handle::current(),
    );

    let ctx = ArmcContext {
        config: &settings.armc,
        forcefield: &forcefield,
        evaluator: &evaluator,
        reference: &reference,
        reporter: &reporter,
    };
    let mut controller = ArmcController::new(ctx, params, engine)?;

    let mut store = if args.restart {
        info!("Reopening run store at {:?}", settings.output);
        RunStore::open(&settings.output)?
    } else {
        info!("Creating run store at {:?}", settings.output);
        RunStore::create(&settings.output, controller.layout())?
    };

    println!("Starting ARMC parameter fit...");
    let summary = tokio::task::block_in_place(|| controller.run(&mut store))?;

    let best_path = settings.output.join(BEST_FORCEFIELD_FILE);
    write_best_forcefield(&best_path, controller.params(), &forcefield, &summary)?;
    print_summary(&summary, &best_path);
    Ok(())
}

fn build_params(
    settings: &RunSettings,
    forcefield: &Forcefield,
    type_counts: &BTreeMap<String, usize>,
) -> Result<ParamStore> {
    let records = settings
        .params
        .iter()
        .map(|spec| spec.to_record(forcefield, type_counts))
        .collect::<Result<Vec<_>>>()?;
    for record in &records {
        if record.neutral && !type_counts.contains_key(&record.label) {
            warn!(
                param = %record.key_path,
                "Neutral charge refers to an atom type absent from the topology."
            );
        }
    }
    let store = ParamStore::new(records).map_err(EngineError::from)?;
    Ok(store)
}

fn write_best_forcefield(
    path: &Path,
    current: &ParamStore,
    forcefield: &Forcefield,
    summary: &ArmcSummary,
) -> Result<()> {
    let mut best = current.clone();
    best.set_values(&summary.best_params)
        .map_err(EngineError::from)?;
    let content = best
        .apply_to(forcefield)
        .map_err(EngineError::from)?
        .to_toml_string()
        .map_err(|e| CliError::Other(e.into()))?;
    std::fs::write(path, content)?;
    info!("Best parameters written to {:?}", path);
    Ok(())
}

fn print_summary(summary: &ArmcSummary, best_path: &Path) {
    let acceptance = summary.accepted as f64 / summary.total_steps.max(1) as f64;
    println!(
        "Ran {} of {} steps | accepted {} ({:.1}%) | final phi {:.4} | {} states cached",
        summary.steps_run,
        summary.total_steps,
        summary.accepted,
        100.0 * acceptance,
        summary.final_phi,
        summary.cache_size
    );
    println!("Best auxiliary error: {:.6}", summary.best_error);
    for (name, value) in summary.param_names.iter().zip(&summary.best_params) {
        println!("  {:<24} {:>14.6}", name, value);
    }
    println!("✓ Best parameters written to: {}", best_path.display());
}
