use crate::cli::InspectArgs;
use crate::error::{CliError, Result};
use armcfit::engine::store::{IterationRecord, RunStore, StepStatus};
use std::io::Write;
use std::ops::Bound;
use tracing::info;

/// Acceptance statistics of one outer iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockSummary {
    pub iteration: usize,
    pub steps: usize,
    pub accepted: usize,
    pub failed: usize,
    pub phi: f64,
}

impl BlockSummary {
    pub fn acceptance_rate(&self) -> f64 {
        if self.steps == 0 {
            0.0
        } else {
            self.accepted as f64 / self.steps as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreSummary {
    pub records: usize,
    pub blocks: Vec<BlockSummary>,
    pub cache_hits: usize,
    /// Lowest summed auxiliary error and the step that produced it.
    pub best: Option<(usize, f64)>,
}

pub fn summarize(records: &[IterationRecord]) -> StoreSummary {
    let mut blocks: Vec<BlockSummary> = Vec::new();
    let mut best: Option<(usize, f64)> = None;
    let mut cache_hits = 0;

    for record in records {
        if let Some(errors) = &record.aux_errors {
            let total: f64 = errors.iter().sum();
            if best.is_none_or(|(_, b)| total < b) {
                best = Some((record.step, total));
            }
        }
        if record.status == StepStatus::Seed {
            continue;
        }
        if record.status == StepStatus::CacheHit {
            cache_hits += 1;
        }
        if blocks.last().is_none_or(|b| b.iteration != record.iteration) {
            blocks.push(BlockSummary {
                iteration: record.iteration,
                steps: 0,
                accepted: 0,
                failed: 0,
                phi: record.phi,
            });
        }
        if let Some(block) = blocks.last_mut() {
            block.steps += 1;
            block.accepted += usize::from(record.accepted);
            block.failed += usize::from(record.status == StepStatus::Failed);
        }
    }

    StoreSummary {
        records: records.len(),
        blocks,
        cache_hits,
        best,
    }
}

pub async fn run(args: InspectArgs) -> Result<()> {
    let store = RunStore::open_read_only(&args.store)?;
    info!("Opened run store at {:?}", args.store);
    let mut out = std::io::stdout().lock();

    if let Some(name) = &args.dataset {
        let range = (
            args.from.map_or(Bound::Unbounded, Bound::Included),
            args.to.map_or(Bound::Unbounded, Bound::Excluded),
        );
        let dataset = store.read_dataset(name, range)?;
        let mut writer = csv::Writer::from_writer(&mut out);
        writer
            .write_record(&dataset.columns)
            .map_err(|e| CliError::Other(e.into()))?;
        for row in &dataset.rows {
            writer
                .write_record(row)
                .map_err(|e| CliError::Other(e.into()))?;
        }
        writer.flush()?;
        return Ok(());
    }

    let records = store.records()?;
    let layout = store.layout();
    let summary = summarize(&records);
    print_summary(&mut out, &summary, &layout.param_columns, &records)?;
    Ok(())
}

fn print_summary(
    out: &mut impl Write,
    summary: &StoreSummary,
    param_columns: &[String],
    records: &[IterationRecord],
) -> Result<()> {
    writeln!(
        out,
        "{} records ({} steps after seed), {} cache hits",
        summary.records,
        summary.records.saturating_sub(1),
        summary.cache_hits
    )?;
    writeln!(out, "{:>6} {:>6} {:>9} {:>7} {:>14}", "block", "steps", "accepted", "failed", "phi")?;
    for block in &summary.blocks {
        writeln!(
            out,
            "{:>6} {:>6} {:>8.1}% {:>7} {:>14.6}",
            block.iteration,
            block.steps,
            100.0 * block.acceptance_rate(),
            block.failed,
            block.phi
        )?;
    }
    if let Some((step, error)) = summary.best {
        writeln!(out, "Best auxiliary error {error:.6} at step {step}")?;
        if let Some(record) = records.iter().find(|r| r.step == step) {
            for (name, value) in param_columns.iter().zip(&record.trial_params) {
                writeln!(out, "  {:<24} {:>14.6}", name, value)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(step: usize, iteration: usize, accepted: bool, status: StepStatus, aux: Option<f64>) -> IterationRecord {
        IterationRecord {
            step,
            iteration,
            sub_iteration: 0,
            params: vec![1.0],
            trial_params: vec![step as f64],
            descriptors: None,
            aux_errors: aux.map(|e| vec![e]),
            error_old: None,
            error_new: None,
            accepted,
            status,
            phi: 1.0 + iteration as f64,
        }
    }

    fn records() -> Vec<IterationRecord> {
        vec![
            record(0, 0, true, StepStatus::Seed, Some(5.0)),
            record(1, 0, true, StepStatus::Evaluated, Some(3.0)),
            record(2, 0, false, StepStatus::Failed, None),
            record(3, 1, false, StepStatus::CacheHit, Some(3.0)),
            record(4, 1, true, StepStatus::Evaluated, Some(1.5)),
        ]
    }

    #[test]
    fn summary_groups_steps_by_iteration() {
        let summary = summarize(&records());
        assert_eq!(summary.records, 5);
        assert_eq!(summary.cache_hits, 1);
        assert_eq!(summary.best, Some((4, 1.5)));
        assert_eq!(summary.blocks.len(), 2);
        assert_eq!(summary.blocks[0].steps, 2);
        assert_eq!(summary.blocks[0].failed, 1);
        assert_eq!(summary.blocks[0].acceptance_rate(), 0.5);
        assert_eq!(summary.blocks[1].phi, 2.0);
    }

    #[test]
    fn printed_summary_lists_best_parameters() {
        let records = records();
        let mut out = Vec::new();
        print_summary(&mut out, &summarize(&records), &["charge.A".to_string()], &records).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Best auxiliary error 1.500000 at step 4"));
        assert!(text.contains("charge.A"));
    }

    #[test]
    fn empty_store_has_no_best() {
        let summary = summarize(&[]);
        assert!(summary.best.is_none());
        assert!(summary.blocks.is_empty());
    }
}
