//! Durable, append-only record of every controller step.
//!
//! A run directory holds a `run.toml` manifest and one CSV file per dataset:
//!
//! - `param.csv` - accepted parameter vector after each step
//! - `param_trial.csv` - proposed parameter vector of each step
//! - `aux_error.csv` - per-channel raw auxiliary error of the proposal
//! - `pes.<channel>.csv` - descriptor rows of the proposal, one line per descriptor row
//! - `steps.csv` - step metadata; written last and acting as the commit log
//!
//! Every dataset row starts with its step index. A step counts as durable only once its
//! `steps.csv` row is complete; rows of later steps in other datasets are ignored on read and
//! discarded when the store is reopened for appending.

use super::pes::{Descriptor, PesKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::ops::{Bound, RangeBounds};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, warn};

const MANIFEST_FILE: &str = "run.toml";
pub const STEPS: &str = "steps";
pub const PARAM: &str = "param";
pub const PARAM_TRIAL: &str = "param_trial";
pub const AUX_ERROR: &str = "aux_error";

const STEP_COLUMNS: [&str; 8] = [
    "step",
    "iteration",
    "sub_iteration",
    "status",
    "accepted",
    "phi",
    "error_old",
    "error_new",
];

pub fn pes_dataset(channel: &str) -> String {
    format!("pes.{channel}")
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("CSV error in '{path}': {source}")]
    Csv { path: String, source: csv::Error },
    #[error("Manifest error in '{path}': {message}")]
    Manifest { path: String, message: String },
    #[error("A run already exists in '{0}'")]
    AlreadyExists(String),
    #[error("Unknown dataset '{0}'")]
    UnknownDataset(String),
    #[error("Corrupt row in dataset '{dataset}' at step {step}: {message}")]
    Corrupt {
        dataset: String,
        step: usize,
        message: String,
    },
    #[error("Expected step {expected}, got {found}")]
    OutOfOrder { expected: usize, found: usize },
    #[error("Store was opened read-only")]
    ReadOnly,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_string_lossy().to_string(),
        source,
    }
}

fn csv_err(path: &Path) -> impl FnOnce(csv::Error) -> StoreError + '_ {
    move |source| StoreError::Csv {
        path: path.to_string_lossy().to_string(),
        source,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ChannelLayout {
    pub name: String,
    pub kind: PesKind,
    pub rows: usize,
    pub columns: Vec<String>,
}

/// Column layout of a run, stored as the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct RunLayout {
    pub sub_iter_len: usize,
    pub param_columns: Vec<String>,
    pub channels: Vec<ChannelLayout>,
}

impl RunLayout {
    pub fn dataset_names(&self) -> Vec<String> {
        let mut names = vec![
            PARAM.to_string(),
            PARAM_TRIAL.to_string(),
            AUX_ERROR.to_string(),
        ];
        names.extend(self.channels.iter().map(|c| pes_dataset(&c.name)));
        names.push(STEPS.to_string());
        names
    }

    fn header(&self, dataset: &str) -> Option<Vec<String>> {
        let with_step = |cols: &[String]| {
            std::iter::once("step".to_string())
                .chain(cols.iter().cloned())
                .collect()
        };
        match dataset {
            STEPS => Some(STEP_COLUMNS.iter().map(|s| s.to_string()).collect()),
            PARAM | PARAM_TRIAL => Some(with_step(&self.param_columns)),
            AUX_ERROR => Some(with_step(
                &self
                    .channels
                    .iter()
                    .map(|c| c.name.clone())
                    .collect::<Vec<_>>(),
            )),
            _ => self
                .channels
                .iter()
                .find(|c| pes_dataset(&c.name) == dataset)
                .map(|c| {
                    ["step".to_string(), "row".to_string()]
                        .into_iter()
                        .chain(c.columns.iter().cloned())
                        .collect()
                }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepStatus {
    /// Evaluation of the initial parameters.
    Seed,
    /// The proposal was evaluated by the engine.
    Evaluated,
    /// The proposal was found in the cache.
    CacheHit,
    /// The engine failed; the proposal was rejected.
    Failed,
    /// No in-bounds proposal could be drawn.
    OutOfBounds,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Seed => "seed",
            StepStatus::Evaluated => "evaluated",
            StepStatus::CacheHit => "cache-hit",
            StepStatus::Failed => "failed",
            StepStatus::OutOfBounds => "out-of-bounds",
        };
        f.write_str(s)
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "seed" => Ok(StepStatus::Seed),
            "evaluated" => Ok(StepStatus::Evaluated),
            "cache-hit" => Ok(StepStatus::CacheHit),
            "failed" => Ok(StepStatus::Failed),
            "out-of-bounds" => Ok(StepStatus::OutOfBounds),
            other => Err(format!("unknown step status '{other}'")),
        }
    }
}

/// Everything persisted about one step.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationRecord {
    /// `0` for the seed evaluation, then `1 + i·omega + j`.
    pub step: usize,
    pub iteration: usize,
    pub sub_iteration: usize,
    /// Current parameters after the accept/reject decision.
    pub params: Vec<f64>,
    pub trial_params: Vec<f64>,
    pub descriptors: Option<Vec<Descriptor>>,
    pub aux_errors: Option<Vec<f64>>,
    /// Bias-augmented error of the state before the move.
    pub error_old: Option<f64>,
    /// Bias-augmented error of the proposal.
    pub error_new: Option<f64>,
    pub accepted: bool,
    pub status: StepStatus,
    /// Phi in effect during this step.
    pub phi: f64,
}

/// Rows of one dataset, each beginning with the step index.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Parses a column as floats; empty cells become `None`.
    pub fn column_f64(&self, name: &str) -> Result<Vec<Option<f64>>, StoreError> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| StoreError::UnknownDataset(format!("{}:{name}", self.name)))?;
        self.rows
            .iter()
            .map(|row| parse_opt_f64(&self.name, row, idx))
            .collect()
    }
}

fn row_step(dataset: &str, row: &[String]) -> Result<usize, StoreError> {
    row.first()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| StoreError::Corrupt {
            dataset: dataset.to_string(),
            step: 0,
            message: format!("invalid step field in row {row:?}"),
        })
}

fn parse_opt_f64(dataset: &str, row: &[String], idx: usize) -> Result<Option<f64>, StoreError> {
    let cell = row.get(idx).map(String::as_str).unwrap_or("");
    if cell.is_empty() {
        return Ok(None);
    }
    cell.parse().map(Some).map_err(|_| StoreError::Corrupt {
        dataset: dataset.to_string(),
        step: row.first().and_then(|s| s.parse().ok()).unwrap_or(0),
        message: format!("'{cell}' is not a number"),
    })
}

fn parse_f64s(dataset: &str, row: &[String], from: usize) -> Result<Vec<f64>, StoreError> {
    (from..row.len())
        .map(|i| {
            parse_opt_f64(dataset, row, i)?.ok_or_else(|| StoreError::Corrupt {
                dataset: dataset.to_string(),
                step: row.first().and_then(|s| s.parse().ok()).unwrap_or(0),
                message: format!("empty value in column {i}"),
            })
        })
        .collect()
}

fn format_opt(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn step_row(step: usize, values: impl IntoIterator<Item = String>) -> Vec<String> {
    std::iter::once(step.to_string()).chain(values).collect()
}

fn writer_builder() -> csv::WriterBuilder {
    let mut builder = csv::WriterBuilder::new();
    builder
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'));
    builder
}

/// Byte length of `file` up to and including its last newline.
///
/// Scans backwards from the end so that a partial trailing row is found without reading the
/// whole file.
fn complete_len(file: &mut File) -> std::io::Result<u64> {
    const CHUNK: u64 = 8192;
    let mut end = file.metadata()?.len();
    let mut buf = vec![0u8; CHUNK as usize];
    while end > 0 {
        let start = end.saturating_sub(CHUNK);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(chunk)?;
        if let Some(pos) = chunk.iter().rposition(|&b| b == b'\n') {
            return Ok(start + pos as u64 + 1);
        }
        end = start;
    }
    Ok(0)
}

type DatasetReader = csv::Reader<std::io::Take<BufReader<File>>>;

/// Streams the complete rows of a dataset file; a trailing partial row is never yielded.
fn open_complete(path: &Path) -> Result<DatasetReader, StoreError> {
    let mut file = File::open(path).map_err(io_err(path))?;
    let len = complete_len(&mut file).map_err(io_err(path))?;
    file.seek(SeekFrom::Start(0)).map_err(io_err(path))?;
    Ok(csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(BufReader::new(file).take(len)))
}

/// Whether `step` lies beyond the end of `range`. Rows are stored in step order, so reading
/// can stop at the first such row.
fn past_end(range: &impl RangeBounds<usize>, step: usize) -> bool {
    match range.end_bound() {
        Bound::Included(&end) => step > end,
        Bound::Excluded(&end) => step >= end,
        Bound::Unbounded => false,
    }
}

pub struct RunStore {
    dir: PathBuf,
    layout: RunLayout,
    writers: Option<BTreeMap<String, csv::Writer<File>>>,
    next_step: usize,
}

impl RunStore {
    fn dataset_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.csv"))
    }

    /// Creates a new run in `dir`, failing if one already exists there.
    pub fn create(dir: &Path, layout: RunLayout) -> Result<Self, StoreError> {
        fs::create_dir_all(dir).map_err(io_err(dir))?;
        let manifest_path = dir.join(MANIFEST_FILE);
        if manifest_path.exists() {
            return Err(StoreError::AlreadyExists(dir.to_string_lossy().to_string()));
        }

        for name in layout.dataset_names() {
            let path = Self::dataset_path(dir, &name);
            let file = File::create(&path).map_err(io_err(&path))?;
            let mut writer = writer_builder().from_writer(file);
            let header = layout
                .header(&name)
                .ok_or_else(|| StoreError::UnknownDataset(name.clone()))?;
            writer.write_record(&header).map_err(csv_err(&path))?;
            writer.flush().map_err(io_err(&path))?;
        }

        // The manifest marks the directory as a complete, empty run.
        let text = toml::to_string(&layout).map_err(|e| StoreError::Manifest {
            path: manifest_path.to_string_lossy().to_string(),
            message: e.to_string(),
        })?;
        let mut file = File::create(&manifest_path).map_err(io_err(&manifest_path))?;
        file.write_all(text.as_bytes())
            .map_err(io_err(&manifest_path))?;
        file.sync_all().map_err(io_err(&manifest_path))?;

        info!(path = %dir.display(), "Created run store.");
        let mut store = Self {
            dir: dir.to_path_buf(),
            layout,
            writers: None,
            next_step: 0,
        };
        store.open_writers()?;
        Ok(store)
    }

    /// Opens an existing run for inspection without touching any file.
    pub fn open_read_only(dir: &Path) -> Result<Self, StoreError> {
        let layout = Self::read_manifest(dir)?;
        let mut store = Self {
            dir: dir.to_path_buf(),
            layout,
            writers: None,
            next_step: 0,
        };
        store.next_step = store.committed_steps()?;
        Ok(store)
    }

    /// Opens an existing run for appending.
    ///
    /// Partial trailing lines and rows of uncommitted steps are removed from every dataset.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        let mut store = Self::open_read_only(dir)?;
        store.repair()?;
        store.open_writers()?;
        Ok(store)
    }

    fn read_manifest(dir: &Path) -> Result<RunLayout, StoreError> {
        let path = dir.join(MANIFEST_FILE);
        let text = fs::read_to_string(&path).map_err(io_err(&path))?;
        toml::from_str(&text).map_err(|e| StoreError::Manifest {
            path: path.to_string_lossy().to_string(),
            message: e.to_string(),
        })
    }

    fn committed_steps(&self) -> Result<usize, StoreError> {
        let path = Self::dataset_path(&self.dir, STEPS);
        let mut reader = open_complete(&path)?;
        let mut count = 0;
        for record in reader.records() {
            record.map_err(csv_err(&path))?;
            count += 1;
        }
        Ok(count)
    }

    fn repair(&mut self) -> Result<(), StoreError> {
        for name in self.layout.dataset_names() {
            let path = Self::dataset_path(&self.dir, &name);
            let raw = fs::read_to_string(&path).map_err(io_err(&path))?;
            let dataset = self.load_dataset(&name, ..)?;
            let mut buffer = writer_builder().from_writer(Vec::new());
            buffer
                .write_record(&dataset.columns)
                .map_err(csv_err(&path))?;
            for row in &dataset.rows {
                buffer.write_record(row).map_err(csv_err(&path))?;
            }
            let bytes = buffer.into_inner().map_err(|e| StoreError::Io {
                path: path.to_string_lossy().to_string(),
                source: e.into_error(),
            })?;
            if bytes == raw.as_bytes() {
                continue;
            }

            warn!(dataset = %name, "Discarding uncommitted or partial rows.");
            let tmp = path.with_extension("csv.tmp");
            let mut file = File::create(&tmp).map_err(io_err(&tmp))?;
            file.write_all(&bytes).map_err(io_err(&tmp))?;
            file.sync_all().map_err(io_err(&tmp))?;
            fs::rename(&tmp, &path).map_err(io_err(&path))?;
        }
        Ok(())
    }

    fn open_writers(&mut self) -> Result<(), StoreError> {
        let mut writers = BTreeMap::new();
        for name in self.layout.dataset_names() {
            let path = Self::dataset_path(&self.dir, &name);
            let file = OpenOptions::new()
                .append(true)
                .open(&path)
                .map_err(io_err(&path))?;
            writers.insert(name, writer_builder().from_writer(file));
        }
        self.writers = Some(writers);
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    /// Index the next appended record must carry; equals the number of durable records.
    pub fn next_step(&self) -> usize {
        self.next_step
    }

    fn write_rows(&mut self, dataset: &str, rows: &[Vec<String>]) -> Result<(), StoreError> {
        let path = Self::dataset_path(&self.dir, dataset);
        let writer = self
            .writers
            .as_mut()
            .ok_or(StoreError::ReadOnly)?
            .get_mut(dataset)
            .ok_or_else(|| StoreError::UnknownDataset(dataset.to_string()))?;
        for row in rows {
            writer.write_record(row).map_err(csv_err(&path))?;
        }
        writer.flush().map_err(io_err(&path))?;
        writer.get_ref().sync_data().map_err(io_err(&path))?;
        Ok(())
    }

    /// Appends one record and makes it durable.
    pub fn append(&mut self, record: &IterationRecord) -> Result<(), StoreError> {
        if self.writers.is_none() {
            return Err(StoreError::ReadOnly);
        }
        if record.step != self.next_step {
            return Err(StoreError::OutOfOrder {
                expected: self.next_step,
                found: record.step,
            });
        }
        let step = record.step;
        let floats = |values: &[f64]| values.iter().map(|v| v.to_string()).collect::<Vec<_>>();

        self.write_rows(PARAM, &[step_row(step, floats(&record.params))])?;
        self.write_rows(PARAM_TRIAL, &[step_row(step, floats(&record.trial_params))])?;

        let aux: Vec<String> = match &record.aux_errors {
            Some(errors) => floats(errors),
            None => vec![String::new(); self.layout.channels.len()],
        };
        self.write_rows(AUX_ERROR, &[step_row(step, aux)])?;

        if let Some(descriptors) = &record.descriptors {
            let channels: Vec<String> = self.layout.channels.iter().map(|c| c.name.clone()).collect();
            for (name, descriptor) in channels.iter().zip(descriptors) {
                let rows: Vec<Vec<String>> = (0..descriptor.rows())
                    .map(|r| {
                        std::iter::once(step.to_string())
                            .chain(std::iter::once(r.to_string()))
                            .chain(floats(descriptor.row(r)))
                            .collect()
                    })
                    .collect();
                self.write_rows(&pes_dataset(name), &rows)?;
            }
        }

        let meta = step_row(
            step,
            [
                record.iteration.to_string(),
                record.sub_iteration.to_string(),
                record.status.to_string(),
                record.accepted.to_string(),
                record.phi.to_string(),
                format_opt(record.error_old),
                format_opt(record.error_new),
            ],
        );
        self.write_rows(STEPS, &[meta])?;

        self.next_step += 1;
        debug!(step, status = %record.status, "Record committed.");
        Ok(())
    }

    fn load_dataset(
        &self,
        name: &str,
        range: impl RangeBounds<usize>,
    ) -> Result<Dataset, StoreError> {
        if self.layout.header(name).is_none() {
            return Err(StoreError::UnknownDataset(name.to_string()));
        }
        let path = Self::dataset_path(&self.dir, name);
        let mut reader = open_complete(&path)?;
        let columns = reader
            .headers()
            .map_err(csv_err(&path))?
            .iter()
            .map(str::to_string)
            .collect();
        let committed = self.next_step;
        let mut kept = Vec::new();
        for record in reader.records() {
            let record = record.map_err(csv_err(&path))?;
            let step = record
                .get(0)
                .and_then(|s| s.parse::<usize>().ok())
                .ok_or_else(|| StoreError::Corrupt {
                    dataset: name.to_string(),
                    step: 0,
                    message: format!("invalid step field in row {record:?}"),
                })?;
            if step >= committed || past_end(&range, step) {
                break;
            }
            if range.contains(&step) {
                kept.push(record.iter().map(str::to_string).collect());
            }
        }
        Ok(Dataset {
            name: name.to_string(),
            columns,
            rows: kept,
        })
    }

    /// Reads one dataset, restricted to committed steps within `range`.
    pub fn read_dataset(
        &self,
        name: &str,
        range: impl RangeBounds<usize>,
    ) -> Result<Dataset, StoreError> {
        self.load_dataset(name, range)
    }

    /// Reassembles every committed step in order.
    pub fn records(&self) -> Result<Vec<IterationRecord>, StoreError> {
        let by_step = |dataset: Dataset| -> Result<HashMap<usize, Vec<f64>>, StoreError> {
            dataset
                .rows
                .iter()
                .map(|row| Ok((row_step(&dataset.name, row)?, parse_f64s(&dataset.name, row, 1)?)))
                .collect()
        };
        let params = by_step(self.read_dataset(PARAM, ..)?)?;
        let trials = by_step(self.read_dataset(PARAM_TRIAL, ..)?)?;

        let aux_dataset = self.read_dataset(AUX_ERROR, ..)?;
        let mut aux: HashMap<usize, Option<Vec<f64>>> = HashMap::new();
        for row in &aux_dataset.rows {
            let step = row_step(AUX_ERROR, row)?;
            let empty = row.iter().skip(1).all(String::is_empty);
            let values = if empty {
                None
            } else {
                Some(parse_f64s(AUX_ERROR, row, 1)?)
            };
            aux.insert(step, values);
        }

        let mut pes: Vec<HashMap<usize, Vec<Vec<f64>>>> = Vec::new();
        for channel in &self.layout.channels {
            let name = pes_dataset(&channel.name);
            let dataset = self.read_dataset(&name, ..)?;
            let mut rows: HashMap<usize, Vec<Vec<f64>>> = HashMap::new();
            for row in &dataset.rows {
                let step = row_step(&name, row)?;
                rows.entry(step).or_default().push(parse_f64s(&name, row, 2)?);
            }
            pes.push(rows);
        }

        let steps = self.read_dataset(STEPS, ..)?;
        let mut records = Vec::with_capacity(steps.len());
        for row in &steps.rows {
            let step = row_step(STEPS, row)?;
            let corrupt = |message: String| StoreError::Corrupt {
                dataset: STEPS.to_string(),
                step,
                message,
            };
            let field = |i: usize| row.get(i).map(String::as_str).unwrap_or("");
            let parse_usize = |i: usize| {
                field(i)
                    .parse::<usize>()
                    .map_err(|_| corrupt(format!("invalid {}", STEP_COLUMNS[i])))
            };
            let missing = |dataset: &str| StoreError::Corrupt {
                dataset: dataset.to_string(),
                step,
                message: "row missing for committed step".to_string(),
            };

            let descriptors = if pes.iter().all(|p| p.contains_key(&step)) && !pes.is_empty() {
                Some(
                    self.layout
                        .channels
                        .iter()
                        .zip(&pes)
                        .map(|(c, rows)| {
                            let values: Vec<f64> = rows[&step].iter().flatten().copied().collect();
                            Descriptor::new(c.columns.clone(), rows[&step].len(), values)
                        })
                        .collect(),
                )
            } else {
                None
            };

            records.push(IterationRecord {
                step,
                iteration: parse_usize(1)?,
                sub_iteration: parse_usize(2)?,
                status: field(3).parse().map_err(corrupt)?,
                accepted: field(4)
                    .parse()
                    .map_err(|_| corrupt("invalid accepted flag".to_string()))?,
                phi: parse_opt_f64(STEPS, row, 5)?
                    .ok_or_else(|| corrupt("missing phi".to_string()))?,
                error_old: parse_opt_f64(STEPS, row, 6)?,
                error_new: parse_opt_f64(STEPS, row, 7)?,
                params: params.get(&step).cloned().ok_or_else(|| missing(PARAM))?,
                trial_params: trials
                    .get(&step)
                    .cloned()
                    .ok_or_else(|| missing(PARAM_TRIAL))?,
                aux_errors: aux.get(&step).cloned().ok_or_else(|| missing(AUX_ERROR))?,
                descriptors,
            });
        }
        Ok(records)
    }
}
