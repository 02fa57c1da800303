//! Pipeline orchestration
//!
//! ```text
//! validate config ─► open store + loader ─► read plate map ─► merge + annotate ─► summarize
//!        │                                                                          │
//!        ▼                                                                          ▼
//!   (nothing written or removed                          clear stale artifacts ─► write merged
//!    on config or join errors)                                                      │
//!                                      write run manifest ◄─ write selected ◄─ write normalized
//! ```
//!
//! Stages run strictly in order and each artifact is on disk before the next
//! stage starts. The normalization sample and selection metadata columns are
//! checked against the merged table before stale artifacts are cleared. The run manifest is written last; consumers should treat
//! only artifacts listed in it as complete.

use crate::config::PipelineConfig;
use crate::merge::SingleCells;
use crate::output::{partial_path, write_table, OutputOptions};
use crate::platemap::load_platemap;
use crate::storage::MeasurementStore;
use crate::summary::{crosstab, value_counts, CrossTab};
use crate::transform::TableTransform;
use crate::{Error, Result};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// Persisted stage of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Merged and annotated single cells
    Merged,
    /// Normalized single cells
    Normalized,
    /// Normalized, feature-selected single cells
    FeatureSelected,
}

impl Stage {
    /// Stages in execution order
    pub const ALL: [Self; 3] = [Self::Merged, Self::Normalized, Self::FeatureSelected];

    /// Artifact name after the output prefix
    #[must_use]
    pub const fn artifact_stem(&self) -> &'static str {
        match self {
            Self::Merged => "sc_cellprofiler",
            Self::Normalized => "sc_norm_cellprofiler",
            Self::FeatureSelected => "sc_norm_fs_cellprofiler",
        }
    }
}

/// One written table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    /// Stage that produced it
    pub stage: Stage,
    /// File location
    pub path: PathBuf,
    /// Row count
    pub rows: usize,
    /// Column count
    pub columns: usize,
}

/// Record of a completed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    /// When the last artifact was written
    pub completed_at: DateTime<Utc>,
    /// Artifacts in stage order
    pub artifacts: Vec<ArtifactEntry>,
}

impl RunManifest {
    /// Read a manifest file
    ///
    /// # Errors
    /// Returns [`Error::Io`] if unreadable, [`Error::Json`] if malformed
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Outcome of [`Pipeline::run`]
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Written artifacts in stage order
    pub artifacts: Vec<ArtifactEntry>,
    /// Location of the run manifest
    pub manifest_path: PathBuf,
    /// Value counts of the summary column, when configured
    pub value_counts: Option<Vec<(String, usize)>>,
    /// Summary column crossed with the crosstab column, when configured
    pub crosstab: Option<CrossTab>,
}

/// Loader, merger, normalizer and selector wired to the output writer
pub struct Pipeline {
    config: PipelineConfig,
    store: Option<Box<dyn MeasurementStore>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("store_override", &self.store.is_some())
            .finish()
    }
}

impl Pipeline {
    /// Pipeline reading the store named in `config.store.path`
    #[must_use]
    pub const fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            store: None,
        }
    }

    /// Read measurements from `store` instead of `config.store.path`
    #[must_use]
    pub fn with_store<S: MeasurementStore + 'static>(mut self, store: S) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Configuration in use
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Destination of a stage's artifact
    #[must_use]
    pub fn artifact_path(&self, stage: Stage) -> PathBuf {
        let output = &self.config.output;
        let stem = format!("{}_{}", output.prefix, stage.artifact_stem());
        output.directory.join(self.config.output_options().file_name(&stem))
    }

    /// Destination of the run manifest
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        let output = &self.config.output;
        output.directory.join(format!("{}_manifest.json", output.prefix))
    }

    /// Run every stage
    ///
    /// # Errors
    /// - [`Error::Configuration`] for bad names, missing tables or columns
    ///   (including join and summary columns); the previous run's artifacts
    ///   are left in place
    /// - [`Error::Validation`] if a join yields no rows or duplicate keys,
    ///   also before any artifact is touched
    /// - [`Error::Io`] for unreadable inputs or unwritable outputs
    #[instrument(skip_all, fields(prefix = %self.config.output.prefix))]
    pub fn run(mut self) -> Result<PipelineReport> {
        let store = self.store.take();
        let config = &self.config;
        config.validate()?;
        let normalizer = config.normalizer()?;
        let selector = config.feature_selector()?;
        let options = config.output_options();

        let cells = match store {
            Some(store) => SingleCells::open(store, &config.store)?,
            None => SingleCells::from_config(&config.store)?,
        };
        info!(
            compartments = ?cells.compartments(),
            method = %normalizer.method(),
            operations = ?selector.operations(),
            "configured pipeline"
        );
        let platemap = load_platemap(&config.platemap)?;

        let merged = cells.merge_single_cells(&platemap, &config.platemap.join_on)?;
        let (counts, table) = self.summarize(&merged)?;
        normalizer.fit_mask(&merged)?;
        selector.check_input(&merged)?;

        // Earlier outputs survive any failure up to here
        self.clear_stale_artifacts()?;

        let mut artifacts = Vec::with_capacity(Stage::ALL.len());
        artifacts.push(self.persist(Stage::Merged, &merged, &options)?);

        let normalized = normalizer.apply(&merged)?;
        artifacts.push(self.persist(Stage::Normalized, &normalized, &options)?);

        let selected = selector.apply(&normalized)?;
        artifacts.push(self.persist(Stage::FeatureSelected, &selected, &options)?);

        let manifest = RunManifest {
            completed_at: Utc::now(),
            artifacts,
        };
        let manifest_path = self.manifest_path();
        write_manifest(&manifest, &manifest_path)?;
        info!(path = %manifest_path.display(), "run complete");

        Ok(PipelineReport {
            artifacts: manifest.artifacts,
            manifest_path,
            value_counts: counts,
            crosstab: table,
        })
    }

    fn persist(&self, stage: Stage, table: &RecordBatch, options: &OutputOptions) -> Result<ArtifactEntry> {
        let path = self.artifact_path(stage);
        write_table(table, &path, options)?;
        info!(
            stage = ?stage,
            rows = table.num_rows(),
            columns = table.num_columns(),
            "stage complete"
        );
        Ok(ArtifactEntry {
            stage,
            path,
            rows: table.num_rows(),
            columns: table.num_columns(),
        })
    }

    fn clear_stale_artifacts(&self) -> Result<()> {
        let mut stale: Vec<PathBuf> = Stage::ALL.iter().map(|s| self.artifact_path(*s)).collect();
        stale.push(self.manifest_path());
        for path in stale {
            for candidate in [partial_path(&path), path] {
                match fs::remove_file(&candidate) {
                    Ok(()) => info!(path = %candidate.display(), "removed stale artifact"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(Error::Io(e)),
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::type_complexity)]
    fn summarize(&self, merged: &RecordBatch) -> Result<(Option<Vec<(String, usize)>>, Option<CrossTab>)> {
        let Some(column) = self.config.summary_column.as_deref() else {
            return Ok((None, None));
        };
        let counts = value_counts(merged, column)?;
        for (value, count) in &counts {
            info!(column, value = %value, count, "value count");
        }
        let table = crosstab(merged, column, &self.config.crosstab_column)?;
        info!(
            rows = %column,
            columns = %self.config.crosstab_column,
            off_diagonal = table.off_diagonal_total(),
            "crosstab\n{table}"
        );
        Ok((Some(counts), Some(table)))
    }
}

fn write_manifest(manifest: &RunManifest, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let partial = partial_path(path);
    fs::write(&partial, serde_json::to_vec_pretty(manifest)?)?;
    fs::rename(&partial, path)?;
    Ok(())
}
