//! Extract single-cell features from a CellProfiler measurement database
//!
//! ```text
//! extract-single-cell-features --config config/nf1_cellprofiler.toml
//! extract-single-cell-features --config nf1.toml --method robustize \
//!     --operation variance_threshold --operation drop_na_columns
//! ```
//!
//! Logging follows `RUST_LOG` (default `info`).

use anyhow::{Context, Result};
use clap::Parser;
use sc_features::config::PipelineConfig;
use sc_features::pipeline::Pipeline;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "extract-single-cell-features")]
#[command(about = "Merge, normalize and feature-select single-cell morphology profiles")]
#[command(version)]
struct Cli {
    /// Pipeline configuration (TOML)
    #[arg(long, short)]
    config: PathBuf,

    /// Override the output directory
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Override the measurement store location
    #[arg(long)]
    store: Option<String>,

    /// Override the normalization method (standardize, robustize, mad_robustize)
    #[arg(long)]
    method: Option<String>,

    /// Override the feature selection operations (repeatable, applied in order)
    #[arg(long = "operation")]
    operations: Vec<String>,
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let mut config = PipelineConfig::from_toml_file(&cli.config)
        .with_context(|| format!("loading configuration {}", cli.config.display()))?;
    if let Some(dir) = cli.output_dir {
        config.output.directory = dir;
    }
    if let Some(store) = cli.store {
        config.store.path = store;
    }
    if let Some(method) = cli.method {
        config.normalize.method = method;
    }
    if !cli.operations.is_empty() {
        config.feature_select.operations = cli.operations;
    }

    let report = Pipeline::new(config)
        .run()
        .context("single-cell feature extraction failed")?;

    for artifact in &report.artifacts {
        info!(
            stage = ?artifact.stage,
            path = %artifact.path.display(),
            shape = %format!("({}, {})", artifact.rows, artifact.columns),
            "artifact"
        );
    }
    if let Some(counts) = &report.value_counts {
        for (value, count) in counts {
            println!("{value}\t{count}");
        }
    }
    if let Some(table) = &report.crosstab {
        println!("{table}");
    }
    Ok(())
}
