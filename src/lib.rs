//! # sc-features: Single-Cell Morphology Feature Extraction
//!
//! **Version**: 0.1.0
//!
//! sc-features turns the per-object measurement tables written by an imaging
//! pipeline (CellProfiler `ExportToDatabase`) into analysis-ready single-cell
//! profiles. A run has four strictly sequential stages, each persisted before
//! the next begins:
//!
//! 1. **Loader** ([`merge::SingleCells::open`]): validate compartments, merge
//!    columns, strata and the linking map against the measurement store
//! 2. **Merger** ([`merge::SingleCells::merge_single_cells`]): join
//!    compartments into one row per cell, attach image strata, annotate with
//!    the plate map
//! 3. **Normalizer** ([`normalize::Normalizer`]): rescale feature columns
//! 4. **Feature Selector** ([`feature_select::FeatureSelector`]): drop noisy,
//!    redundant and blocklisted features
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Jidoka**: fail fast on configuration and join errors, never write a
//!   partial artifact
//! - **Poka-Yoke**: linking map is explicit configuration, never inferred
//! - **Genchi Genbutsu**: every dropped cell is reported, not hidden
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use sc_features::config::PipelineConfig;
//! use sc_features::pipeline::Pipeline;
//!
//! let config = PipelineConfig::from_toml_file("config/nf1_cellprofiler.toml")?;
//! let report = Pipeline::new(config).run()?;
//!
//! for artifact in &report.artifacts {
//!     println!("{}: {} x {}", artifact.path.display(), artifact.rows, artifact.columns);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod error;
pub mod feature_select;
pub mod features;
pub mod merge;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod platemap;
pub mod stats;
pub mod storage;
pub mod summary;
pub mod table;
pub mod transform;

pub use error::{Error, ErrorKind, Result};
pub use transform::TableTransform;
