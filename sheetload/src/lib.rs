//! SheetLoad - spreadsheet CSV to BigQuery ingestion
//!
//! Downloads a manifest of spreadsheet CSV exports, normalizes their column
//! headers, loads each into its own warehouse table (replacing previous
//! contents) and then hands off to dbt for transformation, tests and docs.
//!
//! # Pipeline
//!
//! ```text
//! import_csv_links_to_bq -> dbt_run_transformations -> dbt_test_data_quality -> dbt_generate_docs
//! ```
//!
//! # Modules
//!
//! - [`normalize`] - column header normalization
//! - [`manifest`] - named source list and collision checks
//! - [`source`] - fetching and parsing CSV sources
//! - [`warehouse`] - sink trait, BigQuery client, in-memory sink
//! - [`ingest`] - provisioner, file loader, batch orchestrator
//! - [`pipeline`] - stage graph declaration and runner
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sheetload::{BatchOrchestrator, HttpFetcher, Manifest, MemoryWarehouse, config::Config};
//!
//! let config = Config::default();
//! let orchestrator = BatchOrchestrator::new(
//!     Arc::new(HttpFetcher::from_config(&config.fetch)?),
//!     Arc::new(MemoryWarehouse::new()),
//!     config.warehouse.dataset_ref(),
//! );
//! let report = orchestrator.run_all(&Manifest::carttrend()).await?;
//! println!("{}", report);
//! ```

pub mod cli;
pub mod config;
pub mod ingest;
pub mod manifest;
pub mod normalize;
pub mod pipeline;
pub mod source;
pub mod warehouse;

pub use config::Config;
pub use ingest::{BatchOrchestrator, DatasetProvisioner, FileLoader, IngestReport, LoadResult, LoadStatus};
pub use manifest::{Manifest, ManifestEntry, ManifestError};
pub use normalize::{normalize_header, normalize_headers};
pub use pipeline::{PipelineDefinition, PipelineExecutor, PipelineRunner, StageKind};
pub use source::{CsvTable, FetchError, HttpFetcher, SourceFetcher};
pub use warehouse::{BigQueryClient, DatasetRef, MemoryWarehouse, TableRef, Warehouse, WarehouseError};
