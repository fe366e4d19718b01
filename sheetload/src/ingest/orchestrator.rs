//! Batch Orchestrator: provision once, then load every manifest entry

use std::sync::Arc;

use eyre::{Context, Result};
use tracing::{debug, info};

use super::{DatasetProvisioner, FileLoader, IngestReport};
use crate::manifest::Manifest;
use crate::source::SourceFetcher;
use crate::warehouse::{DatasetRef, Warehouse};

/// Runs the ingest stage over a manifest
///
/// Holds no state between runs; everything persistent lives in the warehouse.
pub struct BatchOrchestrator {
    dataset: DatasetRef,
    provisioner: DatasetProvisioner,
    loader: FileLoader,
}

impl BatchOrchestrator {
    pub fn new(fetcher: Arc<dyn SourceFetcher>, warehouse: Arc<dyn Warehouse>, dataset: DatasetRef) -> Self {
        Self {
            provisioner: DatasetProvisioner::new(warehouse.clone()),
            loader: FileLoader::new(fetcher, warehouse, dataset.clone()),
            dataset,
        }
    }

    pub fn dataset(&self) -> &DatasetRef {
        &self.dataset
    }

    /// Load every entry in manifest order
    ///
    /// Returns an error only for manifest collisions and provisioning
    /// failures, both raised before any source is fetched. Per-source
    /// failures are recorded in the report and never stop the batch.
    pub async fn run_all(&self, manifest: &Manifest) -> Result<IngestReport> {
        debug!(entries = manifest.len(), "BatchOrchestrator::run_all: called");
        manifest.validate().context("Invalid manifest")?;

        let outcome = self
            .provisioner
            .ensure_container(&self.dataset)
            .await
            .context(format!("Failed to provision dataset {}", self.dataset))?;
        debug!(?outcome, "BatchOrchestrator::run_all: dataset ready");

        let mut results = Vec::with_capacity(manifest.len());
        for entry in manifest {
            let result = self.loader.load(&entry.name, &entry.location).await;
            results.push(result);
        }

        let report = IngestReport::new(results);
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            rows = report.total_rows(),
            "Ingest complete"
        );
        Ok(report)
    }
}
