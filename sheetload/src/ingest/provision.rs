//! Dataset provisioning

use std::sync::Arc;

use tracing::{debug, info};

use crate::warehouse::{DatasetRef, Warehouse, WarehouseError};

/// What [`DatasetProvisioner::ensure_container`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    AlreadyExists,
    Created,
}

/// Makes sure the target dataset exists before any load
pub struct DatasetProvisioner {
    warehouse: Arc<dyn Warehouse>,
}

impl DatasetProvisioner {
    pub fn new(warehouse: Arc<dyn Warehouse>) -> Self {
        Self { warehouse }
    }

    /// Create the dataset if the existence check says it is missing
    ///
    /// Only a not-found answer leads to a create call; every other error is
    /// returned unchanged.
    pub async fn ensure_container(&self, dataset: &DatasetRef) -> Result<ProvisionOutcome, WarehouseError> {
        debug!(%dataset, "DatasetProvisioner::ensure_container: called");
        match self.warehouse.get_dataset(dataset).await {
            Ok(_) => {
                info!(%dataset, "Dataset already exists");
                Ok(ProvisionOutcome::AlreadyExists)
            }
            Err(e) if e.is_not_found() => {
                debug!(%dataset, "DatasetProvisioner::ensure_container: not found, creating");
                self.warehouse.create_dataset(dataset).await?;
                info!(%dataset, "Dataset created");
                Ok(ProvisionOutcome::Created)
            }
            Err(e) => Err(e),
        }
    }
}
