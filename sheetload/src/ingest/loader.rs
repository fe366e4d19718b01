//! File Loader: fetch, normalize and load one source

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::LoadResult;
use crate::source::{CsvTable, FetchError, SourceFetcher};
use crate::warehouse::{DatasetRef, LoadJobConfig, TableRef, Warehouse, WarehouseError};

/// Anything that can go wrong between fetch and job completion
#[derive(Debug, Error)]
enum LoadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

/// Loads one manifest entry into the provisioned dataset
pub struct FileLoader {
    fetcher: Arc<dyn SourceFetcher>,
    warehouse: Arc<dyn Warehouse>,
    dataset: DatasetRef,
}

impl FileLoader {
    pub fn new(fetcher: Arc<dyn SourceFetcher>, warehouse: Arc<dyn Warehouse>, dataset: DatasetRef) -> Self {
        Self {
            fetcher,
            warehouse,
            dataset,
        }
    }

    /// Target table for a source name
    pub fn target(&self, source_name: &str) -> TableRef {
        self.dataset.table(source_name.to_lowercase())
    }

    /// Load one source; failures come back as a failed [`LoadResult`]
    pub async fn load(&self, source_name: &str, location: &str) -> LoadResult {
        debug!(%source_name, %location, "FileLoader::load: called");
        let target = self.target(source_name);

        match self.try_load(&target, location).await {
            Ok(rows) => {
                info!(table = %target, rows, "Upload complete");
                LoadResult::success(source_name, rows)
            }
            Err(e) => {
                warn!(source = %source_name, error = %e, "Upload failed");
                LoadResult::failed(source_name, e)
            }
        }
    }

    async fn try_load(&self, target: &TableRef, location: &str) -> Result<u64, LoadError> {
        let bytes = self.fetcher.fetch(location).await?;
        debug!(bytes = bytes.len(), "FileLoader::try_load: fetched");

        let mut table = CsvTable::parse(&bytes)?;
        table.normalize_headers();
        debug!(headers = ?table.headers(), "FileLoader::try_load: normalized headers");

        let rows = table.row_count() as u64;
        let job_config = LoadJobConfig::replace_csv(table.schema());
        let payload = table.to_csv()?;

        let outcome = self.warehouse.load_csv(target, payload, &job_config).await?;
        debug!(job_id = %outcome.job_id, output_rows = ?outcome.output_rows, "FileLoader::try_load: job done");

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::LoadStatus;
    use crate::warehouse::{FieldType, MemoryWarehouse, SchemaField};
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Serves fixed bodies by location; anything else is a 404
    struct StaticFetcher {
        bodies: HashMap<String, Vec<u8>>,
    }

    impl StaticFetcher {
        fn new(bodies: &[(&str, &str)]) -> Self {
            Self {
                bodies: bodies
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl SourceFetcher for StaticFetcher {
        async fn fetch(&self, location: &str) -> Result<Vec<u8>, FetchError> {
            self.bodies.get(location).cloned().ok_or_else(|| FetchError::Status {
                status: 404,
                location: location.to_string(),
            })
        }
    }

    fn dataset() -> DatasetRef {
        DatasetRef::new("proj", "raw")
    }

    #[tokio::test]
    async fn test_load_success() {
        let fetcher = Arc::new(StaticFetcher::new(&[(
            "mem://orders",
            "Order ID,\"Total (€)\",Période\n1,10,jan\n2,20,fev\n",
        )]));
        let wh = Arc::new(MemoryWarehouse::new().with_dataset(dataset()));
        let loader = FileLoader::new(fetcher, wh.clone(), dataset());

        let result = loader.load("Orders", "mem://orders").await;
        assert_eq!(result, LoadResult::success("Orders", 2));

        let stored = wh.table(&dataset().table("orders")).await.unwrap();
        assert_eq!(stored.columns, vec!["order id", "total _€_", "periode"]);
        assert_eq!(stored.rows.len(), 2);
    }

    #[tokio::test]
    async fn test_text_only_sheet_sends_normalized_schema() {
        let fetcher = Arc::new(StaticFetcher::new(&[("mem://villes", "Nom,Ville\nA,Paris\nB,Lyon\n")]));
        let wh = Arc::new(MemoryWarehouse::new().with_dataset(dataset()));
        let loader = FileLoader::new(fetcher, wh.clone(), dataset());

        let result = loader.load("Villes", "mem://villes").await;
        assert!(result.is_success());

        let stored = wh.table(&dataset().table("villes")).await.unwrap();
        assert_eq!(
            stored.schema,
            vec![
                SchemaField::nullable("nom", FieldType::String),
                SchemaField::nullable("ville", FieldType::String),
            ]
        );
        assert_eq!(stored.rows.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_captured() {
        let fetcher = Arc::new(StaticFetcher::new(&[]));
        let wh = Arc::new(MemoryWarehouse::new().with_dataset(dataset()));
        let loader = FileLoader::new(fetcher, wh.clone(), dataset());

        let result = loader.load("Orders", "mem://missing").await;
        assert_eq!(result.status(), LoadStatus::Failed);
        assert_eq!(result.rows(), 0);
        assert!(result.error().contains("404"));
        assert!(wh.table_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_csv_is_captured() {
        let fetcher = Arc::new(StaticFetcher::new(&[("mem://bad", "a,b\n1,2,3\n")]));
        let wh = Arc::new(MemoryWarehouse::new().with_dataset(dataset()));
        let loader = FileLoader::new(fetcher, wh, dataset());

        let result = loader.load("Bad", "mem://bad").await;
        assert!(!result.is_success());
        assert!(result.error().starts_with("Malformed CSV"));
    }

    #[tokio::test]
    async fn test_job_failure_is_captured() {
        let fetcher = Arc::new(StaticFetcher::new(&[("mem://orders", "id\n1\n")]));
        let wh = Arc::new(MemoryWarehouse::new().with_dataset(dataset()).fail_loads_for("orders"));
        let loader = FileLoader::new(fetcher, wh, dataset());

        let result = loader.load("Orders", "mem://orders").await;
        assert!(!result.is_success());
        assert!(result.error().contains("Simulated failure"));
    }

    #[test]
    fn test_target_is_lowercased() {
        let loader = FileLoader::new(
            Arc::new(StaticFetcher::new(&[])),
            Arc::new(MemoryWarehouse::new()),
            dataset(),
        );
        assert_eq!(loader.target("Carttrend_Clients").to_string(), "proj.raw.carttrend_clients");
    }
}
