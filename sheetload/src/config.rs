//! SheetLoad configuration types and loading

use chrono::NaiveDate;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::manifest::Manifest;
use crate::warehouse::DatasetRef;

/// Main SheetLoad configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Warehouse connection
    pub warehouse: WarehouseConfig,

    /// Source fetching
    pub fetch: FetchConfig,

    /// Sources to ingest, in order
    pub manifest: Manifest,

    /// Scheduling contract and downstream dbt stages
    pub pipeline: PipelineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: None,
            warehouse: WarehouseConfig::default(),
            fetch: FetchConfig::default(),
            manifest: Manifest::carttrend(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration before use
    ///
    /// Credentials are only checked when a real warehouse will be contacted.
    pub fn validate(&self, require_credentials: bool) -> Result<()> {
        if self.warehouse.project.trim().is_empty() {
            return Err(eyre::eyre!("warehouse.project must be set"));
        }
        if self.warehouse.dataset.trim().is_empty() {
            return Err(eyre::eyre!("warehouse.dataset must be set"));
        }
        if require_credentials && !self.warehouse.credentials.exists() {
            return Err(eyre::eyre!(
                "Credentials file not found: {}",
                self.warehouse.credentials.display()
            ));
        }
        self.manifest.validate().context("Invalid manifest")?;
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: ./sheetload.yml
        let local_config = PathBuf::from("sheetload.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/sheetload/sheetload.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("sheetload").join("sheetload.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    ///
    /// Errors are swallowed; the full load reports them later.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates = match config_path {
            Some(path) => vec![path.clone()],
            None => {
                let mut paths = vec![PathBuf::from("sheetload.yml")];
                if let Some(config_dir) = dirs::config_dir() {
                    paths.push(config_dir.join("sheetload").join("sheetload.yml"));
                }
                paths
            }
        };

        candidates
            .iter()
            .find(|p| p.exists())
            .and_then(|p| Self::load_from_file(p).ok())
            .and_then(|c| c.log_level)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Warehouse connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Cloud project id
    pub project: String,

    /// Dataset that receives the raw tables
    pub dataset: String,

    /// Service-account key file
    pub credentials: PathBuf,

    /// Dataset and job location (e.g. "EU"); sink default when unset
    pub location: Option<String>,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Per-request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Delay between job status polls in milliseconds
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            project: "rising-mercury-463817-s5".to_string(),
            dataset: "carttrend_rawdata".to_string(),
            credentials: PathBuf::from("/opt/airflow/cle_carttrend.json"),
            location: None,
            base_url: "https://bigquery.googleapis.com".to_string(),
            timeout_ms: 120_000,
            poll_interval_ms: 1_000,
        }
    }
}

impl WarehouseConfig {
    pub fn dataset_ref(&self) -> DatasetRef {
        DatasetRef::new(self.project.clone(), self.dataset.clone())
    }
}

/// Source fetching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    #[serde(rename = "user-agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            user_agent: format!("sheetload/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Scheduling contract and dbt stage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pipeline identifier given to the scheduler
    #[serde(rename = "dag-id")]
    pub dag_id: String,

    pub description: String,

    pub owner: String,

    /// Cron expression or preset such as "@daily"
    pub schedule: String,

    #[serde(rename = "start-date")]
    pub start_date: NaiveDate,

    /// Backfill missed intervals
    pub catchup: bool,

    pub tags: Vec<String>,

    /// Retries per stage after the first attempt
    pub retries: u32,

    #[serde(rename = "retry-delay-secs")]
    pub retry_delay_secs: u64,

    /// dbt executable
    #[serde(rename = "dbt-bin")]
    pub dbt_bin: String,

    /// dbt project directory (working directory of the dbt stages)
    #[serde(rename = "project-dir")]
    pub project_dir: PathBuf,

    /// Directory holding profiles.yml
    #[serde(rename = "profiles-dir")]
    pub profiles_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dag_id: "carttrend_csv_to_bigquery_with_dbt_full".to_string(),
            description: "CSV -> BigQuery -> dbt run/test/docs".to_string(),
            owner: "airflow".to_string(),
            schedule: "@daily".to_string(),
            start_date: NaiveDate::from_ymd_opt(2025, 8, 14).unwrap_or_default(),
            catchup: false,
            tags: ["carttrend", "bq", "sheets", "dbt"].iter().map(|s| s.to_string()).collect(),
            retries: 1,
            retry_delay_secs: 600,
            dbt_bin: "dbt".to_string(),
            project_dir: PathBuf::from("/opt/airflow/carttrend_project"),
            profiles_dir: PathBuf::from("/opt/airflow"),
        }
    }
}

impl PipelineConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}
