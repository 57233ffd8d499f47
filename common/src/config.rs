use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};
use serde::Deserialize;
use tracing::debug;

/// Process-wide settings, built once at start-up and handed to each component.
///
/// Values come from an optional TOML file and are then overridden by the
/// unprefixed environment variables the deployment provides (`BUCKET`,
/// `HOST`, `PORT`, `USERNAME`, `PASSWORD`, `DATABASE_NAME`, `SCHEMA`,
/// `ACCESS_KEY_ID`, `SECRET_ACCESS_KEY`).
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    pub bucket: String,
    #[serde(default = "default_s3_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,

    pub host: String,
    #[serde(default = "default_warehouse_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database_name: String,
    pub schema: String,

    #[serde(default = "default_work_dir")]
    pub work_dir: String,

    pub historical: PipelineSettings,
    pub incremental: PipelineSettings,
}

/// Policies and scope of one pipeline mode.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PipelineSettings {
    pub prefix: String,
    pub extension: String,
    pub truck_id_failure: TruckIdFailure,
    pub load_error_policy: LoadErrorPolicy,
    #[serde(default)]
    pub amount_upper_bound: Option<f64>,
    #[serde(default)]
    pub row_cap: Option<usize>,
    pub hours: u32,
    pub purge_remote: bool,
}

/// Where a filename without a usable truck id is rejected.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TruckIdFailure {
    /// Each row of the file is dropped with its own logged reason.
    Row,
    /// The whole file is rejected before any row is read.
    File,
}

/// What a failing insert does to the rest of the batch.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoadErrorPolicy {
    AbortBatch,
    SkipRow,
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_warehouse_port() -> u16 {
    5439
}

fn default_work_dir() -> String {
    "data".to_string()
}

impl Settings {
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let builder = Self::builder()?
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::default());

        Self::from_builder(builder)
    }

    /// A builder pre-loaded with the two mode presets.
    ///
    /// The historical preset backfills `historical/*.parquet`, caps each upload
    /// at 1000 rows and leaves the source objects alone. The incremental preset
    /// walks the last three hour buckets under `trucks/`, bounds amounts at 100
    /// and purges consumed objects once they are loaded.
    pub fn builder() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("historical.prefix", "historical/")?
            .set_default("historical.extension", ".parquet")?
            .set_default("historical.truck_id_failure", "row")?
            .set_default("historical.load_error_policy", "abort_batch")?
            .set_default("historical.row_cap", 1000_i64)?
            .set_default("historical.hours", 1_i64)?
            .set_default("historical.purge_remote", false)?
            .set_default("incremental.prefix", "trucks/")?
            .set_default("incremental.extension", ".csv")?
            .set_default("incremental.truck_id_failure", "file")?
            .set_default("incremental.load_error_policy", "abort_batch")?
            .set_default("incremental.amount_upper_bound", 100.0)?
            .set_default("incremental.hours", 3_i64)?
            .set_default("incremental.purge_remote", true)
    }

    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let config = builder.build()?;
        let settings: Settings = config.try_deserialize()?;

        debug!(
            bucket = %settings.bucket,
            host = %settings.host,
            port = settings.port,
            schema = %settings.schema,
            "Loaded pipeline settings"
        );

        Ok(settings)
    }

    /// Static credentials, if both halves are present and non-empty.
    pub fn static_credentials(&self) -> Option<(&str, &str)> {
        match (self.access_key_id.as_deref(), self.secret_access_key.as_deref()) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                Some((key, secret))
            }
            _ => None,
        }
    }
}
