pub mod models;
pub mod processor;
pub mod services;
pub mod storage;
pub mod utils;
pub mod warehouse;

use chrono::{NaiveDate, Utc};
use common::Result;
use common::config::{PipelineSettings, Settings};
use processor::StagedDataset;
use services::{RunReport, Scheduler};
use std::path::Path;
use std::sync::Arc;
use storage::ObjectStoreClient;
use storage::s3::S3Storage;
use tracing::info;
use warehouse::summary::Summary;
use warehouse::{LoadOptions, LoadReport, RedshiftLoader, Warehouse, WarehouseConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One pass over the static historical prefix.
    Historical,
    /// Rolling window of recent hour buckets.
    Incremental,
}

impl Mode {
    pub fn settings<'a>(&self, settings: &'a Settings) -> &'a PipelineSettings {
        match self {
            Mode::Historical => &settings.historical,
            Mode::Incremental => &settings.incremental,
        }
    }
}

fn loader_for(settings: &Settings, pipeline: &PipelineSettings) -> Result<RedshiftLoader> {
    Ok(RedshiftLoader::new(
        WarehouseConfig::from_settings(settings)?,
        LoadOptions::from_settings(pipeline),
    ))
}

/// Runs the ETL job once in the given mode.
pub async fn run_pipeline(settings: &Settings, mode: Mode, hours: Option<u32>) -> Result<RunReport> {
    let pipeline = mode.settings(settings);
    let warehouse: Arc<dyn Warehouse> = Arc::new(loader_for(settings, pipeline)?);
    let storage = Arc::new(S3Storage::from_settings(settings).await?);

    let scheduler = Scheduler::new(
        ObjectStoreClient::new(storage),
        warehouse,
        pipeline,
        Path::new(&settings.work_dir),
    );

    let scopes = match mode {
        Mode::Historical => vec![scheduler.static_scope()],
        Mode::Incremental => {
            scheduler.incremental_scopes(Utc::now(), hours.unwrap_or(pipeline.hours))
        }
    };

    info!(?mode, scopes = scopes.len(), bucket = %settings.bucket, "Starting pipeline run");
    scheduler.run(&scopes).await
}

/// Uploads an already staged CSV without re-normalizing its sources.
pub async fn load_staged(settings: &Settings, mode: Mode, path: &Path) -> Result<LoadReport> {
    let loader = loader_for(settings, mode.settings(settings))?;
    let batch = StagedDataset::open(path).read()?;

    info!(path = %path.display(), rows = batch.len(), "Uploading staged dataset");
    loader.upload(&batch).await
}

/// Aggregates over the fact table for an inclusive date range.
pub async fn summarize(settings: &Settings, from: NaiveDate, to: NaiveDate) -> Result<Summary> {
    let config = WarehouseConfig::from_settings(settings)?;
    warehouse::summary::range_summary(&config, from, to).await
}
