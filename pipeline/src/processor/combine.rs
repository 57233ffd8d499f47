use crate::models::{CanonicalTransaction, PaymentMethod};
use crate::processor::FileResult;
use chrono::NaiveDateTime;
use common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

const STAGED_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Ordered canonical rows gathered for one load cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    rows: Vec<CanonicalTransaction>,
}

impl Batch {
    pub fn new(rows: Vec<CanonicalTransaction>) -> Self {
        Self { rows }
    }

    /// "Nothing to load", as opposed to a failure.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[CanonicalTransaction] {
        &self.rows
    }
}

/// Concatenates file results in input order. Files without valid rows add nothing.
pub fn combine(files: &[FileResult]) -> Batch {
    if files.is_empty() {
        return Batch::empty();
    }

    let rows = files
        .iter()
        .flat_map(|file| file.rows.iter().cloned())
        .collect();
    Batch::new(rows)
}

/// Row layout of the staging CSV.
#[derive(Debug, Serialize, Deserialize)]
struct StagedRecord {
    truck_id: i32,
    payment_method_id: i32,
    total: String,
    timestamp: String,
}

impl From<&CanonicalTransaction> for StagedRecord {
    fn from(tx: &CanonicalTransaction) -> Self {
        Self {
            truck_id: tx.truck_id,
            payment_method_id: tx.payment_method.id(),
            total: format!("{:.2}", tx.total),
            timestamp: tx.occurred_at.format(STAGED_TIMESTAMP_FORMAT).to_string(),
        }
    }
}

impl StagedRecord {
    fn into_transaction(self, row: usize) -> Result<CanonicalTransaction> {
        let payment_method = PaymentMethod::from_id(self.payment_method_id).ok_or_else(|| {
            Error::InvalidInput(format!(
                "Staged row {}: unknown payment_method_id {}",
                row, self.payment_method_id
            ))
        })?;
        let total = self.total.parse::<f64>().map_err(|e| {
            Error::InvalidInput(format!("Staged row {}: total '{}': {}", row, self.total, e))
        })?;
        let occurred_at = NaiveDateTime::parse_from_str(&self.timestamp, STAGED_TIMESTAMP_FORMAT)
            .map_err(|e| {
                Error::InvalidInput(format!(
                    "Staged row {}: timestamp '{}': {}",
                    row, self.timestamp, e
                ))
            })?;

        Ok(CanonicalTransaction {
            truck_id: self.truck_id,
            payment_method,
            total,
            occurred_at,
        })
    }
}

/// The staged artifact on disk, header `truck_id,payment_method_id,total,timestamp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedDataset {
    path: PathBuf,
}

impl StagedDataset {
    pub fn open(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn write(batch: &Batch, path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut writer = csv::Writer::from_path(path)?;
        for tx in batch.rows() {
            writer.serialize(StagedRecord::from(tx))?;
        }
        writer.flush()?;

        info!(path = %path.display(), rows = batch.len(), "Staged dataset written");
        Ok(Self::open(path))
    }

    pub fn read(&self) -> Result<Batch> {
        let mut reader = csv::Reader::from_path(&self.path)?;
        let mut rows = Vec::new();
        for (row, record) in reader.deserialize::<StagedRecord>().enumerate() {
            rows.push(record?.into_transaction(row)?);
        }
        Ok(Batch::new(rows))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remove(&self) -> Result<()> {
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}
