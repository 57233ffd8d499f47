pub mod combine;
pub mod filename;
pub mod reader;
pub mod validation;

use crate::models::CanonicalTransaction;
use common::RowRejection;
use common::config::{PipelineSettings, TruckIdFailure};
use common::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{Level, error, info, warn};

pub use combine::{Batch, StagedDataset, combine};
pub use filename::extract_source_id;
pub use validation::RowValidator;

/// Valid rows of one source file plus how many were dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct FileResult {
    pub path: PathBuf,
    pub rows: Vec<CanonicalTransaction>,
    pub dropped: usize,
}

/// Everything normalization produced for a set of local files.
#[derive(Debug, Default)]
pub struct NormalizedFiles {
    pub files: Vec<FileResult>,
    pub rejected: Vec<(PathBuf, String)>,
}

impl NormalizedFiles {
    pub fn dropped_rows(&self) -> usize {
        self.files.iter().map(|f| f.dropped).sum()
    }
}

pub struct Normalizer {
    truck_id_failure: TruckIdFailure,
    validator: RowValidator,
}

impl Normalizer {
    pub fn new(truck_id_failure: TruckIdFailure, amount_upper_bound: Option<f64>) -> Self {
        Self {
            truck_id_failure,
            validator: RowValidator::new(amount_upper_bound),
        }
    }

    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self::new(settings.truck_id_failure, settings.amount_upper_bound)
    }

    /// Normalizes one file. An `Err` means the file as a whole was rejected.
    pub fn normalize_file(&self, path: &Path) -> Result<FileResult> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();

        let truck_source_id = match extract_source_id(file_name) {
            Ok(id) => Some(id),
            Err(e) if self.truck_id_failure == TruckIdFailure::File => return Err(e),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "No truck id, every row of this file will be dropped");
                None
            }
        };

        let records = reader::load_file(path, truck_source_id)?;

        let mut rows = Vec::with_capacity(records.len());
        let mut dropped = 0;
        for (index, raw) in records.iter().enumerate() {
            match self.validator.validate_and_coerce(raw) {
                Ok(tx) => rows.push(tx),
                Err(reason) => {
                    dropped += 1;
                    log_rejection(path, index, reason);
                }
            }
        }

        info!(
            file = %path.display(),
            kept = rows.len(),
            dropped,
            "Normalized file"
        );

        Ok(FileResult {
            path: path.to_path_buf(),
            rows,
            dropped,
        })
    }

    /// Normalizes every file, logging and setting aside the ones rejected whole.
    pub fn normalize_files(&self, paths: &[PathBuf]) -> NormalizedFiles {
        let mut normalized = NormalizedFiles::default();

        for path in paths {
            match self.normalize_file(path) {
                Ok(result) => normalized.files.push(result),
                Err(e) => {
                    error!(file = %path.display(), error = %e, "Rejected source file");
                    normalized.rejected.push((path.clone(), e.to_string()));
                }
            }
        }

        normalized
    }
}

/// Unknown payment kinds point at an upstream change, so they stand out.
fn rejection_level(reason: &RowRejection) -> Level {
    match reason {
        RowRejection::UnknownPaymentKind(_) => Level::WARN,
        _ => Level::INFO,
    }
}

fn log_rejection(path: &Path, row: usize, reason: RowRejection) {
    let level = rejection_level(&reason);
    let err = Error::RowValidation { row, reason };
    if level == Level::WARN {
        warn!(file = %path.display(), row, error = %err, "Dropped row");
    } else {
        info!(file = %path.display(), row, error = %err, "Dropped row");
    }
}
