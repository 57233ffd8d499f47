use crate::models::RawRecord;
use crate::utils::arrow::{arrow_value_to_text, column_by_name};
use common::{Error, Result};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::Deserialize;
use std::fs::File;
use std::path::Path;

pub const AMOUNT_COLUMN: &str = "total";
pub const PAYMENT_COLUMN: &str = "type";
pub const TIMESTAMP_COLUMN: &str = "timestamp";

const REQUIRED_COLUMNS: [&str; 3] = [AMOUNT_COLUMN, PAYMENT_COLUMN, TIMESTAMP_COLUMN];

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(default)]
    total: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
}

/// Reads a source file into raw records, tagging each with `truck_source_id`.
///
/// The format is chosen from the extension (`.csv` or `.parquet`). A file
/// missing one of the `total`, `type` or `timestamp` columns is rejected as a
/// whole.
pub fn load_file(path: &Path, truck_source_id: Option<i32>) -> Result<Vec<RawRecord>> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => load_csv(path, truck_source_id),
        Some(ext) if ext.eq_ignore_ascii_case("parquet") => load_parquet(path, truck_source_id),
        _ => Err(Error::InvalidInput(format!(
            "Unsupported source file type: {}",
            path.display()
        ))),
    }
}

fn load_csv(path: &Path, truck_source_id: Option<i32>) -> Result<Vec<RawRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == column) {
            return Err(Error::SchemaMismatch(format!(
                "{} is missing column '{}'",
                path.display(),
                column
            )));
        }
    }

    let mut records = Vec::new();
    for row in reader.deserialize::<CsvRow>() {
        let row = row?;
        records.push(RawRecord {
            truck_source_id,
            amount: row.total,
            payment_kind: row.kind,
            occurred_at: row.timestamp,
        });
    }

    Ok(records)
}

fn load_parquet(path: &Path, truck_source_id: Option<i32>) -> Result<Vec<RawRecord>> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut records = Vec::new();
    for batch in reader {
        let batch = batch?;
        let amounts = column_by_name(&batch, AMOUNT_COLUMN)?;
        let kinds = column_by_name(&batch, PAYMENT_COLUMN)?;
        let timestamps = column_by_name(&batch, TIMESTAMP_COLUMN)?;

        for row in 0..batch.num_rows() {
            records.push(RawRecord {
                truck_source_id,
                amount: arrow_value_to_text(amounts.as_ref(), row)?,
                payment_kind: arrow_value_to_text(kinds.as_ref(), row)?,
                occurred_at: arrow_value_to_text(timestamps.as_ref(), row)?,
            });
        }
    }

    Ok(records)
}
