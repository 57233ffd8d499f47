use arrow::array::{
    Array,
    ArrayRef,
    LargeStringArray,
    StringArray,
    TimestampMicrosecondArray,
    TimestampMillisecondArray,
    TimestampNanosecondArray,
    TimestampSecondArray,
};
use arrow::datatypes::{DataType, TimeUnit};
use arrow::record_batch::RecordBatch;
use arrow::temporal_conversions::{
    timestamp_ms_to_datetime,
    timestamp_ns_to_datetime,
    timestamp_s_to_datetime,
    timestamp_us_to_datetime,
};
use arrow::util::display::array_value_to_string;
use common::{Error, Result};

/// Text layout used for timestamps pulled out of typed columns.
pub const TEXT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

pub fn column_by_name<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    batch.column_by_name(name).ok_or_else(|| {
        Error::SchemaMismatch(format!(
            "Column '{}' not found, available: {:?}",
            name,
            batch
                .schema()
                .fields()
                .iter()
                .map(|f| f.name().clone())
                .collect::<Vec<_>>()
        ))
    })
}

fn downcast<'a, T: 'static>(array: &'a dyn Array) -> Result<&'a T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        Error::SchemaMismatch(format!("Unexpected array type {:?}", array.data_type()))
    })
}

/// Renders one cell as untrusted text, `None` for nulls.
///
/// Timestamp columns come out in UTC as `YYYY-MM-DD HH:MM:SS[.fff]`; every
/// other type uses arrow's display formatting.
pub fn arrow_value_to_text(array: &dyn Array, index: usize) -> Result<Option<String>> {
    if array.is_null(index) {
        return Ok(None);
    }

    let text = match array.data_type() {
        DataType::Utf8 => downcast::<StringArray>(array)?.value(index).to_string(),
        DataType::LargeUtf8 => downcast::<LargeStringArray>(array)?.value(index).to_string(),
        DataType::Timestamp(unit, _) => {
            let datetime = match unit {
                TimeUnit::Second => {
                    timestamp_s_to_datetime(downcast::<TimestampSecondArray>(array)?.value(index))
                }
                TimeUnit::Millisecond => timestamp_ms_to_datetime(
                    downcast::<TimestampMillisecondArray>(array)?.value(index),
                ),
                TimeUnit::Microsecond => timestamp_us_to_datetime(
                    downcast::<TimestampMicrosecondArray>(array)?.value(index),
                ),
                TimeUnit::Nanosecond => timestamp_ns_to_datetime(
                    downcast::<TimestampNanosecondArray>(array)?.value(index),
                ),
            };
            match datetime {
                Some(dt) => dt.format(TEXT_TIMESTAMP_FORMAT).to_string(),
                // Out-of-range instants are handed on as raw text and fail validation later.
                None => array_value_to_string(array, index)?,
            }
        }
        _ => array_value_to_string(array, index)?,
    };

    Ok(Some(text))
}
