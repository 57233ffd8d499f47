use common::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

// T3_T<truck id>_<anything>, e.g. T3_T42_2024-01-01.csv
static SOURCE_FILENAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^T3_T(?P<truck_id>\d{1,9})_[^/]+$").expect("Invalid source filename regex")
});

/// Parses the truck id out of a source file name or path.
///
/// Only the final path component is inspected.
pub fn extract_source_id(file_name: &str) -> Result<i32> {
    let base = Path::new(file_name)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(file_name);

    SOURCE_FILENAME_REGEX
        .captures(base)
        .and_then(|caps| caps.name("truck_id")?.as_str().parse::<i32>().ok())
        .ok_or_else(|| Error::MalformedFilename(file_name.to_string()))
}
