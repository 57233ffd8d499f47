use arrow::error::ArrowError;
use aws_smithy_runtime_api::client::result::CreateUnhandledError;
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_runtime_api::http::Response;
use parquet::errors::ParquetError;
use thiserror::Error;

pub mod config;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Warehouse connection error: {0}")]
    Connection(String),

    #[error("Listing error for prefix '{prefix}': {message}")]
    Listing { prefix: String, message: String },

    #[error("Download error for key '{key}': {message}")]
    Download { key: String, message: String },

    #[error("Malformed filename: {0}")]
    MalformedFilename(String),

    #[error("Row {row} rejected: {reason}")]
    RowValidation {
        row: usize,
        #[source]
        reason: RowRejection,
    },

    #[error("Load error at row {row}: {message}")]
    Load { row: usize, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("AWS SDK error: {0}")]
    AwsSdk(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Errors that must stop the whole run rather than a single bucket.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Connection(_))
    }
}

/// Why a single raw record did not make it into the canonical dataset.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RowRejection {
    #[error("truck id could not be derived from the filename")]
    MissingTruckId,

    #[error("amount is missing")]
    MissingAmount,

    #[error("amount is a VOID marker")]
    VoidAmount,

    #[error("amount '{0}' is not numeric")]
    NonNumericAmount(String),

    #[error("amount is zero")]
    ZeroAmount,

    #[error("amount {0} is not positive")]
    NonPositiveAmount(f64),

    #[error("amount {amount} exceeds upper bound {bound}")]
    AboveUpperBound { amount: f64, bound: f64 },

    #[error("timestamp is missing")]
    MissingTimestamp,

    #[error("timestamp '{0}' could not be parsed")]
    UnparseableTimestamp(String),

    #[error("payment kind is missing")]
    MissingPaymentKind,

    #[error("unknown payment kind '{0}'")]
    UnknownPaymentKind(String),
}

// Implement From for various SdkError types
impl<E: std::fmt::Debug + CreateUnhandledError> From<SdkError<E, Response>> for Error {
    fn from(err: SdkError<E, Response>) -> Self {
        Error::AwsSdk(format!("{:?}", err))
    }
}
