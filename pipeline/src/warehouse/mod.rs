pub mod summary;

use crate::models::CanonicalTransaction;
use crate::processor::Batch;
use async_trait::async_trait;
use common::config::{LoadErrorPolicy, PipelineSettings, Settings};
use common::{Error, Result};
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Executor};
use std::fmt;
use tracing::{error, info, warn};

pub const FACT_TABLE: &str = "FACT_Transaction";

const INSERT_TRANSACTION_SQL: &str =
    "INSERT INTO FACT_Transaction (truck_id, payment_method_id, total, at) VALUES ($1, $2, $3, $4)";

static SCHEMA_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]{0,126}$").expect("Invalid schema name regex"));

/// Sink for validated batches.
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn upload(&self, batch: &Batch) -> Result<LoadReport>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub inserted: usize,
    pub skipped: usize,
    /// Rows left out by the row cap.
    pub capped: usize,
}

impl LoadReport {
    /// Every row handed to the loader reached the table.
    pub fn is_complete(&self) -> bool {
        self.skipped == 0 && self.capped == 0
    }
}

/// Where a single row goes. The warehouse connection is one; tests script others.
#[async_trait]
pub trait RowSink: Send {
    async fn insert(&mut self, tx: &CanonicalTransaction) -> std::result::Result<(), sqlx::Error>;
}

#[async_trait]
impl RowSink for PgConnection {
    async fn insert(&mut self, tx: &CanonicalTransaction) -> std::result::Result<(), sqlx::Error> {
        sqlx::query(INSERT_TRANSACTION_SQL)
            .bind(tx.truck_id)
            .bind(tx.payment_method.id())
            .bind(tx.total)
            .bind(tx.occurred_at)
            .execute(&mut *self)
            .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct WarehouseConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub schema: String,
}

impl fmt::Debug for WarehouseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarehouseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl WarehouseConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let schema = validate_schema_name(&settings.schema)?;
        Ok(Self {
            host: settings.host.clone(),
            port: settings.port,
            username: settings.username.clone(),
            password: settings.password.clone(),
            database: settings.database_name.clone(),
            schema,
        })
    }

    fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(&self.password)
            .database(&self.database)
    }
}

/// The schema is interpolated into `SET search_path`, so only plain identifiers pass.
pub fn validate_schema_name(schema: &str) -> Result<String> {
    if SCHEMA_NAME_REGEX.is_match(schema) {
        Ok(schema.to_string())
    } else {
        Err(Error::InvalidInput(format!(
            "Schema name '{}' is not a plain SQL identifier",
            schema
        )))
    }
}

/// Opens a fresh connection, points it at the configured schema, runs `work`
/// and closes the connection whatever `work` returned.
///
/// Statements run in autocommit mode. Connection failures surface as
/// [`Error::Connection`].
pub async fn with_session<T, F>(config: &WarehouseConfig, work: F) -> Result<T>
where
    F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T>>,
{
    let mut conn = PgConnection::connect_with(&config.connect_options())
        .await
        .map_err(|e| {
            error!(host = %config.host, port = config.port, error = %e, "Error connecting to warehouse");
            Error::Connection(e.to_string())
        })?;
    info!(host = %config.host, database = %config.database, "Connected to warehouse");

    let outcome = match set_search_path(&mut conn, &config.schema).await {
        Ok(()) => work(&mut conn).await,
        Err(e) => Err(e),
    };

    if let Err(e) = conn.close().await {
        warn!(error = %e, "Error closing warehouse connection");
    }

    outcome
}

async fn set_search_path(conn: &mut PgConnection, schema: &str) -> Result<()> {
    let statement = format!("SET search_path TO {};", schema);
    conn.execute(statement.as_str())
        .await
        .map_err(classify_sqlx_error)?;
    Ok(())
}

/// Socket and TLS failures mean the connection is gone; everything else is a
/// plain database error.
fn classify_sqlx_error(err: sqlx::Error) -> Error {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::Protocol(_) => {
            Error::Connection(err.to_string())
        }
        other => Error::Database(other),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    pub policy: LoadErrorPolicy,
    pub row_cap: Option<usize>,
}

impl LoadOptions {
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            policy: settings.load_error_policy,
            row_cap: settings.row_cap,
        }
    }

    /// The slice of rows this load will attempt.
    pub fn capped<'a>(&self, rows: &'a [CanonicalTransaction]) -> &'a [CanonicalTransaction] {
        match self.row_cap {
            Some(cap) if rows.len() > cap => &rows[..cap],
            _ => rows,
        }
    }
}

/// Row-by-row loader for the `FACT_Transaction` table.
pub struct RedshiftLoader {
    config: WarehouseConfig,
    options: LoadOptions,
}

impl RedshiftLoader {
    pub fn new(config: WarehouseConfig, options: LoadOptions) -> Self {
        Self { config, options }
    }
}

#[async_trait]
impl Warehouse for RedshiftLoader {
    async fn upload(&self, batch: &Batch) -> Result<LoadReport> {
        let rows = self.options.capped(batch.rows());
        let capped = batch.len() - rows.len();
        if capped > 0 {
            warn!(
                cap = rows.len(),
                left_out = capped,
                "Row cap reached, uploading only the first rows"
            );
        }

        let policy = self.options.policy;
        let rows = rows.to_vec();
        let mut report = with_session(&self.config, move |conn| {
            Box::pin(async move { insert_rows(conn, &rows, policy).await })
        })
        .await?;
        report.capped = capped;

        info!(
            inserted = report.inserted,
            skipped = report.skipped,
            "Data loaded to warehouse"
        );
        Ok(report)
    }
}

async fn insert_rows<S: RowSink + ?Sized>(
    sink: &mut S,
    rows: &[CanonicalTransaction],
    policy: LoadErrorPolicy,
) -> Result<LoadReport> {
    let mut report = LoadReport::default();

    for (row, tx) in rows.iter().enumerate() {
        let err = match sink.insert(tx).await {
            Ok(_) => {
                report.inserted += 1;
                continue;
            }
            Err(e) => classify_sqlx_error(e),
        };

        if err.is_fatal() {
            error!(row, inserted = report.inserted, error = %err, "Lost warehouse connection during upload");
            return Err(err);
        }

        match policy {
            LoadErrorPolicy::AbortBatch => {
                error!(row, inserted = report.inserted, error = %err, "Error uploading data, aborting batch");
                return Err(Error::Load {
                    row,
                    message: err.to_string(),
                });
            }
            LoadErrorPolicy::SkipRow => {
                warn!(row, error = %err, "Error inserting row, skipping");
                report.skipped += 1;
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaymentMethod;
    use chrono::NaiveDate;
    use std::collections::HashMap;

    /// Accepts rows except at the scripted positions.
    #[derive(Default)]
    struct ScriptedSink {
        failures: HashMap<usize, bool>,
        attempts: usize,
        stored: Vec<f64>,
    }

    impl ScriptedSink {
        fn failing_at(row: usize, connection_lost: bool) -> Self {
            Self {
                failures: HashMap::from([(row, connection_lost)]),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl RowSink for ScriptedSink {
        async fn insert(&mut self, tx: &CanonicalTransaction) -> std::result::Result<(), sqlx::Error> {
            let row = self.attempts;
            self.attempts += 1;
            match self.failures.get(&row) {
                Some(true) => Err(sqlx::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "broken pipe",
                ))),
                Some(false) => Err(sqlx::Error::RowNotFound),
                None => {
                    self.stored.push(tx.total);
                    Ok(())
                }
            }
        }
    }

    #[tokio::test]
    async fn test_abort_batch_stops_at_first_failure() {
        let mut sink = ScriptedSink::failing_at(1, false);

        let result = insert_rows(&mut sink, &rows(4), LoadErrorPolicy::AbortBatch).await;

        assert!(matches!(result, Err(Error::Load { row: 1, .. })));
        assert_eq!(sink.attempts, 2);
        assert_eq!(sink.stored, vec![1.0]);
    }

    #[tokio::test]
    async fn test_skip_row_counts_and_continues() {
        let mut sink = ScriptedSink::failing_at(1, false);

        let report = insert_rows(&mut sink, &rows(4), LoadErrorPolicy::SkipRow)
            .await
            .unwrap();

        assert_eq!(report.inserted, 3);
        assert_eq!(report.skipped, 1);
        assert!(!report.is_complete());
        assert_eq!(sink.stored, vec![1.0, 3.0, 4.0]);
    }

    #[tokio::test]
    async fn test_lost_connection_ends_upload_under_either_policy() {
        for policy in [LoadErrorPolicy::AbortBatch, LoadErrorPolicy::SkipRow] {
            let mut sink = ScriptedSink::failing_at(2, true);

            let result = insert_rows(&mut sink, &rows(5), policy).await;

            assert!(matches!(result, Err(Error::Connection(_))), "{:?}", policy);
            assert_eq!(sink.attempts, 3);
            assert_eq!(sink.stored, vec![1.0, 2.0]);
        }
    }

    #[tokio::test]
    async fn test_clean_upload_is_complete() {
        let mut sink = ScriptedSink::default();

        let report = insert_rows(&mut sink, &rows(3), LoadErrorPolicy::AbortBatch)
            .await
            .unwrap();

        assert_eq!(report.inserted, 3);
        assert!(report.is_complete());
    }

    fn rows(n: usize) -> Vec<CanonicalTransaction> {
        (0..n)
            .map(|i| CanonicalTransaction {
                truck_id: 1,
                payment_method: PaymentMethod::Card,
                total: 1.0 + i as f64,
                occurred_at: NaiveDate::from_ymd_opt(2024, 1, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap(),
            })
            .collect()
    }

    #[test]
    fn test_row_cap_truncates_only_when_set() {
        let all = rows(1200);
        let capped = LoadOptions {
            policy: LoadErrorPolicy::AbortBatch,
            row_cap: Some(1000),
        };
        let uncapped = LoadOptions {
            policy: LoadErrorPolicy::AbortBatch,
            row_cap: None,
        };

        assert_eq!(capped.capped(&all).len(), 1000);
        assert_eq!(capped.capped(&all[..10]).len(), 10);
        assert_eq!(uncapped.capped(&all).len(), 1200);
    }

    #[test]
    fn test_schema_name_must_be_identifier() {
        assert_eq!(validate_schema_name("truck_schema").unwrap(), "truck_schema");
        assert!(validate_schema_name("public; DROP TABLE x").is_err());
        assert!(validate_schema_name("1schema").is_err());
        assert!(validate_schema_name("").is_err());
    }

    #[test]
    fn test_debug_hides_password() {
        let config = WarehouseConfig {
            host: "localhost".to_string(),
            port: 5439,
            username: "loader".to_string(),
            password: "hunter2".to_string(),
            database: "trucks".to_string(),
            schema: "truck_schema".to_string(),
        };
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn test_io_errors_are_connection_errors() {
        let io = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(classify_sqlx_error(io).is_fatal());
        assert!(!classify_sqlx_error(sqlx::Error::RowNotFound).is_fatal());
    }
}
