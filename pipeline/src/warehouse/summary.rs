use super::{WarehouseConfig, with_session};
use chrono::NaiveDate;
use common::{Error, Result};
use serde::Serialize;
use sqlx::postgres::PgConnection;

const DAY_TOTALS_SQL: &str = r#"
    SELECT CAST(COALESCE(SUM(total), 0) AS DOUBLE PRECISION) AS total_value,
           CAST(COALESCE(AVG(total), 0) AS DOUBLE PRECISION) AS average_value
    FROM FACT_Transaction
    WHERE DATE(at) BETWEEN $1 AND $2
"#;

const TRUCK_TOTALS_SQL: &str = r#"
    SELECT CAST(truck_id AS INTEGER) AS truck_id,
           CAST(SUM(total) AS DOUBLE PRECISION) AS total_revenue,
           CAST(AVG(total) AS DOUBLE PRECISION) AS average_transaction_value,
           COUNT(*) AS transaction_count
    FROM FACT_Transaction
    WHERE DATE(at) BETWEEN $1 AND $2
    GROUP BY truck_id
    ORDER BY total_revenue DESC
"#;

const PER_DAY_SQL: &str = r#"
    SELECT DATE(at) AS day,
           CAST(SUM(total) AS DOUBLE PRECISION) AS total_revenue,
           CAST(AVG(total) AS DOUBLE PRECISION) AS average_transaction_value,
           COUNT(*) AS transaction_count
    FROM FACT_Transaction
    WHERE DATE(at) BETWEEN $1 AND $2
    GROUP BY DATE(at)
    ORDER BY day
"#;

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct TruckSummary {
    pub truck_id: i32,
    pub total_revenue: f64,
    pub average_transaction_value: f64,
    pub transaction_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct DaySummary {
    pub day: NaiveDate,
    pub total_revenue: f64,
    pub average_transaction_value: f64,
    pub transaction_count: i64,
}

/// Aggregates of the fact table over an inclusive date range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub total_transaction_value_all_trucks: f64,
    pub average_total_transaction_value: f64,
    /// Ordered by revenue, highest first.
    pub trucks: Vec<TruckSummary>,
    pub days: Vec<DaySummary>,
}

impl Summary {
    pub fn trucks_by_transaction_count(&self) -> Vec<&TruckSummary> {
        let mut trucks: Vec<&TruckSummary> = self.trucks.iter().collect();
        trucks.sort_by(|a, b| b.transaction_count.cmp(&a.transaction_count));
        trucks
    }

    pub fn trucks_by_average_value(&self) -> Vec<&TruckSummary> {
        let mut trucks: Vec<&TruckSummary> = self.trucks.iter().collect();
        trucks.sort_by(|a, b| {
            b.average_transaction_value
                .total_cmp(&a.average_transaction_value)
        });
        trucks
    }

    /// The summary plus truck ids ranked by transaction count and by
    /// average value, as printed by the CLI.
    pub fn report(&self) -> SummaryReport<'_> {
        SummaryReport {
            summary: self,
            trucks_by_transaction_count: self
                .trucks_by_transaction_count()
                .iter()
                .map(|t| t.truck_id)
                .collect(),
            trucks_by_average_value: self
                .trucks_by_average_value()
                .iter()
                .map(|t| t.truck_id)
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SummaryReport<'a> {
    #[serde(flatten)]
    pub summary: &'a Summary,
    pub trucks_by_transaction_count: Vec<i32>,
    pub trucks_by_average_value: Vec<i32>,
}

pub async fn range_summary(
    config: &WarehouseConfig,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Summary> {
    if from > to {
        return Err(Error::InvalidInput(format!(
            "Summary range starts after it ends: {} > {}",
            from, to
        )));
    }

    with_session(config, move |conn| {
        Box::pin(async move { fetch_summary(conn, from, to).await })
    })
    .await
}

async fn fetch_summary(conn: &mut PgConnection, from: NaiveDate, to: NaiveDate) -> Result<Summary> {
    let (total_value, average_value): (f64, f64) = sqlx::query_as(DAY_TOTALS_SQL)
        .bind(from)
        .bind(to)
        .fetch_one(&mut *conn)
        .await?;

    let trucks = sqlx::query_as::<_, TruckSummary>(TRUCK_TOTALS_SQL)
        .bind(from)
        .bind(to)
        .fetch_all(&mut *conn)
        .await?;

    let days = sqlx::query_as::<_, DaySummary>(PER_DAY_SQL)
        .bind(from)
        .bind(to)
        .fetch_all(&mut *conn)
        .await?;

    Ok(Summary {
        from,
        to,
        total_transaction_value_all_trucks: total_value,
        average_total_transaction_value: average_value,
        trucks,
        days,
    })
}
