//! Read/write access to the `index_data` reference table:
//! `index_data(index_type TEXT, date TEXT, value DOUBLE PRECISION,
//! source TEXT, UNIQUE (index_type, date))`. CPI-style series store `date`
//! as 'YYYY-MM'; exchange-rate rows may carry a full 'YYYY-MM-DD'. Lookups
//! key everything by month.

use std::collections::HashMap;

use serde::Serialize;
use sqlx::{PgPool, Row};
use tracing::warn;

use crate::error::{AppError, AppResult};

const ALLOWED_INDEX_TYPES: &[&str] = &["cpi", "housing", "construction", "usd", "eur"];

pub fn validate_index_type(raw: &str) -> AppResult<&'static str> {
    let candidate = raw.trim().to_ascii_lowercase();
    ALLOWED_INDEX_TYPES
        .iter()
        .find(|allowed| **allowed == candidate)
        .copied()
        .ok_or_else(|| AppError::BadRequest(format!("Unknown index type '{raw}'.")))
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexPoint {
    pub index_type: String,
    pub date: String,
    pub value: f64,
    pub source: Option<String>,
}

/// Batched range read keyed by 'YYYY-MM'. One call covers a whole
/// generation run, so index I/O stays O(1) per contract. Rows are scanned in
/// date order: when a month holds several daily exchange-rate quotes, the
/// latest date wins, and wins the same way on every run.
pub async fn fetch_range(
    pool: &PgPool,
    index_type: &str,
    from_month: &str,
    to_month: &str,
) -> AppResult<HashMap<String, f64>> {
    let rows = sqlx::query(
        "SELECT date, value FROM index_data \
         WHERE index_type = $1 AND date >= $2 AND date <= $3 \
         ORDER BY date ASC",
    )
    .bind(index_type)
    .bind(from_month)
    .bind(to_month)
    .fetch_all(pool)
    .await?;

    let mut points = Vec::with_capacity(rows.len());
    for row in rows {
        let date: String = row.try_get("date")?;
        let value: f64 = row.try_get("value")?;
        points.push((date, value));
    }
    Ok(collapse_to_month_map(points))
}

/// Fold date-ordered points into one value per month. Later dates overwrite
/// earlier ones, so the month's representative rate is its last quote.
fn collapse_to_month_map(points: Vec<(String, f64)>) -> HashMap<String, f64> {
    let mut map = HashMap::with_capacity(points.len());
    for (date, value) in points {
        map.insert(truncate_to_month(&date), value);
    }
    map
}

/// Same as `fetch_range`, but a storage failure degrades to an empty map:
/// the schedule still generates, just unlinked for this run.
pub async fn fetch_range_or_empty(
    pool: &PgPool,
    index_type: &str,
    from_month: &str,
    to_month: &str,
) -> HashMap<String, f64> {
    match fetch_range(pool, index_type, from_month, to_month).await {
        Ok(map) => map,
        Err(e) => {
            warn!(
                index_type,
                error = %e,
                "Index range fetch failed, generating without linkage"
            );
            HashMap::new()
        }
    }
}

pub async fn list_range(
    pool: &PgPool,
    index_type: &str,
    from_month: &str,
    to_month: &str,
) -> AppResult<Vec<IndexPoint>> {
    let rows = sqlx::query(
        "SELECT index_type, date, value, source FROM index_data \
         WHERE index_type = $1 AND date >= $2 AND date <= $3 \
         ORDER BY date ASC",
    )
    .bind(index_type)
    .bind(from_month)
    .bind(to_month)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(|row| point_from_row(&row)).collect()
}

pub async fn latest_point(pool: &PgPool, index_type: &str) -> AppResult<Option<IndexPoint>> {
    let row = sqlx::query(
        "SELECT index_type, date, value, source FROM index_data \
         WHERE index_type = $1 ORDER BY date DESC LIMIT 1",
    )
    .bind(index_type)
    .fetch_optional(pool)
    .await?;

    row.map(|row| point_from_row(&row)).transpose()
}

pub async fn upsert_point(pool: &PgPool, point: &IndexPoint) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO index_data (index_type, date, value, source) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (index_type, date) \
         DO UPDATE SET value = EXCLUDED.value, source = EXCLUDED.source",
    )
    .bind(&point.index_type)
    .bind(&point.date)
    .bind(point.value)
    .bind(&point.source)
    .execute(pool)
    .await?;
    Ok(())
}

fn point_from_row(row: &sqlx::postgres::PgRow) -> AppResult<IndexPoint> {
    Ok(IndexPoint {
        index_type: row.try_get("index_type")?,
        date: row.try_get("date")?,
        value: row.try_get("value")?,
        source: row.try_get("source")?,
    })
}

fn truncate_to_month(date: &str) -> String {
    date.get(0..7).unwrap_or(date).to_string()
}
