//! Pulls reference data into `index_data`: the general CPI series from the
//! CBS price-index API and USD/EUR representative rates from the Bank of
//! Israel SDMX feed. Housing/construction series arrive via seed scripts and
//! are not synced here.

use serde_json::Value;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::repository::index_data::{upsert_point, IndexPoint};

#[derive(Debug, Clone, serde::Serialize)]
pub struct IndexSyncOutcome {
    pub records_processed: u32,
    pub errors: Vec<String>,
}

/// Fetch and upsert the latest reference values. Each source fails
/// independently; a partial sync is still a useful sync.
pub async fn sync_reference_indices(
    http_client: &reqwest::Client,
    pool: &PgPool,
    config: &AppConfig,
) -> IndexSyncOutcome {
    let mut outcome = IndexSyncOutcome {
        records_processed: 0,
        errors: Vec::new(),
    };

    sync_cpi(http_client, pool, config, &mut outcome).await;
    for (boi_code, index_type) in [("US", "usd"), ("EU", "eur")] {
        sync_exchange_rate(http_client, pool, config, boi_code, index_type, &mut outcome).await;
    }

    info!(
        records = outcome.records_processed,
        errors = outcome.errors.len(),
        "Index sync completed"
    );
    outcome
}

async fn sync_cpi(
    http_client: &reqwest::Client,
    pool: &PgPool,
    config: &AppConfig,
    outcome: &mut IndexSyncOutcome,
) {
    let url = format!(
        "{}/index/data/price?series={}&format=json&download=false&last={}",
        config.cbs_api_base, config.cbs_cpi_series, config.index_sync_months_back
    );

    let Some(payload) = fetch_json(http_client, &url).await else {
        outcome.errors.push("CPI fetch failed".to_string());
        return;
    };

    let points = parse_cbs_points(&payload);
    if points.is_empty() {
        outcome
            .errors
            .push("CPI response contained no usable data points".to_string());
        return;
    }

    for (month, value) in points {
        let point = IndexPoint {
            index_type: "cpi".to_string(),
            date: month,
            value,
            source: Some("cbs".to_string()),
        };
        match upsert_point(pool, &point).await {
            Ok(()) => outcome.records_processed += 1,
            Err(e) => {
                warn!(date = %point.date, error = %e, "CPI upsert failed");
                outcome.errors.push(format!("CPI upsert {}: {e}", point.date));
            }
        }
    }
}

async fn sync_exchange_rate(
    http_client: &reqwest::Client,
    pool: &PgPool,
    config: &AppConfig,
    boi_code: &str,
    index_type: &str,
    outcome: &mut IndexSyncOutcome,
) {
    let url = format!(
        "{}/FusionEdgeServer/sdmx/v2/data/dataflow/BOI.STATISTICS/EXR/1.0/R/{boi_code}/ILS\
         ?c%5BDATA_TYPE%5D=OF00&lastNObservations=1&format=sdmx-json",
        config.boi_api_base
    );

    let Some(payload) = fetch_json(http_client, &url).await else {
        outcome.errors.push(format!("{boi_code} rate fetch failed"));
        return;
    };

    let Some((date, value)) = parse_boi_observation(&payload) else {
        outcome
            .errors
            .push(format!("{boi_code} rate response had no observation"));
        return;
    };

    let point = IndexPoint {
        index_type: index_type.to_string(),
        date,
        value,
        source: Some("exchange-api".to_string()),
    };
    match upsert_point(pool, &point).await {
        Ok(()) => outcome.records_processed += 1,
        Err(e) => {
            warn!(index_type, error = %e, "Exchange-rate upsert failed");
            outcome.errors.push(format!("{index_type} upsert: {e}"));
        }
    }
}

/// CBS wraps its series points under `month`, `day`, or `data` depending on
/// the series granularity. Each point is `{ date, value }`.
fn parse_cbs_points(payload: &Value) -> Vec<(String, f64)> {
    let points = payload
        .get("month")
        .or_else(|| payload.get("day"))
        .or_else(|| payload.get("data"))
        .and_then(Value::as_array);

    let Some(points) = points else {
        return Vec::new();
    };

    points
        .iter()
        .filter_map(|point| {
            let raw_date = point.get("date").and_then(Value::as_str)?;
            let month = raw_date.split('T').next().unwrap_or(raw_date);
            let month = month.get(0..7)?;
            let value = point.get("value").and_then(numeric_value)?;
            Some((month.to_string(), value))
        })
        .collect()
}

/// SDMX-JSON: one requested series, so take the first series key, its first
/// observation, and the TIME_PERIOD dimension for the observation date.
fn parse_boi_observation(payload: &Value) -> Option<(String, f64)> {
    let series = payload
        .get("dataSets")?
        .get(0)?
        .get("series")?
        .as_object()?;
    let (_key, first_series) = series.iter().next()?;
    let value = first_series
        .get("observations")?
        .get("0")?
        .get(0)
        .and_then(numeric_value)?;

    let observation_dims = payload
        .get("structure")?
        .get("dimensions")?
        .get("observation")?
        .as_array()?;
    let time_dim = observation_dims
        .iter()
        .find(|dim| dim.get("id").and_then(Value::as_str) == Some("TIME_PERIOD"))?;
    let date = time_dim
        .get("values")?
        .get(0)?
        .get("id")?
        .as_str()?
        .to_string();

    Some((date, value))
}

async fn fetch_json(http_client: &reqwest::Client, url: &str) -> Option<Value> {
    let response = http_client
        .get(url)
        .header("Accept", "application/json")
        .header("User-Agent", "dira/1.0")
        .send()
        .await
        .map_err(|e| warn!(url, error = %e, "Reference-data request failed"))
        .ok()?;

    let ok_response = response
        .error_for_status()
        .map_err(|e| warn!(url, error = %e, "Reference-data request rejected"))
        .ok()?;
    ok_response.json::<Value>().await.ok()
}

fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}
