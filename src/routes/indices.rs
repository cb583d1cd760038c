use axum::extract::{Query, State};
use axum::Json;
use serde_json::{json, Value};

use crate::{
    error::{AppError, AppResult},
    repository::index_data::{latest_point, list_range, validate_index_type},
    schemas::{IndicesQuery, LatestIndexQuery},
    services::index_sync::sync_reference_indices,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/indices", axum::routing::get(list_indices))
        .route("/indices/latest", axum::routing::get(get_latest_index))
        .route("/indices/sync", axum::routing::post(sync_indices))
}

async fn list_indices(
    State(state): State<AppState>,
    Query(query): Query<IndicesQuery>,
) -> AppResult<Json<Value>> {
    let index_type = validate_index_type(&query.index_type)?;
    let pool = state.db_pool()?;

    let from = month_key_param(query.from.as_deref(), "from")?;
    let to = month_key_param(query.to.as_deref(), "to")?;

    let points = list_range(pool, index_type, &from, &to).await?;
    Ok(Json(json!({ "data": points })))
}

async fn get_latest_index(
    State(state): State<AppState>,
    Query(query): Query<LatestIndexQuery>,
) -> AppResult<Json<Value>> {
    let index_type = validate_index_type(&query.index_type)?;
    let pool = state.db_pool()?;

    let point = latest_point(pool, index_type)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No data stored for index '{index_type}'.")))?;
    Ok(Json(json!({ "data": point })))
}

async fn sync_indices(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let pool = state.db_pool()?;
    let outcome = sync_reference_indices(&state.http_client, pool, &state.config).await;
    Ok(Json(json!({
        "success": true,
        "records_processed": outcome.records_processed,
        "errors": outcome.errors,
    })))
}

fn month_key_param(raw: Option<&str>, name: &str) -> AppResult<String> {
    let value = raw
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            AppError::BadRequest(format!("Missing '{name}' month. Expected YYYY-MM."))
        })?;

    let valid = value.len() == 7
        && chrono::NaiveDate::parse_from_str(&format!("{value}-01"), "%Y-%m-%d").is_ok();
    if !valid {
        return Err(AppError::BadRequest(format!(
            "Invalid '{name}' month '{value}'. Expected YYYY-MM."
        )));
    }
    Ok(value.to_string())
}
