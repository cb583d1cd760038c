use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};
use std::time::Duration;

use crate::state::AppState;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Liveness plus a capped probe of the index reference store. Schedule
/// generation works without the store (rows go out unlinked), so a failed
/// probe reports `degraded` rather than unhealthy.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let index_store = match &state.db_pool {
        Some(pool) => probe_index_store(pool).await,
        None => "not_configured",
    };

    let status = if index_store == "unreachable" {
        "degraded"
    } else {
        "ok"
    };

    Json(json!({
        "status": status,
        "index_store": index_store,
        "checked_at": Utc::now().to_rfc3339(),
    }))
}

async fn probe_index_store(pool: &sqlx::PgPool) -> &'static str {
    match tokio::time::timeout(PROBE_TIMEOUT, sqlx::query("SELECT 1").fetch_one(pool)).await {
        Ok(Ok(_)) => "ok",
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Index store probe failed");
            "unreachable"
        }
        Err(_) => {
            tracing::error!(timeout_secs = PROBE_TIMEOUT.as_secs(), "Index store probe timed out");
            "unreachable"
        }
    }
}
