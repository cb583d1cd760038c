use std::collections::HashMap;

use axum::extract::State;
use axum::Json;
use chrono::{Months, NaiveDate};
use serde_json::{json, Value};

use crate::{
    error::{AppError, AppResult},
    repository::index_data::fetch_range_or_empty,
    schemas::{sanitize_payload, validate_input, GenerateScheduleInput},
    services::linkage::month_key,
    services::schedule::{generate_schedule, RentPeriod, ScheduleTerms},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route(
        "/payments/schedule/generate",
        axum::routing::post(generate_payment_schedule),
    )
}

/// Generate a contract's payment schedule. Persisting the rows is the
/// caller's responsibility; regeneration with the same terms and reference
/// data returns identical rows, so replace-the-set semantics are safe.
async fn generate_payment_schedule(
    State(state): State<AppState>,
    Json(input): Json<GenerateScheduleInput>,
) -> AppResult<Json<Value>> {
    validate_input(&input)?;
    let terms = parse_terms(&input)?;

    let index_map = prefetch_index_range(&state, &terms).await;
    let rows = generate_schedule(&terms, &index_map);

    let payments: Vec<Value> = rows.iter().map(|row| row.to_storage_value()).collect();
    let payload = sanitize_payload(Value::Array(payments));
    Ok(Json(json!({ "payments": payload })))
}

fn parse_terms(input: &GenerateScheduleInput) -> AppResult<ScheduleTerms> {
    let (Some(raw_start), Some(raw_end), Some(base_rent)) = (
        input.start_date.as_deref(),
        input.end_date.as_deref(),
        input.base_rent.filter(|rent| *rent != 0.0),
    ) else {
        return Err(AppError::BadRequest(
            "Missing required fields: startDate, endDate, baseRent".to_string(),
        ));
    };

    if base_rent < 0.0 {
        return Err(AppError::BadRequest(
            "baseRent must be a positive amount.".to_string(),
        ));
    }

    let start_date = parse_date(raw_start)
        .ok_or_else(|| AppError::BadRequest("Invalid startDate. Expected YYYY-MM-DD.".to_string()))?;
    let end_date = parse_date(raw_end)
        .ok_or_else(|| AppError::BadRequest("Invalid endDate. Expected YYYY-MM-DD.".to_string()))?;

    if start_date > end_date {
        return Err(AppError::BadRequest(
            "startDate must be on or before endDate.".to_string(),
        ));
    }

    let mut rent_periods = Vec::with_capacity(input.rent_periods.len());
    for period in &input.rent_periods {
        let Some(period_start) = parse_date(&period.start_date) else {
            tracing::warn!(
                start_date = %period.start_date,
                "Skipping rent period with unparseable start date"
            );
            continue;
        };
        rent_periods.push(RentPeriod {
            start_date: period_start,
            amount: period.amount,
            currency: period.currency,
        });
    }

    Ok(ScheduleTerms {
        start_date,
        end_date,
        base_rent,
        currency: input.currency,
        payment_frequency: input.payment_frequency.clone(),
        payment_day: input.payment_day,
        linkage_type: input.linkage_type,
        linkage_sub_type: input.linkage_sub_type,
        base_index_value: input.base_index_value,
        linkage_ceiling: input.linkage_ceiling,
        linkage_floor: input.linkage_floor,
        rent_periods,
    })
}

/// One batched fetch covering 2 months before the contract start (worst-case
/// publication lag for the "known" sub-type) through 1 month after the end.
async fn prefetch_index_range(state: &AppState, terms: &ScheduleTerms) -> HashMap<String, f64> {
    let Some(index_type) = terms.linkage_type.as_index_type() else {
        return HashMap::new();
    };
    if terms.base_index_value.filter(|value| *value != 0.0).is_none() {
        return HashMap::new();
    }

    let Some(pool) = &state.db_pool else {
        tracing::warn!("Linkage requested but no database is configured; rows go out unlinked");
        return HashMap::new();
    };

    let from = month_key(
        terms
            .start_date
            .checked_sub_months(Months::new(2))
            .unwrap_or(terms.start_date),
    );
    let to = month_key(
        terms
            .end_date
            .checked_add_months(Months::new(1))
            .unwrap_or(terms.end_date),
    );

    fetch_range_or_empty(pool, index_type, &from, &to).await
}

/// Accepts 'YYYY-MM-DD' and tolerates a trailing time component.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let date_part = raw.trim().split('T').next().unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}
