use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::error::AppError;

/// All input validation answers with bad-request semantics, matching the
/// missing-fields path in the schedule route.
pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::BadRequest(format!("Validation failed: {errors}")))
}

fn default_currency_ils() -> Currency {
    Currency::Ils
}
fn default_frequency_monthly() -> String {
    "monthly".to_string()
}
fn default_payment_day() -> u32 {
    1
}
fn default_linkage_none() -> LinkageType {
    LinkageType::None
}

/// Closed set of contract currencies. The service carries the code through
/// to the output rows; it never converts between currencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Ils,
    Usd,
    Eur,
}

impl Currency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ils => "ILS",
            Self::Usd => "USD",
            Self::Eur => "EUR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkageType {
    None,
    Cpi,
    Housing,
    Construction,
    Usd,
    Eur,
}

impl LinkageType {
    /// Key used in the `index_data` reference table. `none` has no series.
    pub fn as_index_type(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Cpi => Some("cpi"),
            Self::Housing => Some("housing"),
            Self::Construction => Some("construction"),
            Self::Usd => Some("usd"),
            Self::Eur => Some("eur"),
        }
    }
}

/// How the target index month is chosen relative to the due date.
/// `known` models publication lag (the last published value), `respect_of`
/// links to the index "of" the due month itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkageSubType {
    Known,
    RespectOf,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateScheduleInput {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub base_rent: Option<f64>,
    #[serde(default = "default_currency_ils")]
    pub currency: Currency,
    #[serde(default = "default_frequency_monthly")]
    pub payment_frequency: String,
    #[serde(default = "default_payment_day")]
    #[validate(range(min = 1, max = 31))]
    pub payment_day: u32,
    #[serde(default = "default_linkage_none")]
    pub linkage_type: LinkageType,
    pub linkage_sub_type: Option<LinkageSubType>,
    pub base_index_date: Option<String>,
    pub base_index_value: Option<f64>,
    pub linkage_ceiling: Option<f64>,
    pub linkage_floor: Option<f64>,
    #[serde(default, rename = "rent_periods", alias = "rentPeriods")]
    pub rent_periods: Vec<RentPeriodInput>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RentPeriodInput {
    pub start_date: String,
    pub amount: f64,
    pub currency: Currency,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndicesQuery {
    pub index_type: String,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LatestIndexQuery {
    pub index_type: String,
}

/// JSON number for a finite float, null otherwise. Every money field that
/// leaves this service goes through here so NaN/Infinity can never reach
/// storage.
pub fn json_number_or_null(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Recursive output scrub: walks arrays and objects and nulls out anything
/// that is not representable as plain JSON data. Dates must already be
/// ISO-8601 strings by the time a payload gets here.
pub fn sanitize_payload(value: Value) -> Value {
    match value {
        Value::Number(number) => match number.as_f64() {
            Some(float) if !float.is_finite() => Value::Null,
            _ => Value::Number(number),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_payload).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, item)| (key, sanitize_payload(item)))
                .collect(),
        ),
        other => other,
    }
}
