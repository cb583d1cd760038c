use std::collections::HashMap;

use chrono::{Datelike, Months, NaiveDate};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::schemas::{json_number_or_null, Currency, LinkageSubType, LinkageType};
use crate::services::linkage::{self, round2};

/// Contract terms for one generation run. Immutable input; the generator
/// never mutates it and regenerating with the same terms and index map must
/// produce identical rows.
#[derive(Debug, Clone)]
pub struct ScheduleTerms {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub base_rent: f64,
    pub currency: Currency,
    pub payment_frequency: String,
    pub payment_day: u32,
    pub linkage_type: LinkageType,
    pub linkage_sub_type: Option<LinkageSubType>,
    pub base_index_value: Option<f64>,
    pub linkage_ceiling: Option<f64>,
    pub linkage_floor: Option<f64>,
    pub rent_periods: Vec<RentPeriod>,
}

/// Stepped-rent override: a new base amount effective from `start_date`.
#[derive(Debug, Clone)]
pub struct RentPeriod {
    pub start_date: NaiveDate,
    pub amount: f64,
    pub currency: Currency,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentScheduleRow {
    pub due_date: String,
    pub amount: f64,
    pub currency: Currency,
    pub status: String,
    pub original_amount: f64,
    pub index_linkage_rate: f64,
}

impl PaymentScheduleRow {
    /// Storage-safe JSON: money fields go through `json_number_or_null` so a
    /// non-finite intermediate can never serialize as NaN.
    pub fn to_storage_value(&self) -> Value {
        json!({
            "due_date": self.due_date,
            "amount": json_number_or_null(self.amount),
            "currency": self.currency.as_str(),
            "status": self.status,
            "original_amount": json_number_or_null(self.original_amount),
            "index_linkage_rate": json_number_or_null(self.index_linkage_rate),
        })
    }
}

/// Generate the full payment schedule for one contract.
///
/// Pure and synchronous: the index map is pre-fetched by the caller, so the
/// loop does no I/O. Anything that goes wrong mid-run (missing index month,
/// unknown frequency) degrades to a best-effort row rather than aborting —
/// the caller can always regenerate once reference data is backfilled.
pub fn generate_schedule(
    terms: &ScheduleTerms,
    index_map: &HashMap<String, f64>,
) -> Vec<PaymentScheduleRow> {
    let mut payments = Vec::new();
    let step = frequency_step_months(&terms.payment_frequency);

    // Linkage only participates when a usable base index exists; zero is the
    // legacy "not set" marker and also guards the ratio division.
    let base_index = match terms.linkage_type {
        LinkageType::None => None,
        _ => terms.base_index_value.filter(|value| *value != 0.0),
    };

    let mut cursor = terms.start_date;
    while cursor <= terms.end_date {
        let due_date = due_date_in_month(cursor, terms.payment_day);

        let (current_base, currency) = resolve_rent_step(
            due_date,
            terms.base_rent,
            terms.currency,
            &terms.rent_periods,
        );

        let mut amount = current_base;
        let mut linkage_rate = 0.0;

        if let Some(base_index_value) = base_index {
            let key = linkage::target_month_key(terms.linkage_sub_type, due_date);
            // A stored value of exactly 0 is treated as absent.
            let target = index_map.get(&key).copied().filter(|value| *value != 0.0);
            let outcome = linkage::apply_linkage(
                current_base,
                base_index_value,
                target,
                terms.linkage_ceiling,
                terms.linkage_floor,
            );
            amount = outcome.amount;
            linkage_rate = outcome.rate_pct;
        }

        payments.push(PaymentScheduleRow {
            due_date: due_date.format("%Y-%m-%d").to_string(),
            amount: round2(amount),
            currency,
            status: "pending".to_string(),
            original_amount: current_base,
            index_linkage_rate: round2(linkage_rate),
        });

        // Sequential month addition with end-of-month clamping, so a
        // contract starting Jan 31 bills Feb 28 and then Mar 28.
        match cursor.checked_add_months(Months::new(step)) {
            Some(next) => cursor = next,
            None => break,
        }
    }

    payments
}

/// Due date for the billing month: the nominal payment day clamped to the
/// month's length, so day 31 in February becomes Feb 28 (29 in leap years).
fn due_date_in_month(cursor: NaiveDate, payment_day: u32) -> NaiveDate {
    let last_day = days_in_month(cursor.year(), cursor.month());
    let actual_day = payment_day.clamp(1, last_day);
    NaiveDate::from_ymd_opt(cursor.year(), cursor.month(), actual_day).unwrap_or(cursor)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

/// Pick the rent period in force on the due date: latest start not after the
/// due date wins; no qualifying period falls back to the contract base.
/// Two periods sharing a start date resolve to the last one listed — an
/// accepted upstream data ambiguity, kept rather than silently corrected.
fn resolve_rent_step(
    due_date: NaiveDate,
    base_rent: f64,
    base_currency: Currency,
    rent_periods: &[RentPeriod],
) -> (f64, Currency) {
    let mut best: Option<&RentPeriod> = None;
    for period in rent_periods {
        if period.start_date > due_date {
            continue;
        }
        match best {
            Some(current) if period.start_date < current.start_date => {}
            _ => best = Some(period),
        }
    }

    match best {
        Some(period) => (period.amount, period.currency),
        None => (base_rent, base_currency),
    }
}

/// Billing interval in months. An unrecognized frequency degrades to
/// monthly so one misconfigured contract still gets a schedule; the warning
/// makes it discoverable downstream.
fn frequency_step_months(raw: &str) -> u32 {
    match raw.trim().to_ascii_lowercase().as_str() {
        "monthly" => 1,
        "quarterly" => 3,
        "annually" => 12,
        other => {
            warn!(frequency = other, "Unknown payment frequency, falling back to monthly");
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        days_in_month, frequency_step_months, generate_schedule, resolve_rent_step,
        PaymentScheduleRow, RentPeriod, ScheduleTerms,
    };
    use crate::schemas::{Currency, LinkageSubType, LinkageType};
    use chrono::NaiveDate;
    use serde_json::Value;
    use std::collections::HashMap;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn base_terms() -> ScheduleTerms {
        ScheduleTerms {
            start_date: date(2026, 2, 1),
            end_date: date(2026, 4, 30),
            base_rent: 5000.0,
            currency: Currency::Ils,
            payment_frequency: "monthly".to_string(),
            payment_day: 1,
            linkage_type: LinkageType::None,
            linkage_sub_type: None,
            base_index_value: None,
            linkage_ceiling: None,
            linkage_floor: None,
            rent_periods: Vec::new(),
        }
    }

    #[test]
    fn unlinked_contract_emits_flat_rows() {
        let rows = generate_schedule(&base_terms(), &HashMap::new());

        let due_dates: Vec<&str> = rows.iter().map(|r| r.due_date.as_str()).collect();
        assert_eq!(due_dates, vec!["2026-02-01", "2026-03-01", "2026-04-01"]);
        for row in &rows {
            assert_eq!(row.amount, 5000.0);
            assert_eq!(row.original_amount, 5000.0);
            assert_eq!(row.index_linkage_rate, 0.0);
            assert_eq!(row.status, "pending");
        }
    }

    #[test]
    fn generation_is_deterministic() {
        let mut terms = base_terms();
        terms.linkage_type = LinkageType::Cpi;
        terms.linkage_sub_type = Some(LinkageSubType::RespectOf);
        terms.base_index_value = Some(100.0);
        let mut indices = HashMap::new();
        indices.insert("2026-02".to_string(), 101.0);
        indices.insert("2026-03".to_string(), 102.0);

        assert_eq!(
            generate_schedule(&terms, &indices),
            generate_schedule(&terms, &indices)
        );
    }

    #[test]
    fn respect_of_linkage_with_index_gap() {
        let mut terms = base_terms();
        terms.linkage_type = LinkageType::Cpi;
        terms.linkage_sub_type = Some(LinkageSubType::RespectOf);
        terms.base_index_value = Some(100.0);

        let mut indices = HashMap::new();
        indices.insert("2026-02".to_string(), 101.0);
        indices.insert("2026-03".to_string(), 102.0);
        // 2026-04 absent: that row must go out unlinked, not fail.

        let rows = generate_schedule(&terms, &indices);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].amount, 5050.0);
        assert_eq!(rows[0].index_linkage_rate, 1.0);
        assert_eq!(rows[1].amount, 5100.0);
        assert_eq!(rows[1].index_linkage_rate, 2.0);
        assert_eq!(rows[2].amount, 5000.0);
        assert_eq!(rows[2].index_linkage_rate, 0.0);
    }

    #[test]
    fn known_linkage_uses_lagged_months() {
        let mut terms = base_terms();
        terms.linkage_type = LinkageType::Cpi;
        terms.linkage_sub_type = Some(LinkageSubType::Known);
        terms.base_index_value = Some(100.0);
        terms.start_date = date(2026, 3, 1);
        terms.end_date = date(2026, 3, 31);

        // Due on the 1st (< 15) — index of two months back applies.
        let mut indices = HashMap::new();
        indices.insert("2026-01".to_string(), 104.0);
        indices.insert("2026-02".to_string(), 106.0);

        let rows = generate_schedule(&terms, &indices);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount, 5200.0);
        assert_eq!(rows[0].index_linkage_rate, 4.0);

        // Due on the 20th — previous month's index applies instead.
        terms.payment_day = 20;
        let rows = generate_schedule(&terms, &indices);
        assert_eq!(rows[0].amount, 5300.0);
        assert_eq!(rows[0].index_linkage_rate, 6.0);
    }

    #[test]
    fn payment_day_31_clamps_to_month_end() {
        let mut terms = base_terms();
        terms.start_date = date(2026, 1, 1);
        terms.end_date = date(2026, 3, 31);
        terms.payment_day = 31;

        let rows = generate_schedule(&terms, &HashMap::new());
        let due_dates: Vec<&str> = rows.iter().map(|r| r.due_date.as_str()).collect();
        assert_eq!(due_dates, vec!["2026-01-31", "2026-02-28", "2026-03-31"]);
    }

    #[test]
    fn leap_february_clamps_to_the_29th() {
        let mut terms = base_terms();
        terms.start_date = date(2028, 2, 1);
        terms.end_date = date(2028, 2, 29);
        terms.payment_day = 31;

        let rows = generate_schedule(&terms, &HashMap::new());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].due_date, "2028-02-29");
    }

    #[test]
    fn month_end_cursor_drifts_like_sequential_addition() {
        // Jan 31 cursor clamps to Feb 28, then advances to Mar 28.
        let mut terms = base_terms();
        terms.start_date = date(2026, 1, 31);
        terms.end_date = date(2026, 3, 30);
        terms.payment_day = 31;

        let rows = generate_schedule(&terms, &HashMap::new());
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].due_date, "2026-03-31");
    }

    #[test]
    fn quarterly_and_annual_frequencies_step_by_months() {
        let mut terms = base_terms();
        terms.start_date = date(2026, 1, 1);
        terms.end_date = date(2026, 12, 31);
        terms.payment_frequency = "quarterly".to_string();

        let rows = generate_schedule(&terms, &HashMap::new());
        let due_dates: Vec<&str> = rows.iter().map(|r| r.due_date.as_str()).collect();
        assert_eq!(
            due_dates,
            vec!["2026-01-01", "2026-04-01", "2026-07-01", "2026-10-01"]
        );

        terms.payment_frequency = "annually".to_string();
        terms.end_date = date(2028, 1, 1);
        let rows = generate_schedule(&terms, &HashMap::new());
        let due_dates: Vec<&str> = rows.iter().map(|r| r.due_date.as_str()).collect();
        assert_eq!(due_dates, vec!["2026-01-01", "2027-01-01", "2028-01-01"]);
    }

    #[test]
    fn unknown_frequency_falls_back_to_monthly() {
        assert_eq!(frequency_step_months("fortnightly"), 1);
        assert_eq!(frequency_step_months("Quarterly"), 3);
        assert_eq!(frequency_step_months(" ANNUALLY "), 12);
    }

    #[test]
    fn rent_steps_take_effect_from_their_start_date() {
        let mut terms = base_terms();
        terms.rent_periods = vec![RentPeriod {
            start_date: date(2026, 3, 1),
            amount: 5500.0,
            currency: Currency::Ils,
        }];

        let rows = generate_schedule(&terms, &HashMap::new());
        assert_eq!(rows[0].amount, 5000.0);
        assert_eq!(rows[1].amount, 5500.0);
        assert_eq!(rows[2].amount, 5500.0);
        assert_eq!(rows[1].original_amount, 5500.0);
    }

    #[test]
    fn stepped_rent_is_the_linkage_base() {
        let mut terms = base_terms();
        terms.linkage_type = LinkageType::Cpi;
        terms.linkage_sub_type = Some(LinkageSubType::RespectOf);
        terms.base_index_value = Some(100.0);
        terms.rent_periods = vec![RentPeriod {
            start_date: date(2026, 3, 1),
            amount: 6000.0,
            currency: Currency::Ils,
        }];

        let mut indices = HashMap::new();
        indices.insert("2026-03".to_string(), 102.0);

        let rows = generate_schedule(&terms, &indices);
        assert_eq!(rows[1].amount, 6120.0);
        assert_eq!(rows[1].original_amount, 6000.0);
    }

    #[test]
    fn duplicate_rent_step_start_dates_resolve_last_wins() {
        let periods = vec![
            RentPeriod {
                start_date: date(2026, 3, 1),
                amount: 5500.0,
                currency: Currency::Ils,
            },
            RentPeriod {
                start_date: date(2026, 3, 1),
                amount: 5700.0,
                currency: Currency::Usd,
            },
        ];
        let (amount, currency) =
            resolve_rent_step(date(2026, 3, 15), 5000.0, Currency::Ils, &periods);
        assert_eq!(amount, 5700.0);
        assert_eq!(currency, Currency::Usd);
    }

    #[test]
    fn rent_step_currency_overrides_contract_currency() {
        let mut terms = base_terms();
        terms.rent_periods = vec![RentPeriod {
            start_date: date(2026, 4, 1),
            amount: 1500.0,
            currency: Currency::Usd,
        }];

        let rows = generate_schedule(&terms, &HashMap::new());
        assert_eq!(rows[1].currency, Currency::Ils);
        assert_eq!(rows[2].currency, Currency::Usd);
    }

    #[test]
    fn zero_base_index_disables_linkage() {
        let mut terms = base_terms();
        terms.linkage_type = LinkageType::Cpi;
        terms.base_index_value = Some(0.0);

        let mut indices = HashMap::new();
        indices.insert("2026-02".to_string(), 101.0);

        let rows = generate_schedule(&terms, &indices);
        for row in &rows {
            assert_eq!(row.amount, 5000.0);
            assert_eq!(row.index_linkage_rate, 0.0);
        }
    }

    #[test]
    fn zero_stored_index_value_counts_as_absent() {
        let mut terms = base_terms();
        terms.linkage_type = LinkageType::Cpi;
        terms.linkage_sub_type = Some(LinkageSubType::RespectOf);
        terms.base_index_value = Some(100.0);

        let mut indices = HashMap::new();
        indices.insert("2026-02".to_string(), 0.0);

        let rows = generate_schedule(&terms, &indices);
        assert_eq!(rows[0].amount, 5000.0);
        assert_eq!(rows[0].index_linkage_rate, 0.0);
    }

    #[test]
    fn floor_and_ceiling_hold_across_all_rows() {
        let mut terms = base_terms();
        terms.linkage_type = LinkageType::Cpi;
        terms.linkage_sub_type = Some(LinkageSubType::RespectOf);
        terms.base_index_value = Some(100.0);
        terms.linkage_ceiling = Some(3.0);

        let mut indices = HashMap::new();
        indices.insert("2026-02".to_string(), 95.0);
        indices.insert("2026-03".to_string(), 108.0);
        indices.insert("2026-04".to_string(), 101.0);

        let rows = generate_schedule(&terms, &indices);
        for row in &rows {
            assert!(row.amount >= 5000.0, "floor violated: {}", row.amount);
            assert!(row.amount <= 5150.0, "ceiling violated: {}", row.amount);
        }
        assert_eq!(rows[0].amount, 5000.0);
        assert_eq!(rows[1].amount, 5150.0);
        assert_eq!(rows[2].amount, 5050.0);
    }

    #[test]
    fn single_day_contract_emits_one_row() {
        let mut terms = base_terms();
        terms.start_date = date(2026, 2, 10);
        terms.end_date = date(2026, 2, 10);
        terms.payment_day = 10;

        let rows = generate_schedule(&terms, &HashMap::new());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].due_date, "2026-02-10");
    }

    #[test]
    fn days_in_month_handles_leap_years() {
        assert_eq!(days_in_month(2026, 2), 28);
        assert_eq!(days_in_month(2028, 2), 29);
        assert_eq!(days_in_month(2026, 12), 31);
        assert_eq!(days_in_month(2026, 4), 30);
    }

    #[test]
    fn storage_value_nulls_non_finite_amounts() {
        let row = PaymentScheduleRow {
            due_date: "2026-02-01".to_string(),
            amount: f64::NAN,
            currency: Currency::Ils,
            status: "pending".to_string(),
            original_amount: 5000.0,
            index_linkage_rate: f64::INFINITY,
        };
        let value = row.to_storage_value();
        assert_eq!(value["amount"], Value::Null);
        assert_eq!(value["index_linkage_rate"], Value::Null);
        assert_eq!(value["original_amount"], serde_json::json!(5000.0));
        assert_eq!(value["currency"], serde_json::json!("ILS"));
    }
}
