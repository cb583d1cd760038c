use chrono::{Datelike, Months, NaiveDate};

use crate::schemas::LinkageSubType;

/// Result of applying index linkage to a single period's base rent.
/// `rate_pct` is the raw index delta; it is not recomputed after
/// floor/ceiling clamping, so a clamped row still reports the market rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkageOutcome {
    pub amount: f64,
    pub rate_pct: f64,
}

/// Select the index month for a due date.
///
/// `known`: statistical indices publish with a lag, so a payment due before
/// the 15th can only see the index of two months back; from the 15th the
/// previous month's value is out.
/// `respect_of` (or unspecified): the index "of" the due month itself.
pub fn target_month_key(sub_type: Option<LinkageSubType>, due_date: NaiveDate) -> String {
    let target = match sub_type {
        Some(LinkageSubType::Known) => {
            let lag = if due_date.day() < 15 { 2 } else { 1 };
            due_date
                .checked_sub_months(Months::new(lag))
                .unwrap_or(due_date)
        }
        Some(LinkageSubType::RespectOf) | None => due_date,
    };
    month_key(target)
}

pub fn month_key(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

/// Compute the linked amount for one period.
///
/// A missing target index is not an error: the period simply goes out
/// unlinked. `floor` is an absolute amount and defaults to the pre-linkage
/// base, so indexation can never push rent below the base unless an explicit
/// lower floor is configured. `ceiling_pct` caps the uplift as a percentage
/// of the base. Floor applies before ceiling. No rounding happens here;
/// the caller rounds once at row emission.
pub fn apply_linkage(
    current_base: f64,
    base_index_value: f64,
    target_index_value: Option<f64>,
    ceiling_pct: Option<f64>,
    floor: Option<f64>,
) -> LinkageOutcome {
    let Some(target) = target_index_value else {
        return LinkageOutcome {
            amount: current_base,
            rate_pct: 0.0,
        };
    };

    let ratio = target / base_index_value;
    let rate_pct = (ratio - 1.0) * 100.0;
    let mut amount = current_base * ratio;

    let effective_floor = floor.unwrap_or(current_base);
    if amount < effective_floor {
        amount = effective_floor;
    }

    if let Some(ceiling) = ceiling_pct {
        let max_amount = current_base * (1.0 + ceiling / 100.0);
        if amount > max_amount {
            amount = max_amount;
        }
    }

    LinkageOutcome { amount, rate_pct }
}

/// Round to 2 decimal places. Applied exactly once, at the output boundary.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
