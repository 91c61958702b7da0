use crate::models::{CostRow, DailyCost, DateRange, PeriodReport, RecordType, ALL_KEYS};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Rows keyed by service (or not keyed at all) count towards the period total.
fn in_service_dimension(row: &CostRow) -> bool {
    row.service != ALL_KEYS || row.usage_type == ALL_KEYS
}

fn in_usage_type_dimension(row: &CostRow) -> bool {
    row.usage_type != ALL_KEYS
}

/// Folds raw cost rows into a [`PeriodReport`] for `range`.
///
/// Rows from a service-grouped query and a usage-type-grouped query can be
/// passed together: each row only feeds the breakdown for the dimension it
/// was keyed by, and only service-dimension rows make up `total_cost`, so the
/// same spend is never counted twice. Credit rows never enter the usage
/// figures; they are summed into `credits_applied`.
pub fn aggregate(
    rows: &[CostRow],
    range: DateRange,
    currency: &str,
    generated_at: DateTime<Utc>,
) -> PeriodReport {
    let mut total_cost = Decimal::ZERO;
    let mut credits_applied = Decimal::ZERO;
    let mut costs_by_service: BTreeMap<String, Decimal> = BTreeMap::new();
    let mut costs_by_usage_type: BTreeMap<String, Decimal> = BTreeMap::new();
    let mut by_day: BTreeMap<NaiveDate, Decimal> = BTreeMap::new();

    for row in rows.iter().filter(|r| range.contains(r.date)) {
        match row.record_type {
            RecordType::Credit => {
                if in_service_dimension(row) {
                    credits_applied += row.amount;
                }
            }
            RecordType::Usage => {
                if in_service_dimension(row) {
                    total_cost += row.amount;
                    *costs_by_service.entry(row.service.clone()).or_default() += row.amount;
                    *by_day.entry(row.date).or_default() += row.amount;
                }
                if in_usage_type_dimension(row) {
                    *costs_by_usage_type
                        .entry(row.usage_type.clone())
                        .or_default() += row.amount;
                }
            }
        }
    }

    let daily_trend = if by_day.is_empty() {
        Vec::new()
    } else {
        range
            .iter_days()
            .map(|date| DailyCost {
                date,
                amount: by_day.get(&date).copied().unwrap_or_default(),
            })
            .collect()
    };

    PeriodReport {
        start_date: range.start,
        end_date: range.end,
        currency: currency.to_string(),
        total_cost,
        credits_applied,
        costs_by_service,
        costs_by_usage_type,
        daily_trend,
        generated_at,
    }
}

/// Sum of usage rows; credit rows are ignored.
pub fn gross_usage(rows: &[CostRow]) -> Decimal {
    rows.iter()
        .filter(|r| r.record_type == RecordType::Usage && in_service_dimension(r))
        .map(|r| r.amount)
        .sum()
}

/// Magnitude of credit consumption across `rows`.
pub fn credits_used(rows: &[CostRow]) -> Decimal {
    rows.iter()
        .filter(|r| r.record_type == RecordType::Credit && in_service_dimension(r))
        .map(|r| r.amount)
        .sum::<Decimal>()
        .abs()
}
