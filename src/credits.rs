use crate::config::DAYS_PER_MONTH;
use crate::models::{CreditState, CreditStatus};
use chrono::{Duration, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Credit figures from a validated config.
#[derive(Debug, Clone, PartialEq)]
pub struct CreditTerms {
    pub total_available: Decimal,
    pub manual_offset: Decimal,
    pub expiration_date: Option<NaiveDate>,
}

const CRITICAL_MONTHS: i64 = 3;
const MONITOR_MONTHS: i64 = 6;

/// Average monthly gross usage over a trailing window of `months`.
pub fn monthly_burn(gross_usage: Decimal, months: u32) -> Decimal {
    if months == 0 {
        return Decimal::ZERO;
    }
    gross_usage / Decimal::from(months)
}

/// `None` when there is no positive burn to divide by.
pub fn months_remaining(remaining: Decimal, monthly_burn: Decimal) -> Option<Decimal> {
    if monthly_burn <= Decimal::ZERO {
        return None;
    }
    if remaining <= Decimal::ZERO {
        return Some(Decimal::ZERO);
    }
    remaining.checked_div(monthly_burn)
}

pub fn exhaustion_date(today: NaiveDate, months: Decimal) -> Option<NaiveDate> {
    let days = months
        .checked_mul(Decimal::from(DAYS_PER_MONTH))?
        .round()
        .to_i64()?;
    today.checked_add_signed(Duration::try_days(days)?)
}

/// First match wins: exhausted, then critical, then monitor.
pub fn classify(remaining: Decimal, months: Option<Decimal>) -> CreditStatus {
    if remaining <= Decimal::ZERO {
        return CreditStatus::Exhausted;
    }
    match months {
        Some(m) if m < Decimal::from(CRITICAL_MONTHS) => CreditStatus::Critical,
        Some(m) if m < Decimal::from(MONITOR_MONTHS) => CreditStatus::Monitor,
        _ => CreditStatus::Healthy,
    }
}

/// Reconciles the API-visible lifetime credit usage with the configured
/// offset and projects when the balance runs out.
///
/// The offset accounts for credits consumed before the cost API's lookback
/// window. It cannot be derived from API data and is taken verbatim from
/// config. A negative `remaining` is reported as-is.
pub fn compute_credit_state(
    api_visible_used: Decimal,
    monthly_burn: Decimal,
    applied_this_period: Decimal,
    terms: &CreditTerms,
    today: NaiveDate,
) -> CreditState {
    let used_lifetime_adjusted = api_visible_used + terms.manual_offset;
    let remaining = terms.total_available - used_lifetime_adjusted;
    let estimated_months_remaining = months_remaining(remaining, monthly_burn);
    let estimated_exhaustion_date =
        estimated_months_remaining.and_then(|months| exhaustion_date(today, months));

    CreditState {
        total_available: terms.total_available,
        used_lifetime_api_visible: api_visible_used,
        manual_adjustment_offset: terms.manual_offset,
        used_lifetime_adjusted,
        remaining,
        applied_this_period: applied_this_period.abs(),
        expiration_date: terms.expiration_date,
        monthly_burn,
        estimated_months_remaining,
        estimated_exhaustion_date,
        status: classify(remaining, estimated_months_remaining),
    }
}
