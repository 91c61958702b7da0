use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Placeholder key for the dimension a query was not grouped by.
pub const ALL_KEYS: &str = "(all)";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordType {
    Usage,
    Credit,
}

impl RecordType {
    /// Value of the `RECORD_TYPE` dimension on the cost API.
    pub fn as_api_value(self) -> &'static str {
        match self {
            RecordType::Usage => "Usage",
            RecordType::Credit => "Credit",
        }
    }

    pub fn from_api_value(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case("usage") {
            Some(RecordType::Usage)
        } else if raw.to_ascii_lowercase().contains("credit") {
            Some(RecordType::Credit)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CostRow {
    pub service: String,
    pub usage_type: String,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub record_type: RecordType,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Granularity {
    Daily,
    Monthly,
}

impl Granularity {
    pub fn as_api_value(self) -> &'static str {
        match self {
            Granularity::Daily => "DAILY",
            Granularity::Monthly => "MONTHLY",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GroupBy {
    Service,
    UsageType,
}

impl GroupBy {
    pub fn as_api_value(self) -> &'static str {
        match self {
            GroupBy::Service => "SERVICE",
            GroupBy::UsageType => "USAGE_TYPE",
        }
    }
}

/// Half-open date range `[start, end)`, matching the cost API's convention.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days().max(0)
    }

    pub fn iter_days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        (0..self.days()).map(move |offset| self.start + Duration::days(offset))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyCost {
    pub date: NaiveDate,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeriodReport {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub currency: String,
    pub total_cost: Decimal,
    pub credits_applied: Decimal,
    pub costs_by_service: BTreeMap<String, Decimal>,
    pub costs_by_usage_type: BTreeMap<String, Decimal>,
    pub daily_trend: Vec<DailyCost>,
    pub generated_at: DateTime<Utc>,
}

impl PeriodReport {
    pub fn net_cost(&self) -> Decimal {
        self.total_cost + self.credits_applied
    }

    /// Services sorted by descending cost, ties broken by name.
    pub fn ranked_services(&self) -> Vec<(&str, Decimal)> {
        let mut ranked: Vec<(&str, Decimal)> = self
            .costs_by_service
            .iter()
            .map(|(name, amount)| (name.as_str(), *amount))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
    }

    pub fn ranked_usage_types(&self) -> Vec<(&str, Decimal)> {
        let mut ranked: Vec<(&str, Decimal)> = self
            .costs_by_usage_type
            .iter()
            .map(|(name, amount)| (name.as_str(), *amount))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreditStatus {
    Exhausted,
    Critical,
    Monitor,
    Healthy,
}

impl CreditStatus {
    pub fn as_label(self) -> &'static str {
        match self {
            CreditStatus::Exhausted => "EXHAUSTED",
            CreditStatus::Critical => "CRITICAL",
            CreditStatus::Monitor => "MONITOR",
            CreditStatus::Healthy => "HEALTHY",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreditState {
    pub total_available: Decimal,
    pub used_lifetime_api_visible: Decimal,
    pub manual_adjustment_offset: Decimal,
    pub used_lifetime_adjusted: Decimal,
    pub remaining: Decimal,
    pub applied_this_period: Decimal,
    pub expiration_date: Option<NaiveDate>,
    pub monthly_burn: Decimal,
    pub estimated_months_remaining: Option<Decimal>,
    pub estimated_exhaustion_date: Option<NaiveDate>,
    pub status: CreditStatus,
}

impl CreditState {
    pub fn percent_used(&self) -> Option<Decimal> {
        if self.total_available <= Decimal::ZERO {
            return None;
        }
        Some(self.used_lifetime_adjusted * Decimal::ONE_HUNDRED / self.total_available)
    }

    /// True when the credits are projected to expire before being used up.
    pub fn expires_before_exhaustion(&self) -> bool {
        match (self.expiration_date, self.estimated_exhaustion_date) {
            (Some(expiry), Some(exhaustion)) => expiry < exhaustion,
            _ => false,
        }
    }
}
