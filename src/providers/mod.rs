use crate::error::{AppError, FetchError};
use crate::models::{CostRow, DateRange, Granularity, GroupBy, RecordType};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};

pub mod cost_explorer;
pub mod sigv4;

/// How far back the cost API answers queries.
pub const LOOKBACK_LIMIT_DAYS: i64 = 400;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostQuery {
    pub range: DateRange,
    pub granularity: Granularity,
    pub group_by: Option<GroupBy>,
    pub record_type: Option<RecordType>,
}

impl CostQuery {
    pub fn daily(range: DateRange, group_by: GroupBy, record_type: RecordType) -> Self {
        Self {
            range,
            granularity: Granularity::Daily,
            group_by: Some(group_by),
            record_type: Some(record_type),
        }
    }

    pub fn monthly_total(range: DateRange, record_type: RecordType) -> Self {
        Self {
            range,
            granularity: Granularity::Monthly,
            group_by: None,
            record_type: Some(record_type),
        }
    }
}

pub fn earliest_queryable(today: NaiveDate) -> NaiveDate {
    today - Duration::days(LOOKBACK_LIMIT_DAYS)
}

/// Lifetime queries are pulled forward to the oldest date the API still serves.
pub fn clamp_to_lookback(range: DateRange, today: NaiveDate) -> DateRange {
    let earliest = earliest_queryable(today);
    DateRange::new(range.start.max(earliest), range.end.max(earliest))
}

/// Non-lifetime queries must already sit inside the lookback window.
pub fn ensure_within_lookback(range: DateRange, today: NaiveDate) -> Result<(), FetchError> {
    let earliest = earliest_queryable(today);
    if range.start < earliest {
        return Err(FetchError::RangeExceedsLookback {
            start: range.start,
            earliest,
        });
    }
    Ok(())
}

#[async_trait]
pub trait CostSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, query: &CostQuery) -> Result<Vec<CostRow>, AppError>;

    async fn check_connection(&self, today: NaiveDate) -> Result<(), AppError> {
        let range = DateRange::new(today - Duration::days(1), today);
        self.fetch(&CostQuery::monthly_total(range, RecordType::Usage))
            .await
            .map(|_| ())
    }
}
