use crate::config::AwsCredentials;
use crate::error::{AppError, FetchError};
use crate::models::{CostRow, GroupBy, RecordType, ALL_KEYS};
use crate::providers::sigv4::{SigV4Signer, SigV4Timestamp};
use crate::providers::{ensure_within_lookback, CostQuery, CostSource};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, warn};

const TARGET: &str = "AWSInsightsIndexService.GetCostAndUsage";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const METRIC: &str = "UnblendedCost";
const MAX_PAGES: usize = 50;

pub struct CostExplorerSource {
    client: Client,
    endpoint: String,
    signer: SigV4Signer,
    today: NaiveDate,
}

impl CostExplorerSource {
    pub fn new(
        client: Client,
        credentials: &AwsCredentials,
        region: &str,
        endpoint: Option<String>,
        today: NaiveDate,
    ) -> Result<Self, AppError> {
        let endpoint = endpoint.unwrap_or_else(|| Self::default_endpoint(region));
        let signer = SigV4Signer::new(credentials, region, "ce")?;
        Ok(Self {
            client,
            endpoint,
            signer,
            today,
        })
    }

    fn default_endpoint(region: &str) -> String {
        format!("https://ce.{region}.amazonaws.com/")
    }

    fn request_body(query: &CostQuery, page_token: Option<&str>) -> Value {
        let mut group_by: Vec<Value> = query
            .group_by
            .iter()
            .map(|g| json!({ "Type": "DIMENSION", "Key": g.as_api_value() }))
            .collect();
        if query.record_type.is_none() {
            group_by.push(json!({ "Type": "DIMENSION", "Key": "RECORD_TYPE" }));
        }

        let mut body = json!({
            "TimePeriod": {
                "Start": query.range.start.format("%Y-%m-%d").to_string(),
                "End": query.range.end.format("%Y-%m-%d").to_string(),
            },
            "Granularity": query.granularity.as_api_value(),
            "Metrics": [METRIC],
        });
        if !group_by.is_empty() {
            body["GroupBy"] = Value::Array(group_by);
        }
        if let Some(record_type) = query.record_type {
            body["Filter"] = json!({
                "Dimensions": {
                    "Key": "RECORD_TYPE",
                    "Values": [record_type.as_api_value()],
                }
            });
        }
        if let Some(token) = page_token {
            body["NextPageToken"] = Value::String(token.to_string());
        }
        body
    }

    fn parse_amount(metrics: &Value) -> Result<Decimal, FetchError> {
        let raw = metrics
            .get(METRIC)
            .and_then(|m| m.get("Amount"))
            .and_then(Value::as_str)
            .ok_or_else(|| FetchError::InvalidResponse(format!("missing {METRIC}.Amount")))?;
        Decimal::from_str(raw)
            .or_else(|_| Decimal::from_scientific(raw))
            .map_err(|e| FetchError::InvalidResponse(format!("bad amount {raw:?}: {e}")))
    }

    fn row(
        query: &CostQuery,
        key: Option<&str>,
        date: NaiveDate,
        amount: Decimal,
        record_type: RecordType,
    ) -> CostRow {
        let key = key.unwrap_or(ALL_KEYS).to_string();
        let (service, usage_type) = match query.group_by {
            Some(GroupBy::Service) => (key, ALL_KEYS.to_string()),
            Some(GroupBy::UsageType) => (ALL_KEYS.to_string(), key),
            None => (ALL_KEYS.to_string(), ALL_KEYS.to_string()),
        };
        CostRow {
            service,
            usage_type,
            date,
            amount,
            record_type,
        }
    }

    /// Turns one `GetCostAndUsage` page into rows plus the next page token.
    fn parse_page(
        query: &CostQuery,
        body: &Value,
    ) -> Result<(Vec<CostRow>, Option<String>), FetchError> {
        let results = body
            .get("ResultsByTime")
            .and_then(Value::as_array)
            .ok_or_else(|| FetchError::InvalidResponse("missing ResultsByTime".into()))?;

        let mut rows = Vec::new();
        for result in results {
            let start = result
                .get("TimePeriod")
                .and_then(|p| p.get("Start"))
                .and_then(Value::as_str)
                .ok_or_else(|| FetchError::InvalidResponse("missing TimePeriod.Start".into()))?;
            let date = NaiveDate::parse_from_str(start, "%Y-%m-%d")
                .map_err(|e| FetchError::InvalidResponse(format!("bad date {start:?}: {e}")))?;

            let groups = result
                .get("Groups")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();

            if groups.is_empty() {
                // Grouped queries report nothing for days without spend.
                let (None, Some(record_type)) = (query.group_by, query.record_type) else {
                    continue;
                };
                let Some(total) = result.get("Total") else {
                    continue;
                };
                let amount = Self::parse_amount(total)?;
                rows.push(Self::row(query, None, date, amount, record_type));
                continue;
            }

            for group in groups {
                let keys: Vec<&str> = group
                    .get("Keys")
                    .and_then(Value::as_array)
                    .map(|keys| keys.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();
                let metrics = group
                    .get("Metrics")
                    .ok_or_else(|| FetchError::InvalidResponse("group missing Metrics".into()))?;
                let amount = Self::parse_amount(metrics)?;

                let record_type = match query.record_type {
                    Some(filtered) => filtered,
                    None => keys
                        .last()
                        .and_then(|k| RecordType::from_api_value(k))
                        .unwrap_or(RecordType::Usage),
                };
                let key = if query.group_by.is_some() {
                    keys.first().copied()
                } else {
                    None
                };
                rows.push(Self::row(query, key, date, amount, record_type));
            }
        }

        let next = body
            .get("NextPageToken")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(ToString::to_string);
        Ok((rows, next))
    }

    fn error_message(body: &str) -> String {
        serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| {
                v.get("message")
                    .or_else(|| v.get("Message"))
                    .and_then(Value::as_str)
                    .map(ToString::to_string)
            })
            .unwrap_or_else(|| body.trim().to_string())
    }

    async fn fetch_page(
        &self,
        query: &CostQuery,
        page_token: Option<&str>,
    ) -> Result<Value, FetchError> {
        let payload = serde_json::to_vec(&Self::request_body(query, page_token))
            .map_err(|e| FetchError::InvalidResponse(e.to_string()))?;

        let headers = BTreeMap::from([
            ("content-type".to_string(), CONTENT_TYPE.to_string()),
            ("x-amz-target".to_string(), TARGET.to_string()),
        ]);
        let signed = self.signer.sign(
            "POST",
            &self.endpoint,
            &headers,
            &payload,
            &SigV4Timestamp::now(),
        )?;

        let req = self
            .client
            .post(&self.endpoint)
            .header("content-type", CONTENT_TYPE)
            .header("x-amz-target", TARGET)
            .body(payload);
        let response = signed.apply(req).send().await?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| FetchError::InvalidResponse(e.to_string()));
        }

        let message = Self::error_message(&response.text().await.unwrap_or_default());
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(FetchError::Unauthorized {
                status: status.as_u16(),
                message,
            });
        }
        Err(FetchError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl CostSource for CostExplorerSource {
    fn name(&self) -> &'static str {
        "cost-explorer"
    }

    async fn fetch(&self, query: &CostQuery) -> Result<Vec<CostRow>, AppError> {
        ensure_within_lookback(query.range, self.today)?;
        debug!(
            start = %query.range.start,
            end = %query.range.end,
            granularity = query.granularity.as_api_value(),
            group_by = ?query.group_by,
            record_type = ?query.record_type,
            "Querying cost API"
        );

        let mut rows = Vec::new();
        let mut token: Option<String> = None;
        for page in 0..MAX_PAGES {
            let body = self.fetch_page(query, token.as_deref()).await?;
            let (page_rows, next) = Self::parse_page(query, &body)?;
            debug!(page, rows = page_rows.len(), "Parsed cost API page");
            rows.extend(page_rows);
            match next {
                Some(next) => token = Some(next),
                None => return Ok(rows),
            }
        }

        warn!(max_pages = MAX_PAGES, "Cost API pagination did not terminate; truncating");
        Ok(rows)
    }
}
