//! Slack incoming-webhook channel.

use crate::config::{get_secret, Secret};
use crate::models::{CreditState, PeriodReport};
use crate::notify::{ChannelError, ReportChannel};
use crate::render::{slack_payload, RenderOptions, ReportView};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

pub struct SlackChannel {
    webhook_url: Option<String>,
    client: Client,
}

impl SlackChannel {
    /// Webhook URL from the keyring or `SLACK_WEBHOOK_URL`.
    pub fn from_secrets(client: Client) -> Self {
        match get_secret(Secret::SlackWebhookUrl) {
            Some(url) => Self::new(client, url),
            None => {
                warn!("Slack enabled but no webhook URL configured; channel disabled");
                Self {
                    webhook_url: None,
                    client,
                }
            }
        }
    }

    pub fn new(client: Client, webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: Some(webhook_url.into()),
            client,
        }
    }
}

#[async_trait]
impl ReportChannel for SlackChannel {
    fn name(&self) -> &'static str {
        "slack"
    }

    fn enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    async fn send_report(
        &self,
        report: &PeriodReport,
        credits: &CreditState,
        opts: &RenderOptions,
    ) -> Result<(), ChannelError> {
        let webhook_url = self
            .webhook_url
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured(Secret::SlackWebhookUrl.env_name().into()))?;

        let payload = slack_payload(&ReportView::build(report, credits, opts));
        debug!(channel = "slack", "Posting report to webhook");

        let response = self.client.post(webhook_url).json(&payload).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(ChannelError::Rejected {
            channel: "slack",
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CreditStatus;
    use chrono::{NaiveDate, Utc};
    use httpmock::{Method::POST, MockServer};
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;

    fn report() -> PeriodReport {
        let day = NaiveDate::from_ymd_opt(2024, 2, 1).expect("valid date");
        PeriodReport {
            start_date: day,
            end_date: NaiveDate::from_ymd_opt(2024, 3, 1).expect("valid date"),
            currency: "USD".into(),
            total_cost: Decimal::new(4200, 2),
            credits_applied: Decimal::new(-4200, 2),
            costs_by_service: BTreeMap::from([("AWS Lambda".to_string(), Decimal::new(4200, 2))]),
            costs_by_usage_type: BTreeMap::new(),
            daily_trend: vec![],
            generated_at: Utc::now(),
        }
    }

    fn credits() -> CreditState {
        CreditState {
            total_available: Decimal::new(1000, 0),
            used_lifetime_api_visible: Decimal::new(100, 0),
            manual_adjustment_offset: Decimal::ZERO,
            used_lifetime_adjusted: Decimal::new(100, 0),
            remaining: Decimal::new(900, 0),
            applied_this_period: Decimal::new(42, 0),
            expiration_date: None,
            monthly_burn: Decimal::new(42, 0),
            estimated_months_remaining: Some(Decimal::new(214, 1)),
            estimated_exhaustion_date: None,
            status: CreditStatus::Healthy,
        }
    }

    #[tokio::test]
    async fn posts_rendered_payload() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/hook")
                    .header("content-type", "application/json")
                    .body_includes("Charges on Credit: USD 42.00")
                    .body_includes("\"color\":\"good\"");
                then.status(200).body("ok");
            })
            .await;

        let channel = SlackChannel::new(Client::new(), server.url("/hook"));
        channel
            .send_report(&report(), &credits(), &RenderOptions::default())
            .await
            .expect("send");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/hook");
                then.status(404).body("no_service");
            })
            .await;

        let channel = SlackChannel::new(Client::new(), server.url("/hook"));
        let err = channel
            .send_report(&report(), &credits(), &RenderOptions::default())
            .await
            .expect_err("expected rejection");
        match err {
            ChannelError::Rejected { status, body, .. } => {
                assert_eq!(status, 404);
                assert_eq!(body, "no_service");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn channel_without_url_is_disabled() {
        let channel = SlackChannel {
            webhook_url: None,
            client: Client::new(),
        };
        assert!(!channel.enabled());
    }
}
