//! Outbound report notifications.
//!
//! Each integration implements [`ReportChannel`]. The [`Notifier`] sends the
//! report to every enabled channel exactly once; a failing channel is logged
//! and skipped, never surfaced as a run failure.

pub mod slack;

use crate::models::{CreditState, PeriodReport};
use crate::render::RenderOptions;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("channel not configured: {0}")]
    NotConfigured(String),

    #[error("{channel} returned HTTP {status}: {body}")]
    Rejected {
        channel: &'static str,
        status: u16,
        body: String,
    },
}

#[async_trait]
pub trait ReportChannel: Send + Sync {
    fn name(&self) -> &'static str;

    fn enabled(&self) -> bool;

    async fn send_report(
        &self,
        report: &PeriodReport,
        credits: &CreditState,
        opts: &RenderOptions,
    ) -> Result<(), ChannelError>;
}

#[derive(Debug)]
pub struct ChannelOutcome {
    pub channel: &'static str,
    pub result: Result<(), ChannelError>,
}

/// Names of the channels whose send failed.
pub fn failed_channels(outcomes: &[ChannelOutcome]) -> Vec<&'static str> {
    outcomes
        .iter()
        .filter(|o| o.result.is_err())
        .map(|o| o.channel)
        .collect()
}

pub struct Notifier {
    channels: Vec<Box<dyn ReportChannel>>,
}

impl Notifier {
    pub fn new(channels: Vec<Box<dyn ReportChannel>>) -> Self {
        let channels: Vec<Box<dyn ReportChannel>> =
            channels.into_iter().filter(|c| c.enabled()).collect();
        if !channels.is_empty() {
            info!(channel_count = channels.len(), "Notification channels ready");
        }
        Self { channels }
    }

    pub fn disabled() -> Self {
        Self { channels: vec![] }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// One attempt per channel. Failures are logged and returned, not raised.
    pub async fn notify_all(
        &self,
        report: &PeriodReport,
        credits: &CreditState,
        opts: &RenderOptions,
    ) -> Vec<ChannelOutcome> {
        if self.channels.is_empty() {
            debug!("No notification channels enabled, skipping");
            return vec![];
        }

        let mut outcomes = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            let result = channel.send_report(report, credits, opts).await;
            match &result {
                Ok(()) => info!(channel = channel.name(), "Report sent"),
                Err(e) => error!(channel = channel.name(), error = %e, "Failed to send report"),
            }
            outcomes.push(ChannelOutcome {
                channel: channel.name(),
                result,
            });
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CreditStatus;
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeChannel {
        name: &'static str,
        enabled: bool,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ReportChannel for FakeChannel {
        fn name(&self) -> &'static str {
            self.name
        }

        fn enabled(&self) -> bool {
            self.enabled
        }

        async fn send_report(
            &self,
            _report: &PeriodReport,
            _credits: &CreditState,
            _opts: &RenderOptions,
        ) -> Result<(), ChannelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ChannelError::NotConfigured(self.name.to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn report() -> PeriodReport {
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date");
        PeriodReport {
            start_date: day,
            end_date: day,
            currency: "USD".into(),
            total_cost: Decimal::ZERO,
            credits_applied: Decimal::ZERO,
            costs_by_service: BTreeMap::new(),
            costs_by_usage_type: BTreeMap::new(),
            daily_trend: vec![],
            generated_at: Utc::now(),
        }
    }

    fn credits() -> CreditState {
        CreditState {
            total_available: Decimal::ZERO,
            used_lifetime_api_visible: Decimal::ZERO,
            manual_adjustment_offset: Decimal::ZERO,
            used_lifetime_adjusted: Decimal::ZERO,
            remaining: Decimal::ZERO,
            applied_this_period: Decimal::ZERO,
            expiration_date: None,
            monthly_burn: Decimal::ZERO,
            estimated_months_remaining: None,
            estimated_exhaustion_date: None,
            status: CreditStatus::Exhausted,
        }
    }

    fn fake(
        name: &'static str,
        enabled: bool,
        fail: bool,
        calls: &Arc<AtomicUsize>,
    ) -> Box<dyn ReportChannel> {
        Box::new(FakeChannel {
            name,
            enabled,
            fail,
            calls: Arc::clone(calls),
        })
    }

    #[tokio::test]
    async fn failing_channel_does_not_stop_others() {
        let calls = Arc::new(AtomicUsize::new(0));
        let notifier = Notifier::new(vec![
            fake("broken", true, true, &calls),
            fake("working", true, false, &calls),
        ]);

        let outcomes = notifier
            .notify_all(&report(), &credits(), &RenderOptions::default())
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].result.is_err());
        assert!(outcomes[1].result.is_ok());
        assert_eq!(failed_channels(&outcomes), vec!["broken"]);
    }

    #[tokio::test]
    async fn disabled_channels_are_dropped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let notifier = Notifier::new(vec![fake("off", false, false, &calls)]);
        assert_eq!(notifier.channel_count(), 0);

        let outcomes = notifier
            .notify_all(&report(), &credits(), &RenderOptions::default())
            .await;
        assert!(outcomes.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disabled_notifier_sends_nothing() {
        let outcomes = Notifier::disabled()
            .notify_all(&report(), &credits(), &RenderOptions::default())
            .await;
        assert!(outcomes.is_empty());
    }
}
