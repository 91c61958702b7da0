use crate::aggregate::{aggregate, credits_used, gross_usage};
use crate::config::{load_aws_credentials, AppConfig};
use crate::credits::{compute_credit_state, monthly_burn};
use crate::error::AppError;
use crate::models::{CreditState, DateRange, GroupBy, PeriodReport, RecordType};
use crate::notify::slack::SlackChannel;
use crate::notify::{ChannelOutcome, Notifier, ReportChannel};
use crate::providers::cost_explorer::CostExplorerSource;
use crate::providers::{clamp_to_lookback, CostQuery, CostSource};
use crate::render::{render_console, RenderOptions, ReportView};
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::Serialize;
use std::io::Write;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub report: PeriodReport,
    pub credits: CreditState,
}

pub struct RunSummary {
    pub analysis: Analysis,
    pub notifications: Vec<ChannelOutcome>,
}

pub struct BillingService {
    client: Client,
}

impl BillingService {
    pub fn new() -> Result<Self, AppError> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }

    pub fn cost_source(
        &self,
        cfg: &AppConfig,
        today: NaiveDate,
    ) -> Result<CostExplorerSource, AppError> {
        let credentials = load_aws_credentials()?;
        CostExplorerSource::new(
            self.client.clone(),
            &credentials,
            &cfg.billing.region,
            cfg.billing.endpoint.clone(),
            today,
        )
    }

    pub fn notifier(&self, cfg: &AppConfig, notify: bool) -> Notifier {
        if !notify {
            info!("Notifications turned off for this run");
            return Notifier::disabled();
        }
        let mut channels: Vec<Box<dyn ReportChannel>> = Vec::new();
        if cfg.notify.slack_enabled {
            channels.push(Box::new(SlackChannel::from_secrets(self.client.clone())));
        }
        Notifier::new(channels)
    }
}

pub fn render_options(cfg: &AppConfig) -> RenderOptions {
    RenderOptions {
        min_cost_threshold: cfg.billing.min_cost_threshold,
        ..RenderOptions::default()
    }
}

/// Fetches everything one report needs and folds it into report + credit state.
pub async fn analyze(
    source: &dyn CostSource,
    cfg: &AppConfig,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<Analysis, AppError> {
    let terms = cfg.credits.terms()?;
    let period = cfg.billing_period(today)?;
    let burn_window = cfg.burn_window(today)?;
    info!(
        source = source.name(),
        start = %period.start,
        end = %period.end,
        "Generating billing report"
    );

    let mut rows = source
        .fetch(&CostQuery::daily(period, GroupBy::Service, RecordType::Usage))
        .await?;
    rows.extend(
        source
            .fetch(&CostQuery::daily(period, GroupBy::UsageType, RecordType::Usage))
            .await?,
    );
    rows.extend(
        source
            .fetch(&CostQuery::monthly_total(period, RecordType::Credit))
            .await?,
    );
    let report = aggregate(&rows, period, &cfg.billing.currency, now);

    let lifetime = clamp_to_lookback(DateRange::new(NaiveDate::MIN, today), today);
    let lifetime_rows = source
        .fetch(&CostQuery::monthly_total(lifetime, RecordType::Credit))
        .await?;
    let api_visible_used = credits_used(&lifetime_rows);

    let burn_rows = source
        .fetch(&CostQuery::monthly_total(burn_window, RecordType::Usage))
        .await?;
    let burn = monthly_burn(gross_usage(&burn_rows), cfg.credits.burn_months);

    let credits = compute_credit_state(
        api_visible_used,
        burn,
        report.credits_applied,
        &terms,
        today,
    );
    info!(
        total_cost = %report.total_cost,
        remaining = %credits.remaining,
        status = credits.status.as_label(),
        "Billing analysis complete"
    );

    Ok(Analysis { report, credits })
}

/// Analyze, print the console report, then notify.
///
/// The console report is written and flushed before any channel is tried.
pub async fn run_report(
    source: &dyn CostSource,
    notifier: &Notifier,
    cfg: &AppConfig,
    today: NaiveDate,
    now: DateTime<Utc>,
    out: &mut dyn Write,
) -> Result<RunSummary, AppError> {
    let analysis = analyze(source, cfg, today, now).await?;
    let opts = render_options(cfg);

    let view = ReportView::build(&analysis.report, &analysis.credits, &opts);
    writeln!(out, "{}", render_console(&view))?;
    out.flush()?;

    let notifications = notifier
        .notify_all(&analysis.report, &analysis.credits, &opts)
        .await;

    Ok(RunSummary {
        analysis,
        notifications,
    })
}
