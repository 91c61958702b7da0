//! Presentation of a report run.
//!
//! Every output goes through [`ReportView`], which holds the figures already
//! formatted as strings. The console text and the Slack payload both read
//! from the same view, so they cannot disagree on a number.

use crate::models::{CreditState, CreditStatus, PeriodReport};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

const RULE_WIDTH: usize = 70;
const PROGRESS_WIDTH: usize = 40;
const TREND_DAYS: usize = 7;
const NOT_AVAILABLE: &str = "n/a";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Console,
    Slack,
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Breakdown lines below this amount are hidden; totals still include them.
    pub min_cost_threshold: Decimal,
    pub top_services: usize,
    pub top_usage_types: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            min_cost_threshold: Decimal::new(1, 2),
            top_services: 10,
            top_usage_types: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakdownLine {
    pub name: String,
    pub amount: String,
    pub percent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportView {
    pub currency: String,
    pub period: String,
    pub generated_at: String,
    pub total_cost: String,
    pub credits_applied: String,
    pub net_cost: String,
    pub credit_coverage: String,
    pub services: Vec<BreakdownLine>,
    pub usage_types: Vec<BreakdownLine>,
    pub hidden_lines: usize,
    pub average_daily: String,
    pub peak_day: Option<(String, String)>,
    pub recent_days: Vec<(String, String)>,
    pub credits_total: String,
    pub credits_used_api: String,
    pub credits_offset: String,
    pub credits_used: String,
    pub credits_remaining: String,
    pub percent_used: String,
    pub progress: f64,
    pub monthly_burn: String,
    pub months_remaining: String,
    pub exhaustion_date: String,
    pub expiration: Option<String>,
    pub expires_first: bool,
    pub status: CreditStatus,
    pub hints: Vec<&'static str>,
}

pub fn money(amount: Decimal) -> String {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    if rounded.is_zero() {
        return "0.00".to_string();
    }
    format!("{rounded:.2}")
}

fn percent(part: Decimal, whole: Decimal) -> String {
    if whole <= Decimal::ZERO {
        return NOT_AVAILABLE.to_string();
    }
    let pct = (part * Decimal::ONE_HUNDRED / whole)
        .round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero);
    format!("{pct:.1}%")
}

fn breakdown(
    ranked: Vec<(&str, Decimal)>,
    total: Decimal,
    opts: &RenderOptions,
    limit: usize,
) -> (Vec<BreakdownLine>, usize) {
    let visible: Vec<(&str, Decimal)> = ranked
        .into_iter()
        .filter(|(_, amount)| *amount >= opts.min_cost_threshold)
        .collect();
    let hidden = visible.len().saturating_sub(limit);
    let lines = visible
        .into_iter()
        .take(limit)
        .map(|(name, amount)| BreakdownLine {
            name: name.to_string(),
            amount: money(amount),
            percent: percent(amount, total),
        })
        .collect();
    (lines, hidden)
}

pub fn optimization_hints(top_service: Option<&str>) -> Vec<&'static str> {
    let mut hints = match top_service {
        Some(s) if s.contains("Elastic Compute Cloud") || s.contains("EC2") => vec![
            "Consider rightsizing EC2 instances",
            "Use Spot Instances for non-critical workloads",
            "Enable EC2 Instance Savings Plans",
        ],
        Some(s) if s.contains("Relational Database Service") || s.contains("RDS") => vec![
            "Review RDS instance sizes and types",
            "Consider Aurora Serverless for variable workloads",
        ],
        Some(s) if s.contains("ElastiCache") => vec![
            "Review cache instance sizes",
            "Monitor cache hit ratios",
        ],
        Some(_) => vec!["Review usage patterns of the top service"],
        None => vec![],
    };
    if top_service.is_some() {
        hints.push("Set up billing alerts for proactive monitoring");
    }
    hints
}

impl ReportView {
    pub fn build(report: &PeriodReport, credits: &CreditState, opts: &RenderOptions) -> Self {
        let total = report.total_cost;
        let ranked_services = report.ranked_services();
        let top_service = ranked_services.first().map(|(name, _)| name.to_string());
        let (services, hidden_services) =
            breakdown(ranked_services, total, opts, opts.top_services);
        let (usage_types, hidden_usage) = breakdown(
            report.ranked_usage_types(),
            total,
            opts,
            opts.top_usage_types,
        );

        let days = report.daily_trend.len();
        let average_daily = if days == 0 {
            money(Decimal::ZERO)
        } else {
            money(total / Decimal::from(days))
        };
        let peak_day = report
            .daily_trend
            .iter()
            .max_by(|a, b| a.amount.cmp(&b.amount).then_with(|| b.date.cmp(&a.date)))
            .map(|d| (d.date.to_string(), money(d.amount)));
        let recent_days = report
            .daily_trend
            .iter()
            .skip(days.saturating_sub(TREND_DAYS))
            .map(|d| (d.date.to_string(), money(d.amount)))
            .collect();

        let credits_applied = report.credits_applied.abs();
        let credit_coverage = if total > Decimal::ZERO {
            percent(credits_applied.min(total), total)
        } else {
            NOT_AVAILABLE.to_string()
        };

        let progress = credits
            .percent_used()
            .and_then(|p| rust_decimal::prelude::ToPrimitive::to_f64(&p))
            .unwrap_or(0.0)
            .clamp(0.0, 100.0);

        Self {
            currency: report.currency.clone(),
            period: format!(
                "{} to {} ({} days)",
                report.start_date,
                report.end_date,
                (report.end_date - report.start_date).num_days()
            ),
            generated_at: report.generated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            total_cost: money(total),
            credits_applied: money(credits_applied),
            net_cost: money(report.net_cost().max(Decimal::ZERO)),
            credit_coverage,
            services,
            usage_types,
            hidden_lines: hidden_services + hidden_usage,
            average_daily,
            peak_day,
            recent_days,
            credits_total: money(credits.total_available),
            credits_used_api: money(credits.used_lifetime_api_visible),
            credits_offset: money(credits.manual_adjustment_offset),
            credits_used: money(credits.used_lifetime_adjusted),
            credits_remaining: money(credits.remaining),
            percent_used: credits
                .percent_used()
                .map(|p| {
                    let p = p.round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero);
                    format!("{p:.1}%")
                })
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            progress,
            monthly_burn: money(credits.monthly_burn),
            months_remaining: credits
                .estimated_months_remaining
                .map(|m| {
                    let m = m.round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero);
                    format!("{m:.1}")
                })
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            exhaustion_date: credits
                .estimated_exhaustion_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            expiration: credits.expiration_date.map(|d| d.to_string()),
            expires_first: credits.expires_before_exhaustion(),
            status: credits.status,
            hints: optimization_hints(top_service.as_deref()),
        }
    }

    fn amount(&self, value: &str) -> String {
        format!("{} {}", self.currency, value)
    }

    fn status_line(&self) -> &'static str {
        match self.status {
            CreditStatus::Exhausted => "Credits are exhausted; usage is now billed",
            CreditStatus::Critical => "Credits will be exhausted within 3 months",
            CreditStatus::Monitor => "Credits will be exhausted within 6 months",
            CreditStatus::Healthy => "Credits should last more than 6 months",
        }
    }
}

fn progress_bar(percent: f64, width: usize) -> String {
    let filled = ((percent / 100.0) * width as f64).round() as usize;
    let filled = filled.min(width);
    format!("[{}{}]", "#".repeat(filled), ".".repeat(width - filled))
}

pub fn render_console(view: &ReportView) -> String {
    let mut out = Vec::new();
    let rule = "=".repeat(RULE_WIDTH);
    let thin = "-".repeat(40);

    out.push(rule.clone());
    out.push("  CREDIT METER REPORT".to_string());
    out.push(format!("  Period:    {}", view.period));
    out.push(format!("  Generated: {}", view.generated_at));
    out.push(rule.clone());

    out.push(String::new());
    out.push("PERIOD COSTS".to_string());
    out.push(thin.clone());
    out.push(format!("Usage Cost:        {}", view.amount(&view.total_cost)));
    out.push(format!("Credits Applied:   {}", view.amount(&view.credits_applied)));
    out.push(format!("Net Cost:          {}", view.amount(&view.net_cost)));
    out.push(format!("Credit Coverage:   {}", view.credit_coverage));

    out.push(String::new());
    out.push("TOP SERVICES".to_string());
    out.push(thin.clone());
    if view.services.is_empty() {
        out.push("  (no service charges in this period)".to_string());
    }
    for (i, line) in view.services.iter().enumerate() {
        out.push(format!(
            "{:>3}. {:<40} {:>14}  ({})",
            i + 1,
            line.name,
            view.amount(&line.amount),
            line.percent
        ));
    }

    if !view.usage_types.is_empty() {
        out.push(String::new());
        out.push("TOP USAGE TYPES".to_string());
        out.push(thin.clone());
        for (i, line) in view.usage_types.iter().enumerate() {
            out.push(format!(
                "{:>3}. {:<40} {:>14}  ({})",
                i + 1,
                line.name,
                view.amount(&line.amount),
                line.percent
            ));
        }
    }
    if view.hidden_lines > 0 {
        out.push(format!("  ... {} more lines not shown", view.hidden_lines));
    }

    if !view.recent_days.is_empty() {
        out.push(String::new());
        out.push("DAILY TREND".to_string());
        out.push(thin.clone());
        out.push(format!("Average per day:   {}", view.amount(&view.average_daily)));
        if let Some((date, amount)) = &view.peak_day {
            out.push(format!("Peak day:          {} ({})", date, view.amount(amount)));
        }
        for (date, amount) in &view.recent_days {
            out.push(format!("  {}  {:>14}", date, view.amount(amount)));
        }
    }

    out.push(String::new());
    out.push("LIFETIME CREDITS".to_string());
    out.push(thin.clone());
    out.push(format!("Total Credits:       {}", view.amount(&view.credits_total)));
    out.push(format!("Used (API visible):  {}", view.amount(&view.credits_used_api)));
    out.push(format!("Manual Offset:       {}", view.amount(&view.credits_offset)));
    out.push(format!("Used (adjusted):     {}", view.amount(&view.credits_used)));
    out.push(format!("Remaining:           {}", view.amount(&view.credits_remaining)));
    out.push(format!("Used:                {}", view.percent_used));
    out.push(format!(
        "Progress:            {}",
        progress_bar(view.progress, PROGRESS_WIDTH)
    ));

    out.push(String::new());
    out.push("PROJECTION".to_string());
    out.push(thin.clone());
    out.push(format!("Monthly Burn:        {}", view.amount(&view.monthly_burn)));
    out.push(format!("Months Remaining:    {}", view.months_remaining));
    out.push(format!("Est. Exhaustion:     {}", view.exhaustion_date));
    if let Some(expiry) = &view.expiration {
        let note = if view.expires_first {
            " (expires before projected exhaustion)"
        } else {
            ""
        };
        out.push(format!("Credits Expire:      {expiry}{note}"));
    }
    out.push(format!(
        "Status:              {} - {}",
        view.status.as_label(),
        view.status_line()
    ));

    if !view.hints.is_empty() {
        out.push(String::new());
        out.push("OPTIMIZATION HINTS".to_string());
        out.push(thin);
        for hint in &view.hints {
            out.push(format!("  * {hint}"));
        }
    }

    out.push(rule);
    out.join("\n")
}

#[derive(Debug, Serialize)]
pub struct SlackPayload {
    pub text: String,
    pub mrkdwn: bool,
    pub attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
pub struct SlackAttachment {
    pub fallback: String,
    pub color: String,
    pub title: String,
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<SlackField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SlackField {
    pub title: String,
    pub value: String,
    pub short: bool,
}

fn status_color(status: CreditStatus) -> &'static str {
    match status {
        CreditStatus::Healthy => "good",
        CreditStatus::Monitor => "warning",
        CreditStatus::Critical | CreditStatus::Exhausted => "danger",
    }
}

pub fn slack_payload(view: &ReportView) -> SlackPayload {
    let text = [
        format!("*AWS cost report* ({})", view.period),
        format!("Charges on Credit: {}", view.amount(&view.total_cost)),
        format!("Credits Applied: {}", view.amount(&view.credits_applied)),
        format!("Net Remaining Charges: {}", view.amount(&view.net_cost)),
    ]
    .join("\n");

    let services = if view.services.is_empty() {
        "_no service charges in this period_".to_string()
    } else {
        view.services
            .iter()
            .map(|l| format!("• {}: {} ({})", l.name, view.amount(&l.amount), l.percent))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let field = |title: &str, value: String| SlackField {
        title: title.to_string(),
        value,
        short: true,
    };
    let mut fields = vec![
        field("Total Credits", view.amount(&view.credits_total)),
        field("Used (adjusted)", view.amount(&view.credits_used)),
        field("Remaining", view.amount(&view.credits_remaining)),
        field("Used", view.percent_used.clone()),
        field("Monthly Burn", view.amount(&view.monthly_burn)),
        field("Months Remaining", view.months_remaining.clone()),
        field("Est. Exhaustion", view.exhaustion_date.clone()),
        field("Manual Offset", view.amount(&view.credits_offset)),
    ];
    if let Some(expiry) = &view.expiration {
        let value = if view.expires_first {
            format!("{expiry} (before exhaustion)")
        } else {
            expiry.clone()
        };
        fields.push(field("Credits Expire", value));
    }

    SlackPayload {
        text,
        mrkdwn: true,
        attachments: vec![SlackAttachment {
            fallback: format!(
                "Credits {}: {} remaining",
                view.status.as_label(),
                view.amount(&view.credits_remaining)
            ),
            color: status_color(view.status).to_string(),
            title: format!("Credit status: {}", view.status.as_label()),
            text: format!("*Top services*\n{services}"),
            fields,
            footer: Some(format!("credit-meter | {}", view.generated_at)),
        }],
    }
}

/// Renders the run for one destination. Slack output is the JSON body.
pub fn format(
    report: &PeriodReport,
    credits: &CreditState,
    opts: &RenderOptions,
    destination: Destination,
) -> Result<String, serde_json::Error> {
    let view = ReportView::build(report, credits, opts);
    match destination {
        Destination::Console => Ok(render_console(&view)),
        Destination::Slack => serde_json::to_string_pretty(&slack_payload(&view)),
    }
}
