mod aggregate;
mod config;
mod credits;
mod error;
mod models;
mod notify;
mod providers;
mod render;
mod service;

use chrono::Utc;
use clap::{Parser, Subcommand};
use config::{ensure_initialized, get_secret, load_config, set_secret, Secret};
use error::AppError;
use providers::CostSource;
use render::{format, Destination};
use service::{analyze, render_options, run_report, BillingService};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "credit-meter")]
#[command(about = "AWS cost and credit burn reporter")]
struct Cli {
    /// Print the report without posting it to any channel
    #[arg(long, global = true)]
    no_notify: bool,

    /// Debug-level logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch, analyze and report (the default)
    Report,
    Init,
    SetSecret {
        name: String,
        #[arg(long)]
        value: String,
    },
    /// Show configured credentials and probe the cost API
    Check,
    Export {
        #[arg(long, default_value = "json")]
        format: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportFormat {
    Json,
    Text,
    Slack,
}

fn parse_export_format(input: &str) -> Result<ExportFormat, AppError> {
    match input.trim().to_ascii_lowercase().as_str() {
        "json" => Ok(ExportFormat::Json),
        "text" => Ok(ExportFormat::Text),
        "slack" => Ok(ExportFormat::Slack),
        _ => Err(AppError::Config(
            "Unsupported export format. Use json, text, or slack".into(),
        )),
    }
}

fn setup_logging(verbose: bool) {
    let default = if verbose {
        "credit_meter=debug"
    } else {
        "credit_meter=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

async fn report(send: bool) -> Result<(), AppError> {
    ensure_initialized()?;
    let cfg = load_config()?;
    let today = Utc::now().date_naive();
    info!(
        period_count = cfg.billing.period_count,
        unit = cfg.period_type()?.unit_label(cfg.billing.period_count),
        "Loaded configuration"
    );

    let svc = BillingService::new()?;
    let source = svc.cost_source(&cfg, today)?;
    let notifier = svc.notifier(&cfg, send);

    let mut stdout = std::io::stdout().lock();
    let summary = run_report(&source, &notifier, &cfg, today, Utc::now(), &mut stdout).await?;

    let failed = notify::failed_channels(&summary.notifications);
    if !failed.is_empty() {
        warn!(channels = %failed.join(", "), "Report not delivered everywhere");
    }
    info!(
        channels = notifier.channel_count(),
        failed = failed.len(),
        status = summary.analysis.credits.status.as_label(),
        "Run finished"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command.unwrap_or(Commands::Report) {
        Commands::Report => report(!cli.no_notify).await?,
        Commands::Init => {
            ensure_initialized()?;
            println!(
                "Initialized credit-meter config at {}",
                config::config_path()?.display()
            );
        }
        Commands::SetSecret { name, value } => {
            let secret = Secret::parse(&name)?;
            set_secret(secret, &value)?;
            println!("Secret '{}' stored.", secret.key_name());
        }
        Commands::Check => {
            ensure_initialized()?;
            let cfg = load_config()?;
            for secret in Secret::ALL {
                let state = if get_secret(secret).is_some() {
                    "configured"
                } else {
                    "missing"
                };
                println!("{:<24} {}", secret.key_name(), state);
            }

            let today = Utc::now().date_naive();
            let svc = BillingService::new()?;
            let source = svc.cost_source(&cfg, today)?;
            source.check_connection(today).await?;
            println!("Cost Explorer reachable in {}", cfg.billing.region);
        }
        Commands::Export { format: raw } => {
            let export = parse_export_format(&raw)?;
            ensure_initialized()?;
            let cfg = load_config()?;
            let today = Utc::now().date_naive();
            let svc = BillingService::new()?;
            let source = svc.cost_source(&cfg, today)?;
            let analysis = analyze(&source, &cfg, today, Utc::now()).await?;

            let opts = render_options(&cfg);
            let out = match export {
                ExportFormat::Json => serde_json::to_string_pretty(&analysis)?,
                ExportFormat::Text => format(
                    &analysis.report,
                    &analysis.credits,
                    &opts,
                    Destination::Console,
                )?,
                ExportFormat::Slack => format(
                    &analysis.report,
                    &analysis.credits,
                    &opts,
                    Destination::Slack,
                )?,
            };
            println!("{out}");
        }
    }

    Ok(())
}
