use crate::credits::CreditTerms;
use crate::error::AppError;
use crate::models::DateRange;
use crate::providers::LOOKBACK_LIMIT_DAYS;
use chrono::{Duration, NaiveDate};
use directories::ProjectDirs;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const SERVICE_NAME: &str = "credit-meter";

/// Days per "month" when a period or projection is expressed in months.
pub const DAYS_PER_MONTH: i64 = 30;

fn app_home_dir() -> Result<PathBuf, AppError> {
    if let Ok(custom) = std::env::var("CREDIT_METER_HOME") {
        return Ok(PathBuf::from(custom));
    }

    if let Some(dirs) = ProjectDirs::from("com", "credit-meter", SERVICE_NAME) {
        let candidate = dirs.data_local_dir().to_path_buf();
        if fs::create_dir_all(&candidate).is_ok() {
            return Ok(candidate);
        }
    }

    let cwd = std::env::current_dir()?;
    Ok(cwd.join(".credit-meter"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodType {
    Days,
    Months,
}

impl PeriodType {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw.trim() {
            "d" | "D" => Ok(PeriodType::Days),
            "m" | "M" => Ok(PeriodType::Months),
            other => Err(AppError::Config(format!(
                "Unsupported period type '{other}'. Use 'd' or 'm'."
            ))),
        }
    }

    pub fn unit_label(self, count: u32) -> &'static str {
        match (self, count) {
            (PeriodType::Days, 1) => "day",
            (PeriodType::Days, _) => "days",
            (PeriodType::Months, 1) => "month",
            (PeriodType::Months, _) => "months",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BillingConfig {
    pub period_type: String,
    pub period_count: u32,
    pub region: String,
    pub currency: String,
    pub min_cost_threshold: Decimal,
    pub endpoint: Option<String>,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            period_type: "m".into(),
            period_count: 1,
            region: "us-east-1".into(),
            currency: "USD".into(),
            min_cost_threshold: Decimal::new(1, 2),
            endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CreditConfig {
    /// Required. Total credits granted to the account.
    pub total_available: Option<Decimal>,
    /// Required. Credit usage the cost API can no longer see; `0` if none.
    pub manual_offset: Option<Decimal>,
    pub expiration_date: Option<NaiveDate>,
    pub burn_months: u32,
}

impl Default for CreditConfig {
    fn default() -> Self {
        Self {
            total_available: None,
            manual_offset: None,
            expiration_date: None,
            burn_months: 3,
        }
    }
}

impl CreditConfig {
    pub fn terms(&self) -> Result<CreditTerms, AppError> {
        let required = |field: &str| {
            AppError::Config(format!(
                "credits.{field} is required. Set it in {}.",
                config_path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|_| "config.toml".into())
            ))
        };
        Ok(CreditTerms {
            total_available: self
                .total_available
                .ok_or_else(|| required("total_available"))?,
            manual_offset: self.manual_offset.ok_or_else(|| required("manual_offset"))?,
            expiration_date: self.expiration_date,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotifyConfig {
    pub slack_enabled: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            slack_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub billing: BillingConfig,
    pub credits: CreditConfig,
    pub notify: NotifyConfig,
}

impl AppConfig {
    pub fn period_type(&self) -> Result<PeriodType, AppError> {
        PeriodType::parse(&self.billing.period_type)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        self.period_type()?;
        if self.billing.period_count == 0 {
            return Err(AppError::Config(
                "billing.period_count must be greater than zero.".into(),
            ));
        }
        let days = self.period_days()?;
        if days > LOOKBACK_LIMIT_DAYS {
            return Err(AppError::Config(format!(
                "A {days}-day billing period reaches past the {LOOKBACK_LIMIT_DAYS}-day cost history."
            )));
        }
        if self.credits.terms()?.total_available < Decimal::ZERO {
            return Err(AppError::Config(
                "credits.total_available must not be negative.".into(),
            ));
        }
        if self.credits.burn_months == 0 {
            return Err(AppError::Config(
                "credits.burn_months must be greater than zero.".into(),
            ));
        }
        if i64::from(self.credits.burn_months) * DAYS_PER_MONTH > LOOKBACK_LIMIT_DAYS {
            return Err(AppError::Config(format!(
                "credits.burn_months reaches past the {LOOKBACK_LIMIT_DAYS}-day cost history."
            )));
        }
        if self.billing.min_cost_threshold < Decimal::ZERO {
            return Err(AppError::Config(
                "billing.min_cost_threshold must not be negative.".into(),
            ));
        }
        if let Some(endpoint) = &self.billing.endpoint {
            url::Url::parse(endpoint).map_err(|e| {
                AppError::Config(format!("billing.endpoint '{endpoint}' is not a URL: {e}"))
            })?;
        }
        Ok(())
    }

    pub fn period_days(&self) -> Result<i64, AppError> {
        let count = i64::from(self.billing.period_count);
        Ok(match self.period_type()? {
            PeriodType::Days => count,
            PeriodType::Months => count * DAYS_PER_MONTH,
        })
    }

    /// Reporting window ending at `today` (exclusive).
    pub fn billing_period(&self, today: NaiveDate) -> Result<DateRange, AppError> {
        trailing_window(today, self.period_days()?)
    }

    /// Trailing window used for the burn-rate average.
    pub fn burn_window(&self, today: NaiveDate) -> Result<DateRange, AppError> {
        trailing_window(today, i64::from(self.credits.burn_months) * DAYS_PER_MONTH)
    }
}

fn trailing_window(today: NaiveDate, days: i64) -> Result<DateRange, AppError> {
    Duration::try_days(days)
        .and_then(|span| today.checked_sub_signed(span))
        .map(|start| DateRange::new(start, today))
        .ok_or_else(|| AppError::Config(format!("A {days}-day window before {today} is out of range.")))
}

pub fn config_dir() -> Result<PathBuf, AppError> {
    Ok(app_home_dir()?.join("config"))
}

pub fn config_path() -> Result<PathBuf, AppError> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn ensure_dirs() -> Result<(), AppError> {
    fs::create_dir_all(config_dir()?)?;
    Ok(())
}

fn normalize_config(config: &mut AppConfig) -> bool {
    let mut changed = false;

    let period_type = config.billing.period_type.trim().to_ascii_lowercase();
    if period_type != config.billing.period_type {
        config.billing.period_type = period_type;
        changed = true;
    }

    let currency = config.billing.currency.trim().to_ascii_uppercase();
    if currency != config.billing.currency {
        config.billing.currency = currency;
        changed = true;
    }

    let region = config.billing.region.trim().to_ascii_lowercase();
    if region != config.billing.region {
        config.billing.region = region;
        changed = true;
    }

    if let Some(endpoint) = &config.billing.endpoint {
        let trimmed = endpoint.trim().trim_end_matches('/').to_string();
        if trimmed.is_empty() {
            config.billing.endpoint = None;
            changed = true;
        } else if trimmed != *endpoint {
            config.billing.endpoint = Some(trimmed);
            changed = true;
        }
    }

    changed
}

pub fn load_config() -> Result<AppConfig, AppError> {
    let path = config_path()?;
    if !path.exists() {
        let defaults = AppConfig::default();
        defaults.validate()?;
        return Ok(defaults);
    }

    let raw = fs::read_to_string(&path)?;
    let mut parsed: AppConfig = toml::from_str(&raw)?;

    // Persist the normalized form so later reads see canonical values.
    if normalize_config(&mut parsed) {
        save_config(&parsed)?;
    }

    parsed.validate()?;
    Ok(parsed)
}

pub fn save_config(config: &AppConfig) -> Result<(), AppError> {
    ensure_dirs()?;
    let path = config_path()?;
    let raw = toml::to_string_pretty(config)?;
    fs::write(path, raw)?;
    Ok(())
}

/// Written by `init`. The `[credits]` figures are left for the user to fill in.
const CONFIG_TEMPLATE: &str = r#"[billing]
period_type = "m"
period_count = 1
region = "us-east-1"
currency = "USD"
min_cost_threshold = "0.01"
# endpoint = "https://ce.us-east-1.amazonaws.com"

[credits]
# Required: total credits granted to the account.
# total_available = "5000.00"
# Required: credit usage no longer visible in the cost API, "0" if none.
# manual_offset = "0"
# expiration_date = "2026-12-31"
burn_months = 3

[notify]
slack_enabled = true
"#;

pub fn ensure_initialized() -> Result<(), AppError> {
    ensure_dirs()?;
    let cfg_path = config_path()?;
    if !Path::new(&cfg_path).exists() {
        fs::write(&cfg_path, CONFIG_TEMPLATE)?;
    }
    Ok(())
}

/// Secrets kept out of the TOML file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Secret {
    AwsAccessKeyId,
    AwsSecretAccessKey,
    AwsSessionToken,
    SlackWebhookUrl,
}

impl Secret {
    pub const ALL: [Secret; 4] = [
        Secret::AwsAccessKeyId,
        Secret::AwsSecretAccessKey,
        Secret::AwsSessionToken,
        Secret::SlackWebhookUrl,
    ];

    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let normalized = raw.trim().to_ascii_lowercase().replace('_', "-");
        Secret::ALL
            .into_iter()
            .find(|s| s.key_name() == normalized)
            .ok_or_else(|| {
                AppError::Config(format!(
                    "Unknown secret '{raw}'. Use one of: {}.",
                    Secret::ALL.map(Secret::key_name).join(", ")
                ))
            })
    }

    pub fn key_name(self) -> &'static str {
        match self {
            Secret::AwsAccessKeyId => "aws-access-key-id",
            Secret::AwsSecretAccessKey => "aws-secret-access-key",
            Secret::AwsSessionToken => "aws-session-token",
            Secret::SlackWebhookUrl => "slack-webhook-url",
        }
    }

    pub fn env_name(self) -> &'static str {
        match self {
            Secret::AwsAccessKeyId => "AWS_ACCESS_KEY_ID",
            Secret::AwsSecretAccessKey => "AWS_SECRET_ACCESS_KEY",
            Secret::AwsSessionToken => "AWS_SESSION_TOKEN",
            Secret::SlackWebhookUrl => "SLACK_WEBHOOK_URL",
        }
    }
}

fn keyring_entry(secret: Secret) -> Result<keyring::Entry, AppError> {
    Ok(keyring::Entry::new(
        SERVICE_NAME,
        &format!("secret:{}", secret.key_name()),
    )?)
}

pub fn set_secret(secret: Secret, value: &str) -> Result<(), AppError> {
    keyring_entry(secret)?.set_password(value)?;
    Ok(())
}

/// Keyring first, then the conventional environment variable.
pub fn get_secret(secret: Secret) -> Option<String> {
    if let Ok(entry) = keyring_entry(secret) {
        if let Ok(value) = entry.get_password() {
            if !value.is_empty() {
                return Some(value);
            }
        }
    }

    std::env::var(secret.env_name())
        .ok()
        .filter(|value| !value.trim().is_empty())
}

#[derive(Debug, Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

pub fn load_aws_credentials() -> Result<AwsCredentials, AppError> {
    let missing = |secret: Secret| {
        AppError::Config(format!(
            "No {} found. Run `credit-meter set-secret {}` or set {}.",
            secret.key_name(),
            secret.key_name(),
            secret.env_name()
        ))
    };

    let access_key_id =
        get_secret(Secret::AwsAccessKeyId).ok_or_else(|| missing(Secret::AwsAccessKeyId))?;
    let secret_access_key = get_secret(Secret::AwsSecretAccessKey)
        .ok_or_else(|| missing(Secret::AwsSecretAccessKey))?;

    Ok(AwsCredentials {
        access_key_id,
        secret_access_key,
        session_token: get_secret(Secret::AwsSessionToken),
    })
}
