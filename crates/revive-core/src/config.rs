use anyhow::{Context, Result};
use chrono::Weekday;
use chrono_tz::Tz;
use std::str::FromStr;

use crate::business_hours::{parse_days, BusinessWindow};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,

    pub openai_api_url: String,
    pub openai_api_key: Option<String>,
    /// Used when the primary key is rejected
    pub openai_fallback_api_key: Option<String>,
    pub openai_default_model: String,

    pub gateway_api_url: String,
    pub gateway_api_key: String,

    pub poll_interval_secs: u64,
    pub max_items_per_tick: i64,
    pub item_pause_ms: u64,

    pub min_operational_credits: i64,
    pub low_credit_alert_threshold: i64,
    pub notification_cooldown_mins: i64,

    pub stale_item_hours: i64,
    pub orphan_lookback_hours: i64,
    pub claim_lease_secs: i64,

    pub business_hours_start: u32,
    pub business_hours_end: u32,
    pub business_days: Vec<Weekday>,
    pub default_timezone: Tz,

    pub http_port: u16,

    pub llm_timeout_secs: u64,
    pub gateway_timeout_secs: u64,
    pub run_poll_max_attempts: u32,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(name: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var_or(name, default)
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("{} is invalid: {}", name, e))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let default_timezone = var_or("DEFAULT_TIMEZONE", "America/Sao_Paulo");

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,

            openai_api_url: var_or("OPENAI_API_URL", "https://api.openai.com/v1"),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            openai_fallback_api_key: std::env::var("OPENAI_FALLBACK_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            openai_default_model: var_or("OPENAI_DEFAULT_MODEL", "gpt-4o-mini"),

            gateway_api_url: std::env::var("GATEWAY_API_URL")
                .context("GATEWAY_API_URL must be set")?,
            gateway_api_key: std::env::var("GATEWAY_API_KEY")
                .context("GATEWAY_API_KEY must be set")?,

            poll_interval_secs: parse_var("POLL_INTERVAL_SECS", "60")?,
            max_items_per_tick: parse_var("MAX_ITEMS_PER_TICK", "50")?,
            item_pause_ms: parse_var("ITEM_PAUSE_MS", "2000")?,

            min_operational_credits: parse_var("MIN_OPERATIONAL_CREDITS", "10")?,
            low_credit_alert_threshold: parse_var("LOW_CREDIT_ALERT_THRESHOLD", "100")?,
            notification_cooldown_mins: parse_var("NOTIFICATION_COOLDOWN_MINS", "60")?,

            stale_item_hours: parse_var("STALE_ITEM_HOURS", "6")?,
            orphan_lookback_hours: parse_var("ORPHAN_LOOKBACK_HOURS", "24")?,
            claim_lease_secs: parse_var("CLAIM_LEASE_SECS", "300")?,

            business_hours_start: parse_var("BUSINESS_HOURS_START", "8")?,
            business_hours_end: parse_var("BUSINESS_HOURS_END", "18")?,
            business_days: parse_days(&var_or("BUSINESS_DAYS", "mon-fri"))
                .context("BUSINESS_DAYS is invalid")?,
            default_timezone: default_timezone
                .parse()
                .map_err(|e| anyhow::anyhow!("DEFAULT_TIMEZONE is invalid: {}", e))?,

            http_port: std::env::var("HTTP_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .context("HTTP_PORT must be a valid port number")?,

            llm_timeout_secs: parse_var("LLM_TIMEOUT_SECS", "30")?,
            gateway_timeout_secs: parse_var("GATEWAY_TIMEOUT_SECS", "20")?,
            run_poll_max_attempts: parse_var("RUN_POLL_MAX_ATTEMPTS", "30")?,
        })
    }

    pub fn business_window(&self) -> Result<BusinessWindow> {
        BusinessWindow::new(
            self.business_hours_start,
            self.business_hours_end,
            self.business_days.clone(),
        )
    }
}
