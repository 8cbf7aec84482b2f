//! Configuration types.

use std::time::Duration;

use secrecy::SecretString;

/// Engine configuration driving the tick orchestrator and sequencer.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Whether outreach email sending is enabled at all.
    pub email_enabled: bool,
    /// Outbound email rate cap, per hour. Prorated to the tick interval.
    pub email_rate_per_hour: u32,
    /// Maximum prospects discovered in a single tick.
    pub max_prospects_per_tick: usize,
    /// Seconds between orchestrator ticks (used to prorate the rate cap).
    pub tick_interval_secs: u64,
    /// How long an unreplied email stays quiet before the next sequence step.
    pub followup_interval: Duration,
    /// City used for prospect discovery prompts.
    pub discovery_city: String,
    /// Prospects sitting in `discovered` longer than this trigger an alert.
    pub stale_prospect_threshold: Duration,
    /// Sites stuck in `generating` longer than this trigger an alert.
    pub stuck_site_threshold: Duration,
    /// Bounces in the last 24h at or above this count trigger an alert.
    pub bounce_alert_threshold: u32,
    /// Error activity events in the last 24h at or above this count trigger an alert.
    pub error_alert_threshold: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            email_enabled: true,
            email_rate_per_hour: 10,
            max_prospects_per_tick: 5,
            tick_interval_secs: 3600, // 1 hour
            followup_interval: Duration::from_secs(72 * 3600), // 3 days
            discovery_city: "Austin".to_string(),
            stale_prospect_threshold: Duration::from_secs(7 * 24 * 3600),
            stuck_site_threshold: Duration::from_secs(30 * 60),
            bounce_alert_threshold: 3,
            error_alert_threshold: 10,
        }
    }
}

impl AgentConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            email_enabled: env_parse("VENDORA_EMAIL_ENABLED", defaults.email_enabled),
            email_rate_per_hour: env_parse("VENDORA_EMAIL_RATE_PER_HOUR", defaults.email_rate_per_hour),
            max_prospects_per_tick: env_parse(
                "VENDORA_MAX_PROSPECTS_PER_TICK",
                defaults.max_prospects_per_tick,
            ),
            tick_interval_secs: env_parse("VENDORA_TICK_INTERVAL_SECS", defaults.tick_interval_secs),
            followup_interval: Duration::from_secs(env_parse(
                "VENDORA_FOLLOWUP_INTERVAL_SECS",
                defaults.followup_interval.as_secs(),
            )),
            discovery_city: std::env::var("VENDORA_DISCOVERY_CITY")
                .unwrap_or(defaults.discovery_city),
            ..defaults
        }
    }

    /// Maximum sends for a single sequencer pass: the hourly rate prorated
    /// to the tick interval, truncated, never below 1 while sending is on.
    pub fn sends_per_tick(&self) -> usize {
        if !self.email_enabled || self.email_rate_per_hour == 0 {
            return 0;
        }
        let prorated = (self.email_rate_per_hour as u64 * self.tick_interval_secs) / 3600;
        (prorated as usize).max(1)
    }
}

/// SMTP configuration for the outbound email channel.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
    /// When set, every outbound email is redirected to this address
    /// (the intended recipient is preserved in a subject tag).
    pub sandbox_redirect: Option<String>,
}

impl EmailConfig {
    /// Build config from environment variables.
    /// Returns `None` if `VENDORA_SMTP_HOST` is not set (sending disabled).
    pub fn from_env() -> Option<Self> {
        let smtp_host = std::env::var("VENDORA_SMTP_HOST").ok()?;

        let smtp_port: u16 = std::env::var("VENDORA_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("VENDORA_SMTP_USERNAME").unwrap_or_default();
        let password = std::env::var("VENDORA_SMTP_PASSWORD").unwrap_or_default();
        let from_address =
            std::env::var("VENDORA_FROM_ADDRESS").unwrap_or_else(|_| username.clone());

        let sandbox_redirect = std::env::var("VENDORA_SANDBOX_REDIRECT")
            .ok()
            .filter(|s| !s.trim().is_empty());

        Some(Self {
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
            sandbox_redirect,
        })
    }
}

/// Deployment platform configuration.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    /// Base URL of the deployment platform API.
    pub api_base: String,
    pub api_token: SecretString,
}

impl DeployConfig {
    /// Returns `None` if `VENDORA_DEPLOY_TOKEN` is not set (deploys disabled).
    pub fn from_env() -> Option<Self> {
        let api_token = std::env::var("VENDORA_DEPLOY_TOKEN").ok()?;
        let api_base = std::env::var("VENDORA_DEPLOY_API_BASE")
            .unwrap_or_else(|_| "https://api.vercel.com".to_string());
        Some(Self {
            api_base,
            api_token: SecretString::from(api_token),
        })
    }
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
