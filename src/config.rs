//! Configuration from environment variables.
//!
//! Provider sections are optional: each one is enabled by its anchor
//! variable (`SMTP_HOST`, `EMAIL_API_URL`, `TWILIO_ACCOUNT_SID`) and then
//! requires its credentials.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::pipeline::DEFAULT_ACKNOWLEDGEMENT;
use crate::router::{HttpEmailConfig, SmtpConfig, TwilioConfig};

/// Where conversations and the allow-list are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    Memory,
    File(PathBuf),
}

/// A provider's config plus its routing attributes.
#[derive(Debug, Clone)]
pub struct ProviderSettings<T> {
    pub name: String,
    pub config: T,
    /// Lower is preferred.
    pub priority: u32,
    pub tags: Vec<String>,
    pub domains: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub storage: StorageConfig,
    /// Automated replies per conversation per window.
    pub rate_limit: u32,
    pub rate_window: Duration,
    pub cleanup_interval: Duration,
    pub acknowledgement: String,
    pub smtp: Option<ProviderSettings<SmtpConfig>>,
    pub email_api: Option<ProviderSettings<HttpEmailConfig>>,
    pub twilio: Option<ProviderSettings<TwilioConfig>>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let bind_addr = env.parse_or("SWITCHBOARD_BIND", SocketAddr::from(([0, 0, 0, 0], 8080)))?;
        let storage = match env.get("SWITCHBOARD_DB_PATH").as_deref() {
            Some(":memory:") => StorageConfig::Memory,
            Some(path) => StorageConfig::File(PathBuf::from(path)),
            None => StorageConfig::File(PathBuf::from("./data/switchboard.db")),
        };

        let rate_limit: u32 = env.parse_or("SWITCHBOARD_RATE_LIMIT", 5)?;
        if rate_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SWITCHBOARD_RATE_LIMIT".into(),
                message: "must be at least 1".into(),
            });
        }
        let rate_window = Duration::from_secs(env.parse_or("SWITCHBOARD_RATE_WINDOW_SECS", 3600)?);
        let cleanup_interval = Duration::from_secs(env.parse_or("SWITCHBOARD_CLEANUP_INTERVAL_SECS", 300)?);
        let acknowledgement = env
            .get("SWITCHBOARD_ACK_MESSAGE")
            .unwrap_or_else(|| DEFAULT_ACKNOWLEDGEMENT.to_string());

        Ok(Self {
            bind_addr,
            storage,
            rate_limit,
            rate_window,
            cleanup_interval,
            acknowledgement,
            smtp: smtp_section(&env)?,
            email_api: email_api_section(&env)?,
            twilio: twilio_section(&env)?,
        })
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn require(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn secret(&self, key: &str) -> Result<SecretString, ConfigError> {
        self.require(key).map(SecretString::from)
    }

    /// Parsed value, `default` when unset, an error when malformed.
    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
        }
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn settings<T>(&self, prefix: &str, default_name: &str, default_priority: u32, config: T) -> Result<ProviderSettings<T>, ConfigError> {
        Ok(ProviderSettings {
            name: self.get(&format!("{prefix}_NAME")).unwrap_or_else(|| default_name.to_string()),
            config,
            priority: self.parse_or(&format!("{prefix}_PRIORITY"), default_priority)?,
            tags: self.list(&format!("{prefix}_TAGS")),
            domains: self.list(&format!("{prefix}_DOMAINS")),
        })
    }
}

fn smtp_section<F: Fn(&str) -> Option<String>>(env: &Env<'_, F>) -> Result<Option<ProviderSettings<SmtpConfig>>, ConfigError> {
    let Some(host) = env.get("SMTP_HOST") else {
        return Ok(None);
    };
    let username = env.require("SMTP_USERNAME")?;
    let config = SmtpConfig {
        host,
        port: env.parse_or("SMTP_PORT", 587)?,
        password: env.secret("SMTP_PASSWORD")?,
        from_address: env.get("SMTP_FROM").unwrap_or_else(|| username.clone()),
        username,
        timeout: Duration::from_secs(env.parse_or("SMTP_TIMEOUT_SECS", 30)?),
    };
    env.settings("SMTP", "smtp", 1, config).map(Some)
}

fn email_api_section<F: Fn(&str) -> Option<String>>(
    env: &Env<'_, F>,
) -> Result<Option<ProviderSettings<HttpEmailConfig>>, ConfigError> {
    let Some(endpoint) = env.get("EMAIL_API_URL") else {
        return Ok(None);
    };
    let config = HttpEmailConfig {
        endpoint,
        api_key: env.secret("EMAIL_API_KEY")?,
        from_address: env.require("EMAIL_API_FROM")?,
        timeout: Duration::from_secs(env.parse_or("EMAIL_API_TIMEOUT_SECS", 15)?),
    };
    env.settings("EMAIL_API", "email_api", 2, config).map(Some)
}

fn twilio_section<F: Fn(&str) -> Option<String>>(
    env: &Env<'_, F>,
) -> Result<Option<ProviderSettings<TwilioConfig>>, ConfigError> {
    let Some(account_sid) = env.get("TWILIO_ACCOUNT_SID") else {
        return Ok(None);
    };
    let mut config = TwilioConfig::new(
        account_sid,
        env.secret("TWILIO_AUTH_TOKEN")?,
        env.require("TWILIO_FROM_NUMBER")?,
    );
    if let Some(base) = env.get("TWILIO_API_BASE") {
        config.api_base = base;
    }
    config.timeout = Duration::from_secs(env.parse_or("TWILIO_TIMEOUT_SECS", 15)?);
    env.settings("TWILIO", "twilio", 1, config).map(Some)
}
