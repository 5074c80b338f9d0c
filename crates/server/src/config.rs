//! Application configuration loaded from environment variables.

use std::{str::FromStr, time::Duration};

use dispatcher::{DispatcherConfig, JanitorConfig, RetryPolicy};
use notifications::{NotificationConfig, PushConfig, parse_templates};
use thiserror::Error;

/// A malformed environment variable.
#[derive(Debug, Error)]
#[error("invalid value for {var}: {value:?} ({reason})")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT` bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG` tracing filter directive (default `info`), `LOG_FORMAT` `text` or `json`
/// - `DATABASE_URL` PostgreSQL URL; absent means in-memory stores
/// - `DATABASE_MAX_CONNECTIONS` pool size (default 10)
/// - `DISPATCHER_*` worker count, poll interval, retry budget, lease and handler timeout
/// - `OUTBOX_RETENTION_DAYS` age at which completed events are purged (default 30)
/// - `PAYMENT_TIMEOUT_MINUTES` unpaid orders older than this are timed out (default 30)
/// - `PUSH_*` push provider endpoint, credentials, template table and timeout
/// - `NOTIFY_*` ingestion queue and retry scan settings
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub dispatcher: DispatcherConfig,
    pub janitor: JanitorConfig,
    pub payment_timeout: Duration,
    pub payment_sweep_interval: Duration,
    pub push: PushConfig,
    pub notifications: NotificationConfig,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup, falling back to
    /// defaults for missing keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = Config::default();

        let dispatcher = DispatcherConfig {
            workers: env.parse("DISPATCHER_WORKERS", defaults.dispatcher.workers)?,
            poll_interval: env.nonzero_millis(
                "DISPATCHER_POLL_INTERVAL_MS",
                defaults.dispatcher.poll_interval,
            )?,
            lease: env.secs("DISPATCHER_LEASE_SECS", defaults.dispatcher.lease)?,
            handler_timeout: env.secs(
                "DISPATCHER_HANDLER_TIMEOUT_SECS",
                defaults.dispatcher.handler_timeout,
            )?,
            retry: RetryPolicy {
                max_retries: env.parse("DISPATCHER_MAX_RETRIES", defaults.dispatcher.retry.max_retries)?,
                ..defaults.dispatcher.retry
            },
            ..defaults.dispatcher
        };
        if dispatcher.lease <= dispatcher.handler_timeout {
            return Err(ConfigError {
                var: "DISPATCHER_LEASE_SECS",
                value: dispatcher.lease.as_secs().to_string(),
                reason: format!(
                    "must exceed the handler timeout of {}s",
                    dispatcher.handler_timeout.as_secs()
                ),
            });
        }

        let janitor = JanitorConfig {
            retention: env.scaled_secs("OUTBOX_RETENTION_DAYS", defaults.janitor.retention, 86_400)?,
            ..defaults.janitor
        };

        let push = PushConfig {
            api_url: env.string("PUSH_API_URL", defaults.push.api_url),
            app_id: env.string("PUSH_APP_ID", defaults.push.app_id),
            app_secret: env.string("PUSH_APP_SECRET", defaults.push.app_secret),
            timeout: env.secs("PUSH_TIMEOUT_SECS", defaults.push.timeout)?,
            ..defaults.push
        };

        let templates = match env.get("PUSH_TEMPLATES") {
            Some(raw) => parse_templates(&raw).map_err(|e| ConfigError {
                var: "PUSH_TEMPLATES",
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => defaults.notifications.templates,
        };
        let notifications = NotificationConfig {
            templates,
            queue_capacity: env.parse("NOTIFY_QUEUE_CAPACITY", defaults.notifications.queue_capacity)?,
            batch_size: env.parse("NOTIFY_BATCH_SIZE", defaults.notifications.batch_size)?,
            flush_interval: env.nonzero_millis(
                "NOTIFY_FLUSH_INTERVAL_MS",
                defaults.notifications.flush_interval,
            )?,
            retry_interval: env.nonzero_secs(
                "NOTIFY_RETRY_INTERVAL_SECS",
                defaults.notifications.retry_interval,
            )?,
            retry_cooldown: env.secs(
                "NOTIFY_RETRY_COOLDOWN_SECS",
                defaults.notifications.retry_cooldown,
            )?,
            max_retries: env.parse("NOTIFY_MAX_RETRIES", defaults.notifications.max_retries)?,
            ..defaults.notifications
        };

        Ok(Self {
            host: env.string("HOST", defaults.host),
            port: env.parse("PORT", defaults.port)?,
            log_level: env.string("RUST_LOG", defaults.log_level),
            log_format: env.parse("LOG_FORMAT", defaults.log_format)?,
            database_url: env.get("DATABASE_URL").filter(|url| !url.is_empty()),
            database_max_connections: env.parse(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            dispatcher,
            janitor,
            payment_timeout: env.scaled_secs("PAYMENT_TIMEOUT_MINUTES", defaults.payment_timeout, 60)?,
            payment_sweep_interval: env.nonzero_secs(
                "PAYMENT_SWEEP_INTERVAL_SECS",
                defaults.payment_sweep_interval,
            )?,
            push,
            notifications,
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            database_max_connections: 10,
            dispatcher: DispatcherConfig::default(),
            janitor: JanitorConfig::default(),
            payment_timeout: Duration::from_secs(30 * 60),
            payment_sweep_interval: Duration::from_secs(60),
            push: PushConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, var: &str) -> Option<String> {
        (self.0)(var)
    }

    fn string(&self, var: &str, default: String) -> String {
        self.get(var).unwrap_or(default)
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: ToString,
    {
        match self.get(var) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError {
                var,
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn secs(&self, var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse(var, default.as_secs()).map(Duration::from_secs)
    }

    fn nonzero_secs(&self, var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        nonzero(var, self.secs(var, default)?)
    }

    fn nonzero_millis(&self, var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        let millis = self.parse(var, default.as_millis() as u64)?;
        nonzero(var, Duration::from_millis(millis))
    }

    /// Parses a count of `unit`-second periods, such as days or minutes.
    fn scaled_secs(
        &self,
        var: &'static str,
        default: Duration,
        unit: u64,
    ) -> Result<Duration, ConfigError> {
        let count: u64 = self.parse(var, default.as_secs() / unit)?;
        count
            .checked_mul(unit)
            .map(Duration::from_secs)
            .ok_or_else(|| ConfigError {
                var,
                value: count.to_string(),
                reason: "too large".to_string(),
            })
    }
}

fn nonzero(var: &'static str, duration: Duration) -> Result<Duration, ConfigError> {
    if duration.is_zero() {
        return Err(ConfigError {
            var,
            value: "0".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use notifications::MessageType;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = load(&[]).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
        assert_eq!(config.payment_timeout, Duration::from_secs(1800));
        assert_eq!(config.janitor.retention, Duration::from_secs(30 * 86_400));
        assert_eq!(config.notifications.max_retries, 3);
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Default::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = load(&[
            ("PORT", "8081"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/orders"),
            ("DISPATCHER_WORKERS", "8"),
            ("DISPATCHER_POLL_INTERVAL_MS", "250"),
            ("DISPATCHER_MAX_RETRIES", "5"),
            ("DISPATCHER_LEASE_SECS", "60"),
            ("OUTBOX_RETENTION_DAYS", "7"),
            ("PAYMENT_TIMEOUT_MINUTES", "15"),
            ("PUSH_APP_ID", "wx123"),
            ("PUSH_TEMPLATES", "ORDER_PAID=tmpl-paid,order_created=tmpl-created"),
            ("NOTIFY_BATCH_SIZE", "20"),
            ("NOTIFY_FLUSH_INTERVAL_MS", "500"),
        ])
        .unwrap();

        assert_eq!(config.port, 8081);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/orders"));
        assert_eq!(config.dispatcher.workers, 8);
        assert_eq!(config.dispatcher.poll_interval, Duration::from_millis(250));
        assert_eq!(config.dispatcher.retry.max_retries, 5);
        assert_eq!(config.dispatcher.lease, Duration::from_secs(60));
        assert_eq!(config.janitor.retention, Duration::from_secs(7 * 86_400));
        assert_eq!(config.payment_timeout, Duration::from_secs(900));
        assert_eq!(config.push.app_id, "wx123");
        assert_eq!(
            config.notifications.template_id(MessageType::OrderPaid).unwrap(),
            "tmpl-paid"
        );
        assert_eq!(
            config.notifications.template_id(MessageType::OrderCreated).unwrap(),
            "tmpl-created"
        );
        assert_eq!(config.notifications.batch_size, 20);
        assert_eq!(config.notifications.flush_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_malformed_values_are_rejected() {
        let err = load(&[("PORT", "eighty")]).unwrap_err();
        assert_eq!(err.var, "PORT");
        assert_eq!(err.value, "eighty");

        let err = load(&[("PUSH_TEMPLATES", "NOT_A_TYPE=x")]).unwrap_err();
        assert_eq!(err.var, "PUSH_TEMPLATES");

        assert!(load(&[("LOG_FORMAT", "xml")]).is_err());
    }

    #[test]
    fn test_zero_intervals_are_rejected() {
        for var in [
            "NOTIFY_FLUSH_INTERVAL_MS",
            "NOTIFY_RETRY_INTERVAL_SECS",
            "PAYMENT_SWEEP_INTERVAL_SECS",
            "DISPATCHER_POLL_INTERVAL_MS",
        ] {
            let err = load(&[(var, "0")]).unwrap_err();
            assert_eq!(err.var, var);
        }
    }

    #[test]
    fn test_overflowing_periods_are_rejected() {
        let huge = u64::MAX.to_string();
        let err = load(&[("OUTBOX_RETENTION_DAYS", huge.as_str())]).unwrap_err();
        assert_eq!(err.var, "OUTBOX_RETENTION_DAYS");

        let err = load(&[("PAYMENT_TIMEOUT_MINUTES", huge.as_str())]).unwrap_err();
        assert_eq!(err.var, "PAYMENT_TIMEOUT_MINUTES");
    }

    #[test]
    fn test_lease_must_outlast_handler_timeout() {
        let err = load(&[
            ("DISPATCHER_LEASE_SECS", "30"),
            ("DISPATCHER_HANDLER_TIMEOUT_SECS", "30"),
        ])
        .unwrap_err();
        assert_eq!(err.var, "DISPATCHER_LEASE_SECS");

        let config = load(&[
            ("DISPATCHER_LEASE_SECS", "31"),
            ("DISPATCHER_HANDLER_TIMEOUT_SECS", "30"),
        ])
        .unwrap();
        assert_eq!(config.dispatcher.lease, Duration::from_secs(31));
    }

    #[test]
    fn test_empty_database_url_means_in_memory() {
        let config = load(&[("DATABASE_URL", "")]).unwrap();
        assert!(config.database_url.is_none());
    }
}
