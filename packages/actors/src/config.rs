//! Worker and pool configuration.
//!
//! Every config has a `Default` with production values and a `from_env`
//! constructor. `from_lookup` takes any key lookup so parsing can be tested
//! without touching the process environment.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Budget generation worker settings.
#[derive(Debug, Clone)]
pub struct BudgetWorkerConfig {
    /// Sleep when the queue is empty
    pub idle_interval: Duration,
    /// Sleep after a loop-level error
    pub error_backoff: Duration,
    /// Upper bound on one job attempt
    pub job_timeout: Duration,
    /// Ownership lease taken on claim and renewed by heartbeat
    pub lease_duration: Duration,
    /// Emit `budget_processing` notifications
    pub notify_processing: bool,
    /// Prefix of the budget link sent to users
    pub budget_link_base: String,
}

impl Default for BudgetWorkerConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
            job_timeout: Duration::from_secs(300),
            lease_duration: Duration::from_secs(120),
            notify_processing: false,
            budget_link_base: "/budgets".to_string(),
        }
    }
}

impl BudgetWorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            job_timeout: secs_or(&lookup, "JOB_TIMEOUT_SECS", defaults.job_timeout)?,
            lease_duration: secs_or(&lookup, "JOB_LEASE_SECS", defaults.lease_duration)?,
            notify_processing: parse_or(&lookup, "NOTIFY_PROCESSING", defaults.notify_processing)?,
            budget_link_base: lookup("BUDGET_LINK_BASE").unwrap_or(defaults.budget_link_base),
            ..defaults
        })
    }

    /// Link to a budget for notifications.
    pub fn budget_link(&self, budget_id: &str) -> String {
        format!("{}/{}", self.budget_link_base.trim_end_matches('/'), budget_id)
    }

    /// How often a running job renews its lease.
    pub fn heartbeat_interval(&self) -> Duration {
        (self.lease_duration / 3).max(Duration::from_millis(100))
    }
}

/// Notification worker settings.
#[derive(Debug, Clone)]
pub struct NotificationWorkerConfig {
    /// Notifications claimed per cycle
    pub batch_size: usize,
    /// Sleep between cycles
    pub poll_interval: Duration,
    /// Sleep after a loop-level error
    pub error_backoff: Duration,
    /// Delivery attempts before a notification is abandoned
    pub max_delivery_attempts: u32,
    /// Claims older than this are considered crashed and released
    pub stale_processing_after: Duration,
}

impl Default for NotificationWorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval: Duration::from_secs(2),
            error_backoff: Duration::from_secs(5),
            max_delivery_attempts: 5,
            stale_processing_after: Duration::from_secs(300),
        }
    }
}

impl NotificationWorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let max_delivery_attempts: u32 =
            parse_or(&lookup, "NOTIFICATION_MAX_ATTEMPTS", defaults.max_delivery_attempts)?;
        if max_delivery_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "NOTIFICATION_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }
        Ok(Self {
            max_delivery_attempts,
            ..defaults
        })
    }
}

/// Worker pool settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Budget workers started by default
    pub budget_worker_count: usize,
    /// Start the notification worker by default
    pub enable_notifications: bool,
    /// Period of the queue cleanup
    pub cleanup_interval: Duration,
    /// Terminal jobs older than this are removed by cleanup
    pub job_retention: Duration,
    /// Period of the lease reaper
    pub maintenance_interval: Duration,
    /// How long `stop` waits for in-flight work per worker
    pub shutdown_grace: Duration,
    pub budget_worker: BudgetWorkerConfig,
    pub notification_worker: NotificationWorkerConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            budget_worker_count: 2,
            enable_notifications: true,
            cleanup_interval: Duration::from_secs(3600),
            job_retention: Duration::from_secs(168 * 3600),
            maintenance_interval: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(30),
            budget_worker: BudgetWorkerConfig::default(),
            notification_worker: NotificationWorkerConfig::default(),
        }
    }
}

impl PoolConfig {
    /// Create a new config builder
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let retention_hours: u64 = parse_or(
            &lookup,
            "JOB_RETENTION_HOURS",
            defaults.job_retention.as_secs() / 3600,
        )?;

        Ok(Self {
            budget_worker_count: parse_or(&lookup, "BUDGET_WORKER_COUNT", defaults.budget_worker_count)?,
            enable_notifications: parse_or(
                &lookup,
                "ENABLE_NOTIFICATION_WORKER",
                defaults.enable_notifications,
            )?,
            cleanup_interval: secs_or(&lookup, "QUEUE_CLEANUP_INTERVAL_SECS", defaults.cleanup_interval)?,
            job_retention: Duration::from_secs(retention_hours * 3600),
            maintenance_interval: secs_or(&lookup, "MAINTENANCE_INTERVAL_SECS", defaults.maintenance_interval)?,
            shutdown_grace: secs_or(&lookup, "WORKER_SHUTDOWN_GRACE_SECS", defaults.shutdown_grace)?,
            budget_worker: BudgetWorkerConfig::from_lookup(&lookup)?,
            notification_worker: NotificationWorkerConfig::from_lookup(&lookup)?,
        })
    }

    /// Start options matching this config's worker counts.
    pub fn start_options(&self) -> StartOptions {
        StartOptions {
            budget_worker_count: self.budget_worker_count,
            enable_notifications: self.enable_notifications,
        }
    }
}

/// Builder for PoolConfig
#[derive(Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    pub fn budget_worker_count(mut self, count: usize) -> Self {
        self.config.budget_worker_count = count;
        self
    }

    pub fn enable_notifications(mut self, enable: bool) -> Self {
        self.config.enable_notifications = enable;
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.config.cleanup_interval = interval;
        self
    }

    pub fn job_retention(mut self, retention: Duration) -> Self {
        self.config.job_retention = retention;
        self
    }

    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.config.maintenance_interval = interval;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    pub fn budget_worker(mut self, config: BudgetWorkerConfig) -> Self {
        self.config.budget_worker = config;
        self
    }

    pub fn notification_worker(mut self, config: NotificationWorkerConfig) -> Self {
        self.config.notification_worker = config;
        self
    }

    /// Build the config
    pub fn build(self) -> PoolConfig {
        self.config
    }
}

/// Arguments of [`WorkerPool::start`](crate::WorkerPool::start).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOptions {
    pub budget_worker_count: usize,
    pub enable_notifications: bool,
}

impl Default for StartOptions {
    fn default() -> Self {
        PoolConfig::default().start_options()
    }
}

/// SMTP settings. Email is disabled when `SMTP_HOST` is unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// Implicit TLS when true, plain connection otherwise
    pub secure: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

impl SmtpConfig {
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>, ConfigError> {
        let Some(host) = lookup("SMTP_HOST").filter(|h| !h.trim().is_empty()) else {
            return Ok(None);
        };
        let secure = parse_or(&lookup, "SMTP_SECURE", false)?;
        let default_port = if secure { 465 } else { 587 };

        Ok(Some(Self {
            port: parse_or(&lookup, "SMTP_PORT", default_port)?,
            secure,
            username: lookup("SMTP_USER"),
            password: lookup("SMTP_PASS"),
            from: lookup("SMTP_FROM").unwrap_or_else(|| format!("no-reply@{host}")),
            host,
        }))
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn secs_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    parse_or(lookup, key, default.as_secs()).map(Duration::from_secs)
}
