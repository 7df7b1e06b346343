//! Configuration management for the relay host.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Values that fail to parse fall back to their defaults. Nothing is
//! re-read after startup.

use request_relay_core::QueueNames;
use request_relay_runtime::{ProcessorConfig, RetryPolicy};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Which pipeline stages this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// HTTP intake and processor workers in one process
    #[default]
    All,
    /// HTTP intake only
    Intake,
    /// Processor workers only
    Processor,
}

impl Role {
    /// Whether this role serves the HTTP intake.
    pub const fn runs_intake(self) -> bool {
        matches!(self, Self::All | Self::Intake)
    }

    /// Whether this role runs processor workers.
    pub const fn runs_processor(self) -> bool {
        matches!(self, Self::All | Self::Processor)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "intake" => Ok(Self::Intake),
            "processor" => Ok(Self::Processor),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::All => "all",
            Self::Intake => "intake",
            Self::Processor => "processor",
        })
    }
}

/// HTTP and metrics listener configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind the intake listener to
    pub host: String,
    /// Port for the intake listener
    pub port: u16,
    /// Host to bind the metrics listener to
    pub metrics_host: String,
    /// Port for the metrics listener
    pub metrics_port: u16,
    /// Whether to install the Prometheus recorder and serve `/metrics`
    pub metrics_enabled: bool,
    /// How long to wait for workers and listeners to stop
    pub shutdown_timeout: Duration,
}

/// Queue transport configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `PostgreSQL` URL; `None` selects the in-memory transport
    pub url: Option<String>,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Stages this process runs
    pub role: Role,
    /// Listener configuration
    pub server: ServerConfig,
    /// Transport configuration
    pub database: DatabaseConfig,
    /// Bound on a single intake enqueue
    pub enqueue_timeout: Duration,
    /// Processor tuning, including both queue names
    pub processor: ProcessorConfig,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Call `dotenvy::dotenv()` first to pick up a `.env` file.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns the raw value of
    /// a variable if it is set.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let vars = Vars(lookup);

        let role = match vars.raw("RELAY_ROLE") {
            Some(raw) => raw.parse().unwrap_or_else(|err| {
                tracing::warn!(error = %err, "Invalid RELAY_ROLE, running all stages");
                Role::All
            }),
            None => Role::All,
        };

        let retry = RetryPolicy::builder()
            .max_retries(vars.parsed("RETRY_MAX_RETRIES", 3))
            .initial_delay(vars.millis("RETRY_INITIAL_DELAY_MS", 100))
            .max_delay(vars.millis("RETRY_MAX_DELAY_MS", 10_000))
            .multiplier(vars.parsed("RETRY_MULTIPLIER", 2.0))
            .build();

        let defaults = QueueNames::default();
        let queues = QueueNames {
            open: vars.string("REQUEST_OPEN_QUEUE", &defaults.open),
            processed: vars.string("REQUEST_PROCESSED_QUEUE", &defaults.processed),
        };

        Self {
            role,
            server: ServerConfig {
                host: vars.string("HOST", "0.0.0.0"),
                port: vars.parsed("PORT", 7071),
                metrics_host: vars.string("METRICS_HOST", "0.0.0.0"),
                metrics_port: vars.parsed("METRICS_PORT", 9090),
                metrics_enabled: vars.parsed("METRICS_ENABLED", true),
                shutdown_timeout: vars.secs("SHUTDOWN_TIMEOUT", 10),
            },
            database: DatabaseConfig {
                url: vars.raw("DATABASE_URL").filter(|url| !url.trim().is_empty()),
                max_connections: vars.parsed("DATABASE_MAX_CONNECTIONS", 10),
            },
            enqueue_timeout: vars.millis("ENQUEUE_TIMEOUT_MS", 5000),
            processor: ProcessorConfig {
                queues,
                visibility_timeout: vars.secs("VISIBILITY_TIMEOUT_SECS", 30),
                max_delivery_attempts: vars.parsed("MAX_DELIVERY_ATTEMPTS", 5),
                poll_interval: vars.millis("POLL_INTERVAL_MS", 1000),
                operation_timeout: vars.millis("QUEUE_OPERATION_TIMEOUT_MS", 5000),
                retry,
                memo_capacity: vars.parsed("RESULT_MEMO_CAPACITY", 1024),
                concurrency: vars.parsed("PROCESSOR_CONCURRENCY", 1),
            },
        }
    }

    /// Database URL with credentials removed, for logging.
    #[must_use]
    pub fn redacted_database_url(&self) -> Option<&str> {
        self.database
            .url
            .as_deref()
            .map(|url| url.rsplit('@').next().unwrap_or(url))
    }
}

/// Typed access to raw variables; unparsable values yield the default.
struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn raw(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.raw(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T: FromStr>(&self, key: &str, default: T) -> T {
        self.raw(key)
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(default)
    }

    fn millis(&self, key: &str, default: u64) -> Duration {
        Duration::from_millis(self.parsed(key, default))
    }

    fn secs(&self, key: &str, default: u64) -> Duration {
        Duration::from_secs(self.parsed(key, default))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = config_from(&[]);

        assert_eq!(config.role, Role::All);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 7071);
        assert_eq!(config.server.metrics_port, 9090);
        assert!(config.server.metrics_enabled);
        assert_eq!(config.server.shutdown_timeout, Duration::from_secs(10));
        assert!(config.database.url.is_none());
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.enqueue_timeout, Duration::from_secs(5));

        let processor = &config.processor;
        assert_eq!(processor.queues.open, "request_open");
        assert_eq!(processor.queues.processed, "request_processed");
        assert_eq!(processor.visibility_timeout, Duration::from_secs(30));
        assert_eq!(processor.max_delivery_attempts, 5);
        assert_eq!(processor.poll_interval, Duration::from_secs(1));
        assert_eq!(processor.operation_timeout, Duration::from_secs(5));
        assert_eq!(processor.memo_capacity, 1024);
        assert_eq!(processor.concurrency, 1);
        assert_eq!(processor.retry.max_retries, 3);
        assert_eq!(processor.retry.initial_delay, Duration::from_millis(100));
        assert_eq!(processor.retry.max_delay, Duration::from_secs(10));
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("RELAY_ROLE", "Processor"),
            ("PORT", "8080"),
            ("METRICS_ENABLED", "false"),
            ("DATABASE_URL", "postgres://user:secret@db:5432/relay"),
            ("REQUEST_OPEN_QUEUE", "open-q"),
            ("REQUEST_PROCESSED_QUEUE", "done-q"),
            ("VISIBILITY_TIMEOUT_SECS", "60"),
            ("MAX_DELIVERY_ATTEMPTS", "3"),
            ("PROCESSOR_CONCURRENCY", "4"),
            ("QUEUE_OPERATION_TIMEOUT_MS", "250"),
            ("RETRY_MULTIPLIER", "3.5"),
        ]);

        assert_eq!(config.role, Role::Processor);
        assert_eq!(config.server.port, 8080);
        assert!(!config.server.metrics_enabled);
        assert_eq!(config.redacted_database_url(), Some("db:5432/relay"));
        assert_eq!(config.processor.queues.open, "open-q");
        assert_eq!(config.processor.queues.processed, "done-q");
        assert_eq!(config.processor.visibility_timeout, Duration::from_secs(60));
        assert_eq!(config.processor.max_delivery_attempts, 3);
        assert_eq!(config.processor.concurrency, 4);
        assert_eq!(config.processor.operation_timeout, Duration::from_millis(250));
        assert!((config.processor.retry.multiplier - 3.5).abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let config = config_from(&[
            ("RELAY_ROLE", "everything"),
            ("PORT", "not-a-port"),
            ("MAX_DELIVERY_ATTEMPTS", "-1"),
            ("ENQUEUE_TIMEOUT_MS", "soon"),
            ("DATABASE_URL", "   "),
        ]);

        assert_eq!(config.role, Role::All);
        assert_eq!(config.server.port, 7071);
        assert_eq!(config.processor.max_delivery_attempts, 5);
        assert_eq!(config.enqueue_timeout, Duration::from_secs(5));
        assert!(config.database.url.is_none());
    }

    #[test]
    fn roles_select_stages() {
        assert!(Role::All.runs_intake() && Role::All.runs_processor());
        assert!(Role::Intake.runs_intake() && !Role::Intake.runs_processor());
        assert!(!Role::Processor.runs_intake() && Role::Processor.runs_processor());
        assert_eq!("intake".parse::<Role>().unwrap(), Role::Intake);
        assert_eq!(Role::Processor.to_string(), "processor");
    }
}
