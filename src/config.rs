use std::{env, net::SocketAddr, path::PathBuf, time::Duration};

use thiserror::Error;

/// Process configuration, read once from the environment at startup.
///
/// Backend values (host, port, timeout, probe interval) describe the single
/// JSON-RPC backend this proxy forwards to; retry values tune the backoff
/// applied to read-only tool calls.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend_host: String,
    pub backend_port: u16,
    pub backend_timeout: Duration,
    pub probe_interval: Duration,
    pub retry_max_attempts: u32,
    pub retry_initial_delay: Duration,
    pub retry_max_delay: Duration,
    pub retry_backoff_factor: f64,
    pub bind_addr: String,
    pub bind_port: u16,
    pub definitions_path: Option<PathBuf>,
}

const DEFAULT_BACKEND_PORT: u16 = 30069;
const DEFAULT_BIND_PORT: u16 = 30070;
const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PROBE_INTERVAL_SECS: u64 = 5;
const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_INITIAL_DELAY_SECS: f64 = 0.5;
const DEFAULT_RETRY_MAX_DELAY_SECS: f64 = 5.0;
const DEFAULT_RETRY_BACKOFF_FACTOR: f64 = 2.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be a valid non-zero port number")]
    InvalidPort { name: &'static str },
    #[error("{name} must be a positive integer number of seconds")]
    InvalidDuration { name: &'static str },
    #[error("{name} must be a positive number")]
    InvalidNumber { name: &'static str },
    #[error("RETRY_MAX_ATTEMPTS must be a non-negative integer")]
    InvalidRetryAttempts,
    #[error("invalid bind address or port")]
    InvalidSocket,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend_host = env::var("BACKEND_HOST").unwrap_or_else(|_| "localhost".to_string());
        let backend_port = parse_port("BACKEND_PORT", DEFAULT_BACKEND_PORT)?;
        let backend_timeout = parse_duration_secs("BACKEND_TIMEOUT_SECS", DEFAULT_BACKEND_TIMEOUT_SECS)?;
        let probe_interval = parse_duration_secs("PROBE_INTERVAL_SECS", DEFAULT_PROBE_INTERVAL_SECS)?;

        let retry_max_attempts = env::var("RETRY_MAX_ATTEMPTS")
            .ok()
            .map(|value| value.parse::<u32>().map_err(|_| ConfigError::InvalidRetryAttempts))
            .transpose()?
            .unwrap_or(DEFAULT_RETRY_MAX_ATTEMPTS);

        let retry_initial_delay = Duration::from_secs_f64(parse_positive_f64(
            "RETRY_INITIAL_DELAY_SECS",
            DEFAULT_RETRY_INITIAL_DELAY_SECS,
        )?);
        let retry_max_delay = Duration::from_secs_f64(parse_positive_f64(
            "RETRY_MAX_DELAY_SECS",
            DEFAULT_RETRY_MAX_DELAY_SECS,
        )?);
        let retry_backoff_factor =
            parse_positive_f64("RETRY_BACKOFF_FACTOR", DEFAULT_RETRY_BACKOFF_FACTOR)?;

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
        let bind_port = parse_port("BIND_PORT", DEFAULT_BIND_PORT)?;

        let definitions_path = env::var("DEFINITIONS_PATH")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        let config = Self {
            backend_host,
            backend_port,
            backend_timeout,
            probe_interval,
            retry_max_attempts,
            retry_initial_delay,
            retry_max_delay,
            retry_backoff_factor,
            bind_addr,
            bind_port,
            definitions_path,
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }
}

fn parse_port(name: &'static str, default: u16) -> Result<u16, ConfigError> {
    env::var(name)
        .ok()
        .map(|value| {
            value
                .parse::<u16>()
                .ok()
                .filter(|port| *port > 0)
                .ok_or(ConfigError::InvalidPort { name })
        })
        .transpose()
        .map(|port| port.unwrap_or(default))
}

fn parse_duration_secs(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    env::var(name)
        .ok()
        .map(|value| {
            value
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::InvalidDuration { name })
        })
        .transpose()
        .map(|secs| Duration::from_secs(secs.unwrap_or(default)))
}

fn parse_positive_f64(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    env::var(name)
        .ok()
        .map(|value| {
            value
                .parse::<f64>()
                .ok()
                .filter(|number| number.is_finite() && *number > 0.0)
                .ok_or(ConfigError::InvalidNumber { name })
        })
        .transpose()
        .map(|number| number.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    // from_env reads process-global state; serialize the tests touching it.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ALL_VARS: &[&str] = &[
        "BACKEND_HOST",
        "BACKEND_PORT",
        "BACKEND_TIMEOUT_SECS",
        "PROBE_INTERVAL_SECS",
        "RETRY_MAX_ATTEMPTS",
        "RETRY_INITIAL_DELAY_SECS",
        "RETRY_MAX_DELAY_SECS",
        "RETRY_BACKOFF_FACTOR",
        "BIND_ADDR",
        "BIND_PORT",
        "DEFINITIONS_PATH",
    ];

    fn clear_env() {
        for name in ALL_VARS {
            env::remove_var(name);
        }
    }

    #[test]
    fn parse_defaults() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        clear_env();

        let config = Config::from_env().expect("config should parse");
        assert_eq!(config.backend_host, "localhost");
        assert_eq!(config.backend_port, 30069);
        assert_eq!(config.backend_timeout, Duration::from_secs(30));
        assert_eq!(config.probe_interval, Duration::from_secs(5));
        assert_eq!(config.retry_max_attempts, 3);
        assert_eq!(config.retry_initial_delay, Duration::from_secs_f64(0.5));
        assert_eq!(config.retry_max_delay, Duration::from_secs_f64(5.0));
        assert_eq!(config.retry_backoff_factor, 2.0);
        assert_eq!(config.bind_addr, "127.0.0.1");
        assert_eq!(config.bind_port, 30070);
        assert_eq!(config.definitions_path, None);
    }

    #[test]
    fn rejects_zero_backend_port() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        clear_env();
        env::set_var("BACKEND_PORT", "0");

        let err = Config::from_env().expect_err("expected invalid port error");
        assert!(matches!(err, ConfigError::InvalidPort { name: "BACKEND_PORT" }));
        clear_env();
    }

    #[test]
    fn rejects_non_numeric_timeout() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        clear_env();
        env::set_var("BACKEND_TIMEOUT_SECS", "soon");

        let err = Config::from_env().expect_err("expected invalid duration error");
        assert!(matches!(
            err,
            ConfigError::InvalidDuration {
                name: "BACKEND_TIMEOUT_SECS"
            }
        ));
        clear_env();
    }

    #[test]
    fn rejects_negative_retry_delay() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        clear_env();
        env::set_var("RETRY_INITIAL_DELAY_SECS", "-0.5");

        let err = Config::from_env().expect_err("expected invalid number error");
        assert!(matches!(
            err,
            ConfigError::InvalidNumber {
                name: "RETRY_INITIAL_DELAY_SECS"
            }
        ));
        clear_env();
    }

    #[test]
    fn reads_overrides_and_definitions_path() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        clear_env();
        env::set_var("BACKEND_HOST", "editor.internal");
        env::set_var("BACKEND_PORT", "40100");
        env::set_var("RETRY_MAX_ATTEMPTS", "0");
        env::set_var("DEFINITIONS_PATH", "/etc/proxy/catalog.json");

        let config = Config::from_env().expect("config should parse");
        assert_eq!(config.backend_host, "editor.internal");
        assert_eq!(config.backend_port, 40100);
        assert_eq!(config.retry_max_attempts, 0);
        assert_eq!(
            config.definitions_path,
            Some(PathBuf::from("/etc/proxy/catalog.json"))
        );
        clear_env();
    }
}
