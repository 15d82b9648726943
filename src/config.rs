use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    /// Upper bound on riders offered a single order.
    pub candidate_limit: usize,
    pub candidate_radius_km: f64,
    pub offer_ttl: Duration,
    pub connection_buffer: usize,
    pub background_concurrency: usize,
    pub sweep_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8080,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            candidate_limit: 10,
            candidate_radius_km: 10.0,
            offer_ttl: Duration::from_secs(30 * 60),
            connection_buffer: 64,
            background_concurrency: 16,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let log_format = match env::var("LOG_FORMAT") {
            Ok(raw) if raw.eq_ignore_ascii_case("json") => LogFormat::Json,
            Ok(raw) if raw.eq_ignore_ascii_case("compact") => LogFormat::Compact,
            Ok(raw) => {
                return Err(AppError::Internal(format!(
                    "invalid LOG_FORMAT: {raw}, expected json/compact"
                )));
            }
            Err(_) => defaults.log_format,
        };

        let config = Self {
            http_port: env_or("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format,
            candidate_limit: env_or("CANDIDATE_LIMIT", defaults.candidate_limit)?,
            candidate_radius_km: env_or(
                "CANDIDATE_RADIUS_KM",
                defaults.candidate_radius_km,
            )?,
            offer_ttl: env_secs("OFFER_TTL_SECS", defaults.offer_ttl)?,
            connection_buffer: env_or("CONNECTION_BUFFER", defaults.connection_buffer)?,
            background_concurrency: env_or(
                "BACKGROUND_CONCURRENCY",
                defaults.background_concurrency,
            )?,
            sweep_interval: env_secs("SWEEP_INTERVAL_SECS", defaults.sweep_interval)?,
        };

        if config.connection_buffer == 0 || config.background_concurrency == 0 {
            return Err(AppError::Internal(
                "CONNECTION_BUFFER and BACKGROUND_CONCURRENCY must be > 0".to_string(),
            ));
        }
        if config.sweep_interval.is_zero() {
            return Err(AppError::Internal("SWEEP_INTERVAL_SECS must be > 0".to_string()));
        }

        Ok(config)
    }
}

/// Reads `key` from the environment, falling back to `default` when unset.
fn env_or<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let Ok(raw) = env::var(key) else {
        return Ok(default);
    };
    raw.trim()
        .parse()
        .map_err(|err| AppError::Internal(format!("invalid {key}: {err} (got {raw:?})")))
}

fn env_secs(key: &str, default: Duration) -> Result<Duration, AppError> {
    env_or(key, default.as_secs()).map(Duration::from_secs)
}
