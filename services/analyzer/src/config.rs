//! services/analyzer/src/config.rs
//!
//! Defines the analyzer's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

use intent_core::DEFAULT_SESSION_TIMEOUT_MINUTES;

const DEFAULT_CLASSIFIER_MODEL: &str = "gpt-4o-mini";
const DEFAULT_MAX_CONCURRENCY: usize = 2;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BASE_BACKOFF_MS: u64 = 500;
const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u32 = 60;
const DEFAULT_RATE_LIMIT_WINDOW_SECONDS: u64 = 60;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub log_level: Level,
    pub openai_api_key: String,
    pub openai_base_url: Option<String>,
    pub classifier_model: String,
    pub recommendation_model: String,
    pub session_timeout_minutes: u32,
    pub max_concurrency: usize,
    pub classifier_max_attempts: u32,
    pub retry_base_backoff: Duration,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window: Duration,
    pub analysis_deadline: Option<Duration>,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let log_level_str = get("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Classification Service ---
        let openai_api_key =
            get("OPENAI_API_KEY").ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;
        let openai_base_url = get("OPENAI_BASE_URL");
        let classifier_model =
            get("CLASSIFIER_MODEL").unwrap_or_else(|| DEFAULT_CLASSIFIER_MODEL.to_string());
        let recommendation_model =
            get("RECOMMENDATION_MODEL").unwrap_or_else(|| classifier_model.clone());

        // --- Pipeline Settings ---
        let session_timeout_minutes = parse_positive(
            "SESSION_TIMEOUT_MINUTES",
            get("SESSION_TIMEOUT_MINUTES"),
            DEFAULT_SESSION_TIMEOUT_MINUTES,
        )?;
        let max_concurrency =
            parse_positive("MAX_CONCURRENCY", get("MAX_CONCURRENCY"), DEFAULT_MAX_CONCURRENCY)?;
        let classifier_max_attempts = parse_positive(
            "CLASSIFIER_MAX_ATTEMPTS",
            get("CLASSIFIER_MAX_ATTEMPTS"),
            DEFAULT_MAX_ATTEMPTS,
        )?;
        let retry_base_backoff_ms: u64 = parse_value(
            "CLASSIFIER_RETRY_BASE_BACKOFF_MS",
            get("CLASSIFIER_RETRY_BASE_BACKOFF_MS"),
            DEFAULT_RETRY_BASE_BACKOFF_MS,
        )?;

        // --- Rate Limiting ---
        let rate_limit_max_requests = parse_positive(
            "RATE_LIMIT_MAX_REQUESTS",
            get("RATE_LIMIT_MAX_REQUESTS"),
            DEFAULT_RATE_LIMIT_MAX_REQUESTS,
        )?;
        let rate_limit_window_seconds = parse_positive(
            "RATE_LIMIT_WINDOW_SECONDS",
            get("RATE_LIMIT_WINDOW_SECONDS"),
            DEFAULT_RATE_LIMIT_WINDOW_SECONDS,
        )?;

        let analysis_deadline = match get("ANALYSIS_DEADLINE_SECONDS") {
            Some(raw) => Some(Duration::from_secs(parse_positive(
                "ANALYSIS_DEADLINE_SECONDS",
                Some(raw),
                0u64,
            )?)),
            None => None,
        };

        Ok(Self {
            log_level,
            openai_api_key,
            openai_base_url,
            classifier_model,
            recommendation_model,
            session_timeout_minutes,
            max_concurrency,
            classifier_max_attempts,
            retry_base_backoff: Duration::from_millis(retry_base_backoff_ms),
            rate_limit_max_requests,
            rate_limit_window: Duration::from_secs(rate_limit_window_seconds),
            analysis_deadline,
        })
    }

    /// Overrides the session timeout, rejecting zero like the env loader does.
    pub fn with_session_timeout_minutes(mut self, minutes: u32) -> Result<Self, ConfigError> {
        if minutes == 0 {
            return Err(ConfigError::InvalidValue(
                "SESSION_TIMEOUT_MINUTES".to_string(),
                "must be greater than 0".to_string(),
            ));
        }
        self.session_timeout_minutes = minutes;
        Ok(self)
    }
}

fn parse_value<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), format!("'{}' is not a valid number", value))),
        None => Ok(default),
    }
}

fn parse_positive<T>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    let value = parse_value(key, raw, default)?;
    if value <= T::default() {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be greater than 0".to_string(),
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_the_key_is_set() {
        let config = Config::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-test")])).unwrap();
        assert_eq!(config.session_timeout_minutes, 30);
        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.classifier_max_attempts, 3);
        assert_eq!(config.classifier_model, "gpt-4o-mini");
        assert_eq!(config.recommendation_model, "gpt-4o-mini");
        assert_eq!(config.retry_base_backoff, Duration::from_millis(500));
        assert_eq!(config.rate_limit_window, Duration::from_secs(60));
        assert_eq!(config.analysis_deadline, None);
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    fn missing_credential_fails_fast() {
        let err = Config::from_lookup(lookup(&[("SESSION_TIMEOUT_MINUTES", "30")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(ref key) if key == "OPENAI_API_KEY"));

        let err = Config::from_lookup(lookup(&[("OPENAI_API_KEY", "   ")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(_)));
    }

    #[test]
    fn malformed_timeout_is_rejected() {
        for bad in ["thirty", "-5", "0", "1.5"] {
            let err = Config::from_lookup(lookup(&[
                ("OPENAI_API_KEY", "sk-test"),
                ("SESSION_TIMEOUT_MINUTES", bad),
            ]))
            .unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue(ref key, _) if key == "SESSION_TIMEOUT_MINUTES"),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn overrides_are_read() {
        let config = Config::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("SESSION_TIMEOUT_MINUTES", "45"),
            ("MAX_CONCURRENCY", "4"),
            ("ANALYSIS_DEADLINE_SECONDS", "600"),
            ("OPENAI_BASE_URL", "http://localhost:8080/v1"),
            ("RUST_LOG", "debug"),
            ("RECOMMENDATION_MODEL", "gpt-4o"),
        ]))
        .unwrap();
        assert_eq!(config.session_timeout_minutes, 45);
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.analysis_deadline, Some(Duration::from_secs(600)));
        assert_eq!(config.openai_base_url.as_deref(), Some("http://localhost:8080/v1"));
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.recommendation_model, "gpt-4o");

        let config = config.with_session_timeout_minutes(10).unwrap();
        assert_eq!(config.session_timeout_minutes, 10);
        assert!(config.with_session_timeout_minutes(0).is_err());
    }
}
