//! Configuration validation
//!
//! Runs after parsing and before anything is constructed, so a bad config
//! fails fast with a message naming the offending field.

use crate::config::types::Config;
use crate::ConfigError;
use url::Url;

/// Validates a parsed configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.crawler.min_concurrency == 0 {
        return Err(ConfigError::Validation(
            "min-concurrency must be at least 1".to_string(),
        ));
    }

    if config.crawler.max_concurrency < config.crawler.min_concurrency {
        return Err(ConfigError::Validation(format!(
            "max-concurrency ({}) must not be below min-concurrency ({})",
            config.crawler.max_concurrency, config.crawler.min_concurrency
        )));
    }

    if config.crawler.internal_retries == 0 {
        return Err(ConfigError::Validation(
            "internal-retries must be at least 1".to_string(),
        ));
    }

    if config.crawler.navigation_timeout_ms == 0 || config.crawler.handler_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "navigation-timeout-ms and handler-timeout-ms must be non-zero".to_string(),
        ));
    }

    if !(config.scaling.max_error_ratio > 0.0 && config.scaling.max_error_ratio <= 1.0) {
        return Err(ConfigError::Validation(format!(
            "max-error-ratio must be in (0, 1], got {}",
            config.scaling.max_error_ratio
        )));
    }

    if config.session_pool.enabled {
        if config.session_pool.max_pool_size == 0 {
            return Err(ConfigError::Validation(
                "max-pool-size must be at least 1 when the session pool is enabled".to_string(),
            ));
        }
        if config.session_pool.max_session_usage == 0 {
            return Err(ConfigError::Validation(
                "max-session-usage must be at least 1".to_string(),
            ));
        }
        for code in &config.session_pool.blocked_status_codes {
            if !(100..=599).contains(code) {
                return Err(ConfigError::Validation(format!(
                    "blocked-status-codes contains invalid status {code}"
                )));
            }
        }
    }

    for url in &config.proxy.urls {
        Url::parse(url).map_err(|_| ConfigError::InvalidUrl(url.clone()))?;
    }

    for url in &config.seeds.urls {
        Url::parse(url).map_err(|_| ConfigError::InvalidUrl(url.clone()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        toml::from_str("").unwrap()
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_zero_min_concurrency_rejected() {
        let mut config = valid_config();
        config.crawler.min_concurrency = 0;
        assert!(matches!(
            validate(&config),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_max_below_min_rejected() {
        let mut config = valid_config();
        config.crawler.min_concurrency = 10;
        config.crawler.max_concurrency = 5;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_bad_error_ratio_rejected() {
        let mut config = valid_config();
        config.scaling.max_error_ratio = 0.0;
        assert!(validate(&config).is_err());

        config.scaling.max_error_ratio = 1.5;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_invalid_blocked_status_rejected() {
        let mut config = valid_config();
        config.session_pool.blocked_status_codes = vec![7];
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_disabled_pool_skips_pool_checks() {
        let mut config = valid_config();
        config.session_pool.enabled = false;
        config.session_pool.max_pool_size = 0;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_seed_url_rejected() {
        let mut config = valid_config();
        config.seeds.urls = vec!["not a url".to_string()];
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_invalid_proxy_url_rejected() {
        let mut config = valid_config();
        config.proxy.urls = vec!["not a proxy".to_string()];
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidUrl(_))
        ));
    }
}
