use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

/// Environment variable holding the slow-handler threshold in milliseconds.
pub const SLOW_HANDLER_ENV: &str = "CACHE_EVENTS_SLOW_HANDLER_MS";

const DEFAULT_SLOW_HANDLER: Duration = Duration::from_millis(250);

/// Dispatcher tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Synchronous handlers running longer than this are logged at `warn`.
    /// `None` disables the check.
    pub slow_handler_threshold: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            slow_handler_threshold: Some(DEFAULT_SLOW_HANDLER),
        }
    }
}

impl DispatcherConfig {
    /// Load configuration from environment variables.
    ///
    /// `CACHE_EVENTS_SLOW_HANDLER_MS` sets the slow-handler threshold; `0`
    /// disables it. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(raw) = env::var(SLOW_HANDLER_ENV) {
            let millis: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("{SLOW_HANDLER_ENV} must be a number of milliseconds"))?;
            config.slow_handler_threshold = (millis > 0).then(|| Duration::from_millis(millis));
        }

        Ok(config)
    }

    /// Set the slow-handler threshold.
    pub fn with_slow_handler_threshold(mut self, threshold: Duration) -> Self {
        self.slow_handler_threshold = Some(threshold);
        self
    }

    /// Disable slow-handler warnings.
    pub fn without_slow_handler_warnings(mut self) -> Self {
        self.slow_handler_threshold = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_threshold() {
        let config = DispatcherConfig::default();
        assert_eq!(config.slow_handler_threshold, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_builder_setters() {
        let config = DispatcherConfig::default().with_slow_handler_threshold(Duration::from_secs(1));
        assert_eq!(config.slow_handler_threshold, Some(Duration::from_secs(1)));

        let config = config.without_slow_handler_warnings();
        assert_eq!(config.slow_handler_threshold, None);
    }

    // Single test touches the variable so parallel tests don't race on it.
    #[test]
    fn test_from_env() {
        env::set_var(SLOW_HANDLER_ENV, "40");
        let config = DispatcherConfig::from_env().unwrap();
        assert_eq!(config.slow_handler_threshold, Some(Duration::from_millis(40)));

        env::set_var(SLOW_HANDLER_ENV, "0");
        let config = DispatcherConfig::from_env().unwrap();
        assert_eq!(config.slow_handler_threshold, None);

        env::set_var(SLOW_HANDLER_ENV, "soon");
        let err = DispatcherConfig::from_env().unwrap_err();
        assert!(err.to_string().contains(SLOW_HANDLER_ENV));

        env::remove_var(SLOW_HANDLER_ENV);
        let config = DispatcherConfig::from_env().unwrap();
        assert_eq!(config, DispatcherConfig::default());
    }
}
