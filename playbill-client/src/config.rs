//! Client configuration.

use std::time::Duration;

use playbill_lib::{BillingError, ScreenId};
use serde::{Deserialize, Serialize};

/// How subscription launches relate to subscriptions the user already owns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionMode {
    /// The user holds at most one subscription; any new one replaces it.
    #[default]
    Single,
    /// Subscriptions are independent; replacement only within a product id.
    Multi,
}

/// Configuration for [`crate::BillingClient`]. Set once before first use.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Forward diagnostics to the merchant backend's log sink.
    #[serde(default)]
    pub debug: bool,

    /// Subscription replacement policy.
    #[serde(default)]
    pub subscription_mode: SubscriptionMode,

    /// Whether the subscription family is used at all.
    #[serde(default = "default_true")]
    pub subscriptions_enabled: bool,

    /// Minimum time between screen-resume reconciliations, in seconds.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Debounce for the general app-resume signal, in milliseconds.
    #[serde(default = "default_resume_debounce")]
    pub resume_debounce_ms: u64,

    /// Screens that trigger reconciliation when resumed.
    #[serde(default)]
    pub refresh_screens: Vec<ScreenId>,

    /// Connection attempts before giving up until the next explicit start.
    #[serde(default = "default_max_connect_attempts")]
    pub max_connect_attempts: u32,

    /// Delay between connection attempts, in milliseconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Event bus buffer size. Oldest events are dropped for lagging subscribers.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_true() -> bool {
    true
}

fn default_refresh_interval() -> u64 {
    15
}

fn default_resume_debounce() -> u64 {
    2_000
}

fn default_max_connect_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    2_000
}

fn default_event_capacity() -> usize {
    100
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            debug: false,
            subscription_mode: SubscriptionMode::default(),
            subscriptions_enabled: default_true(),
            refresh_interval_secs: default_refresh_interval(),
            resume_debounce_ms: default_resume_debounce(),
            refresh_screens: Vec::new(),
            max_connect_attempts: default_max_connect_attempts(),
            retry_delay_ms: default_retry_delay(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl BillingConfig {
    /// Parse a JSON configuration. Missing fields take their defaults.
    pub fn from_json(json: &str) -> playbill_lib::Result<Self> {
        serde_json::from_str(json).map_err(|e| BillingError::DeveloperError(e.to_string()))
    }

    /// Reject configurations the client cannot run with.
    pub fn validate(&self) -> playbill_lib::Result<()> {
        if self.max_connect_attempts == 0 {
            return Err(BillingError::DeveloperError(
                "max_connect_attempts must be at least 1".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(BillingError::DeveloperError(
                "event_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Enable or disable debug forwarding.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set the subscription policy.
    pub fn with_subscription_mode(mut self, mode: SubscriptionMode) -> Self {
        self.subscription_mode = mode;
        self
    }

    /// Turn subscription support on or off.
    pub fn with_subscriptions_enabled(mut self, enabled: bool) -> Self {
        self.subscriptions_enabled = enabled;
        self
    }

    /// Set the screen-resume refresh interval.
    pub fn with_refresh_interval(mut self, secs: u64) -> Self {
        self.refresh_interval_secs = secs;
        self
    }

    /// Register a screen that triggers reconciliation on resume.
    pub fn with_refresh_screen(mut self, screen: impl Into<ScreenId>) -> Self {
        self.refresh_screens.push(screen.into());
        self
    }

    /// Set the connection retry bound.
    pub fn with_max_connect_attempts(mut self, attempts: u32) -> Self {
        self.max_connect_attempts = attempts;
        self
    }

    /// Set the delay between connection attempts.
    pub fn with_retry_delay_ms(mut self, ms: u64) -> Self {
        self.retry_delay_ms = ms;
        self
    }

    /// Set the event bus capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Screen-resume refresh interval.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// App-resume debounce.
    pub fn resume_debounce(&self) -> Duration {
        Duration::from_millis(self.resume_debounce_ms)
    }

    /// Delay between connection attempts.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BillingConfig::default();
        assert_eq!(config.refresh_interval(), Duration::from_secs(15));
        assert_eq!(config.resume_debounce(), Duration::from_secs(2));
        assert_eq!(config.retry_delay(), Duration::from_secs(2));
        assert_eq!(config.max_connect_attempts, 3);
        assert_eq!(config.event_capacity, 100);
        assert_eq!(config.subscription_mode, SubscriptionMode::Single);
        assert!(config.subscriptions_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = BillingConfig::from_json(
            r#"{"debug":true,"subscription_mode":"multi","refresh_screens":["store"]}"#,
        )
        .unwrap();
        assert!(config.debug);
        assert_eq!(config.subscription_mode, SubscriptionMode::Multi);
        assert_eq!(config.refresh_screens, vec![ScreenId::new("store")]);
        assert_eq!(config.refresh_interval_secs, 15);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let err = BillingConfig::from_json("not json").unwrap_err();
        assert!(matches!(err, BillingError::DeveloperError(_)));
    }

    #[test]
    fn test_validate_rejects_zero_bounds() {
        assert!(BillingConfig::default()
            .with_max_connect_attempts(0)
            .validate()
            .is_err());
        assert!(BillingConfig::default()
            .with_event_capacity(0)
            .validate()
            .is_err());
    }
}
