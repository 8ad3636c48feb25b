//! Foreground-driven reconciliation trigger.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use playbill_lib::ScreenId;
use tokio::time::Instant;

use crate::config::BillingConfig;

/// Rate limiter deciding when a resume should trigger reconciliation.
///
/// Registered screens fire at most once per `interval`; the general app-resume
/// signal fires at most once per `debounce`. Both share one timestamp.
#[derive(Debug)]
pub struct RefreshTrigger {
    interval: Duration,
    debounce: Duration,
    screens: HashSet<ScreenId>,
    last_refresh: Mutex<Option<Instant>>,
}

impl RefreshTrigger {
    /// Create a trigger.
    pub fn new(
        interval: Duration,
        debounce: Duration,
        screens: impl IntoIterator<Item = ScreenId>,
    ) -> Self {
        Self {
            interval,
            debounce,
            screens: screens.into_iter().collect(),
            last_refresh: Mutex::new(None),
        }
    }

    /// Trigger configured from `config`.
    pub fn from_config(config: &BillingConfig) -> Self {
        Self::new(
            config.refresh_interval(),
            config.resume_debounce(),
            config.refresh_screens.iter().cloned(),
        )
    }

    /// A screen came to the foreground. Returns true if reconciliation should run.
    pub fn on_screen_resumed(&self, screen: &ScreenId) -> bool {
        self.screens.contains(screen) && self.fire_after(self.interval)
    }

    /// The app came to the foreground. Returns true if reconciliation should run.
    pub fn on_app_resumed(&self) -> bool {
        self.fire_after(self.debounce)
    }

    fn fire_after(&self, min_gap: Duration) -> bool {
        let now = Instant::now();
        let mut last = self.last_refresh.lock().unwrap_or_else(|e| e.into_inner());
        match *last {
            Some(at) if now.duration_since(at) <= min_gap => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn trigger() -> RefreshTrigger {
        RefreshTrigger::from_config(&BillingConfig::default().with_refresh_screen("store"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_screen_resume_interval() {
        let trigger = trigger();
        let store = ScreenId::new("store");

        assert!(trigger.on_screen_resumed(&store));
        advance(Duration::from_secs(10)).await;
        assert!(!trigger.on_screen_resumed(&store));
        advance(Duration::from_secs(6)).await;
        assert!(trigger.on_screen_resumed(&store));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregistered_screen_never_fires() {
        let trigger = trigger();
        assert!(!trigger.on_screen_resumed(&ScreenId::new("settings")));
        // The timestamp was not consumed.
        assert!(trigger.on_app_resumed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_app_resume_debounce() {
        let trigger = trigger();
        assert!(trigger.on_app_resumed());
        advance(Duration::from_millis(1_500)).await;
        assert!(!trigger.on_app_resumed());
        advance(Duration::from_millis(600)).await;
        assert!(trigger.on_app_resumed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_timestamp() {
        let trigger = trigger();
        assert!(trigger.on_app_resumed());
        advance(Duration::from_secs(5)).await;
        // App resume reset the clock, so the 15s screen interval has not elapsed.
        assert!(!trigger.on_screen_resumed(&ScreenId::new("store")));
    }
}
