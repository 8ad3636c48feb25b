//! Live vs offline service selection.

use playbill_lib::BillingChannel;

/// Which service implementation answers requests for the current connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ServiceVariant {
    /// Store services present: requests go to the billing channel.
    #[default]
    Live,
    /// Store services missing: launches report `BillingUnavailable` and queries
    /// come back empty.
    Offline,
}

impl ServiceVariant {
    /// Probe the platform once and pick a variant.
    pub async fn probe(channel: &dyn BillingChannel) -> Self {
        if channel.is_platform_available().await {
            Self::Live
        } else {
            Self::Offline
        }
    }

    /// Whether requests should reach the billing channel.
    pub fn is_live(self) -> bool {
        self == Self::Live
    }
}
