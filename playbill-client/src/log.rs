//! Diagnostics: `tracing` events, mirrored to the merchant's log sink in debug mode.

use std::sync::Arc;

use playbill_lib::MerchantBackend;

/// Tag passed to [`MerchantBackend::log`].
pub const LOG_TAG: &str = "playbill";

/// Logger shared by every component of the client.
#[derive(Clone)]
pub struct BillingLog {
    debug: bool,
    sink: Arc<dyn MerchantBackend>,
}

impl BillingLog {
    /// Create a logger forwarding to `sink` when `debug` is set.
    pub fn new(debug: bool, sink: Arc<dyn MerchantBackend>) -> Self {
        Self { debug, sink }
    }

    /// Whether debug forwarding is on.
    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Diagnostic message.
    pub fn debug(&self, message: &str) {
        tracing::debug!(target: "playbill", "{}", message);
        self.forward(message);
    }

    /// Something went wrong but the client carries on.
    pub fn warn(&self, message: &str) {
        tracing::warn!(target: "playbill", "{}", message);
        self.forward(message);
    }

    fn forward(&self, message: &str) {
        if self.debug {
            self.sink.log(LOG_TAG, message);
        }
    }
}

impl std::fmt::Debug for BillingLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillingLog")
            .field("debug", &self.debug)
            .finish()
    }
}
