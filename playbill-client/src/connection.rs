//! Connection lifecycle with bounded retry.
//!
//! A connect cycle runs on one spawned task: probe the platform, then try to
//! connect up to `max_connect_attempts` times with a fixed delay in between.
//! Only one cycle runs at a time; the `connecting` flag is claimed with a
//! compare-and-set and callers that lose the race are dropped silently.
//!
//! # Thread Safety
//!
//! State lives behind `RwLock`/atomics. Lock poisoning is recovered with
//! `into_inner`, since every write is a single assignment.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use playbill_lib::{BillingChannel, Feature};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};

use crate::config::BillingConfig;
use crate::log::BillingLog;
use crate::service::ServiceVariant;

/// Connection state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying.
    Disconnected,
    /// A connect cycle is running (including back-off sleeps).
    Connecting,
    /// Ready for requests.
    Connected,
    /// Retries exhausted or platform missing. Re-armed by the next explicit start.
    Unavailable,
}

/// Notifications the manager sends to the client's refresh worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionSignal {
    /// A connect cycle just succeeded.
    Connected,
    /// `start_connection` was called while already connected.
    Refresh,
}

/// Owns the connection to the billing channel.
pub struct ConnectionManager {
    channel: Arc<dyn BillingChannel>,
    state: RwLock<ConnectionState>,
    variant: RwLock<ServiceVariant>,
    connecting: AtomicBool,
    attempt: AtomicU32,
    product_details_api: AtomicBool,
    max_attempts: u32,
    retry_delay: Duration,
    cycle: Mutex<Option<AbortHandle>>,
    signals: mpsc::UnboundedSender<ConnectionSignal>,
    log: BillingLog,
}

impl ConnectionManager {
    /// Create a manager and the receiving end of its signal channel.
    pub fn new(
        channel: Arc<dyn BillingChannel>,
        config: &BillingConfig,
        log: BillingLog,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ConnectionSignal>) {
        let (signals, rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            channel,
            state: RwLock::new(ConnectionState::Disconnected),
            variant: RwLock::new(ServiceVariant::default()),
            connecting: AtomicBool::new(false),
            attempt: AtomicU32::new(1),
            product_details_api: AtomicBool::new(true),
            max_attempts: config.max_connect_attempts.max(1),
            retry_delay: config.retry_delay(),
            cycle: Mutex::new(None),
            signals,
            log,
        });
        (manager, rx)
    }

    /// Start a connect cycle.
    ///
    /// Returns `None` when already connected (a refresh is signalled instead)
    /// or when another cycle is in flight. Otherwise returns the cycle's task,
    /// which resolves to the final state.
    pub fn start_connection(self: &Arc<Self>) -> Option<JoinHandle<ConnectionState>> {
        if self.check_connected() {
            let _ = self.signals.send(ConnectionSignal::Refresh);
            return None;
        }
        if self
            .connecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(target: "playbill", "connect cycle already running");
            return None;
        }

        self.attempt.store(1, Ordering::SeqCst);
        self.set_state(ConnectionState::Connecting);

        let mut cycle = self.cycle.lock().unwrap_or_else(|e| e.into_inner());
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_cycle().await });
        *cycle = Some(handle.abort_handle());
        Some(handle)
    }

    /// Cancel any running cycle and close the connection.
    pub async fn end_connection(&self) {
        let cycle = self.cycle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(cycle) = cycle {
            cycle.abort();
        }
        self.connecting.store(false, Ordering::SeqCst);
        self.channel.end_connection().await;
        self.set_state(ConnectionState::Disconnected);
        self.log.debug("billing connection closed");
    }

    /// The service dropped the connection on its own: reset and reconnect.
    pub fn handle_disconnect(self: &Arc<Self>) -> Option<JoinHandle<ConnectionState>> {
        self.attempt.store(1, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);
        self.log.debug("billing service disconnected, reconnecting");
        self.start_connection()
    }

    /// Whether the connection is established and the channel reports ready.
    pub fn check_connected(&self) -> bool {
        self.state() == ConnectionState::Connected && self.channel.is_ready()
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Current attempt counter (1-based).
    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::SeqCst)
    }

    /// Service variant selected by the last platform probe.
    pub fn variant(&self) -> ServiceVariant {
        *self.variant.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the modern product-details API is supported on this connection.
    pub fn uses_product_details_api(&self) -> bool {
        self.product_details_api.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn end_cycle(&self, state: ConnectionState) -> ConnectionState {
        self.set_state(state);
        self.connecting.store(false, Ordering::SeqCst);
        state
    }

    async fn run_cycle(&self) -> ConnectionState {
        let variant = ServiceVariant::probe(self.channel.as_ref()).await;
        *self.variant.write().unwrap_or_else(|e| e.into_inner()) = variant;
        if !variant.is_live() {
            self.log
                .warn("billing platform unavailable, switching to offline service");
            return self.end_cycle(ConnectionState::Unavailable);
        }

        loop {
            let attempt = self.attempt();
            tracing::debug!(target: "playbill", attempt, "connecting to billing service");

            let response = self.channel.connect().await;
            if response.is_ok() {
                self.attempt.store(1, Ordering::SeqCst);
                let details_api = self
                    .channel
                    .is_feature_supported(Feature::ProductDetails)
                    .await
                    .is_ok();
                self.product_details_api
                    .store(details_api, Ordering::SeqCst);
                let state = self.end_cycle(ConnectionState::Connected);
                self.log.debug(&format!(
                    "billing service connected (product details api: {})",
                    details_api
                ));
                let _ = self.signals.send(ConnectionSignal::Connected);
                return state;
            }

            self.log.warn(&format!(
                "connect attempt {} failed: {:?} {}",
                attempt, response.code, response.message
            ));
            if attempt >= self.max_attempts {
                self.log.warn(&format!(
                    "giving up after {} connect attempts",
                    self.max_attempts
                ));
                return self.end_cycle(ConnectionState::Unavailable);
            }

            self.attempt.store(attempt + 1, Ordering::SeqCst);
            tokio::time::sleep(self.retry_delay).await;
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("attempt", &self.attempt())
            .field("variant", &self.variant())
            .finish()
    }
}
