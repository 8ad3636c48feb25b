//! The billing client facade.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use playbill_lib::{
    BillingChannel, BillingError, BillingFlowParams, BillingResponse, MerchantBackend,
    OfferDescriptor, OfferQuery, ProductDescriptor, ProductFamily, PurchaseParams,
    PurchaseProfile, PurchaseRecord, ResponseCode, ScreenId, SignatureVerifier,
    SubscriptionParams,
};
use tokio::sync::{broadcast, mpsc};
use tokio::task::{AbortHandle, JoinHandle};

use crate::catalog::ProductCatalog;
use crate::config::BillingConfig;
use crate::connection::{ConnectionManager, ConnectionSignal, ConnectionState};
use crate::events::{EventBus, EventSubscription, PayEvent};
use crate::lifecycle::RefreshTrigger;
use crate::log::BillingLog;
use crate::reconciler::{FinishOutcome, Reconciler};
use crate::replacement::SubscriptionResolver;
use crate::subscriptions::ActiveSubscriptions;

/// Entry point for applications.
///
/// Create one per process and pass it to whoever needs it. [`BillingClient::init`]
/// connects and starts the refresh worker; [`BillingClient::shutdown`] tears
/// both down.
pub struct BillingClient {
    config: BillingConfig,
    channel: Arc<dyn BillingChannel>,
    connection: Arc<ConnectionManager>,
    catalog: Arc<ProductCatalog>,
    active: Arc<ActiveSubscriptions>,
    reconciler: Arc<Reconciler>,
    resolver: SubscriptionResolver,
    events: EventBus,
    trigger: RefreshTrigger,
    log: BillingLog,
    signals: Mutex<Option<mpsc::UnboundedReceiver<ConnectionSignal>>>,
    worker: Mutex<Option<AbortHandle>>,
}

impl BillingClient {
    /// Wire up a client. Nothing is started until [`BillingClient::init`].
    pub fn new(
        config: BillingConfig,
        channel: Arc<dyn BillingChannel>,
        backend: Arc<dyn MerchantBackend>,
        verifier: Option<Arc<dyn SignatureVerifier>>,
    ) -> playbill_lib::Result<Self> {
        config.validate()?;

        let log = BillingLog::new(config.debug, Arc::clone(&backend));
        let events = EventBus::new(config.event_capacity);
        let (connection, signals) =
            ConnectionManager::new(Arc::clone(&channel), &config, log.clone());
        let catalog = Arc::new(ProductCatalog::new(
            Arc::clone(&channel),
            Arc::clone(&backend),
            log.clone(),
        ));
        let active = Arc::new(ActiveSubscriptions::new());
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&channel),
            backend,
            verifier,
            Arc::clone(&catalog),
            Arc::clone(&active),
            events.clone(),
            log.clone(),
            config.subscriptions_enabled,
        ));
        let resolver = SubscriptionResolver::new(
            config.subscription_mode,
            Arc::clone(&catalog),
            Arc::clone(&active),
            Arc::clone(&connection),
        );
        let trigger = RefreshTrigger::from_config(&config);

        Ok(Self {
            config,
            channel,
            connection,
            catalog,
            active,
            reconciler,
            resolver,
            events,
            trigger,
            log,
            signals: Mutex::new(Some(signals)),
            worker: Mutex::new(None),
        })
    }

    /// Start the refresh worker and the first connect cycle.
    ///
    /// The worker refreshes the catalog and reconciles purchases every time a
    /// connection is established. Calling `init` twice only restarts the
    /// connection.
    pub fn init(&self) -> Option<JoinHandle<ConnectionState>> {
        let signals = self
            .signals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut signals) = signals {
            let catalog = Arc::clone(&self.catalog);
            let reconciler = Arc::clone(&self.reconciler);
            let connection = Arc::clone(&self.connection);
            let subscriptions_enabled = self.config.subscriptions_enabled;
            let worker = tokio::spawn(async move {
                while let Some(signal) = signals.recv().await {
                    tracing::debug!(target: "playbill", ?signal, "connection signal");
                    sync_all(&catalog, &reconciler, &connection, subscriptions_enabled).await;
                }
            });
            *self.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(worker.abort_handle());
        }
        self.start_connection()
    }

    /// Close the connection and stop background work.
    pub async fn shutdown(&self) {
        let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(worker) = worker {
            worker.abort();
        }
        self.connection.end_connection().await;
    }

    /// Start a connect cycle. See [`ConnectionManager::start_connection`].
    pub fn start_connection(&self) -> Option<JoinHandle<ConnectionState>> {
        self.connection.start_connection()
    }

    /// Close the connection and cancel pending retries.
    pub async fn end_connection(&self) {
        self.connection.end_connection().await;
    }

    /// Whether the billing service is connected.
    pub fn check_connected(&self) -> bool {
        self.connection.check_connected()
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Platform callback: the service dropped the connection.
    pub fn on_service_disconnected(&self) -> Option<JoinHandle<ConnectionState>> {
        self.connection.handle_disconnect()
    }

    /// Platform callback: a purchase flow finished.
    ///
    /// On success every record is announced and then reconciled as
    /// user-initiated. User cancellation is only logged.
    pub async fn on_purchases_updated(
        &self,
        response: BillingResponse,
        records: Vec<PurchaseRecord>,
    ) {
        match response.code {
            ResponseCode::Ok => {
                for record in &records {
                    self.events.publish(PayEvent::PaySucceeded {
                        record: record.clone(),
                    });
                }
                self.reconciler.handle_purchases(&records, true).await;
            }
            ResponseCode::UserCanceled => {
                self.log.debug("purchase flow canceled by user");
            }
            code => {
                self.log.warn(&format!(
                    "purchase flow failed: {:?} {}",
                    code, response.message
                ));
                self.events.publish(PayEvent::PayFailed {
                    code,
                    message: response.message,
                });
            }
        }
    }

    /// Launch the purchase flow for a one-time product.
    pub fn launch_purchase(&self, screen: &ScreenId, params: &PurchaseParams) -> BillingResponse {
        if !self.connection.variant().is_live() {
            return BillingResponse::unsupported();
        }
        match self.one_time_flow(params) {
            Ok(flow) => self.launch(screen, &flow),
            Err(err) => {
                self.log
                    .warn(&format!("cannot launch {}: {}", params.product_id, err));
                err.into()
            }
        }
    }

    /// Launch the purchase flow for a subscription, replacing an active one
    /// according to the configured [`crate::SubscriptionMode`].
    pub fn launch_subscription(
        &self,
        screen: &ScreenId,
        params: &SubscriptionParams,
    ) -> BillingResponse {
        if !self.connection.variant().is_live() {
            return BillingResponse::unsupported();
        }
        if !self.config.subscriptions_enabled {
            return BillingError::FeatureNotSupported("subscriptions are disabled".into()).into();
        }
        match self.resolver.resolve_launch_params(params) {
            Ok(flow) => self.launch(screen, &flow),
            Err(err) => {
                self.log
                    .warn(&format!("cannot launch {}: {}", params.product_id, err));
                err.into()
            }
        }
    }

    /// Subscribe to payment events. Dropping the subscription cancels it.
    pub fn subscribe<F>(&self, on_event: F) -> EventSubscription
    where
        F: Fn(PayEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(on_event)
    }

    /// Raw event receiver.
    pub fn events(&self) -> broadcast::Receiver<PayEvent> {
        self.events.receiver()
    }

    /// Resolved offer for a cached subscription product.
    pub fn query_offer_details(&self, query: &OfferQuery) -> Option<OfferDescriptor> {
        self.catalog.offer_details(query)
    }

    /// Active subscriptions, all of them or only `ids`.
    pub fn query_active_subscriptions(
        &self,
        ids: Option<&[String]>,
    ) -> HashMap<String, PurchaseRecord> {
        self.active.query(ids)
    }

    /// One-time product descriptors, served from cache and topped up live.
    pub async fn query_product_details(&self, ids: &[String]) -> Vec<ProductDescriptor> {
        if !self.connection.variant().is_live() {
            return Vec::new();
        }
        self.catalog.query_product_details(ids).await
    }

    /// All cached products of a family.
    pub fn cached_products(&self, family: ProductFamily) -> Vec<ProductDescriptor> {
        self.catalog.products(family)
    }

    /// Refresh one catalog family.
    pub async fn refresh_catalog(&self, family: ProductFamily) -> playbill_lib::Result<usize> {
        if !self.check_connected() {
            return Err(BillingError::ServiceUnavailable);
        }
        if family == ProductFamily::Subscription && !self.config.subscriptions_enabled {
            return Err(BillingError::FeatureNotSupported(
                "subscriptions are disabled".into(),
            ));
        }
        self.catalog
            .refresh(family, self.connection.uses_product_details_api())
            .await
    }

    /// Refresh catalogs, then reconcile purchases. Connects first if needed.
    pub async fn query_purchases(&self) {
        if !self.check_connected() {
            let _ = self.start_connection();
            return;
        }
        sync_all(
            &self.catalog,
            &self.reconciler,
            &self.connection,
            self.config.subscriptions_enabled,
        )
        .await;
    }

    /// Reconcile purchases without touching the catalog. Connects first if needed.
    pub async fn refresh_purchases(&self) {
        if !self.check_connected() {
            let _ = self.start_connection();
            return;
        }
        self.reconciler.refresh_purchases().await;
    }

    /// Finish a purchase the merchant validated out of band.
    pub async fn finish_purchase(
        &self,
        family: ProductFamily,
        record: &PurchaseRecord,
        user_initiated: bool,
    ) -> playbill_lib::Result<FinishOutcome> {
        self.reconciler
            .finish_purchase(family, record, user_initiated)
            .await
    }

    /// A screen came to the foreground. Returns true if a refresh ran.
    pub async fn on_screen_resumed(&self, screen: &ScreenId) -> bool {
        if !self.trigger.on_screen_resumed(screen) {
            return false;
        }
        self.refresh_purchases().await;
        true
    }

    /// The app came to the foreground. Returns true if a refresh ran.
    pub async fn on_app_resumed(&self) -> bool {
        if !self.trigger.on_app_resumed() {
            return false;
        }
        self.refresh_purchases().await;
        true
    }

    fn one_time_flow(&self, params: &PurchaseParams) -> playbill_lib::Result<BillingFlowParams> {
        if !self.connection.check_connected() {
            return Err(BillingError::ServiceUnavailable);
        }
        if !self.catalog.contains_one_time(&params.product_id) {
            return Err(BillingError::product_not_found(&params.product_id));
        }
        Ok(BillingFlowParams {
            product_id: params.product_id.clone(),
            offer_token: None,
            obfuscated_account_id: params.account_id.clone(),
            obfuscated_profile_id: PurchaseProfile::new(
                ProductFamily::OneTime,
                params.order_no.clone(),
            )
            .to_json()?,
            replacement: None,
        })
    }

    fn launch(&self, screen: &ScreenId, flow: &BillingFlowParams) -> BillingResponse {
        let response = self.channel.launch_billing_flow(screen, flow);
        if !response.is_ok() {
            self.log.warn(&format!(
                "billing flow for {} failed to launch: {:?} {}",
                flow.product_id, response.code, response.message
            ));
        }
        response
    }
}

async fn sync_all(
    catalog: &ProductCatalog,
    reconciler: &Reconciler,
    connection: &ConnectionManager,
    subscriptions_enabled: bool,
) {
    if !connection.variant().is_live() {
        return;
    }
    if let Err(err) = catalog.refresh_one_time().await {
        tracing::debug!(target: "playbill", %err, "one-time catalog refresh failed");
    }
    if subscriptions_enabled {
        if let Err(err) = catalog
            .refresh_subscriptions(connection.uses_product_details_api())
            .await
        {
            tracing::debug!(target: "playbill", %err, "subscription catalog refresh failed");
        }
    }
    reconciler.refresh_purchases().await;
}

impl std::fmt::Debug for BillingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillingClient")
            .field("config", &self.config)
            .field("connection", &self.connection)
            .field("active_subscriptions", &self.active.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playbill_lib::test_utils::{MockBackend, MockBillingChannel, TestFixtures};

    fn client(
        channel: Arc<MockBillingChannel>,
        backend: Arc<MockBackend>,
    ) -> BillingClient {
        BillingClient::new(BillingConfig::default(), channel, backend, None).unwrap()
    }

    #[tokio::test]
    async fn test_launch_requires_connection() {
        let channel = Arc::new(MockBillingChannel::new());
        let client = client(channel.clone(), Arc::new(MockBackend::new()));

        let response = client.launch_purchase(
            &ScreenId::new("store"),
            &PurchaseParams::new("acct", "gem.100", "C-1"),
        );
        assert_eq!(response.code, ResponseCode::ServiceDisconnected);
        assert!(channel.launches().is_empty());
    }

    #[tokio::test]
    async fn test_launch_unknown_product() {
        let channel = Arc::new(MockBillingChannel::new());
        let client = client(channel.clone(), Arc::new(MockBackend::new()));
        client.start_connection().unwrap().await.unwrap();

        let response = client.launch_purchase(
            &ScreenId::new("store"),
            &PurchaseParams::new("acct", "gem.100", "C-1"),
        );
        assert_eq!(response.code, ResponseCode::Fail);
    }

    #[tokio::test]
    async fn test_launch_attaches_profile() {
        let channel = Arc::new(MockBillingChannel::new());
        channel.add_product(TestFixtures::one_time("gem.100"));
        let backend = Arc::new(MockBackend::new().with_consumables(&["gem.100"]));
        let client = client(channel.clone(), backend);
        client.start_connection().unwrap().await.unwrap();
        client.query_purchases().await;

        let response = client.launch_purchase(
            &ScreenId::new("store"),
            &PurchaseParams::new("acct-1", "gem.100", "C-42"),
        );
        assert!(response.is_ok());

        let launch = channel.launches().pop().unwrap();
        assert_eq!(launch.screen, ScreenId::new("store"));
        assert_eq!(launch.params.obfuscated_account_id, "acct-1");
        let profile = PurchaseProfile::from_json(&launch.params.obfuscated_profile_id).unwrap();
        assert_eq!(profile.family, ProductFamily::OneTime);
        assert_eq!(profile.order_no, "C-42");
    }

    #[tokio::test]
    async fn test_offline_variant() {
        let channel = Arc::new(MockBillingChannel::new());
        channel.set_platform_available(false);
        let client = client(channel.clone(), Arc::new(MockBackend::new()));
        client.start_connection().unwrap().await.unwrap();

        let response = client.launch_purchase(
            &ScreenId::new("store"),
            &PurchaseParams::new("acct", "gem.100", "C-1"),
        );
        assert_eq!(response, BillingResponse::unsupported());
        assert!(client
            .query_product_details(&["gem.100".to_string()])
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_user_cancel_is_not_published() {
        let channel = Arc::new(MockBillingChannel::new());
        let client = client(channel, Arc::new(MockBackend::new()));
        let mut rx = client.events();

        client
            .on_purchases_updated(
                BillingResponse::new(ResponseCode::UserCanceled, "back"),
                Vec::new(),
            )
            .await;
        assert!(rx.try_recv().is_err());

        client
            .on_purchases_updated(
                BillingResponse::new(ResponseCode::ItemAlreadyOwned, "owned"),
                Vec::new(),
            )
            .await;
        assert_eq!(
            rx.try_recv().unwrap(),
            PayEvent::PayFailed {
                code: ResponseCode::ItemAlreadyOwned,
                message: "owned".into()
            }
        );
    }

    #[tokio::test]
    async fn test_subscriptions_disabled() {
        let channel = Arc::new(MockBillingChannel::new());
        let config = BillingConfig::default().with_subscriptions_enabled(false);
        let client =
            BillingClient::new(config, channel, Arc::new(MockBackend::new()), None).unwrap();
        client.start_connection().unwrap().await.unwrap();

        let response = client.launch_subscription(
            &ScreenId::new("store"),
            &SubscriptionParams::new("acct", "sub.a", "p1", "S-1"),
        );
        assert_eq!(response.code, ResponseCode::FeatureNotSupported);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = BillingConfig::default().with_max_connect_attempts(0);
        let result = BillingClient::new(
            config,
            Arc::new(MockBillingChannel::new()),
            Arc::new(MockBackend::new()),
            None,
        );
        assert!(matches!(result, Err(BillingError::DeveloperError(_))));
    }
}
