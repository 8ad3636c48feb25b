//! Scriptable billing channel for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use crate::channel::{BillingChannel, Feature};
use crate::errors::{BillingResponse, ResponseCode};
use crate::params::BillingFlowParams;
use crate::product::{ProductDetails, SkuDetails};
use crate::purchase::{ProductFamily, PurchaseRecord};
use crate::ScreenId;

/// A recorded `launch_billing_flow` call.
#[derive(Clone, Debug)]
pub struct LaunchCall {
    /// Screen the flow was launched on.
    pub screen: ScreenId,
    /// Flow parameters.
    pub params: BillingFlowParams,
}

/// In-memory billing channel.
///
/// Connect results are scripted with [`MockBillingChannel::fail_next_connects`];
/// everything else answers from configured products and purchases.
pub struct MockBillingChannel {
    platform_available: AtomicBool,
    ready: AtomicBool,
    product_details_supported: AtomicBool,
    connect_script: Mutex<VecDeque<BillingResponse>>,
    connect_default: RwLock<BillingResponse>,
    connect_calls: AtomicUsize,
    products: RwLock<HashMap<String, ProductDetails>>,
    skus: RwLock<HashMap<String, SkuDetails>>,
    product_queries: Mutex<Vec<Vec<String>>>,
    sku_queries: AtomicUsize,
    purchases: RwLock<HashMap<ProductFamily, Vec<PurchaseRecord>>>,
    purchase_response: RwLock<BillingResponse>,
    finish_response: RwLock<BillingResponse>,
    finish_delay: RwLock<Option<Duration>>,
    consumed: Mutex<Vec<String>>,
    acknowledged: Mutex<Vec<String>>,
    launch_response: RwLock<BillingResponse>,
    launches: Mutex<Vec<LaunchCall>>,
}

impl Default for MockBillingChannel {
    fn default() -> Self {
        Self {
            platform_available: AtomicBool::new(true),
            ready: AtomicBool::new(false),
            product_details_supported: AtomicBool::new(true),
            connect_script: Mutex::new(VecDeque::new()),
            connect_default: RwLock::new(BillingResponse::ok()),
            connect_calls: AtomicUsize::new(0),
            products: RwLock::new(HashMap::new()),
            skus: RwLock::new(HashMap::new()),
            product_queries: Mutex::new(Vec::new()),
            sku_queries: AtomicUsize::new(0),
            purchases: RwLock::new(HashMap::new()),
            purchase_response: RwLock::new(BillingResponse::ok()),
            finish_response: RwLock::new(BillingResponse::ok()),
            finish_delay: RwLock::new(None),
            consumed: Mutex::new(Vec::new()),
            acknowledged: Mutex::new(Vec::new()),
            launch_response: RwLock::new(BillingResponse::ok()),
            launches: Mutex::new(Vec::new()),
        }
    }
}

impl MockBillingChannel {
    /// Create a channel that connects successfully and has no products.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the platform availability probe fail.
    pub fn set_platform_available(&self, available: bool) {
        self.platform_available.store(available, Ordering::SeqCst);
    }

    /// Make the next `count` connect attempts fail with `ServiceUnavailable`.
    pub fn fail_next_connects(&self, count: usize) {
        let mut script = self.connect_script.lock().unwrap();
        for _ in 0..count {
            script.push_back(BillingResponse::new(
                ResponseCode::ServiceUnavailable,
                "scripted failure",
            ));
        }
    }

    /// Response for connect attempts once the script is exhausted.
    pub fn set_connect_response(&self, response: BillingResponse) {
        *self.connect_default.write().unwrap() = response;
    }

    /// Number of connect attempts so far.
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Simulate a service-side disconnect.
    pub fn drop_connection(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    /// Toggle support for the modern product-details API.
    pub fn set_product_details_supported(&self, supported: bool) {
        self.product_details_supported
            .store(supported, Ordering::SeqCst);
    }

    /// Register a product for the modern API.
    pub fn add_product(&self, details: ProductDetails) {
        self.products
            .write()
            .unwrap()
            .insert(details.product_id.clone(), details);
    }

    /// Register a product for the legacy API.
    pub fn add_sku(&self, details: SkuDetails) {
        self.skus.write().unwrap().insert(details.sku.clone(), details);
    }

    /// Remove all products.
    pub fn clear_products(&self) {
        self.products.write().unwrap().clear();
        self.skus.write().unwrap().clear();
    }

    /// Id lists passed to `query_product_details`, in call order.
    pub fn product_queries(&self) -> Vec<Vec<String>> {
        self.product_queries.lock().unwrap().clone()
    }

    /// Number of legacy SKU queries.
    pub fn sku_queries(&self) -> usize {
        self.sku_queries.load(Ordering::SeqCst)
    }

    /// Replace the purchases returned for a family.
    pub fn set_purchases(&self, family: ProductFamily, records: Vec<PurchaseRecord>) {
        self.purchases.write().unwrap().insert(family, records);
    }

    /// Response code for purchase queries.
    pub fn set_purchase_response(&self, response: BillingResponse) {
        *self.purchase_response.write().unwrap() = response;
    }

    /// Response code for consume and acknowledge calls.
    pub fn set_finish_response(&self, response: BillingResponse) {
        *self.finish_response.write().unwrap() = response;
    }

    /// Delay consume and acknowledge calls to widen race windows.
    pub fn set_finish_delay(&self, delay: Duration) {
        *self.finish_delay.write().unwrap() = Some(delay);
    }

    /// Tokens passed to `consume`.
    pub fn consumed(&self) -> Vec<String> {
        self.consumed.lock().unwrap().clone()
    }

    /// Tokens passed to `acknowledge`.
    pub fn acknowledged(&self) -> Vec<String> {
        self.acknowledged.lock().unwrap().clone()
    }

    /// Response for billing flow launches.
    pub fn set_launch_response(&self, response: BillingResponse) {
        *self.launch_response.write().unwrap() = response;
    }

    /// Recorded launches.
    pub fn launches(&self) -> Vec<LaunchCall> {
        self.launches.lock().unwrap().clone()
    }

    async fn finish(&self, token: &str, log: &Mutex<Vec<String>>) -> BillingResponse {
        let delay = *self.finish_delay.read().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let response = self.finish_response.read().unwrap().clone();
        if response.is_ok() {
            log.lock().unwrap().push(token.to_string());
        }
        response
    }
}

#[async_trait]
impl BillingChannel for MockBillingChannel {
    async fn is_platform_available(&self) -> bool {
        self.platform_available.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> BillingResponse {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.connect_script.lock().unwrap().pop_front();
        let response = scripted.unwrap_or_else(|| self.connect_default.read().unwrap().clone());
        self.ready.store(response.is_ok(), Ordering::SeqCst);
        response
    }

    async fn end_connection(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn is_feature_supported(&self, feature: Feature) -> BillingResponse {
        let supported = match feature {
            Feature::ProductDetails => self.product_details_supported.load(Ordering::SeqCst),
            Feature::Subscriptions | Feature::SubscriptionsUpdate => true,
        };
        if supported {
            BillingResponse::ok()
        } else {
            BillingResponse::new(ResponseCode::FeatureNotSupported, "not supported")
        }
    }

    async fn query_product_details(
        &self,
        family: ProductFamily,
        product_ids: &[String],
    ) -> (BillingResponse, Vec<ProductDetails>) {
        self.product_queries
            .lock()
            .unwrap()
            .push(product_ids.to_vec());
        let products = self.products.read().unwrap();
        let found = product_ids
            .iter()
            .filter_map(|id| products.get(id))
            .filter(|details| details.family == family)
            .cloned()
            .collect();
        (BillingResponse::ok(), found)
    }

    async fn query_sku_details(
        &self,
        family: ProductFamily,
        skus: &[String],
    ) -> (BillingResponse, Vec<SkuDetails>) {
        self.sku_queries.fetch_add(1, Ordering::SeqCst);
        let known = self.skus.read().unwrap();
        let found = skus
            .iter()
            .filter_map(|id| known.get(id))
            .filter(|details| details.family == family)
            .cloned()
            .collect();
        (BillingResponse::ok(), found)
    }

    async fn query_purchases(
        &self,
        family: ProductFamily,
    ) -> (BillingResponse, Vec<PurchaseRecord>) {
        let response = self.purchase_response.read().unwrap().clone();
        if !response.is_ok() {
            return (response, Vec::new());
        }
        let records = self
            .purchases
            .read()
            .unwrap()
            .get(&family)
            .cloned()
            .unwrap_or_default();
        (response, records)
    }

    async fn consume(&self, purchase_token: &str) -> BillingResponse {
        self.finish(purchase_token, &self.consumed).await
    }

    async fn acknowledge(&self, purchase_token: &str) -> BillingResponse {
        self.finish(purchase_token, &self.acknowledged).await
    }

    fn launch_billing_flow(
        &self,
        screen: &ScreenId,
        params: &BillingFlowParams,
    ) -> BillingResponse {
        self.launches.lock().unwrap().push(LaunchCall {
            screen: screen.clone(),
            params: params.clone(),
        });
        self.launch_response.read().unwrap().clone()
    }
}
