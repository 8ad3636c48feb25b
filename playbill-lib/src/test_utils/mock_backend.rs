//! Mock merchant backend and signature verifier.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;

use crate::backend::{MerchantBackend, SignatureVerifier, ValidationVerdict};
use crate::purchase::{ProductFamily, PurchaseRecord};

/// A recorded `validate_purchase` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationCall {
    /// Whether the purchase was user-initiated.
    pub user_initiated: bool,
    /// Family tag passed by the SDK.
    pub family: ProductFamily,
    /// Purchase token.
    pub purchase_token: String,
}

/// Merchant backend with fixed product lists and a configurable verdict.
pub struct MockBackend {
    consumables: RwLock<Vec<String>>,
    non_consumables: RwLock<Vec<String>>,
    subscriptions: RwLock<Vec<String>>,
    verdict: RwLock<ValidationVerdict>,
    validations: Mutex<Vec<ValidationCall>>,
    logs: Mutex<Vec<(String, String)>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            consumables: RwLock::new(Vec::new()),
            non_consumables: RwLock::new(Vec::new()),
            subscriptions: RwLock::new(Vec::new()),
            verdict: RwLock::new(ValidationVerdict::Approved),
            validations: Mutex::new(Vec::new()),
            logs: Mutex::new(Vec::new()),
        }
    }
}

fn to_owned(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

impl MockBackend {
    /// Create a backend with no products that approves every purchase.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set consumable product ids.
    pub fn with_consumables(self, ids: &[&str]) -> Self {
        self.set_consumables(ids);
        self
    }

    /// Set non-consumable product ids.
    pub fn with_non_consumables(self, ids: &[&str]) -> Self {
        *self.non_consumables.write().unwrap() = to_owned(ids);
        self
    }

    /// Set subscription product ids.
    pub fn with_subscriptions(self, ids: &[&str]) -> Self {
        self.set_subscriptions(ids);
        self
    }

    /// Replace consumable product ids.
    pub fn set_consumables(&self, ids: &[&str]) {
        *self.consumables.write().unwrap() = to_owned(ids);
    }

    /// Replace subscription product ids.
    pub fn set_subscriptions(&self, ids: &[&str]) {
        *self.subscriptions.write().unwrap() = to_owned(ids);
    }

    /// Verdict returned by `validate_purchase`.
    pub fn set_verdict(&self, verdict: ValidationVerdict) {
        *self.verdict.write().unwrap() = verdict;
    }

    /// Recorded validation calls.
    pub fn validations(&self) -> Vec<ValidationCall> {
        self.validations.lock().unwrap().clone()
    }

    /// Recorded log lines as `(tag, message)`.
    pub fn logs(&self) -> Vec<(String, String)> {
        self.logs.lock().unwrap().clone()
    }

    /// Whether any log line contains `needle`.
    pub fn logged(&self, needle: &str) -> bool {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .any(|(_, message)| message.contains(needle))
    }
}

#[async_trait]
impl MerchantBackend for MockBackend {
    async fn consumable_product_ids(&self) -> Vec<String> {
        self.consumables.read().unwrap().clone()
    }

    async fn non_consumable_product_ids(&self) -> Vec<String> {
        self.non_consumables.read().unwrap().clone()
    }

    async fn subscription_product_ids(&self) -> Vec<String> {
        self.subscriptions.read().unwrap().clone()
    }

    async fn validate_purchase(
        &self,
        user_initiated: bool,
        family: ProductFamily,
        record: &PurchaseRecord,
    ) -> ValidationVerdict {
        self.validations.lock().unwrap().push(ValidationCall {
            user_initiated,
            family,
            purchase_token: record.purchase_token.clone(),
        });
        self.verdict.read().unwrap().clone()
    }

    fn log(&self, tag: &str, message: &str) {
        self.logs
            .lock()
            .unwrap()
            .push((tag.to_string(), message.to_string()));
    }
}

/// Verifier that returns a fixed answer and counts calls.
pub struct StaticVerifier {
    valid: AtomicBool,
    calls: AtomicUsize,
}

impl StaticVerifier {
    /// Create a verifier returning `valid`.
    pub fn new(valid: bool) -> Self {
        Self {
            valid: AtomicBool::new(valid),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of verification calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SignatureVerifier for StaticVerifier {
    fn verify(&self, _signed_data: &str, _signature: &str) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.valid.load(Ordering::SeqCst)
    }
}
