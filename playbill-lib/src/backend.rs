//! Business-side collaborators: product lists, order validation, logging and
//! purchase signature checks.

use async_trait::async_trait;

use crate::purchase::{ProductFamily, PurchaseRecord};

/// Result of the merchant's order validation for one purchase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationVerdict {
    /// Order bound on the server; the SDK should finish the purchase now.
    Approved,
    /// The merchant will call the finish step itself later.
    Deferred,
    /// Validation failed; the purchase is left unfinished.
    Rejected(String),
}

/// Business backend the SDK reports to.
///
/// Product id lists return empty on failure; the SDK treats an empty list as a
/// soft failure and keeps its previous catalog.
#[async_trait]
pub trait MerchantBackend: Send + Sync {
    /// Consumable one-time product ids.
    async fn consumable_product_ids(&self) -> Vec<String>;

    /// Non-consumable one-time product ids.
    async fn non_consumable_product_ids(&self) -> Vec<String>;

    /// Subscription product ids.
    async fn subscription_product_ids(&self) -> Vec<String>;

    /// Validate and bind the purchase to a business order.
    async fn validate_purchase(
        &self,
        user_initiated: bool,
        family: ProductFamily,
        record: &PurchaseRecord,
    ) -> ValidationVerdict;

    /// Debug log sink. Only called while debug mode is on.
    fn log(&self, _tag: &str, _message: &str) {}
}

/// Checks that a purchase payload was signed by the store.
pub trait SignatureVerifier: Send + Sync {
    /// Returns true when `signature` is valid for `signed_data`.
    fn verify(&self, signed_data: &str, signature: &str) -> bool;
}
