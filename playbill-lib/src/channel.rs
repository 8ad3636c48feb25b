//! The platform billing channel.
//!
//! Implementations wrap the store's billing client. All calls may suspend;
//! only [`BillingChannel::launch_billing_flow`] is synchronous because it has
//! to run on the UI-affinitized context.

use async_trait::async_trait;

use crate::errors::BillingResponse;
use crate::params::BillingFlowParams;
use crate::product::{ProductDetails, SkuDetails};
use crate::purchase::{ProductFamily, PurchaseRecord};
use crate::ScreenId;

/// Optional store capabilities that can be probed at runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Modern product-details query API.
    ProductDetails,
    /// Subscriptions at all.
    Subscriptions,
    /// Subscription replacement (upgrade/downgrade).
    SubscriptionsUpdate,
}

/// Interface to the platform billing service.
#[async_trait]
pub trait BillingChannel: Send + Sync {
    /// Whether the store services are installed and usable on this device.
    async fn is_platform_available(&self) -> bool;

    /// Open the connection. Resolves once setup finished, successfully or not.
    async fn connect(&self) -> BillingResponse;

    /// Close the connection.
    async fn end_connection(&self);

    /// Whether the connection is currently ready.
    fn is_ready(&self) -> bool;

    /// Probe a store capability.
    async fn is_feature_supported(&self, feature: Feature) -> BillingResponse;

    /// Query products through the modern API.
    async fn query_product_details(
        &self,
        family: ProductFamily,
        product_ids: &[String],
    ) -> (BillingResponse, Vec<ProductDetails>);

    /// Query products through the legacy per-SKU API.
    async fn query_sku_details(
        &self,
        family: ProductFamily,
        skus: &[String],
    ) -> (BillingResponse, Vec<SkuDetails>);

    /// Query purchases owned by the user for a family.
    async fn query_purchases(
        &self,
        family: ProductFamily,
    ) -> (BillingResponse, Vec<PurchaseRecord>);

    /// Consume a purchase so it can be bought again.
    async fn consume(&self, purchase_token: &str) -> BillingResponse;

    /// Acknowledge a purchase.
    async fn acknowledge(&self, purchase_token: &str) -> BillingResponse;

    /// Show the purchase UI on the given screen.
    fn launch_billing_flow(&self, screen: &ScreenId, params: &BillingFlowParams)
        -> BillingResponse;
}
