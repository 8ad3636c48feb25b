//! Launch parameters supplied by callers and the flow parameters handed to
//! the billing channel.

use serde::{Deserialize, Serialize};

/// Request to buy a one-time product.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseParams {
    /// Account id attached to the purchase.
    pub account_id: String,
    /// Product id to buy.
    pub product_id: String,
    /// Business order number.
    pub order_no: String,
}

impl PurchaseParams {
    /// Create purchase parameters.
    pub fn new(
        account_id: impl Into<String>,
        product_id: impl Into<String>,
        order_no: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            product_id: product_id.into(),
            order_no: order_no.into(),
        }
    }
}

/// Request to buy or replace a subscription.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionParams {
    /// Account id attached to the purchase.
    pub account_id: String,
    /// Subscription product id.
    pub product_id: String,
    /// Requested base plan.
    pub base_plan_id: String,
    /// Requested promotional offer, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer_id: Option<String>,
    /// Business order number.
    pub order_no: String,
    /// Token of an active subscription the business backend already knows about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_token: Option<String>,
}

impl SubscriptionParams {
    /// Create subscription parameters for a base plan.
    pub fn new(
        account_id: impl Into<String>,
        product_id: impl Into<String>,
        base_plan_id: impl Into<String>,
        order_no: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            product_id: product_id.into(),
            base_plan_id: base_plan_id.into(),
            offer_id: None,
            order_no: order_no.into(),
            purchase_token: None,
        }
    }

    /// Request a specific offer on the base plan.
    pub fn with_offer(mut self, offer_id: impl Into<String>) -> Self {
        self.offer_id = Some(offer_id.into());
        self
    }

    /// Supply an externally known active purchase token.
    pub fn with_purchase_token(mut self, token: impl Into<String>) -> Self {
        self.purchase_token = Some(token.into());
        self
    }
}

/// Lookup key for a subscription offer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferQuery {
    /// Subscription product id.
    pub product_id: String,
    /// Base plan id.
    pub base_plan_id: String,
    /// Offer id, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer_id: Option<String>,
}

impl OfferQuery {
    /// Create an offer query.
    pub fn new(
        product_id: impl Into<String>,
        base_plan_id: impl Into<String>,
        offer_id: Option<String>,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            base_plan_id: base_plan_id.into(),
            offer_id,
        }
    }
}

/// Proration mode applied when one subscription replaces another.
///
/// Integer values follow the platform's replacement-mode constants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum ReplacementMode {
    /// Replacement takes effect immediately, remaining time is credited.
    WithTimeProration = 1,
    /// Replacement takes effect immediately, billing cycle unchanged.
    ChargeProratedPrice = 2,
    /// Replacement takes effect immediately, new price charged on next renewal.
    WithoutProration = 3,
    /// Replacement takes effect immediately, full price charged now.
    ChargeFullPrice = 5,
    /// Replacement takes effect when the old plan expires.
    Deferred = 6,
}

/// Replacement of an existing subscription.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplacementSpec {
    /// Token of the subscription being replaced.
    pub old_purchase_token: String,
    /// Proration mode.
    pub mode: ReplacementMode,
}

/// Parameters for a billing flow launch, as passed to the billing channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingFlowParams {
    /// Product to buy.
    pub product_id: String,
    /// Selected subscription offer token. `None` for one-time products.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer_token: Option<String>,
    /// Account id.
    pub obfuscated_account_id: String,
    /// JSON profile blob, see [`crate::PurchaseProfile`].
    pub obfuscated_profile_id: String,
    /// Subscription being replaced, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<ReplacementSpec>,
}

impl BillingFlowParams {
    /// Whether this launch replaces an existing subscription.
    pub fn is_replacement(&self) -> bool {
        self.replacement.is_some()
    }
}
