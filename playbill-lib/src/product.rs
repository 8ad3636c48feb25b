//! Product and subscription-offer metadata.
//!
//! [`ProductDetails`] and [`SkuDetails`] are what the billing channel returns
//! (modern and legacy APIs respectively). [`ProductDescriptor`] and
//! [`OfferDescriptor`] are the presentation-facing views derived from them.

use serde::{Deserialize, Serialize};

use crate::purchase::ProductFamily;

/// One phase of a price schedule (e.g. free trial, then monthly price).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingPhase {
    /// Localized, formatted price string.
    pub formatted_price: String,
    /// Price in micro-units (1,000,000 micro-units = 1 unit of currency).
    pub price_amount_micros: i64,
    /// ISO 4217 currency code.
    pub price_currency_code: String,
}

impl PricingPhase {
    /// Create a pricing phase.
    pub fn new(
        formatted_price: impl Into<String>,
        price_amount_micros: i64,
        price_currency_code: impl Into<String>,
    ) -> Self {
        Self {
            formatted_price: formatted_price.into(),
            price_amount_micros,
            price_currency_code: price_currency_code.into(),
        }
    }
}

/// A purchasable offer of a subscription product.
///
/// The base plan's own offer has no `offer_id`; promotional offers extend a
/// base plan and carry one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionOffer {
    /// Base plan this offer belongs to.
    pub base_plan_id: String,
    /// Offer id, `None` for the base plan itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer_id: Option<String>,
    /// Token passed to the billing flow to select this offer.
    pub offer_token: String,
    /// Ordered price schedule.
    pub pricing_phases: Vec<PricingPhase>,
}

impl SubscriptionOffer {
    /// Whether this is the base plan's own offer.
    pub fn is_base_plan(&self) -> bool {
        self.offer_id.as_deref().map_or(true, str::is_empty)
    }
}

/// Product metadata returned by the modern product-details API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDetails {
    /// Product id.
    pub product_id: String,
    /// Display name.
    pub name: String,
    /// Product family.
    pub family: ProductFamily,
    /// Price for one-time products.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_time_price: Option<PricingPhase>,
    /// Offers for subscription products.
    #[serde(default)]
    pub subscription_offers: Vec<SubscriptionOffer>,
}

impl ProductDetails {
    /// One-time product with a single price.
    pub fn one_time(
        product_id: impl Into<String>,
        name: impl Into<String>,
        price: PricingPhase,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            name: name.into(),
            family: ProductFamily::OneTime,
            one_time_price: Some(price),
            subscription_offers: Vec::new(),
        }
    }

    /// Subscription product with the given offers.
    pub fn subscription(
        product_id: impl Into<String>,
        name: impl Into<String>,
        offers: Vec<SubscriptionOffer>,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            name: name.into(),
            family: ProductFamily::Subscription,
            one_time_price: None,
            subscription_offers: offers,
        }
    }

    /// Presentation view. Subscriptions use the first phase of their first offer.
    pub fn descriptor(&self) -> ProductDescriptor {
        let price = self.one_time_price.as_ref().or_else(|| {
            self.subscription_offers
                .first()
                .and_then(|offer| offer.pricing_phases.first())
        });
        ProductDescriptor {
            product_id: self.product_id.clone(),
            name: self.name.clone(),
            formatted_price: price.map(|p| p.formatted_price.clone()).unwrap_or_default(),
            price_amount_micros: price.map(|p| p.price_amount_micros).unwrap_or_default(),
            price_currency_code: price
                .map(|p| p.price_currency_code.clone())
                .unwrap_or_default(),
        }
    }
}

/// Product metadata returned by the legacy per-SKU API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkuDetails {
    /// Product id.
    pub sku: String,
    /// Display title.
    pub title: String,
    /// Product family.
    pub family: ProductFamily,
    /// Formatted price.
    pub price: String,
    /// Price in micro-units.
    pub price_amount_micros: i64,
    /// ISO 4217 currency code.
    pub price_currency_code: String,
}

impl SkuDetails {
    /// Presentation view.
    pub fn descriptor(&self) -> ProductDescriptor {
        ProductDescriptor {
            product_id: self.sku.clone(),
            name: self.title.clone(),
            formatted_price: self.price.clone(),
            price_amount_micros: self.price_amount_micros,
            price_currency_code: self.price_currency_code.clone(),
        }
    }

    /// The single price as a pricing phase.
    pub fn pricing_phase(&self) -> PricingPhase {
        PricingPhase::new(
            self.price.clone(),
            self.price_amount_micros,
            self.price_currency_code.clone(),
        )
    }
}

/// Product metadata exposed to presentation layers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDescriptor {
    /// Product id.
    pub product_id: String,
    /// Display name.
    pub name: String,
    /// Formatted price.
    pub formatted_price: String,
    /// Price in micro-units.
    pub price_amount_micros: i64,
    /// ISO 4217 currency code.
    pub price_currency_code: String,
}

/// Resolved subscription offer exposed to presentation layers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferDescriptor {
    /// Product id.
    pub product_id: String,
    /// Display name.
    pub name: String,
    /// Ordered price schedule.
    pub pricing_phases: Vec<PricingPhase>,
}
