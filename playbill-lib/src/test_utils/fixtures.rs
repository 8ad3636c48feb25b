//! Test fixtures and data generators.

use crate::product::{PricingPhase, ProductDetails, SkuDetails, SubscriptionOffer};
use crate::purchase::{ProductFamily, PurchaseRecord, PurchaseState};

/// Collection of commonly used test fixtures.
pub struct TestFixtures;

impl TestFixtures {
    /// Sample prices in micro-units.
    pub const SAMPLE_PRICES: &'static [i64] = &[
        990_000,    // $0.99
        4_990_000,  // $4.99
        9_990_000,  // $9.99
        49_990_000, // $49.99
    ];

    /// A USD pricing phase.
    pub fn usd(micros: i64) -> PricingPhase {
        PricingPhase::new(
            format!("${}.{:02}", micros / 1_000_000, (micros % 1_000_000) / 10_000),
            micros,
            "USD",
        )
    }

    /// One-time product priced at the first sample price.
    pub fn one_time(product_id: &str) -> ProductDetails {
        ProductDetails::one_time(
            product_id,
            format!("{} (one-time)", product_id),
            Self::usd(Self::SAMPLE_PRICES[0]),
        )
    }

    /// Subscription product with `(base_plan_id, offer_id, offer_token)` offers.
    pub fn subscription(product_id: &str, offers: &[(&str, Option<&str>, &str)]) -> ProductDetails {
        let offers = offers
            .iter()
            .map(|(base_plan, offer_id, token)| Self::offer(base_plan, *offer_id, token))
            .collect();
        ProductDetails::subscription(product_id, format!("{} (subscription)", product_id), offers)
    }

    /// A single subscription offer priced at the second sample price.
    pub fn offer(base_plan_id: &str, offer_id: Option<&str>, token: &str) -> SubscriptionOffer {
        SubscriptionOffer {
            base_plan_id: base_plan_id.to_string(),
            offer_id: offer_id.map(str::to_string),
            offer_token: token.to_string(),
            pricing_phases: vec![Self::usd(Self::SAMPLE_PRICES[1])],
        }
    }

    /// Legacy SKU entry.
    pub fn sku(sku: &str, family: ProductFamily) -> SkuDetails {
        let price = Self::usd(Self::SAMPLE_PRICES[2]);
        SkuDetails {
            sku: sku.to_string(),
            title: sku.to_string(),
            family,
            price: price.formatted_price,
            price_amount_micros: price.price_amount_micros,
            price_currency_code: price.price_currency_code,
        }
    }

    /// Purchased, unacknowledged record for one product.
    pub fn purchased(product_id: &str, token: &str) -> PurchaseRecord {
        PurchaseRecord::new(vec![product_id.to_string()], token, PurchaseState::Purchased)
            .with_signature(format!("{{\"purchaseToken\":\"{}\"}}", token), "sig")
    }

    /// Purchased and already acknowledged record for one product.
    pub fn acknowledged(product_id: &str, token: &str) -> PurchaseRecord {
        Self::purchased(product_id, token).with_acknowledged(true)
    }

    /// Pending record for one product.
    pub fn pending(product_id: &str, token: &str) -> PurchaseRecord {
        PurchaseRecord::new(vec![product_id.to_string()], token, PurchaseState::Pending)
    }
}
