//! Subscription launch resolution: which offer to buy and whether the
//! purchase replaces a subscription the user already holds.

use std::sync::Arc;

use playbill_lib::{
    BillingError, BillingFlowParams, ProductFamily, PurchaseProfile, ReplacementMode,
    ReplacementSpec, SubscriptionOffer, SubscriptionParams,
};

use crate::catalog::{CatalogEntry, ProductCatalog};
use crate::config::SubscriptionMode;
use crate::connection::ConnectionManager;
use crate::subscriptions::ActiveSubscriptions;

/// Pick an offer among `offers` for a base plan.
///
/// Among offers on `base_plan_id`, a requested non-empty `offer_id` wins when
/// present; otherwise the base plan's own offer, otherwise the first match.
pub fn resolve_offer<'a>(
    offers: &'a [SubscriptionOffer],
    base_plan_id: &str,
    offer_id: Option<&str>,
) -> Option<&'a SubscriptionOffer> {
    let candidates: Vec<&SubscriptionOffer> = offers
        .iter()
        .filter(|offer| offer.base_plan_id == base_plan_id)
        .collect();

    if let Some(wanted) = offer_id.filter(|id| !id.is_empty()) {
        if let Some(offer) = candidates
            .iter()
            .find(|offer| offer.offer_id.as_deref() == Some(wanted))
        {
            return Some(*offer);
        }
    }

    candidates
        .iter()
        .find(|offer| offer.is_base_plan())
        .or_else(|| candidates.first())
        .copied()
}

/// Fresh purchase or replacement of an existing subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LaunchSpec {
    /// New subscription.
    Fresh,
    /// Replace the subscription with this token, charging the full price now.
    Replace {
        /// Token of the subscription being replaced
        old_purchase_token: String,
    },
}

impl LaunchSpec {
    /// Decide between a fresh purchase and a replacement.
    ///
    /// Single mode replaces any active subscription; multi mode only one on
    /// the same product. A caller-supplied token stands in when the table has
    /// no matching entry.
    pub fn decide(
        mode: SubscriptionMode,
        active: &ActiveSubscriptions,
        params: &SubscriptionParams,
    ) -> Self {
        let local = match mode {
            SubscriptionMode::Single => active.first().map(|(_, record)| record.purchase_token),
            SubscriptionMode::Multi => active
                .get(&params.product_id)
                .map(|record| record.purchase_token),
        };
        let external = params
            .purchase_token
            .clone()
            .filter(|token| !token.is_empty());

        match local.or(external) {
            Some(old_purchase_token) => Self::Replace { old_purchase_token },
            None => Self::Fresh,
        }
    }

    /// Replacement parameters for the billing flow.
    pub fn replacement(&self) -> Option<ReplacementSpec> {
        match self {
            Self::Fresh => None,
            Self::Replace { old_purchase_token } => Some(ReplacementSpec {
                old_purchase_token: old_purchase_token.clone(),
                mode: ReplacementMode::ChargeFullPrice,
            }),
        }
    }
}

/// Builds billing flow parameters for subscription launches.
pub struct SubscriptionResolver {
    mode: SubscriptionMode,
    catalog: Arc<ProductCatalog>,
    active: Arc<ActiveSubscriptions>,
    connection: Arc<ConnectionManager>,
}

impl SubscriptionResolver {
    /// Create a resolver.
    pub fn new(
        mode: SubscriptionMode,
        catalog: Arc<ProductCatalog>,
        active: Arc<ActiveSubscriptions>,
        connection: Arc<ConnectionManager>,
    ) -> Self {
        Self {
            mode,
            catalog,
            active,
            connection,
        }
    }

    /// Flow parameters for `params`.
    ///
    /// Fails with [`BillingError::ServiceUnavailable`] when not connected,
    /// [`BillingError::ProductNotFound`] when the product is not cached, and
    /// [`BillingError::DeveloperError`] when no offer matches the base plan.
    pub fn resolve_launch_params(
        &self,
        params: &SubscriptionParams,
    ) -> playbill_lib::Result<BillingFlowParams> {
        if !self.connection.check_connected() {
            return Err(BillingError::ServiceUnavailable);
        }
        let entry = self
            .catalog
            .subscription_product(&params.product_id)
            .ok_or_else(|| BillingError::product_not_found(&params.product_id))?;

        let legacy = matches!(entry, CatalogEntry::Sku(_));
        let offer_token = match &entry {
            CatalogEntry::Details(details) => {
                let offer = resolve_offer(
                    &details.subscription_offers,
                    &params.base_plan_id,
                    params.offer_id.as_deref(),
                )
                .ok_or_else(|| {
                    BillingError::DeveloperError(format!(
                        "no offer on base plan {} for {}",
                        params.base_plan_id, params.product_id
                    ))
                })?;
                Some(offer.offer_token.clone())
            }
            CatalogEntry::Sku(_) => None,
        };

        // The legacy flow has no subscription-update parameters.
        let spec = if legacy {
            LaunchSpec::Fresh
        } else {
            LaunchSpec::decide(self.mode, &self.active, params)
        };
        tracing::debug!(
            target: "playbill",
            product_id = %params.product_id,
            replacement = matches!(spec, LaunchSpec::Replace { .. }),
            "resolved subscription launch"
        );

        Ok(BillingFlowParams {
            product_id: params.product_id.clone(),
            offer_token,
            obfuscated_account_id: params.account_id.clone(),
            obfuscated_profile_id: PurchaseProfile::new(
                ProductFamily::Subscription,
                params.order_no.clone(),
            )
            .to_json()?,
            replacement: spec.replacement(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playbill_lib::test_utils::TestFixtures;

    fn offers() -> Vec<SubscriptionOffer> {
        vec![
            TestFixtures::offer("p1", Some(""), "tok-p1"),
            TestFixtures::offer("p1", Some("o1"), "tok-o1"),
            TestFixtures::offer("p2", Some("o2"), "tok-o2"),
        ]
    }

    #[test]
    fn test_offer_id_match_wins() {
        let offers = offers();
        let offer = resolve_offer(&offers, "p1", Some("o1")).unwrap();
        assert_eq!(offer.offer_token, "tok-o1");
    }

    #[test]
    fn test_empty_offer_id_selects_base_plan() {
        let offers = offers();
        assert_eq!(resolve_offer(&offers, "p1", Some("")).unwrap().offer_token, "tok-p1");
        assert_eq!(resolve_offer(&offers, "p1", None).unwrap().offer_token, "tok-p1");
    }

    #[test]
    fn test_unknown_offer_falls_back_to_base_plan() {
        let offers = offers();
        assert_eq!(
            resolve_offer(&offers, "p1", Some("nope")).unwrap().offer_token,
            "tok-p1"
        );
    }

    #[test]
    fn test_first_match_without_base_offer() {
        let offers = offers();
        assert_eq!(resolve_offer(&offers, "p2", None).unwrap().offer_token, "tok-o2");
        assert!(resolve_offer(&offers, "p3", None).is_none());
    }

    #[test]
    fn test_single_mode_replaces_other_product() {
        let active = ActiveSubscriptions::new();
        active.record(&TestFixtures::acknowledged("sub.a", "token-a"));
        let params = SubscriptionParams::new("acct", "sub.b", "p1", "S-1");

        let spec = LaunchSpec::decide(SubscriptionMode::Single, &active, &params);
        assert_eq!(
            spec,
            LaunchSpec::Replace {
                old_purchase_token: "token-a".into()
            }
        );
        assert_eq!(
            spec.replacement().unwrap().mode,
            ReplacementMode::ChargeFullPrice
        );
    }

    #[test]
    fn test_multi_mode_only_same_product() {
        let active = ActiveSubscriptions::new();
        active.record(&TestFixtures::acknowledged("sub.a", "token-a"));

        let other = SubscriptionParams::new("acct", "sub.b", "p1", "S-1");
        assert_eq!(
            LaunchSpec::decide(SubscriptionMode::Multi, &active, &other),
            LaunchSpec::Fresh
        );

        let same = SubscriptionParams::new("acct", "sub.a", "p1", "S-2");
        assert_eq!(
            LaunchSpec::decide(SubscriptionMode::Multi, &active, &same),
            LaunchSpec::Replace {
                old_purchase_token: "token-a".into()
            }
        );
    }

    #[test]
    fn test_caller_token_used_when_table_empty() {
        let active = ActiveSubscriptions::new();
        let params =
            SubscriptionParams::new("acct", "sub.b", "p1", "S-1").with_purchase_token("server-known");

        for mode in [SubscriptionMode::Single, SubscriptionMode::Multi] {
            assert_eq!(
                LaunchSpec::decide(mode, &active, &params),
                LaunchSpec::Replace {
                    old_purchase_token: "server-known".into()
                }
            );
        }

        let blank = SubscriptionParams::new("acct", "sub.b", "p1", "S-1").with_purchase_token("");
        assert_eq!(
            LaunchSpec::decide(SubscriptionMode::Single, &active, &blank),
            LaunchSpec::Fresh
        );
    }
}
