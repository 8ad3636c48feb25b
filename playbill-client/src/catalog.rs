//! Product catalog cache.
//!
//! Candidate product ids come from the merchant backend; metadata comes from
//! the billing channel. Entries are overwritten per product id on every
//! successful refresh and never expire. Subscription products without any
//! offer cannot be launched and are not cached. An empty candidate list is a soft
//! failure: the refresh is aborted and the existing cache is kept.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use playbill_lib::{
    BillingChannel, BillingError, MerchantBackend, OfferDescriptor, OfferQuery, ProductDescriptor,
    ProductDetails, ProductFamily, PurchaseRecord, SkuDetails,
};

use tokio::time::Instant;

use crate::log::BillingLog;
use crate::replacement::resolve_offer;

/// How long an id the platform did not return is kept out of live lookups.
pub const UNKNOWN_ID_TTL: Duration = Duration::from_secs(60);

/// Cached subscription metadata from either product API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CatalogEntry {
    /// From the modern product-details API.
    Details(ProductDetails),
    /// From the legacy per-SKU API.
    Sku(SkuDetails),
}

impl CatalogEntry {
    /// Presentation view.
    pub fn descriptor(&self) -> ProductDescriptor {
        match self {
            Self::Details(details) => details.descriptor(),
            Self::Sku(sku) => sku.descriptor(),
        }
    }
}

/// In-memory product catalog.
pub struct ProductCatalog {
    channel: Arc<dyn BillingChannel>,
    backend: Arc<dyn MerchantBackend>,
    one_time: RwLock<HashMap<String, ProductDetails>>,
    subscriptions: RwLock<HashMap<String, CatalogEntry>>,
    non_consumables: RwLock<HashSet<String>>,
    unknown: Mutex<HashMap<String, Instant>>,
    log: BillingLog,
}

impl ProductCatalog {
    /// Create an empty catalog.
    pub fn new(
        channel: Arc<dyn BillingChannel>,
        backend: Arc<dyn MerchantBackend>,
        log: BillingLog,
    ) -> Self {
        Self {
            channel,
            backend,
            one_time: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            non_consumables: RwLock::new(HashSet::new()),
            unknown: Mutex::new(HashMap::new()),
            log,
        }
    }

    /// Refresh one family. `product_details_api` selects the subscription API.
    ///
    /// Returns the number of products written to the cache.
    pub async fn refresh(
        &self,
        family: ProductFamily,
        product_details_api: bool,
    ) -> playbill_lib::Result<usize> {
        match family {
            ProductFamily::OneTime => self.refresh_one_time().await,
            ProductFamily::Subscription => self.refresh_subscriptions(product_details_api).await,
        }
    }

    /// Refresh one-time products: consumables plus non-consumables.
    pub async fn refresh_one_time(&self) -> playbill_lib::Result<usize> {
        let consumables = self.backend.consumable_product_ids().await;
        let non_consumables = self.backend.non_consumable_product_ids().await;

        let mut candidates = Vec::with_capacity(consumables.len() + non_consumables.len());
        for id in consumables.iter().chain(non_consumables.iter()) {
            if !candidates.contains(id) {
                candidates.push(id.clone());
            }
        }
        if candidates.is_empty() {
            self.log
                .debug("one-time catalog refresh aborted: no candidate product ids");
            return Ok(0);
        }
        if !non_consumables.is_empty() {
            *self
                .non_consumables
                .write()
                .unwrap_or_else(|e| e.into_inner()) = non_consumables.into_iter().collect();
        }

        let (response, products) = self
            .channel
            .query_product_details(ProductFamily::OneTime, &candidates)
            .await;
        if !response.is_ok() {
            self.log.warn(&format!(
                "one-time product query failed: {:?} {}",
                response.code, response.message
            ));
            return Err(BillingError::from(response));
        }

        let count = products.len();
        self.store_one_time(products);
        self.log
            .debug(&format!("cached {} one-time products", count));
        Ok(count)
    }

    /// Refresh subscription products through the modern or the legacy API.
    pub async fn refresh_subscriptions(
        &self,
        product_details_api: bool,
    ) -> playbill_lib::Result<usize> {
        let candidates = self.backend.subscription_product_ids().await;
        if candidates.is_empty() {
            self.log
                .debug("subscription catalog refresh aborted: no candidate product ids");
            return Ok(0);
        }

        let (response, entries) = if product_details_api {
            let (response, products) = self
                .channel
                .query_product_details(ProductFamily::Subscription, &candidates)
                .await;
            let (offered, bare): (Vec<_>, Vec<_>) = products
                .into_iter()
                .partition(|p| !p.subscription_offers.is_empty());
            if !bare.is_empty() {
                self.log.debug(&format!(
                    "skipped {} subscription products without offers",
                    bare.len()
                ));
            }
            (
                response,
                offered
                    .into_iter()
                    .map(|p| (p.product_id.clone(), CatalogEntry::Details(p)))
                    .collect::<Vec<_>>(),
            )
        } else {
            let (response, skus) = self
                .channel
                .query_sku_details(ProductFamily::Subscription, &candidates)
                .await;
            (
                response,
                skus.into_iter()
                    .map(|s| (s.sku.clone(), CatalogEntry::Sku(s)))
                    .collect::<Vec<_>>(),
            )
        };
        if !response.is_ok() {
            self.log.warn(&format!(
                "subscription product query failed: {:?} {}",
                response.code, response.message
            ));
            return Err(BillingError::from(response));
        }

        let count = entries.len();
        let mut cache = self
            .subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner());
        cache.extend(entries);
        drop(cache);
        self.log
            .debug(&format!("cached {} subscription products", count));
        Ok(count)
    }

    /// Descriptors for `ids`, in request order.
    ///
    /// Cached ids are served locally; the missing ones are fetched in a single
    /// live query and cached. Ids the platform does not return are skipped and
    /// not looked up again for [`UNKNOWN_ID_TTL`]. If the live query fails the
    /// cached subset is returned.
    pub async fn query_product_details(&self, ids: &[String]) -> Vec<ProductDescriptor> {
        let missing: Vec<String> = {
            let cache = self.one_time.read().unwrap_or_else(|e| e.into_inner());
            let mut unknown = self.unknown.lock().unwrap_or_else(|e| e.into_inner());
            unknown.retain(|_, since| since.elapsed() < UNKNOWN_ID_TTL);
            let mut missing: Vec<String> = Vec::new();
            for id in ids {
                if !cache.contains_key(id) && !unknown.contains_key(id) && !missing.contains(id) {
                    missing.push(id.clone());
                }
            }
            missing
        };

        if !missing.is_empty() {
            let (response, products) = self
                .channel
                .query_product_details(ProductFamily::OneTime, &missing)
                .await;
            if response.is_ok() {
                let found: HashSet<&str> =
                    products.iter().map(|p| p.product_id.as_str()).collect();
                let now = Instant::now();
                let mut unknown = self.unknown.lock().unwrap_or_else(|e| e.into_inner());
                for id in missing.iter().filter(|id| !found.contains(id.as_str())) {
                    unknown.insert(id.clone(), now);
                }
                drop(unknown);
                self.store_one_time(products);
            } else {
                self.log.warn(&format!(
                    "product details query for {} ids failed: {:?}",
                    missing.len(),
                    response.code
                ));
            }
        }

        let cache = self.one_time.read().unwrap_or_else(|e| e.into_inner());
        ids.iter()
            .filter_map(|id| cache.get(id))
            .map(ProductDetails::descriptor)
            .collect()
    }

    /// Resolved offer for a cached subscription product.
    ///
    /// Legacy entries have a single price, returned as one pricing phase.
    pub fn offer_details(&self, query: &OfferQuery) -> Option<OfferDescriptor> {
        let cache = self
            .subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner());
        match cache.get(&query.product_id)? {
            CatalogEntry::Details(details) => {
                let offer = resolve_offer(
                    &details.subscription_offers,
                    &query.base_plan_id,
                    query.offer_id.as_deref(),
                )?;
                Some(OfferDescriptor {
                    product_id: details.product_id.clone(),
                    name: details.name.clone(),
                    pricing_phases: offer.pricing_phases.clone(),
                })
            }
            CatalogEntry::Sku(sku) => Some(OfferDescriptor {
                product_id: sku.sku.clone(),
                name: sku.title.clone(),
                pricing_phases: vec![sku.pricing_phase()],
            }),
        }
    }

    /// Cached one-time product.
    pub fn one_time_product(&self, product_id: &str) -> Option<ProductDetails> {
        self.one_time
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(product_id)
            .cloned()
    }

    /// Cached subscription product.
    pub fn subscription_product(&self, product_id: &str) -> Option<CatalogEntry> {
        self.subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(product_id)
            .cloned()
    }

    /// Whether `product_id` is a cached one-time product.
    pub fn contains_one_time(&self, product_id: &str) -> bool {
        self.one_time
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(product_id)
    }

    /// Whether `product_id` is a cached subscription product.
    pub fn contains_subscription(&self, product_id: &str) -> bool {
        self.subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(product_id)
    }

    /// Whether every product on the record is non-consumable.
    pub fn is_non_consumable(&self, record: &PurchaseRecord) -> bool {
        let set = self
            .non_consumables
            .read()
            .unwrap_or_else(|e| e.into_inner());
        record.all_products(|id| set.contains(id))
    }

    /// All cached products of a family.
    pub fn products(&self, family: ProductFamily) -> Vec<ProductDescriptor> {
        match family {
            ProductFamily::OneTime => self
                .one_time
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .values()
                .map(ProductDetails::descriptor)
                .collect(),
            ProductFamily::Subscription => self
                .subscriptions
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .values()
                .map(CatalogEntry::descriptor)
                .collect(),
        }
    }

    fn store_one_time(&self, products: Vec<ProductDetails>) {
        let mut cache = self.one_time.write().unwrap_or_else(|e| e.into_inner());
        let mut unknown = self.unknown.lock().unwrap_or_else(|e| e.into_inner());
        for product in products {
            unknown.remove(&product.product_id);
            cache.insert(product.product_id.clone(), product);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playbill_lib::test_utils::{MockBackend, MockBillingChannel, TestFixtures};

    fn catalog(
        channel: Arc<MockBillingChannel>,
        backend: Arc<MockBackend>,
    ) -> ProductCatalog {
        let log = BillingLog::new(true, backend.clone());
        ProductCatalog::new(channel, backend, log)
    }

    #[tokio::test]
    async fn test_one_time_refresh_unions_ids() {
        let channel = Arc::new(MockBillingChannel::new());
        channel.add_product(TestFixtures::one_time("gem.100"));
        channel.add_product(TestFixtures::one_time("no.ads"));
        let backend = Arc::new(
            MockBackend::new()
                .with_consumables(&["gem.100"])
                .with_non_consumables(&["no.ads", "gem.100"]),
        );
        let catalog = catalog(channel.clone(), backend);

        assert_eq!(catalog.refresh_one_time().await.unwrap(), 2);
        assert_eq!(
            channel.product_queries(),
            vec![vec!["gem.100".to_string(), "no.ads".to_string()]]
        );
        assert!(catalog.contains_one_time("gem.100"));
        assert!(catalog.is_non_consumable(&TestFixtures::purchased("no.ads", "t")));
    }

    #[tokio::test]
    async fn test_empty_candidates_keep_cache() {
        let channel = Arc::new(MockBillingChannel::new());
        channel.add_product(TestFixtures::one_time("gem.100"));
        let backend = Arc::new(MockBackend::new().with_consumables(&["gem.100"]));
        let catalog = catalog(channel.clone(), backend.clone());
        catalog.refresh_one_time().await.unwrap();

        backend.set_consumables(&[]);
        assert_eq!(catalog.refresh_one_time().await.unwrap(), 0);
        assert!(catalog.contains_one_time("gem.100"));
        assert_eq!(channel.product_queries().len(), 1);
        assert!(backend.logged("aborted"));
    }

    #[tokio::test]
    async fn test_partial_cache_hit_fetches_only_missing() {
        let channel = Arc::new(MockBillingChannel::new());
        channel.add_product(TestFixtures::one_time("a"));
        channel.add_product(TestFixtures::one_time("b"));
        let backend = Arc::new(MockBackend::new().with_consumables(&["a"]));
        let catalog = catalog(channel.clone(), backend);
        catalog.refresh_one_time().await.unwrap();

        let ids = vec!["b".to_string(), "a".to_string(), "zzz".to_string()];
        let found = catalog.query_product_details(&ids).await;
        let found: Vec<&str> = found.iter().map(|d| d.product_id.as_str()).collect();
        assert_eq!(found, vec!["b", "a"]);
        assert_eq!(
            channel.product_queries().last().unwrap(),
            &vec!["b".to_string(), "zzz".to_string()]
        );

        // Fully cached now apart from the unknown id.
        catalog.query_product_details(&ids[..2]).await;
        assert_eq!(channel.product_queries().len(), 2);
    }

    #[tokio::test]
    async fn test_legacy_subscription_refresh() {
        let channel = Arc::new(MockBillingChannel::new());
        channel.add_sku(TestFixtures::sku("sub.legacy", ProductFamily::Subscription));
        let backend = Arc::new(MockBackend::new().with_subscriptions(&["sub.legacy"]));
        let catalog = catalog(channel.clone(), backend);

        assert_eq!(catalog.refresh_subscriptions(false).await.unwrap(), 1);
        assert_eq!(channel.sku_queries(), 1);

        let offer = catalog
            .offer_details(&OfferQuery::new("sub.legacy", "any", None))
            .unwrap();
        assert_eq!(offer.pricing_phases.len(), 1);
    }

    #[tokio::test]
    async fn test_offer_details_resolves_offer() {
        let channel = Arc::new(MockBillingChannel::new());
        channel.add_product(TestFixtures::subscription(
            "sub.a",
            &[("p1", None, "tok-base"), ("p1", Some("o1"), "tok-o1")],
        ));
        let backend = Arc::new(MockBackend::new().with_subscriptions(&["sub.a"]));
        let catalog = catalog(channel, backend);
        catalog.refresh_subscriptions(true).await.unwrap();

        assert!(catalog
            .offer_details(&OfferQuery::new("sub.a", "p1", Some("o1".into())))
            .is_some());
        assert!(catalog
            .offer_details(&OfferQuery::new("sub.a", "p2", None))
            .is_none());
        assert!(catalog
            .offer_details(&OfferQuery::new("sub.b", "p1", None))
            .is_none());
    }

    #[tokio::test]
    async fn test_subscriptions_without_offers_are_not_cached() {
        let channel = Arc::new(MockBillingChannel::new());
        channel.add_product(TestFixtures::subscription("sub.a", &[("p1", None, "t")]));
        channel.add_product(TestFixtures::subscription("sub.bare", &[]));
        let backend = Arc::new(MockBackend::new().with_subscriptions(&["sub.a", "sub.bare"]));
        let catalog = catalog(channel, backend.clone());

        assert_eq!(catalog.refresh_subscriptions(true).await.unwrap(), 1);
        assert!(catalog.contains_subscription("sub.a"));
        assert!(!catalog.contains_subscription("sub.bare"));
        assert_eq!(catalog.products(ProductFamily::Subscription).len(), 1);
        assert!(backend.logged("without offers"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_ids_are_not_requeried_until_expiry() {
        let channel = Arc::new(MockBillingChannel::new());
        channel.add_product(TestFixtures::one_time("a"));
        let backend = Arc::new(MockBackend::new().with_consumables(&["a"]));
        let catalog = catalog(channel.clone(), backend);

        let ids = vec!["a".to_string(), "zzz".to_string()];
        assert_eq!(catalog.query_product_details(&ids).await.len(), 1);
        assert_eq!(channel.product_queries().len(), 1);

        assert_eq!(catalog.query_product_details(&ids).await.len(), 1);
        assert_eq!(channel.product_queries().len(), 1);

        tokio::time::sleep(UNKNOWN_ID_TTL + Duration::from_secs(1)).await;
        channel.add_product(TestFixtures::one_time("zzz"));
        assert_eq!(catalog.query_product_details(&ids).await.len(), 2);
        assert_eq!(
            channel.product_queries().last().unwrap(),
            &vec!["zzz".to_string()]
        );
    }
}
