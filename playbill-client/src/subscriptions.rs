//! Active subscription table: product id to the latest confirmed purchase.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use playbill_lib::PurchaseRecord;

/// Confirmed (acknowledged, purchased) subscriptions keyed by product id.
///
/// Ordered by product id, so [`ActiveSubscriptions::first`] is deterministic.
#[derive(Debug, Default)]
pub struct ActiveSubscriptions {
    entries: RwLock<BTreeMap<String, PurchaseRecord>>,
}

impl ActiveSubscriptions {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a confirmed purchase under each of its product ids.
    pub fn record(&self, record: &PurchaseRecord) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        for product_id in &record.products {
            entries.insert(product_id.clone(), record.clone());
        }
    }

    /// Entry for a product id.
    pub fn get(&self, product_id: &str) -> Option<PurchaseRecord> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(product_id)
            .cloned()
    }

    /// First entry in product-id order.
    pub fn first(&self) -> Option<(String, PurchaseRecord)> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .next()
            .map(|(id, record)| (id.clone(), record.clone()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All entries, or only those for `ids`.
    pub fn query(&self, ids: Option<&[String]>) -> HashMap<String, PurchaseRecord> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        match ids {
            None => entries
                .iter()
                .map(|(id, record)| (id.clone(), record.clone()))
                .collect(),
            Some(ids) => ids
                .iter()
                .filter_map(|id| entries.get(id).map(|record| (id.clone(), record.clone())))
                .collect(),
        }
    }

    /// Drop entries whose purchase token is not in `live_tokens`.
    ///
    /// Returns the evicted product ids.
    pub fn retain_tokens(&self, live_tokens: &HashSet<&str>) -> Vec<String> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let evicted: Vec<String> = entries
            .iter()
            .filter(|(_, record)| !live_tokens.contains(record.purchase_token.as_str()))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &evicted {
            entries.remove(id);
        }
        evicted
    }
}
