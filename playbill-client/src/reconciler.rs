//! Purchase classification and the consume/acknowledge finish step.
//!
//! Every batch of purchase records, whether pushed by a live update or
//! returned by a reconciliation query, runs through two independent paths:
//!
//! - **one-time**: records whose products are all cached one-time products and
//!   whose state is purchased go to merchant validation, then the finish step
//! - **subscription**: already acknowledged records go straight into the
//!   active-subscription table; purchased but unacknowledged ones go to
//!   merchant validation, then the finish step
//!
//! The finish step is idempotent per purchase token: a ledger marks tokens in
//! flight and finished, and a second finish for the same token is reported as
//! [`FinishOutcome::Duplicate`] without a backend call. A user-initiated
//! purchase is still told about the outcome exactly once, even when a
//! background reconciliation got to its token first. Finished tokens are
//! dropped from the ledger once a successful query stops reporting them.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use playbill_lib::{
    BillingChannel, BillingError, MerchantBackend, ProductFamily, PurchaseRecord,
    SignatureVerifier, ValidationVerdict,
};

use crate::catalog::ProductCatalog;
use crate::events::{EventBus, PayEvent};
use crate::log::BillingLog;
use crate::subscriptions::ActiveSubscriptions;

/// What the finish step did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinishOutcome {
    /// The purchase was consumed.
    Consumed,
    /// The purchase was acknowledged.
    Acknowledged,
    /// The subscription was already acknowledged; only the table was updated.
    AlreadyAcknowledged,
    /// Another finish for this token is in flight or already succeeded.
    Duplicate,
    /// The signature did not verify; nothing was finished.
    SignatureInvalid,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TokenState {
    InFlight,
    Finished,
}

/// Ledger entry. `user` is set once a user-initiated caller is attached to
/// the token and owed (or already given) a finish event.
#[derive(Clone, Copy, Debug)]
struct LedgerEntry {
    family: ProductFamily,
    state: TokenState,
    user: bool,
}

/// Result of claiming a token for the finish step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Claim {
    /// The caller owns the finish and must call the platform.
    Owner,
    /// The token already finished without the user being told.
    Notify,
    /// Nothing to do; any owed event is published by the owner.
    Skip,
}

/// Drives validation and the finish step for purchase records.
pub struct Reconciler {
    channel: Arc<dyn BillingChannel>,
    backend: Arc<dyn MerchantBackend>,
    verifier: Option<Arc<dyn SignatureVerifier>>,
    catalog: Arc<ProductCatalog>,
    active: Arc<ActiveSubscriptions>,
    events: EventBus,
    log: BillingLog,
    subscriptions_enabled: bool,
    ledger: Mutex<HashMap<String, LedgerEntry>>,
}

impl Reconciler {
    /// Create a reconciler.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channel: Arc<dyn BillingChannel>,
        backend: Arc<dyn MerchantBackend>,
        verifier: Option<Arc<dyn SignatureVerifier>>,
        catalog: Arc<ProductCatalog>,
        active: Arc<ActiveSubscriptions>,
        events: EventBus,
        log: BillingLog,
        subscriptions_enabled: bool,
    ) -> Self {
        Self {
            channel,
            backend,
            verifier,
            catalog,
            active,
            events,
            log,
            subscriptions_enabled,
            ledger: Mutex::new(HashMap::new()),
        }
    }

    /// Classify a batch and drive each record through validation and finish.
    pub async fn handle_purchases(&self, records: &[PurchaseRecord], user_initiated: bool) {
        self.handle_one_time(records, user_initiated).await;
        if self.subscriptions_enabled {
            self.handle_subscriptions(records, user_initiated).await;
        }
    }

    /// Query owned purchases for every enabled family and reconcile them.
    ///
    /// A successful subscription query also evicts table entries whose token
    /// is no longer reported. Failed queries are logged and change nothing.
    pub async fn refresh_purchases(&self) {
        let (response, records) = self.channel.query_purchases(ProductFamily::OneTime).await;
        if response.is_ok() {
            self.prune_finished(ProductFamily::OneTime, &records);
            self.handle_one_time(&records, false).await;
        } else {
            self.log.warn(&format!(
                "one-time purchase query failed: {:?} {}",
                response.code, response.message
            ));
        }

        if !self.subscriptions_enabled {
            return;
        }
        let (response, records) = self
            .channel
            .query_purchases(ProductFamily::Subscription)
            .await;
        if !response.is_ok() {
            self.log.warn(&format!(
                "subscription purchase query failed: {:?} {}",
                response.code, response.message
            ));
            return;
        }
        self.prune_finished(ProductFamily::Subscription, &records);

        let live: HashSet<&str> = records
            .iter()
            .filter(|record| record.is_purchased())
            .map(|record| record.purchase_token.as_str())
            .collect();
        let evicted = self.active.retain_tokens(&live);
        if !evicted.is_empty() {
            self.log.debug(&format!(
                "evicted subscriptions no longer reported: {}",
                evicted.join(", ")
            ));
        }
        self.handle_subscriptions(&records, false).await;
    }

    /// Consume or acknowledge a validated purchase.
    ///
    /// Subscriptions are signature-checked first and always acknowledged.
    /// One-time purchases whose products are all non-consumable are
    /// acknowledged unless already acknowledged; everything else is consumed.
    /// Events are only published for user-initiated purchases, once per token:
    /// a user-initiated call that finds the token finished in the background
    /// publishes the success itself, and one that finds it in flight leaves
    /// the event to the call that owns the finish.
    pub async fn finish_purchase(
        &self,
        family: ProductFamily,
        record: &PurchaseRecord,
        user_initiated: bool,
    ) -> playbill_lib::Result<FinishOutcome> {
        let token = record.purchase_token.as_str();

        if family == ProductFamily::Subscription {
            if !self.signature_valid(record) {
                self.log
                    .warn(&format!("invalid signature on purchase {}, not finishing", token));
                if user_initiated {
                    self.events.publish(PayEvent::SignatureInvalid {
                        record: record.clone(),
                    });
                }
                return Ok(FinishOutcome::SignatureInvalid);
            }
            if record.acknowledged {
                self.active.record(record);
                return Ok(FinishOutcome::AlreadyAcknowledged);
            }
        }

        match self.begin(family, token, user_initiated) {
            Claim::Owner => {}
            Claim::Notify => {
                tracing::debug!(target: "playbill", token, "finished in background, notifying user");
                self.events.publish(PayEvent::ConsumeSucceeded {
                    family,
                    record: record.clone(),
                });
                return Ok(FinishOutcome::Duplicate);
            }
            Claim::Skip => {
                tracing::debug!(target: "playbill", token, "finish already in flight or done");
                return Ok(FinishOutcome::Duplicate);
            }
        }

        let acknowledge = family == ProductFamily::Subscription
            || (self.catalog.is_non_consumable(record) && !record.acknowledged);
        let response = if acknowledge {
            self.channel.acknowledge(token).await
        } else {
            self.channel.consume(token).await
        };

        if response.is_ok() {
            let notify = self.complete(token) || user_initiated;
            if family == ProductFamily::Subscription {
                self.active.record(&record.clone().with_acknowledged(true));
            }
            self.log.debug(&format!(
                "{} purchase {}",
                if acknowledge { "acknowledged" } else { "consumed" },
                token
            ));
            if notify {
                self.events.publish(PayEvent::ConsumeSucceeded {
                    family,
                    record: record.clone(),
                });
            }
            Ok(if acknowledge {
                FinishOutcome::Acknowledged
            } else {
                FinishOutcome::Consumed
            })
        } else {
            let notify = self.release(token) || user_initiated;
            self.log.warn(&format!(
                "finishing purchase {} failed: {:?} {}",
                token, response.code, response.message
            ));
            if notify {
                self.events.publish(PayEvent::ConsumeFailed {
                    family,
                    record: record.clone(),
                    code: response.code,
                    message: response.message.clone(),
                });
            }
            Err(BillingError::from(response))
        }
    }

    async fn handle_one_time(&self, records: &[PurchaseRecord], user_initiated: bool) {
        for record in records {
            if !record.all_products(|id| self.catalog.contains_one_time(id)) {
                continue;
            }
            if !record.is_purchased() {
                continue;
            }
            self.validate_then_finish(ProductFamily::OneTime, record, user_initiated)
                .await;
        }
    }

    async fn handle_subscriptions(&self, records: &[PurchaseRecord], user_initiated: bool) {
        for record in records {
            if !record.all_products(|id| self.catalog.contains_subscription(id)) {
                continue;
            }
            if !record.is_purchased() {
                continue;
            }
            if record.acknowledged {
                self.active.record(record);
            } else {
                self.validate_then_finish(ProductFamily::Subscription, record, user_initiated)
                    .await;
            }
        }
    }

    async fn validate_then_finish(
        &self,
        family: ProductFamily,
        record: &PurchaseRecord,
        user_initiated: bool,
    ) {
        if !self.needs_validation(&record.purchase_token, user_initiated) {
            tracing::debug!(
                target: "playbill",
                token = %record.purchase_token,
                "purchase already being finished, skipping validation"
            );
            return;
        }

        match self
            .backend
            .validate_purchase(user_initiated, family, record)
            .await
        {
            ValidationVerdict::Approved => {
                // Failures are logged and published inside the finish step.
                let _ = self.finish_purchase(family, record, user_initiated).await;
            }
            ValidationVerdict::Deferred => {
                self.log.debug(&format!(
                    "finish of {} deferred to merchant",
                    record.purchase_token
                ));
            }
            ValidationVerdict::Rejected(reason) => {
                self.log.warn(&format!(
                    "merchant rejected purchase {}: {}",
                    record.purchase_token, reason
                ));
            }
        }
    }

    fn signature_valid(&self, record: &PurchaseRecord) -> bool {
        match &self.verifier {
            Some(verifier) => verifier.verify(&record.original_json, &record.signature),
            None => {
                tracing::debug!(target: "playbill", "no signature verifier configured");
                true
            }
        }
    }

    fn begin(&self, family: ProductFamily, token: &str, user_initiated: bool) -> Claim {
        let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = ledger.get_mut(token) else {
            ledger.insert(
                token.to_string(),
                LedgerEntry {
                    family,
                    state: TokenState::InFlight,
                    user: user_initiated,
                },
            );
            return Claim::Owner;
        };
        if !user_initiated || entry.user {
            return Claim::Skip;
        }
        entry.user = true;
        match entry.state {
            TokenState::InFlight => Claim::Skip,
            TokenState::Finished => Claim::Notify,
        }
    }

    /// Mark `token` finished; true if a user-initiated caller joined while in flight.
    fn complete(&self, token: &str) -> bool {
        let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        match ledger.get_mut(token) {
            Some(entry) => {
                entry.state = TokenState::Finished;
                entry.user
            }
            None => false,
        }
    }

    /// Forget `token` after a failed finish; true if a user-initiated caller joined.
    fn release(&self, token: &str) -> bool {
        self.ledger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(token)
            .map(|entry| entry.user)
            .unwrap_or(false)
    }

    /// Background records skip tokens already tracked. A user-initiated record
    /// is validated unless a user-initiated caller is already attached.
    fn needs_validation(&self, token: &str, user_initiated: bool) -> bool {
        match self
            .ledger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(token)
        {
            None => true,
            Some(entry) => user_initiated && !entry.user,
        }
    }

    /// Drop finished tokens of `family` that a successful query no longer reports.
    fn prune_finished(&self, family: ProductFamily, reported: &[PurchaseRecord]) {
        let reported: HashSet<&str> = reported
            .iter()
            .map(|record| record.purchase_token.as_str())
            .collect();
        let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        let before = ledger.len();
        ledger.retain(|token, entry| {
            entry.family != family
                || entry.state == TokenState::InFlight
                || reported.contains(token.as_str())
        });
        let pruned = before - ledger.len();
        if pruned > 0 {
            tracing::debug!(target: "playbill", ?family, pruned, "pruned finished tokens");
        }
    }

    #[cfg(test)]
    fn ledger_len(&self) -> usize {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playbill_lib::test_utils::{MockBackend, MockBillingChannel, StaticVerifier, TestFixtures};
    use playbill_lib::{BillingResponse, ResponseCode};

    struct Harness {
        channel: Arc<MockBillingChannel>,
        backend: Arc<MockBackend>,
        active: Arc<ActiveSubscriptions>,
        events: EventBus,
        reconciler: Reconciler,
    }

    async fn harness(verifier: Option<Arc<StaticVerifier>>) -> Harness {
        let channel = Arc::new(MockBillingChannel::new());
        channel.add_product(TestFixtures::one_time("gem.100"));
        channel.add_product(TestFixtures::one_time("no.ads"));
        channel.add_product(TestFixtures::subscription("sub.a", &[("p1", None, "t")]));
        let backend = Arc::new(
            MockBackend::new()
                .with_consumables(&["gem.100"])
                .with_non_consumables(&["no.ads"])
                .with_subscriptions(&["sub.a"]),
        );
        let log = BillingLog::new(true, backend.clone());
        let catalog = Arc::new(ProductCatalog::new(
            channel.clone(),
            backend.clone(),
            log.clone(),
        ));
        catalog.refresh_one_time().await.unwrap();
        catalog.refresh_subscriptions(true).await.unwrap();

        let active = Arc::new(ActiveSubscriptions::new());
        let events = EventBus::new(100);
        let reconciler = Reconciler::new(
            channel.clone(),
            backend.clone(),
            verifier.map(|v| v as Arc<dyn SignatureVerifier>),
            catalog,
            active.clone(),
            events.clone(),
            log,
            true,
        );
        Harness {
            channel,
            backend,
            active,
            events,
            reconciler,
        }
    }

    #[tokio::test]
    async fn test_consumable_is_consumed() {
        let h = harness(None).await;
        let record = TestFixtures::purchased("gem.100", "tok-1");

        let outcome = h
            .reconciler
            .finish_purchase(ProductFamily::OneTime, &record, false)
            .await
            .unwrap();
        assert_eq!(outcome, FinishOutcome::Consumed);
        assert_eq!(h.channel.consumed(), vec!["tok-1".to_string()]);
    }

    #[tokio::test]
    async fn test_non_consumable_is_acknowledged() {
        let h = harness(None).await;
        let record = TestFixtures::purchased("no.ads", "tok-2");

        let outcome = h
            .reconciler
            .finish_purchase(ProductFamily::OneTime, &record, false)
            .await
            .unwrap();
        assert_eq!(outcome, FinishOutcome::Acknowledged);
        assert_eq!(h.channel.acknowledged(), vec!["tok-2".to_string()]);
    }

    #[tokio::test]
    async fn test_acknowledged_non_consumable_is_consumed() {
        let h = harness(None).await;
        let record = TestFixtures::acknowledged("no.ads", "tok-3");

        let outcome = h
            .reconciler
            .finish_purchase(ProductFamily::OneTime, &record, false)
            .await
            .unwrap();
        assert_eq!(outcome, FinishOutcome::Consumed);
    }

    #[tokio::test]
    async fn test_second_finish_is_duplicate() {
        let h = harness(None).await;
        let record = TestFixtures::purchased("gem.100", "tok-4");

        h.reconciler
            .finish_purchase(ProductFamily::OneTime, &record, true)
            .await
            .unwrap();
        let again = h
            .reconciler
            .finish_purchase(ProductFamily::OneTime, &record, true)
            .await
            .unwrap();
        assert_eq!(again, FinishOutcome::Duplicate);
        assert_eq!(h.channel.consumed().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_publishes_only_when_user_initiated() {
        let h = harness(None).await;
        h.channel
            .set_finish_response(BillingResponse::new(ResponseCode::ItemNotOwned, "nope"));
        let mut rx = h.events.receiver();

        let background = TestFixtures::purchased("gem.100", "tok-bg");
        assert!(h
            .reconciler
            .finish_purchase(ProductFamily::OneTime, &background, false)
            .await
            .is_err());

        let user = TestFixtures::purchased("gem.100", "tok-user");
        let err = h
            .reconciler
            .finish_purchase(ProductFamily::OneTime, &user, true)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ResponseCode::ItemNotOwned);

        match rx.try_recv().unwrap() {
            PayEvent::ConsumeFailed { record, code, .. } => {
                assert_eq!(record.purchase_token, "tok-user");
                assert_eq!(code, ResponseCode::ItemNotOwned);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());
        assert!(h.backend.logged("tok-bg"));
    }

    #[tokio::test]
    async fn test_failed_finish_can_be_retried() {
        let h = harness(None).await;
        let record = TestFixtures::purchased("gem.100", "tok-5");
        h.channel
            .set_finish_response(BillingResponse::new(ResponseCode::NetworkError, "down"));
        assert!(h
            .reconciler
            .finish_purchase(ProductFamily::OneTime, &record, false)
            .await
            .is_err());

        h.channel.set_finish_response(BillingResponse::ok());
        let outcome = h
            .reconciler
            .finish_purchase(ProductFamily::OneTime, &record, false)
            .await
            .unwrap();
        assert_eq!(outcome, FinishOutcome::Consumed);
    }

    #[tokio::test]
    async fn test_invalid_signature_short_circuits() {
        let verifier = Arc::new(StaticVerifier::new(false));
        let h = harness(Some(verifier.clone())).await;
        let mut rx = h.events.receiver();
        let record = TestFixtures::purchased("sub.a", "tok-sig");

        let outcome = h
            .reconciler
            .finish_purchase(ProductFamily::Subscription, &record, true)
            .await
            .unwrap();
        assert_eq!(outcome, FinishOutcome::SignatureInvalid);
        assert_eq!(verifier.calls(), 1);
        assert!(h.channel.acknowledged().is_empty());
        assert!(h.active.is_empty());
        assert!(matches!(
            rx.try_recv().unwrap(),
            PayEvent::SignatureInvalid { .. }
        ));
    }

    #[tokio::test]
    async fn test_pending_and_unknown_records_are_ignored() {
        let h = harness(None).await;
        let records = vec![
            TestFixtures::pending("gem.100", "tok-pending"),
            TestFixtures::purchased("unknown.sku", "tok-unknown"),
        ];
        h.reconciler.handle_purchases(&records, true).await;
        assert!(h.backend.validations().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_verdict_leaves_purchase_unfinished() {
        let h = harness(None).await;
        h.backend
            .set_verdict(ValidationVerdict::Rejected("order mismatch".into()));
        h.reconciler
            .handle_purchases(&[TestFixtures::purchased("gem.100", "tok-r")], true)
            .await;

        assert_eq!(h.backend.validations().len(), 1);
        assert!(h.channel.consumed().is_empty());
        assert!(h.backend.logged("order mismatch"));
    }

    #[tokio::test]
    async fn test_failed_subscription_query_keeps_table() {
        let h = harness(None).await;
        h.active
            .record(&TestFixtures::acknowledged("sub.a", "tok-keep"));
        h.channel
            .set_purchase_response(BillingResponse::new(ResponseCode::ServiceUnavailable, "x"));

        h.reconciler.refresh_purchases().await;
        assert!(h.active.get("sub.a").is_some());
    }

    fn finish_events(rx: &mut tokio::sync::broadcast::Receiver<PayEvent>) -> usize {
        let mut count = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, PayEvent::ConsumeSucceeded { .. }) {
                count += 1;
            }
        }
        count
    }

    #[tokio::test]
    async fn test_user_purchase_finished_in_background_still_notified() {
        let h = harness(None).await;
        let mut rx = h.events.receiver();
        let records = vec![TestFixtures::purchased("gem.100", "tok-user")];

        h.reconciler.handle_purchases(&records, false).await;
        assert_eq!(finish_events(&mut rx), 0);

        h.reconciler.handle_purchases(&records, true).await;
        assert_eq!(finish_events(&mut rx), 1);
        assert_eq!(h.channel.consumed(), vec!["tok-user".to_string()]);

        let validations = h.backend.validations();
        assert_eq!(validations.len(), 2);
        assert!(validations[1].user_initiated);

        // A repeated live update does not notify or validate again.
        h.reconciler.handle_purchases(&records, true).await;
        assert_eq!(finish_events(&mut rx), 0);
        assert_eq!(h.backend.validations().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_purchase_joining_in_flight_finish_is_notified_once() {
        let h = harness(None).await;
        h.channel.set_finish_delay(std::time::Duration::from_millis(50));
        let mut rx = h.events.receiver();
        let records = vec![TestFixtures::purchased("sub.a", "tok-join")];

        tokio::join!(
            h.reconciler.handle_purchases(&records, false),
            h.reconciler.handle_purchases(&records, true),
        );

        assert_eq!(h.channel.acknowledged(), vec!["tok-join".to_string()]);
        assert_eq!(finish_events(&mut rx), 1);
        assert!(h.backend.validations().iter().any(|v| v.user_initiated));
        assert_eq!(h.active.get("sub.a").unwrap().purchase_token, "tok-join");
    }

    #[tokio::test]
    async fn test_finished_tokens_pruned_when_no_longer_reported() {
        let h = harness(None).await;
        h.channel.set_purchases(
            ProductFamily::OneTime,
            vec![
                TestFixtures::purchased("gem.100", "tok-a"),
                TestFixtures::purchased("gem.100", "tok-b"),
            ],
        );
        h.channel.set_purchases(
            ProductFamily::Subscription,
            vec![TestFixtures::purchased("sub.a", "tok-s")],
        );
        h.reconciler.refresh_purchases().await;
        assert_eq!(h.reconciler.ledger_len(), 3);

        // Consumed tokens drop out of the query; the subscription stays owned.
        h.channel.set_purchases(ProductFamily::OneTime, vec![]);
        h.channel.set_purchases(
            ProductFamily::Subscription,
            vec![TestFixtures::acknowledged("sub.a", "tok-s")],
        );
        h.reconciler.refresh_purchases().await;
        assert_eq!(h.reconciler.ledger_len(), 1);
        assert_eq!(h.channel.consumed().len(), 2);
        assert_eq!(h.channel.acknowledged(), vec!["tok-s".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_query_does_not_prune() {
        let h = harness(None).await;
        h.reconciler
            .finish_purchase(
                ProductFamily::OneTime,
                &TestFixtures::purchased("gem.100", "tok-keep"),
                false,
            )
            .await
            .unwrap();
        h.channel
            .set_purchase_response(BillingResponse::new(ResponseCode::ServiceUnavailable, "x"));

        h.reconciler.refresh_purchases().await;
        assert_eq!(h.reconciler.ledger_len(), 1);
    }
}
