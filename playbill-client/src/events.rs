//! Payment lifecycle events.
//!
//! # Delivery
//!
//! The bus is a `tokio::sync::broadcast` channel. Publishing never blocks and
//! never fails: with no subscriber attached the event is simply dropped, and
//! late subscribers see nothing published before they attached. A subscriber
//! that falls more than `capacity` events behind loses the oldest ones.

use playbill_lib::{ProductFamily, PurchaseRecord, ResponseCode};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Event published by the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PayEvent {
    /// The purchase flow completed for this record.
    PaySucceeded {
        /// Purchased record
        record: PurchaseRecord,
    },
    /// The purchase flow failed. User cancellation is never published.
    PayFailed {
        /// Platform response code
        code: ResponseCode,
        /// Platform debug message
        message: String,
    },
    /// A user-initiated purchase was consumed or acknowledged.
    ConsumeSucceeded {
        /// Product family
        family: ProductFamily,
        /// Finished record
        record: PurchaseRecord,
    },
    /// Finishing a user-initiated purchase failed.
    ConsumeFailed {
        /// Product family
        family: ProductFamily,
        /// Record that could not be finished
        record: PurchaseRecord,
        /// Platform response code
        code: ResponseCode,
        /// Platform debug message
        message: String,
    },
    /// A user-initiated purchase carried an invalid signature and was not finished.
    SignatureInvalid {
        /// Rejected record
        record: PurchaseRecord,
    },
}

/// Broadcast bus for [`PayEvent`]s.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<PayEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event. Returns the number of subscribers it reached.
    pub fn publish(&self, event: PayEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Number of attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Raw receiver for async consumers.
    pub fn receiver(&self) -> broadcast::Receiver<PayEvent> {
        self.sender.subscribe()
    }

    /// Run `on_event` for every event on a background task.
    ///
    /// The returned subscription cancels itself when dropped, which binds it
    /// to the owner's scope. Use [`EventSubscription::detach`] for owners
    /// without a scope.
    pub fn subscribe<F>(&self, on_event: F) -> EventSubscription
    where
        F: Fn(PayEvent) + Send + Sync + 'static,
    {
        let mut rx = self.sender.subscribe();
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut cancel_armed = true;
            loop {
                tokio::select! {
                    res = &mut cancel_rx, if cancel_armed => {
                        if res.is_ok() {
                            break;
                        }
                        // Handle dropped without cancelling: keep delivering.
                        cancel_armed = false;
                    }
                    received = rx.recv() => match received {
                        Ok(event) => on_event(event),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(target: "playbill", skipped, "event subscriber lagged");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        });

        EventSubscription {
            cancel_tx: Some(cancel_tx),
            task,
        }
    }
}

/// Scope-bound subscription: cancelled on drop.
pub struct EventSubscription {
    cancel_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl EventSubscription {
    /// Stop delivery now.
    pub fn cancel(mut self) {
        self.send_cancel();
    }

    /// Keep delivering after this value is dropped; cancel through the handle.
    pub fn detach(mut self) -> SubscriptionHandle {
        SubscriptionHandle {
            cancel_tx: self.cancel_tx.take(),
        }
    }

    /// Whether the delivery task is still running.
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    fn send_cancel(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.send_cancel();
    }
}

/// Manually cancelled subscription.
pub struct SubscriptionHandle {
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl SubscriptionHandle {
    /// Stop delivery.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Check if the subscription was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_tx.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn failed(n: i32) -> PayEvent {
        PayEvent::PayFailed {
            code: ResponseCode::Error,
            message: n.to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let bus = EventBus::new(4);
        assert_eq!(bus.publish(failed(1)), 0);

        let mut rx = bus.receiver();
        bus.publish(failed(2));
        assert_eq!(rx.recv().await.unwrap(), failed(2));
    }

    #[tokio::test]
    async fn test_callback_subscription_delivers_in_order() {
        let bus = EventBus::new(16);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = bus.subscribe(move |event| {
            let _ = tx.send(event);
        });

        for n in 0..3 {
            bus.publish(failed(n));
        }
        for n in 0..3 {
            let event = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
            assert_eq!(event, Some(failed(n)));
        }
    }

    #[tokio::test]
    async fn test_dropping_subscription_stops_delivery() {
        let bus = EventBus::new(16);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = bus.subscribe(move |event| {
            let _ = tx.send(event);
        });
        drop(sub);

        // Task exits and drops the callback, closing the mpsc channel.
        let closed = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(closed, None);
    }

    #[tokio::test]
    async fn test_detached_handle_cancel() {
        let bus = EventBus::new(16);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = bus
            .subscribe(move |event| {
                let _ = tx.send(event);
            })
            .detach();

        bus.publish(failed(7));
        let event = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(event, Some(failed(7)));

        assert!(!handle.is_cancelled());
        handle.cancel();
        assert!(handle.is_cancelled());
        let closed = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(closed, None);
    }
}
