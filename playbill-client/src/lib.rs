//! Purchase reconciliation and connection resilience for Play Billing.
//!
//! [`BillingClient`] keeps a resilient connection to the billing service,
//! caches the product catalog, classifies purchase records, drives the
//! consume/acknowledge step exactly once per purchase token, and resolves
//! subscription upgrades and downgrades. Outcomes are published on an
//! [`EventBus`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use playbill_client::{BillingClient, BillingConfig, PayEvent, SubscriptionMode};
//!
//! let config = BillingConfig::default()
//!     .with_subscription_mode(SubscriptionMode::Single)
//!     .with_refresh_screen("store");
//! let client = BillingClient::new(config, channel, backend, None)?;
//! client.init();
//!
//! let _events = client.subscribe(|event| match event {
//!     PayEvent::ConsumeSucceeded { record, .. } => println!("delivered {}", record.purchase_token),
//!     _ => {}
//! });
//! ```

pub mod catalog;
pub mod client;
pub mod config;
pub mod connection;
pub mod events;
pub mod lifecycle;
pub mod log;
pub mod reconciler;
pub mod replacement;
pub mod service;
pub mod subscriptions;

pub use catalog::{CatalogEntry, ProductCatalog, UNKNOWN_ID_TTL};
pub use client::BillingClient;
pub use config::{BillingConfig, SubscriptionMode};
pub use connection::{ConnectionManager, ConnectionSignal, ConnectionState};
pub use events::{EventBus, EventSubscription, PayEvent, SubscriptionHandle};
pub use lifecycle::RefreshTrigger;
pub use log::BillingLog;
pub use reconciler::{FinishOutcome, Reconciler};
pub use replacement::{resolve_offer, LaunchSpec, SubscriptionResolver};
pub use service::ServiceVariant;
pub use subscriptions::ActiveSubscriptions;

pub use playbill_lib::{BillingError, BillingResponse, ResponseCode};

/// Common result alias for client operations.
pub type Result<T> = std::result::Result<T, BillingError>;
