//! Play Billing library.
//!
//! This crate stays stateless: it defines the billing data model, the
//! response-code taxonomy and the collaborator traits that the stateful
//! `playbill-client` crate drives.
//!
//! # Features
//!
//! - **Data model**: product, offer and purchase records as delivered by the
//!   platform billing channel
//! - **Response codes**: the platform's integer codes and a typed error enum
//! - **Collaborator traits**: [`BillingChannel`] for the platform side,
//!   [`MerchantBackend`] for the business side, [`SignatureVerifier`] for
//!   purchase integrity
//!
//! # Example
//!
//! ```
//! use playbill_lib::{ProductFamily, PurchaseProfile};
//!
//! let profile = PurchaseProfile::new(ProductFamily::Subscription, "SUB-1001");
//! let blob = profile.to_json().unwrap();
//! assert!(blob.contains("subscription_no"));
//! ```

pub mod backend;
pub mod channel;
pub mod errors;
pub mod params;
pub mod prelude;
pub mod product;
pub mod purchase;

/// Mock collaborators for billing tests.
///
/// This module is only available with the `test-utils` feature or in test builds.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use backend::{MerchantBackend, SignatureVerifier, ValidationVerdict};
pub use channel::{BillingChannel, Feature};
pub use errors::{BillingError, BillingResponse, ResponseCode};
pub use params::{
    BillingFlowParams, OfferQuery, PurchaseParams, ReplacementMode, ReplacementSpec,
    SubscriptionParams,
};
pub use product::{
    OfferDescriptor, PricingPhase, ProductDescriptor, ProductDetails, SkuDetails,
    SubscriptionOffer,
};
pub use purchase::{ProductFamily, PurchaseProfile, PurchaseRecord, PurchaseState};

/// Common result alias for billing operations.
pub type Result<T> = std::result::Result<T, BillingError>;

/// Identifier for a presentation surface (screen) that can host a billing flow.
///
/// Screens listed in the client configuration trigger purchase reconciliation
/// when they come back to the foreground.
///
/// # Example
///
/// ```
/// use playbill_lib::ScreenId;
///
/// let screen: ScreenId = "store".into();
/// assert_eq!(screen.as_str(), "store");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ScreenId(pub String);

impl ScreenId {
    /// Create a new ScreenId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the screen ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ScreenId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ScreenId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for ScreenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
