//! Prelude module for convenient imports.
//!
//! ```rust,ignore
//! use playbill_lib::prelude::*;
//! ```

// Core types
pub use crate::{ProductFamily, PurchaseRecord, PurchaseState, ScreenId};

// Error handling
pub use crate::errors::{BillingError, BillingResponse, ResponseCode};
pub use crate::Result;

// Collaborator traits
pub use crate::backend::{MerchantBackend, SignatureVerifier, ValidationVerdict};
pub use crate::channel::{BillingChannel, Feature};

// Launch parameters
pub use crate::params::{OfferQuery, PurchaseParams, SubscriptionParams};
