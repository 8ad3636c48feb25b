//! Error types for billing operations.
//!
//! The platform reports every outcome as an integer response code plus a
//! debug message. [`ResponseCode`] mirrors those integers, [`BillingResponse`]
//! is the value-typed result handed back to presentation layers, and
//! [`BillingError`] is the typed error used inside the SDK.

use serde::{Deserialize, Serialize};

/// Billing response codes reported by the platform, plus SDK-local failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ResponseCode {
    /// Generic SDK-local failure (e.g. product missing from cache)
    Fail = -200,
    /// The request reached the maximum timeout before the platform responded
    ServiceTimeout = -3,
    /// The requested feature is not supported by the installed store
    FeatureNotSupported = -2,
    /// The app is not connected to the billing service
    ServiceDisconnected = -1,
    /// Success
    Ok = 0,
    /// The user pressed back or cancelled a dialog
    UserCanceled = 1,
    /// The service is currently unavailable
    ServiceUnavailable = 2,
    /// Billing is unavailable on this device or account
    BillingUnavailable = 3,
    /// The requested product is not available for purchase
    ItemUnavailable = 4,
    /// Invalid arguments provided to the API
    DeveloperError = 5,
    /// Fatal error during the API action
    Error = 6,
    /// The item is already owned
    ItemAlreadyOwned = 7,
    /// The item is not owned and cannot be consumed
    ItemNotOwned = 8,
    /// A network error occurred during the operation
    NetworkError = 12,
}

impl ResponseCode {
    /// Raw integer value as reported by the platform.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Map a raw platform integer to a code. Unknown values become [`ResponseCode::Error`].
    pub fn from_i32(code: i32) -> Self {
        match code {
            -200 => Self::Fail,
            -3 => Self::ServiceTimeout,
            -2 => Self::FeatureNotSupported,
            -1 => Self::ServiceDisconnected,
            0 => Self::Ok,
            1 => Self::UserCanceled,
            2 => Self::ServiceUnavailable,
            3 => Self::BillingUnavailable,
            4 => Self::ItemUnavailable,
            5 => Self::DeveloperError,
            7 => Self::ItemAlreadyOwned,
            8 => Self::ItemNotOwned,
            12 => Self::NetworkError,
            _ => Self::Error,
        }
    }

    /// Whether this code signals success.
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl From<i32> for ResponseCode {
    fn from(code: i32) -> Self {
        Self::from_i32(code)
    }
}

/// Outcome of a platform call or a purchase launch: a code and a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingResponse {
    /// Response code.
    pub code: ResponseCode,
    /// Human-readable debug message.
    pub message: String,
}

impl BillingResponse {
    /// Create a response with the given code and message.
    pub fn new(code: ResponseCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Successful response with an empty message.
    pub fn ok() -> Self {
        Self::new(ResponseCode::Ok, "")
    }

    /// Response returned when billing is not available on this device at all.
    pub fn unsupported() -> Self {
        Self::default()
    }

    /// Whether the response signals success.
    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }

    /// Convert a non-OK response into a [`BillingError`].
    pub fn into_result(self) -> Result<(), BillingError> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(BillingError::from(self))
        }
    }
}

impl Default for BillingResponse {
    fn default() -> Self {
        Self::new(
            ResponseCode::BillingUnavailable,
            "billing is not supported on the current device",
        )
    }
}

/// Typed billing error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BillingError {
    /// No connection to the billing service.
    #[error("billing service is not connected")]
    ServiceUnavailable,

    /// The requested feature is not supported on this device or configuration.
    #[error("feature not supported: {0}")]
    FeatureNotSupported(String),

    /// The product id is not present in the local catalog.
    #[error("product not found: {product_id}")]
    ProductNotFound {
        /// Product id that was requested
        product_id: String,
    },

    /// Bad parameters supplied by the caller.
    #[error("developer error: {0}")]
    DeveloperError(String),

    /// The user cancelled the flow.
    #[error("user canceled")]
    UserCanceled,

    /// Opaque failure reported by the platform billing channel.
    #[error("billing error {code:?}: {message}")]
    Backend {
        /// Platform response code
        code: ResponseCode,
        /// Platform debug message
        message: String,
    },

    /// A purchase carried a profile blob that could not be parsed.
    #[error("invalid purchase profile: {0}")]
    InvalidProfile(String),
}

impl BillingError {
    /// Get the response code for this error.
    pub fn code(&self) -> ResponseCode {
        match self {
            Self::ServiceUnavailable => ResponseCode::ServiceDisconnected,
            Self::FeatureNotSupported(_) => ResponseCode::FeatureNotSupported,
            Self::ProductNotFound { .. } => ResponseCode::Fail,
            Self::DeveloperError(_) => ResponseCode::DeveloperError,
            Self::UserCanceled => ResponseCode::UserCanceled,
            Self::Backend { code, .. } => *code,
            Self::InvalidProfile(_) => ResponseCode::DeveloperError,
        }
    }

    /// Get the error message as an owned String.
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Returns true if this error is potentially recoverable by retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ServiceUnavailable => true,
            Self::Backend { code, .. } => matches!(
                code,
                ResponseCode::ServiceTimeout
                    | ResponseCode::ServiceDisconnected
                    | ResponseCode::ServiceUnavailable
                    | ResponseCode::NetworkError
                    | ResponseCode::Error
            ),
            _ => false,
        }
    }

    /// Create a product-not-found error.
    pub fn product_not_found(product_id: impl Into<String>) -> Self {
        Self::ProductNotFound {
            product_id: product_id.into(),
        }
    }
}

impl From<BillingResponse> for BillingError {
    fn from(response: BillingResponse) -> Self {
        match response.code {
            ResponseCode::UserCanceled => Self::UserCanceled,
            ResponseCode::ServiceDisconnected => Self::ServiceUnavailable,
            ResponseCode::FeatureNotSupported => Self::FeatureNotSupported(response.message),
            ResponseCode::DeveloperError => Self::DeveloperError(response.message),
            code => Self::Backend {
                code,
                message: response.message,
            },
        }
    }
}

impl From<BillingError> for BillingResponse {
    fn from(error: BillingError) -> Self {
        match error {
            BillingError::Backend { code, message } => BillingResponse::new(code, message),
            other => BillingResponse::new(other.code(), other.to_string()),
        }
    }
}

impl From<serde_json::Error> for BillingError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidProfile(err.to_string())
    }
}
