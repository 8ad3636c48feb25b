//! Purchase records and the profile blob attached at launch time.

use serde::{Deserialize, Serialize};

use crate::errors::BillingError;

/// Product family: decides which catalog and which finish step apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductFamily {
    /// One-time products, consumable or not.
    #[serde(rename = "inapp")]
    OneTime,
    /// Auto-renewing subscriptions.
    #[serde(rename = "subs")]
    Subscription,
}

impl ProductFamily {
    /// Platform product type tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneTime => "inapp",
            Self::Subscription => "subs",
        }
    }
}

impl std::fmt::Display for ProductFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment state of a purchase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseState {
    /// Unknown or not yet reported.
    #[default]
    Unspecified,
    /// Payment completed.
    Purchased,
    /// Awaiting payment (e.g. cash at a store).
    Pending,
}

/// A purchase as reported by the billing channel.
///
/// The purchase token is the identity of the transaction. The same record can
/// arrive several times, from a live update and from a reconciliation query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRecord {
    /// Product ids covered by this purchase.
    pub products: Vec<String>,
    /// Payment state.
    pub state: PurchaseState,
    /// Whether the purchase was already acknowledged.
    pub acknowledged: bool,
    /// Opaque transaction token.
    pub purchase_token: String,
    /// Platform order id, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    /// Raw JSON the signature covers.
    #[serde(default)]
    pub original_json: String,
    /// Signature over `original_json`.
    #[serde(default)]
    pub signature: String,
    /// Account id attached at launch time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obfuscated_account_id: Option<String>,
    /// Profile blob attached at launch time, see [`PurchaseProfile`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obfuscated_profile_id: Option<String>,
}

impl PurchaseRecord {
    /// Create a record with the given products, token and state.
    pub fn new(
        products: Vec<String>,
        purchase_token: impl Into<String>,
        state: PurchaseState,
    ) -> Self {
        Self {
            products,
            state,
            acknowledged: false,
            purchase_token: purchase_token.into(),
            order_id: None,
            original_json: String::new(),
            signature: String::new(),
            obfuscated_account_id: None,
            obfuscated_profile_id: None,
        }
    }

    /// Mark the record as acknowledged.
    pub fn with_acknowledged(mut self, acknowledged: bool) -> Self {
        self.acknowledged = acknowledged;
        self
    }

    /// Attach signed payload and signature.
    pub fn with_signature(
        mut self,
        original_json: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        self.original_json = original_json.into();
        self.signature = signature.into();
        self
    }

    /// Attach the launch-time profile blob.
    pub fn with_profile(mut self, profile: &PurchaseProfile) -> crate::Result<Self> {
        self.obfuscated_profile_id = Some(profile.to_json()?);
        Ok(self)
    }

    /// Whether payment completed.
    pub fn is_purchased(&self) -> bool {
        self.state == PurchaseState::Purchased
    }

    /// Whether every product on this record satisfies `known`.
    ///
    /// A record without products never matches.
    pub fn all_products(&self, known: impl Fn(&str) -> bool) -> bool {
        !self.products.is_empty() && self.products.iter().all(|id| known(id))
    }

    /// Decode the launch-time profile blob, if one was attached.
    pub fn profile(&self) -> crate::Result<Option<PurchaseProfile>> {
        match self.obfuscated_profile_id.as_deref() {
            None | Some("") => Ok(None),
            Some(blob) => PurchaseProfile::from_json(blob).map(Some),
        }
    }
}

/// Business order number and family tag attached to a launch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PurchaseProfile {
    /// Product family.
    pub family: ProductFamily,
    /// Business order number.
    pub order_no: String,
}

#[derive(Serialize, Deserialize)]
struct ProfileBlob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    charge_no: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subscription_no: Option<String>,
    sku_type: ProductFamily,
}

impl PurchaseProfile {
    /// Create a new profile.
    pub fn new(family: ProductFamily, order_no: impl Into<String>) -> Self {
        Self {
            family,
            order_no: order_no.into(),
        }
    }

    /// Encode as the JSON blob stored in `obfuscated_profile_id`.
    ///
    /// One-time launches carry `charge_no`, subscriptions carry `subscription_no`.
    pub fn to_json(&self) -> crate::Result<String> {
        let blob = match self.family {
            ProductFamily::OneTime => ProfileBlob {
                charge_no: Some(self.order_no.clone()),
                subscription_no: None,
                sku_type: self.family,
            },
            ProductFamily::Subscription => ProfileBlob {
                charge_no: None,
                subscription_no: Some(self.order_no.clone()),
                sku_type: self.family,
            },
        };
        Ok(serde_json::to_string(&blob)?)
    }

    /// Decode from the JSON blob.
    pub fn from_json(blob: &str) -> crate::Result<Self> {
        let parsed: ProfileBlob = serde_json::from_str(blob)?;
        let order_no = match parsed.sku_type {
            ProductFamily::OneTime => parsed.charge_no,
            ProductFamily::Subscription => parsed.subscription_no,
        };
        let order_no = order_no.ok_or_else(|| {
            BillingError::InvalidProfile(format!(
                "missing order number for {}",
                parsed.sku_type
            ))
        })?;
        Ok(Self::new(parsed.sku_type, order_no))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_blob_field_names() {
        let json = PurchaseProfile::new(ProductFamily::OneTime, "C-1")
            .to_json()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["charge_no"], "C-1");
        assert_eq!(value["sku_type"], "inapp");
        assert!(value.get("subscription_no").is_none());
    }

    #[test]
    fn test_profile_decodes_subscription_blob() {
        let profile =
            PurchaseProfile::from_json(r#"{"subscription_no":"S-9","sku_type":"subs"}"#).unwrap();
        assert_eq!(profile.family, ProductFamily::Subscription);
        assert_eq!(profile.order_no, "S-9");
    }

    #[test]
    fn test_profile_missing_order_number() {
        let err = PurchaseProfile::from_json(r#"{"sku_type":"subs"}"#).unwrap_err();
        assert!(matches!(err, BillingError::InvalidProfile(_)));
    }

    #[test]
    fn test_record_profile_absent() {
        let record = PurchaseRecord::new(vec!["a".into()], "t", PurchaseState::Purchased);
        assert_eq!(record.profile().unwrap(), None);
    }

    #[test]
    fn test_all_products_requires_non_empty() {
        let empty = PurchaseRecord::new(vec![], "t", PurchaseState::Purchased);
        assert!(!empty.all_products(|_| true));

        let record = PurchaseRecord::new(
            vec!["a".into(), "b".into()],
            "t",
            PurchaseState::Purchased,
        );
        assert!(record.all_products(|id| id == "a" || id == "b"));
        assert!(!record.all_products(|id| id == "a"));
    }
}
