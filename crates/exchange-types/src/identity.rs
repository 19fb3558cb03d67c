//! Identifiers for exchanges, fulfillments, elements and assets.
//!
//! All of these are opaque server-issued strings. They are wrapped in
//! newtypes so that an asset id can never be passed where a fulfillment id
//! is expected.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Exchange (the remote model being published into).
    ExchangeId
);
string_id!(
    /// Collection that owns the exchange.
    CollectionId
);
string_id!(
    /// Hub (tenant) that owns the collection.
    HubId
);
string_id!(
    /// Server-issued id of one publish transaction.
    FulfillmentId
);
string_id!(
    /// Node in the asset graph.
    AssetId
);
string_id!(
    /// User-facing element (a named group of attached geometry).
    ElementId
);
string_id!(
    /// Revision stamped on the exchange root after a successful sync.
    RevisionId
);

/// Full address of an exchange: which hub, which collection, which exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExchangeIdentity {
    pub exchange_id: ExchangeId,
    pub collection_id: CollectionId,
    pub hub_id: HubId,
}

impl ExchangeIdentity {
    pub fn new(
        exchange_id: impl Into<ExchangeId>,
        collection_id: impl Into<CollectionId>,
        hub_id: impl Into<HubId>,
    ) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            collection_id: collection_id.into(),
            hub_id: hub_id.into(),
        }
    }

    /// All three components must be present before any remote call is made.
    pub fn missing_components(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.exchange_id.is_empty() {
            missing.push("exchangeId");
        }
        if self.collection_id.is_empty() {
            missing.push("collectionId");
        }
        if self.hub_id.is_empty() {
            missing.push("hubId");
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_components().is_empty()
    }
}

impl fmt::Display for ExchangeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.hub_id, self.collection_id, self.exchange_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_display_and_completeness() {
        let id = ExchangeIdentity::new("ex-1", "col-9", "hub-3");
        assert_eq!(id.to_string(), "hub-3/col-9/ex-1");
        assert!(id.is_complete());

        let partial = ExchangeIdentity::new("ex-1", " ", "");
        assert_eq!(partial.missing_components(), vec!["collectionId", "hubId"]);
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let asset = AssetId::new("G1");
        assert_eq!(serde_json::to_string(&asset).unwrap(), "\"G1\"");
        let back: AssetId = serde_json::from_str("\"G1\"").unwrap();
        assert_eq!(back, asset);
    }
}
