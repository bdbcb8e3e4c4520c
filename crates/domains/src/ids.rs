//! # Identifiers
//!
//! Every identity in the marketplace is an opaque string with one canonical
//! textual form. Stored documents are inconsistent about how they spell a
//! user reference (plain strings, `{"$oid": ..}` wrappers, embedded documents),
//! so conversion happens here, once, and nothing downstream ever compares the
//! raw stored values.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
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

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_owned())
            }
        }
    };
}

opaque_id!(
    /// A marketplace user (buyer, seller or staff acting on their behalf).
    UserId
);
opaque_id!(
    /// A property listing owned by the listings subsystem.
    ListingId
);
opaque_id!(
    /// A buyer/seller thread about one listing.
    ConversationId
);
opaque_id!(MessageId);

impl ConversationId {
    /// Time-ordered id for a new conversation.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl UserId {
    /// Normalizes any stored user reference to the canonical form.
    ///
    /// Accepts a non-empty string, a number, an extended-JSON object id
    /// (`{"$oid": "..."}`) or an embedded document with `_id` / `id`.
    /// Returns `None` for null, empty strings and anything else.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| Self(trimmed.to_owned()))
            }
            Value::Number(n) => Some(Self(n.to_string())),
            Value::Object(map) => ["$oid", "_id", "id"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Self::from_json)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_id_from_plain_string_is_trimmed() {
        assert_eq!(UserId::from_json(&json!("  u-1 ")), Some(UserId::new("u-1")));
    }

    #[test]
    fn user_id_from_object_id_forms() {
        let oid = json!({ "$oid": "65f0c0ffee" });
        let embedded = json!({ "_id": { "$oid": "65f0c0ffee" }, "name": "Ana" });
        assert_eq!(UserId::from_json(&oid), Some(UserId::new("65f0c0ffee")));
        assert_eq!(UserId::from_json(&embedded), Some(UserId::new("65f0c0ffee")));
    }

    #[test]
    fn user_id_rejects_empty_and_null() {
        assert_eq!(UserId::from_json(&json!("")), None);
        assert_eq!(UserId::from_json(&json!("   ")), None);
        assert_eq!(UserId::from_json(&Value::Null), None);
        assert_eq!(UserId::from_json(&json!(true)), None);
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(ConversationId::generate(), ConversationId::generate());
        assert_ne!(MessageId::generate(), MessageId::generate());
    }
}
