//! Identifier types for entitle.
//!
//! Two families of identifiers exist:
//!
//! - **Slug identifiers** (`CustomerId`, `ProductId`, `FeatureId`,
//!   `EntityId`, `OrgId`): caller-chosen, human-readable, validated on
//!   construction.
//! - **Row identifiers** (`RowId`): generated for persisted relationship
//!   rows. ULID-based so they are time-ordered; "oldest row first"
//!   comparisons are a plain `Ord` on the id.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Maximum length of a slug identifier.
const MAX_SLUG_LEN: usize = 128;

/// Macro to define a validated, caller-chosen slug identifier type.
///
/// Generates a newtype around `String` with:
/// - `Clone`, `PartialEq`, `Eq`, `Hash`, `Ord`
/// - `Serialize`, `Deserialize` (as string, validated)
/// - `FromStr`, `Display`, `Debug`
/// - `TryFrom<String>`, `Into<String>`, `as_str`
macro_rules! slug_id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier, validating the slug.
            ///
            /// # Errors
            ///
            /// Returns an error if the slug is empty, too long, or contains
            /// whitespace.
            pub fn new(s: impl Into<String>) -> Result<Self, IdError> {
                let s = s.into();
                if s.is_empty() {
                    return Err(IdError::Empty);
                }
                if s.len() > MAX_SLUG_LEN {
                    return Err(IdError::TooLong);
                }
                if s.chars().any(char::is_whitespace) {
                    return Err(IdError::Whitespace);
                }
                Ok(Self(s))
            }

            /// Return the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

slug_id_type!(OrgId, "An organization identifier.\n\nScopes every customer together with the environment.");
slug_id_type!(CustomerId, "A customer identifier, chosen by the calling application.");
slug_id_type!(ProductId, "A product identifier.\n\nProduct versions are separate rows sharing one `ProductId`.");
slug_id_type!(FeatureId, "A feature identifier referenced by entitlements and usage prices.");
slug_id_type!(EntityId, "A sub-entity identifier (for example a seat) scoping balances below the customer.");

/// The kind of persisted relationship row a [`RowId`] names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowKind {
    /// A customer's attachment to one product version.
    CustomerProduct,
    /// A per-feature balance record under a customer product.
    CustomerEntitlement,
    /// A join row from a customer product to one of its prices.
    CustomerPrice,
    /// A per-entity balance slot marked for deferred removal.
    Replaceable,
}

impl RowKind {
    /// The string prefix used when rendering ids of this kind.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::CustomerProduct => "cus_prod",
            Self::CustomerEntitlement => "cus_ent",
            Self::CustomerPrice => "cus_price",
            Self::Replaceable => "rep",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "cus_prod" => Some(Self::CustomerProduct),
            "cus_ent" => Some(Self::CustomerEntitlement),
            "cus_price" => Some(Self::CustomerPrice),
            "rep" => Some(Self::Replaceable),
            _ => None,
        }
    }
}

/// A generated, time-ordered identifier for a persisted row.
///
/// Rendered as `<prefix>_<ulid>`, e.g. `cus_prod_01J8ZQ7…`. Ordering ignores
/// the prefix and follows the ULID timestamp, so sorting rows by id sorts
/// them oldest-first.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RowId {
    kind: RowKind,
    ulid: Ulid,
}

impl RowId {
    /// Generate a new row id of the given kind with the current timestamp.
    #[must_use]
    pub fn generate(kind: RowKind) -> Self {
        Self {
            kind,
            ulid: Ulid::new(),
        }
    }

    /// The kind of row this id names.
    #[must_use]
    pub const fn kind(&self) -> RowKind {
        self.kind
    }

    /// The underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> &Ulid {
        &self.ulid
    }
}

impl PartialOrd for RowId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RowId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ulid
            .cmp(&other.ulid)
            .then_with(|| self.kind.prefix().cmp(other.kind.prefix()))
    }
}

impl FromStr for RowId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, ulid) = s.rsplit_once('_').ok_or(IdError::InvalidRowId)?;
        let kind = RowKind::from_prefix(prefix).ok_or(IdError::InvalidRowId)?;
        let ulid = Ulid::from_string(ulid).map_err(|_| IdError::InvalidRowId)?;
        Ok(Self { kind, ulid })
    }
}

impl fmt::Debug for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowId({self})")
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.kind.prefix(), self.ulid)
    }
}

impl TryFrom<String> for RowId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RowId> for String {
    fn from(id: RowId) -> Self {
        id.to_string()
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The identifier is empty.
    #[error("identifier is empty")]
    Empty,

    /// The identifier exceeds the maximum length.
    #[error("identifier exceeds {MAX_SLUG_LEN} characters")]
    TooLong,

    /// The identifier contains whitespace.
    #[error("identifier contains whitespace")]
    Whitespace,

    /// The input is not a valid `<prefix>_<ulid>` row id.
    #[error("invalid row id format")]
    InvalidRowId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_id_roundtrip() {
        let id = CustomerId::new("cus-123").unwrap();
        let parsed: CustomerId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn slug_id_rejects_invalid() {
        assert_eq!(CustomerId::new(""), Err(IdError::Empty));
        assert_eq!(CustomerId::new("a b"), Err(IdError::Whitespace));
        assert_eq!(ProductId::new("x".repeat(200)), Err(IdError::TooLong));
    }

    #[test]
    fn slug_id_serde_json() {
        let id = ProductId::new("pro").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"pro\"");
        let parsed: ProductId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn row_id_roundtrip() {
        let id = RowId::generate(RowKind::CustomerProduct);
        let rendered = id.to_string();
        assert!(rendered.starts_with("cus_prod_"));
        let parsed: RowId = rendered.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn row_id_orders_by_time() {
        let a = RowId::generate(RowKind::CustomerEntitlement);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = RowId::generate(RowKind::CustomerEntitlement);
        assert!(a < b);
    }

    #[test]
    fn row_id_rejects_unknown_prefix() {
        assert!("widget_01J8ZQ7V9GXRRT1ABCDEF01234".parse::<RowId>().is_err());
        assert!("cus_prod".parse::<RowId>().is_err());
    }
}
