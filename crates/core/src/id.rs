//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Declares a UUID-backed identifier newtype.
///
/// All identifiers are UUIDv7 (time-ordered) when freshly minted, serialize
/// transparently as plain UUID strings, and parse back with a typed error so
/// callers can tell *which* id was malformed.
macro_rules! uuid_id {
    ($(#[$doc:meta])* $t:ident) => {
        $(#[$doc])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(Uuid);

        impl $t {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s).map_err(|e| {
                    DomainError::invalid_id(format!("{}: {}", stringify!($t), e))
                })?;
                Ok(Self(uuid))
            }
        }
    };
}

uuid_id!(
    /// Identifier of a clinic. The clinic is the isolation boundary: every
    /// event stream and read model row is scoped to exactly one clinic.
    ClinicId
);

uuid_id!(
    /// Identifier of the staff member an action is attributed to.
    ActorId
);

uuid_id!(
    /// Identifier of an aggregate root (stream id within a clinic).
    AggregateId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrips_through_display() {
        let id = ClinicId::new();
        let parsed: ClinicId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn parse_rejects_garbage_with_typed_error() {
        let err = "not-a-uuid".parse::<ActorId>().unwrap_err();
        assert!(matches!(err, DomainError::InvalidId(_)));
        assert!(err.to_string().contains("ActorId"));
    }

    #[test]
    fn fresh_ids_are_version_7() {
        // v7 ids carry a creation timestamp, which keeps store iteration stable.
        let id = AggregateId::new();
        assert_eq!(id.as_uuid().get_version_num(), 7);
        assert!(id.as_uuid().get_timestamp().is_some());
    }
}
