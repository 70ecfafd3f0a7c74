//! Identifier types shared across the workspace.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

/// Identity of the principal (user, session owner) that tools and records belong to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(u64);

impl OwnerId {
    /// Owner of the built-in tools seeded at startup.
    pub const SYSTEM: Self = Self(0);

    /// Creates an owner identifier from its numeric value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl Display for OwnerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl From<u64> for OwnerId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl FromStr for OwnerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().parse::<u64>().map_err(Error::from)?;
        Ok(Self(value))
    }
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a random identifier.
            #[must_use]
            pub fn random() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            #[must_use]
            pub const fn as_uuid(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::random()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::parse_str(s).map_err(Error::from)?;
                Ok(Self::from_uuid(uuid))
            }
        }
    };
}

uuid_id!(
    /// Storage identifier of a persisted tool definition.
    ToolId
);

uuid_id!(
    /// Identifier of a persisted execution or chat record.
    RecordId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_id_parses_its_display_form() {
        let id = ToolId::random();
        let parsed = id.to_string().parse::<ToolId>().expect("parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn owner_id_parses_trimmed_numbers() {
        assert_eq!(" 42 ".parse::<OwnerId>().unwrap(), OwnerId::new(42));
        assert!(matches!(
            "abc".parse::<OwnerId>(),
            Err(Error::InvalidOwnerId { .. })
        ));
    }

    #[test]
    fn system_owner_is_zero() {
        assert_eq!(OwnerId::SYSTEM.get(), 0);
        assert_eq!(OwnerId::from(0).to_string(), "0");
    }
}
