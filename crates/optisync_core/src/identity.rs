//! Entity identifier.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Unique identifier for a persisted entity.
///
/// Identifiers are either empty or a UUIDv7:
/// - The empty value marks an entity that has not been created remotely yet
/// - Non-empty identifiers are immutable once attached and never reused
/// - UUIDv7 embeds a timestamp, so identifiers sort by creation time
///
/// The canonical string form of the empty identifier is `""`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Identifier(Option<Uuid>);

impl Identifier {
    /// Returns the empty identifier.
    #[inline]
    #[must_use]
    pub const fn empty() -> Self {
        Self(None)
    }

    /// Generates a new time-ordered identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Some(Uuid::now_v7()))
    }

    /// Creates an identifier from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(Some(uuid))
    }

    /// Parses the canonical string form. `""` is the empty identifier.
    pub fn parse(s: &str) -> CoreResult<Self> {
        if s.is_empty() {
            return Ok(Self::empty());
        }
        Uuid::parse_str(s)
            .map(Self::from_uuid)
            .map_err(|_| CoreError::InvalidIdentifier(s.to_string()))
    }

    /// Returns true if no remote identity has been attached.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Returns the underlying UUID, if any.
    #[must_use]
    pub const fn as_uuid(&self) -> Option<&Uuid> {
        self.0.as_ref()
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(uuid) => write!(f, "Identifier({uuid})"),
            None => f.write_str("Identifier(<empty>)"),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(uuid) => write!(f, "{}", uuid.hyphenated()),
            None => Ok(()),
        }
    }
}

impl FromStr for Identifier {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Uuid> for Identifier {
    fn from(uuid: Uuid) -> Self {
        Self::from_uuid(uuid)
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
