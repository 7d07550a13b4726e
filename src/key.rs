//! Entity keys - composite identity of an edge endpoint
//!
//! Text form: `type/bundle/id@version`, e.g. `node/article/12@40`.
//! Non-versioned entity types always carry version `0`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version id used for entity types without versioning.
pub const UNVERSIONED: i64 = 0;

/// Full composite key of one endpoint of a reference edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub entity_type: String,
    pub bundle: String,
    pub entity_id: i64,
    pub version_id: i64,
}

impl EntityKey {
    pub fn new(
        entity_type: impl Into<String>,
        bundle: impl Into<String>,
        entity_id: i64,
        version_id: i64,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            bundle: bundle.into(),
            entity_id,
            version_id,
        }
    }

    /// Key for an entity whose type is not versioned
    pub fn unversioned(entity_type: impl Into<String>, bundle: impl Into<String>, entity_id: i64) -> Self {
        Self::new(entity_type, bundle, entity_id, UNVERSIONED)
    }

    /// The (type, id) pair used to key per-entity caches
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.entity_type.clone(), self.entity_id)
    }

    /// Parse `type/bundle/id@version` (the `@version` part defaults to 0)
    pub fn parse(s: &str) -> Result<Self> {
        let (path, version) = match s.rsplit_once('@') {
            Some((path, version)) => {
                let version = version
                    .parse::<i64>()
                    .map_err(|_| Error::InvalidKey(format!("bad version in '{}'", s)))?;
                (path, version)
            }
            None => (s, UNVERSIONED),
        };

        let parts: Vec<&str> = path.split('/').collect();
        let [entity_type, bundle, id] = parts.as_slice() else {
            return Err(Error::InvalidKey(format!(
                "expected type/bundle/id[@version], got '{}'",
                s
            )));
        };

        if entity_type.is_empty() || bundle.is_empty() {
            return Err(Error::InvalidKey(format!("empty type or bundle in '{}'", s)));
        }

        let entity_id = id
            .parse::<i64>()
            .map_err(|_| Error::InvalidKey(format!("bad entity id in '{}'", s)))?;

        Ok(Self::new(*entity_type, *bundle, entity_id, version))
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}@{}",
            self.entity_type, self.bundle, self.entity_id, self.version_id
        )
    }
}

impl FromStr for EntityKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for EntityKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EntityKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        EntityKey::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Version-independent identity of an entity: `(entity_type, entity_id)`.
///
/// Every per-entity cache is keyed by this pair, never by the type alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: String,
    pub entity_id: i64,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, entity_id: i64) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}
