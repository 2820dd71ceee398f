//! Canonical entities and identity anchors.
//!
//! An [`Entity`] is the directory's representation of one real-world actor.
//! Its platform identities live inside the metadata map under
//! [`PLATFORM_IDENTITIES_KEY`] so that a directory which only knows about
//! names and free-form metadata can still persist them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::platform::{normalize_platform, PlatformIdentity};

/// Metadata key holding the platform → identity object map.
pub const PLATFORM_IDENTITIES_KEY: &str = "platformIdentities";

/// Metadata key holding the ids of entities folded into this one.
pub const MERGED_FROM_KEY: &str = "mergedFrom";

/// Globally unique, stable entity identifier.
///
/// # Examples
///
/// ```
/// use kyroid::EntityId;
///
/// let id = EntityId::new();
/// assert!(!id.is_nil());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Creates a new random entity ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an entity ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns true if this is a nil (all zeros) UUID.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EntityId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// The directory's record for one actor.
///
/// # Examples
///
/// ```
/// use kyroid::Entity;
///
/// let entity = Entity::new("Alice");
/// assert_eq!(entity.primary_name(), Some("Alice"));
/// assert_eq!(entity.version, 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Globally unique identifier.
    pub id: EntityId,

    /// Display names, primary name first.
    pub names: Vec<String>,

    /// Arbitrary metadata, including nested platform identities.
    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// When the entity was first created.
    pub created_at: DateTime<Utc>,

    /// When the entity was last modified.
    pub updated_at: DateTime<Utc>,

    /// Version number (incremented on every mutation).
    pub version: u64,
}

impl Entity {
    /// Creates a new entity with a single name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(EntityId::new(), name)
    }

    /// Creates a new entity with a specific ID.
    #[must_use]
    pub fn with_id(id: EntityId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            names: vec![name.into()],
            metadata: Map::new(),
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// The first display name, if any.
    #[must_use]
    pub fn primary_name(&self) -> Option<&str> {
        self.names.first().map(String::as_str)
    }

    /// Adds a display name unless an equal one (ignoring case) exists.
    pub fn add_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        let exists = self
            .names
            .iter()
            .any(|existing| existing.eq_ignore_ascii_case(&name));
        if !exists && !name.trim().is_empty() {
            self.names.push(name);
            self.touch();
        }
    }

    /// Returns true if any name equals `identifier`, ignoring ASCII case.
    #[must_use]
    pub fn has_name(&self, identifier: &str) -> bool {
        let needle = identifier.trim();
        self.names.iter().any(|n| n.trim().eq_ignore_ascii_case(needle))
    }

    /// Platform identities stored in metadata.
    ///
    /// Malformed entries are skipped; the directory owns the raw data and a
    /// single bad record must not hide the rest.
    #[must_use]
    pub fn platform_identities(&self) -> Vec<PlatformIdentity> {
        let Some(Value::Object(map)) = self.metadata.get(PLATFORM_IDENTITIES_KEY) else {
            return Vec::new();
        };
        map.values()
            .filter_map(|v| serde_json::from_value::<PlatformIdentity>(v.clone()).ok())
            .collect()
    }

    /// Looks up the identity for one platform.
    #[must_use]
    pub fn platform_identity(&self, platform: &str) -> Option<PlatformIdentity> {
        let platform = normalize_platform(platform);
        self.platform_identities()
            .into_iter()
            .find(|identity| identity.platform == platform)
    }

    /// Inserts or replaces the identity for its platform.
    pub fn set_platform_identity(&mut self, identity: PlatformIdentity) {
        let Ok(value) = serde_json::to_value(&identity) else {
            return;
        };
        let entry = self
            .metadata
            .entry(PLATFORM_IDENTITIES_KEY.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(map) = entry {
            map.insert(identity.platform.clone(), value);
        }
        self.touch();
    }

    /// Updates the `updated_at` timestamp and increments the version.
    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.version += 1;
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Entity {}

impl std::hash::Hash for Entity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Request to create an entity in the directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewEntity {
    /// Display names, primary first.
    pub names: Vec<String>,

    /// Initial metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// Room the entity is first seen in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_creation() {
        let id1 = EntityId::new();
        let id2 = EntityId::new();
        assert_ne!(id1, id2);
        assert!(!id1.is_nil());
    }

    #[test]
    fn test_entity_add_name_dedups_case_insensitively() {
        let mut entity = Entity::new("Alice");
        entity.add_name("alice");
        entity.add_name("Ali");
        assert_eq!(entity.names, vec!["Alice".to_string(), "Ali".to_string()]);
        assert_eq!(entity.version, 2);
    }

    #[test]
    fn test_has_name_ignores_case_and_whitespace() {
        let entity = Entity::new("Alice");
        assert!(entity.has_name(" alice "));
        assert!(!entity.has_name("Alicia"));
    }

    #[test]
    fn test_platform_identities_roundtrip_through_metadata() {
        let mut entity = Entity::new("Bob");
        entity.set_platform_identity(PlatformIdentity::new("Discord", "@bob", 0.8));
        entity.set_platform_identity(PlatformIdentity::new("telegram", "bobby", 0.6).verified());

        let identities = entity.platform_identities();
        assert_eq!(identities.len(), 2);
        let discord = entity.platform_identity("discord").unwrap();
        assert_eq!(discord.handle, "@bob");
        assert!(entity.platform_identity("TELEGRAM").unwrap().verified);
    }

    #[test]
    fn test_platform_identity_replaces_same_platform() {
        let mut entity = Entity::new("Bob");
        entity.set_platform_identity(PlatformIdentity::new("discord", "old", 0.5));
        entity.set_platform_identity(PlatformIdentity::new("discord", "new", 0.9));
        let identities = entity.platform_identities();
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].handle, "new");
    }

    #[test]
    fn test_malformed_identities_are_skipped() {
        let mut entity = Entity::new("Eve");
        entity.metadata.insert(
            PLATFORM_IDENTITIES_KEY.to_string(),
            serde_json::json!({ "discord": "not-an-object" }),
        );
        assert!(entity.platform_identities().is_empty());
    }

    #[test]
    fn test_entity_serialization() {
        let entity = Entity::new("Test");
        let json = serde_json::to_string(&entity).unwrap();
        let decoded: Entity = serde_json::from_str(&json).unwrap();
        assert_eq!(entity.id, decoded.id);
        assert_eq!(entity.names, decoded.names);
    }
}
