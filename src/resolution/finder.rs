//! Candidate lookup.
//!
//! Read-only. Directory failures are logged and the finder carries on with
//! whatever it could read: resolution degrades, it never fails.

use std::collections::HashSet;

use crate::context::ResolutionContext;
use crate::entity::{Entity, EntityId};
use crate::platform::normalize_platform;
use crate::similarity::{name_similarity, names_overlap};
use crate::storage::EntityDirectory;

/// Finds directory entities that could be meant by an identifier.
pub struct CandidateFinder<'a> {
    directory: &'a dyn EntityDirectory,
    prefilter_threshold: f32,
}

impl<'a> CandidateFinder<'a> {
    /// Creates a finder over a directory.
    #[must_use]
    pub fn new(directory: &'a dyn EntityDirectory, prefilter_threshold: f32) -> Self {
        Self {
            directory,
            prefilter_threshold,
        }
    }

    /// Candidate entities for `identifier`, deduplicated, in discovery order.
    ///
    /// Name search is scoped to the context room (every room when none is
    /// given). A platform hint adds a cross-room scan for that platform's
    /// handles and user ids.
    #[must_use]
    pub fn find(
        &self,
        identifier: &str,
        context: &ResolutionContext,
        platform_hint: Option<&str>,
    ) -> Vec<Entity> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        let rooms = match context.room_id.as_deref() {
            Some(room) => vec![room.to_string()],
            None => self.rooms(),
        };
        for room in &rooms {
            for entity in self.room_members(room) {
                if self.name_matches(identifier, &entity) && seen.insert(entity.id) {
                    out.push(entity);
                }
            }
        }

        if let Some(platform) = platform_hint {
            let platform = normalize_platform(platform);
            for room in self.rooms() {
                for entity in self.room_members(&room) {
                    if seen.contains(&entity.id) {
                        continue;
                    }
                    let hit = entity
                        .platform_identity(&platform)
                        .is_some_and(|identity| identity.matches_identifier(identifier));
                    if hit {
                        seen.insert(entity.id);
                        out.push(entity);
                    }
                }
            }
        }

        tracing::debug!(identifier, candidates = out.len(), "candidate search finished");
        out
    }

    /// Every entity in every room the agent knows, deduplicated.
    #[must_use]
    pub fn all_known(&self) -> Vec<Entity> {
        let mut seen: HashSet<EntityId> = HashSet::new();
        self.rooms()
            .iter()
            .flat_map(|room| self.room_members(room))
            .filter(|e| seen.insert(e.id))
            .collect()
    }

    fn name_matches(&self, identifier: &str, entity: &Entity) -> bool {
        entity.names.iter().any(|name| {
            names_overlap(identifier, name)
                || name_similarity(identifier, name) >= self.prefilter_threshold
        })
    }

    fn rooms(&self) -> Vec<String> {
        self.directory.list_rooms_for_agent().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "listing rooms failed, continuing without them");
            Vec::new()
        })
    }

    fn room_members(&self, room: &str) -> Vec<Entity> {
        self.directory.list_entities_for_room(room).unwrap_or_else(|e| {
            tracing::warn!(room, error = %e, "listing room members failed, continuing without them");
            Vec::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::PlatformIdentity;
    use crate::storage::{InMemoryDirectory, StorageError};
    use crate::entity::NewEntity;

    fn seeded() -> InMemoryDirectory {
        let dir = InMemoryDirectory::new();
        dir.insert(Entity::new("Alice"), Some("general")).unwrap();
        dir.insert(Entity::new("Alicia"), Some("general")).unwrap();
        dir.insert(Entity::new("Bob"), Some("general")).unwrap();
        dir.insert(Entity::new("Alice Cooper"), Some("music")).unwrap();
        dir
    }

    #[test]
    fn room_scoped_name_search() {
        let dir = seeded();
        let finder = CandidateFinder::new(&dir, 0.75);
        let found = finder.find("alice", &ResolutionContext::in_room("general"), None);
        let names: Vec<_> = found.iter().map(|e| e.names[0].as_str()).collect();
        assert_eq!(names, vec!["Alice", "Alicia"]);
    }

    #[test]
    fn no_room_searches_everywhere() {
        let dir = seeded();
        let finder = CandidateFinder::new(&dir, 0.75);
        let found = finder.find("alice", &ResolutionContext::new(), None);
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn platform_hint_scans_other_rooms() {
        let dir = seeded();
        let mut remote = Entity::new("R. Smith");
        remote.set_platform_identity(PlatformIdentity::new("discord", "@rsmith", 0.9));
        dir.insert(remote.clone(), Some("elsewhere")).unwrap();

        let finder = CandidateFinder::new(&dir, 0.75);
        let ctx = ResolutionContext::in_room("general");
        assert!(finder.find("rsmith", &ctx, None).is_empty());
        let found = finder.find("rsmith", &ctx, Some("Discord"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, remote.id);
    }

    struct Flaky(InMemoryDirectory);

    impl EntityDirectory for Flaky {
        fn get_entity_by_id(&self, id: EntityId) -> Result<Option<Entity>, StorageError> {
            self.0.get_entity_by_id(id)
        }
        fn create_entity(&self, spec: NewEntity) -> Result<EntityId, StorageError> {
            self.0.create_entity(spec)
        }
        fn update_entity(&self, entity: Entity) -> Result<(), StorageError> {
            self.0.update_entity(entity)
        }
        fn list_entities_for_room(&self, room_id: &str) -> Result<Vec<Entity>, StorageError> {
            if room_id == "music" {
                Err(StorageError::ConnectionError("reset".to_string()))
            } else {
                self.0.list_entities_for_room(room_id)
            }
        }
        fn list_rooms_for_agent(&self) -> Result<Vec<String>, StorageError> {
            self.0.list_rooms_for_agent()
        }
    }

    #[test]
    fn directory_failures_yield_partial_results() {
        let dir = Flaky(seeded());
        let finder = CandidateFinder::new(&dir, 0.75);
        let found = finder.find("alice", &ResolutionContext::new(), None);
        assert_eq!(found.len(), 2);
        assert!(finder.find("alice", &ResolutionContext::in_room("music"), None).is_empty());
    }
}
