//! Merge execution.
//!
//! The directory write is the commit point: everything before it only reads,
//! everything after it (graph folding, relationship redirect) is idempotent
//! cleanup whose failures are logged.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::entity::{Entity, EntityId, MERGED_FROM_KEY, PLATFORM_IDENTITIES_KEY};
use crate::error::{ExecutionError, IdentityResult};
use crate::graph::IdentityGraphStore;
use crate::merge::proposal::{EntityMergeProposal, FieldResolution};
use crate::storage::{EntityDirectory, RelationshipRedirector};

/// Result of a completed merge.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// Primary and candidates as loaded before the merge.
    pub before: Vec<Entity>,
    /// The primary as written.
    pub after: Entity,
    /// Candidates that were actually folded in.
    pub merged_ids: Vec<EntityId>,
    /// Fields kept from the primary pending manual review.
    pub unresolved_fields: Vec<String>,
}

/// Executes merge proposals against the collaborators.
pub struct MergeExecutor<'a> {
    directory: &'a dyn EntityDirectory,
    graphs: &'a IdentityGraphStore,
    redirector: &'a dyn RelationshipRedirector,
    sample_limit: usize,
}

impl<'a> MergeExecutor<'a> {
    /// Creates an executor.
    #[must_use]
    pub fn new(
        directory: &'a dyn EntityDirectory,
        graphs: &'a IdentityGraphStore,
        redirector: &'a dyn RelationshipRedirector,
        sample_limit: usize,
    ) -> Self {
        Self {
            directory,
            graphs,
            redirector,
            sample_limit,
        }
    }

    /// Executes a proposal.
    ///
    /// # Errors
    ///
    /// - `EntityNotFound` if the primary cannot be loaded (nothing is written)
    /// - `MergeFailed` if no candidate can be loaded
    /// - a directory error if the final write fails
    pub fn execute(&self, proposal: &EntityMergeProposal) -> IdentityResult<MergeOutcome> {
        let primary = self
            .directory
            .get_entity_by_id(proposal.primary_id)?
            .ok_or(ExecutionError::EntityNotFound {
                id: proposal.primary_id,
            })?;

        let mut candidates = Vec::new();
        for &id in &proposal.candidate_ids {
            if id == primary.id {
                continue;
            }
            match self.directory.get_entity_by_id(id) {
                Ok(Some(entity)) => candidates.push(entity),
                Ok(None) => tracing::warn!(entity_id = %id, "merge candidate missing, skipped"),
                Err(e) => {
                    tracing::warn!(entity_id = %id, error = %e, "merge candidate unreadable, skipped");
                }
            }
        }
        if candidates.is_empty() {
            return Err(ExecutionError::MergeFailed {
                reason: format!("no candidate of {} could be loaded", proposal.key),
            }
            .into());
        }

        let mut before = Vec::with_capacity(candidates.len() + 1);
        before.push(primary.clone());
        before.extend(candidates.iter().cloned());

        let mut merged = primary;
        let mut unresolved = BTreeSet::new();
        for candidate in &candidates {
            for name in &candidate.names {
                merged.add_name(name.clone());
            }
            merge_metadata(&mut merged, candidate, proposal, &mut unresolved);
        }
        record_merged_from(&mut merged, &candidates);
        merged.touch();

        self.directory.update_entity(merged.clone())?;

        let merged_ids: Vec<EntityId> = candidates.iter().map(|c| c.id).collect();
        for &id in &merged_ids {
            if let Err(e) = self.graphs.absorb(merged.id, id, self.sample_limit) {
                tracing::warn!(primary = %merged.id, candidate = %id, error = %e, "identity graph fold failed");
            }
        }
        if let Err(e) = self.redirector.redirect(&merged_ids, merged.id) {
            tracing::warn!(primary = %merged.id, error = %e, "relationship redirect failed");
        }

        let unresolved_fields: Vec<String> = unresolved.into_iter().collect();
        if !unresolved_fields.is_empty() {
            tracing::warn!(
                primary = %merged.id,
                fields = ?unresolved_fields,
                "merge kept primary values pending review"
            );
        }
        tracing::info!(primary = %merged.id, merged = merged_ids.len(), "entities merged");

        Ok(MergeOutcome {
            before,
            after: merged,
            merged_ids,
            unresolved_fields,
        })
    }
}

/// Folds one candidate's metadata into the primary.
fn merge_metadata(
    primary: &mut Entity,
    candidate: &Entity,
    proposal: &EntityMergeProposal,
    unresolved: &mut BTreeSet<String>,
) {
    for identity in candidate.platform_identities() {
        let keep_ours = primary
            .platform_identity(&identity.platform)
            .is_some_and(|ours| ours.confidence >= identity.confidence);
        if !keep_ours {
            primary.set_platform_identity(identity);
        }
    }

    for (field, theirs) in &candidate.metadata {
        if field == PLATFORM_IDENTITIES_KEY || field == MERGED_FROM_KEY {
            continue;
        }
        let Some(ours) = primary.metadata.get_mut(field) else {
            primary.metadata.insert(field.clone(), theirs.clone());
            continue;
        };
        if ours == theirs {
            continue;
        }
        match proposal.conflict_resolution.get(field) {
            Some(FieldResolution::MergeAll) => union_values(ours, theirs),
            Some(FieldResolution::ManualReview) => {
                unresolved.insert(field.clone());
            }
            Some(FieldResolution::KeepPrimary) | None => {}
        }
    }
}

/// Unions arrays (skipping duplicates) and objects (primary keys win).
/// Mismatched kinds keep the primary value.
fn union_values(ours: &mut Value, theirs: &Value) {
    match (ours, theirs) {
        (Value::Array(mine), Value::Array(other)) => {
            for item in other {
                if !mine.contains(item) {
                    mine.push(item.clone());
                }
            }
        }
        (Value::Object(mine), Value::Object(other)) => {
            for (k, v) in other {
                mine.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }
        _ => {}
    }
}

fn record_merged_from(primary: &mut Entity, candidates: &[Entity]) {
    let entry = primary
        .metadata
        .entry(MERGED_FROM_KEY.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if !entry.is_array() {
        *entry = Value::Array(Vec::new());
    }
    if let Value::Array(list) = entry {
        for candidate in candidates {
            let mut record = Map::new();
            record.insert("id".to_string(), Value::String(candidate.id.to_string()));
            record.insert("names".to_string(), Value::from(candidate.names.clone()));
            record.insert(
                "mergedAt".to_string(),
                Value::String(chrono::Utc::now().to_rfc3339()),
            );
            list.push(Value::Object(record));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::IdentityGraph;
    use crate::merge::proposal::MergeStrategy;
    use crate::platform::PlatformIdentity;
    use crate::storage::{InMemoryDirectory, NoopRedirector, RedirectError};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<(Vec<EntityId>, EntityId)>>);

    impl RelationshipRedirector for Recording {
        fn redirect(&self, from: &[EntityId], to: EntityId) -> Result<(), RedirectError> {
            self.0.lock().unwrap().push((from.to_vec(), to));
            Ok(())
        }
    }

    struct Failing;

    impl RelationshipRedirector for Failing {
        fn redirect(&self, _from: &[EntityId], _to: EntityId) -> Result<(), RedirectError> {
            Err(RedirectError("unavailable".to_string()))
        }
    }

    fn proposal(primary: &Entity, candidate: &Entity) -> EntityMergeProposal {
        EntityMergeProposal::new(primary.id, vec![candidate.id], 1.0, MergeStrategy::Absorb)
            .with_snapshots(vec![primary.clone(), candidate.clone()], 0.0)
    }

    #[test]
    fn merges_names_metadata_and_identities() {
        let dir = InMemoryDirectory::new();
        let mut primary = Entity::new("Robert");
        primary.metadata.insert("city".into(), json!("Paris"));
        primary.metadata.insert("tags".into(), json!(["chess"]));
        primary.set_platform_identity(PlatformIdentity::new("discord", "bob", 0.6));
        let mut candidate = Entity::new("Bob");
        candidate.metadata.insert("city".into(), json!("Berlin"));
        candidate.metadata.insert("tags".into(), json!(["go", "chess"]));
        candidate.metadata.insert("age".into(), json!(41));
        candidate.set_platform_identity(PlatformIdentity::new("discord", "bobby", 0.9));
        candidate.set_platform_identity(PlatformIdentity::new("telegram", "bob_t", 0.7));
        dir.insert(primary.clone(), Some("r")).unwrap();
        dir.insert(candidate.clone(), Some("r")).unwrap();

        let graphs = IdentityGraphStore::new();
        graphs.insert(IdentityGraph::from_entity(&candidate)).unwrap();
        let redirector = Recording::default();
        let exec = MergeExecutor::new(&dir, &graphs, &redirector, 10);

        let outcome = exec.execute(&proposal(&primary, &candidate)).unwrap();
        let after = dir.get_entity_by_id(primary.id).unwrap().unwrap();

        assert_eq!(after.names, vec!["Robert".to_string(), "Bob".to_string()]);
        assert_eq!(after.metadata["city"], json!("Paris"));
        assert_eq!(after.metadata["tags"], json!(["chess", "go"]));
        assert_eq!(after.metadata["age"], json!(41));
        assert_eq!(after.platform_identity("discord").unwrap().handle, "bobby");
        assert!(after.platform_identity("telegram").is_some());
        assert_eq!(after.metadata[MERGED_FROM_KEY].as_array().unwrap().len(), 1);
        assert_eq!(outcome.unresolved_fields, vec!["city".to_string()]);
        assert_eq!(outcome.before.len(), 2);
        assert_eq!(outcome.merged_ids, vec![candidate.id]);

        assert!(graphs.get(candidate.id).unwrap().is_none());
        assert!(graphs.get(primary.id).unwrap().unwrap().identity("telegram").is_some());
        assert_eq!(
            redirector.0.lock().unwrap().as_slice(),
            &[(vec![candidate.id], primary.id)]
        );
    }

    #[test]
    fn missing_primary_writes_nothing() {
        let dir = InMemoryDirectory::new();
        let candidate = Entity::new("Bob");
        dir.insert(candidate.clone(), None).unwrap();
        let ghost = Entity::new("Ghost");
        let graphs = IdentityGraphStore::new();
        let exec = MergeExecutor::new(&dir, &graphs, &NoopRedirector, 10);

        let err = exec.execute(&proposal(&ghost, &candidate)).unwrap_err();
        assert!(err.is_not_found());
        let unchanged = dir.get_entity_by_id(candidate.id).unwrap().unwrap();
        assert_eq!(unchanged.version, candidate.version);
    }

    #[test]
    fn no_loadable_candidate_fails() {
        let dir = InMemoryDirectory::new();
        let primary = Entity::new("Bob");
        dir.insert(primary.clone(), None).unwrap();
        let graphs = IdentityGraphStore::new();
        let exec = MergeExecutor::new(&dir, &graphs, &NoopRedirector, 10);

        let err = exec.execute(&proposal(&primary, &Entity::new("Ghost"))).unwrap_err();
        assert!(matches!(
            err,
            crate::error::IdentityError::Execution(ExecutionError::MergeFailed { .. })
        ));
    }

    #[test]
    fn redirect_failure_does_not_fail_merge() {
        let dir = InMemoryDirectory::new();
        let primary = Entity::new("Bob");
        let candidate = Entity::new("Bobby");
        dir.insert(primary.clone(), None).unwrap();
        dir.insert(candidate.clone(), None).unwrap();
        let graphs = IdentityGraphStore::new();
        let exec = MergeExecutor::new(&dir, &graphs, &Failing, 10);
        assert!(exec.execute(&proposal(&primary, &candidate)).is_ok());
    }
}
