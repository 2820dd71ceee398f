//! In-memory identity graph store.
//!
//! Owned by a resolver instance. A multi-process deployment would back this
//! with an external cache behind the same methods.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::entity::{Entity, EntityId};
use crate::graph::{BehaviorObservation, CrossReference, IdentityGraph, LinkingFactor, TrustEdge};
use crate::platform::PlatformIdentity;
use crate::similarity::best_name_similarity;
use crate::storage::StorageError;

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Confidence of a link created from a shared platform handle.
pub(crate) fn overlap_confidence(a: &PlatformIdentity, b: &PlatformIdentity) -> f32 {
    match (a.verified, b.verified) {
        (true, true) => 0.95,
        (true, false) | (false, true) => 0.85,
        (false, false) => 0.7,
    }
}

/// Thresholds used when discovering cross references.
#[derive(Debug, Clone, Copy)]
pub struct LinkPolicy {
    /// Links are recorded above this confidence.
    pub threshold: f32,
    /// Scale applied to name similarity.
    pub name_link_weight: f32,
}

/// Identity graphs keyed by entity id.
#[derive(Debug, Default)]
pub struct IdentityGraphStore {
    graphs: RwLock<HashMap<EntityId, IdentityGraph>>,
}

impl IdentityGraphStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one graph.
    pub fn get(&self, id: EntityId) -> Result<Option<IdentityGraph>, StorageError> {
        let graphs = self.graphs.read().map_err(|_| lock_err("identity graphs"))?;
        Ok(graphs.get(&id).cloned())
    }

    /// Inserts or replaces a graph.
    pub fn insert(&self, graph: IdentityGraph) -> Result<(), StorageError> {
        let mut graphs = self.graphs.write().map_err(|_| lock_err("identity graphs"))?;
        graphs.insert(graph.entity_id, graph);
        Ok(())
    }

    /// Removes a graph, returning it.
    pub fn remove(&self, id: EntityId) -> Result<Option<IdentityGraph>, StorageError> {
        let mut graphs = self.graphs.write().map_err(|_| lock_err("identity graphs"))?;
        Ok(graphs.remove(&id))
    }

    /// Number of stored graphs.
    pub fn len(&self) -> Result<usize, StorageError> {
        let graphs = self.graphs.read().map_err(|_| lock_err("identity graphs"))?;
        Ok(graphs.len())
    }

    /// Returns true if no graphs are stored.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    /// Discovers and records cross references between `entity` and `others`.
    ///
    /// Links are written to both graphs. Graphs missing on either side are
    /// seeded from the entity's stored identities. Returns the number of
    /// entities linked.
    pub fn link_cross_references(
        &self,
        entity: &Entity,
        others: &[Entity],
        policy: LinkPolicy,
    ) -> Result<usize, StorageError> {
        let mut graphs = self.graphs.write().map_err(|_| lock_err("identity graphs"))?;
        let own = graphs
            .entry(entity.id)
            .or_insert_with(|| IdentityGraph::from_entity(entity))
            .clone();

        let mut linked = 0usize;
        for other in others.iter().filter(|o| o.id != entity.id) {
            let other_graph = graphs
                .get(&other.id)
                .cloned()
                .unwrap_or_else(|| IdentityGraph::from_entity(other));

            let mut links = Vec::new();
            for (platform, mine) in &own.platform_identities {
                if let Some(theirs) = other_graph.identity(platform) {
                    if mine.key() == theirs.key() {
                        links.push((
                            LinkingFactor::PlatformOverlap {
                                platform: platform.clone(),
                            },
                            overlap_confidence(mine, theirs),
                        ));
                    }
                }
            }
            let name_confidence =
                best_name_similarity(&entity.names, &other.names) * policy.name_link_weight;
            links.push((LinkingFactor::NameSimilarity, name_confidence));

            let mut any = false;
            for (factor, confidence) in links {
                if confidence <= policy.threshold {
                    continue;
                }
                any = true;
                if let Some(graph) = graphs.get_mut(&entity.id) {
                    graph.add_cross_reference(CrossReference {
                        target: other.id,
                        linking_factor: factor.clone(),
                        confidence,
                        bidirectional: true,
                    });
                }
                graphs
                    .entry(other.id)
                    .or_insert_with(|| other_graph.clone())
                    .add_cross_reference(CrossReference {
                        target: entity.id,
                        linking_factor: factor,
                        confidence,
                        bidirectional: true,
                    });
            }
            if any {
                linked += 1;
            }
        }

        if linked > 0 {
            tracing::debug!(entity_id = %entity.id, linked, "recorded cross references");
        }
        Ok(linked)
    }

    /// Folds `candidate`'s graph into `primary`'s and deletes it.
    ///
    /// Links held by other graphs are re-pointed at the primary. Returns
    /// `false` when the candidate has no graph (already absorbed), which makes
    /// repeated calls harmless.
    pub fn absorb(
        &self,
        primary: EntityId,
        candidate: EntityId,
        sample_limit: usize,
    ) -> Result<bool, StorageError> {
        if primary == candidate {
            return Ok(false);
        }
        let mut graphs = self.graphs.write().map_err(|_| lock_err("identity graphs"))?;
        let Some(absorbed) = graphs.get(&candidate).cloned() else {
            return Ok(false);
        };
        graphs
            .entry(primary)
            .or_insert_with(|| IdentityGraph::new(primary))
            .absorb(absorbed, sample_limit);
        graphs.remove(&candidate);
        for graph in graphs.values_mut() {
            if graph.entity_id != primary {
                graph.retarget(candidate, primary);
            }
        }
        Ok(true)
    }

    /// Records a verified identity for an entity.
    pub fn mark_verified(&self, id: EntityId, identity: PlatformIdentity) -> Result<(), StorageError> {
        let mut graphs = self.graphs.write().map_err(|_| lock_err("identity graphs"))?;
        graphs
            .entry(id)
            .or_insert_with(|| IdentityGraph::new(id))
            .upsert_identity(identity.verified());
        Ok(())
    }

    /// Records a trust-network edge from `id`'s graph.
    pub fn add_trust_edge(&self, id: EntityId, edge: TrustEdge) -> Result<(), StorageError> {
        let mut graphs = self.graphs.write().map_err(|_| lock_err("identity graphs"))?;
        graphs
            .entry(id)
            .or_insert_with(|| IdentityGraph::new(id))
            .add_trust_edge(edge);
        Ok(())
    }

    /// Folds a behavior observation into an entity's fingerprint.
    pub fn record_behavior(
        &self,
        id: EntityId,
        observation: BehaviorObservation,
        sample_limit: usize,
    ) -> Result<(), StorageError> {
        let mut graphs = self.graphs.write().map_err(|_| lock_err("identity graphs"))?;
        let graph = graphs.entry(id).or_insert_with(|| IdentityGraph::new(id));
        graph.fingerprint.record(observation, sample_limit);
        graph.updated_at = chrono::Utc::now();
        Ok(())
    }
}
