//! Per-entity identity graphs.
//!
//! An identity graph records everything the resolver knows about how one
//! entity is identified: its platform identities, links to other entities
//! that might be the same actor, trust-network edges and a behavior
//! fingerprint. Edges refer to other entities by id only; graphs never hold
//! references to each other.

mod store;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityId};
use crate::platform::{normalize_handle, normalize_platform, PlatformIdentity};

pub(crate) use store::overlap_confidence;
pub use store::{IdentityGraphStore, LinkPolicy};

/// Why two entities are linked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkingFactor {
    /// Both entities hold the same handle on a platform.
    PlatformOverlap {
        /// Shared platform.
        platform: String,
    },
    /// The entities have similar names.
    NameSimilarity,
}

/// Link from one entity to another that may be the same actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossReference {
    /// Linked entity.
    pub target: EntityId,
    /// Why the link exists.
    pub linking_factor: LinkingFactor,
    /// Link strength in [0, 1].
    pub confidence: f32,
    /// Whether the target records the reverse link.
    pub bidirectional: bool,
}

/// Trust path from this entity to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustEdge {
    /// Trusted entity.
    pub target: EntityId,
    /// Intermediate entities, in order.
    #[serde(default)]
    pub path: Vec<EntityId>,
    /// Trust score in [0, 1].
    pub score: f32,
    /// Number of hops.
    pub length: usize,
}

impl TrustEdge {
    /// Direct (single-hop) edge.
    #[must_use]
    pub fn direct(target: EntityId, score: f32) -> Self {
        Self {
            target,
            path: Vec::new(),
            score: score.clamp(0.0, 1.0),
            length: 1,
        }
    }
}

/// A behavior observation folded into a fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BehaviorObservation {
    /// Writing-style tags.
    #[serde(default)]
    pub style_tags: Vec<String>,
    /// Activity pattern label (e.g. `evenings`).
    #[serde(default)]
    pub activity: Option<String>,
    /// Observed response time.
    #[serde(default)]
    pub response_time_ms: Option<u64>,
    /// Observed sentiment in [-1, 1].
    #[serde(default)]
    pub sentiment: Option<f32>,
    /// Topic affinities in [0, 1].
    #[serde(default)]
    pub topics: BTreeMap<String, f32>,
}

/// Behavioral fingerprint of an entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BehaviorFingerprint {
    /// Writing-style tags.
    pub style_tags: BTreeSet<String>,
    /// Activity pattern labels.
    pub activity_patterns: BTreeSet<String>,
    /// Response-time samples, oldest first.
    pub response_times_ms: Vec<u64>,
    /// Sentiment samples, oldest first.
    pub sentiment_samples: Vec<f32>,
    /// Topic affinities.
    pub topic_affinities: BTreeMap<String, f32>,
}

fn keep_last<T>(samples: &mut Vec<T>, limit: usize) {
    if samples.len() > limit {
        samples.drain(..samples.len() - limit);
    }
}

fn raise_affinity(map: &mut BTreeMap<String, f32>, topic: String, score: f32) {
    let score = score.clamp(0.0, 1.0);
    map.entry(topic)
        .and_modify(|s| *s = s.max(score))
        .or_insert(score);
}

impl BehaviorFingerprint {
    /// Folds one observation in, keeping at most `limit` samples per window.
    pub fn record(&mut self, obs: BehaviorObservation, limit: usize) {
        self.style_tags.extend(obs.style_tags);
        if let Some(activity) = obs.activity {
            self.activity_patterns.insert(activity);
        }
        if let Some(rt) = obs.response_time_ms {
            self.response_times_ms.push(rt);
            keep_last(&mut self.response_times_ms, limit);
        }
        if let Some(sentiment) = obs.sentiment {
            self.sentiment_samples.push(sentiment.clamp(-1.0, 1.0));
            keep_last(&mut self.sentiment_samples, limit);
        }
        for (topic, score) in obs.topics {
            raise_affinity(&mut self.topic_affinities, topic, score);
        }
    }

    /// Set-union with another fingerprint.
    pub fn absorb(&mut self, other: Self, limit: usize) {
        self.style_tags.extend(other.style_tags);
        self.activity_patterns.extend(other.activity_patterns);
        self.response_times_ms.extend(other.response_times_ms);
        keep_last(&mut self.response_times_ms, limit);
        self.sentiment_samples.extend(other.sentiment_samples);
        keep_last(&mut self.sentiment_samples, limit);
        for (topic, score) in other.topic_affinities {
            raise_affinity(&mut self.topic_affinities, topic, score);
        }
    }
}

/// Everything known about how one entity is identified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityGraph {
    /// Owning entity.
    pub entity_id: EntityId,
    /// Platform → identity; one identity per platform.
    pub platform_identities: BTreeMap<String, PlatformIdentity>,
    /// Links to possibly-identical entities.
    pub cross_references: Vec<CrossReference>,
    /// Trust-network edges.
    pub trust_network: Vec<TrustEdge>,
    /// Behavior fingerprint.
    pub fingerprint: BehaviorFingerprint,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl IdentityGraph {
    /// Empty graph for an entity.
    #[must_use]
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            platform_identities: BTreeMap::new(),
            cross_references: Vec::new(),
            trust_network: Vec::new(),
            fingerprint: BehaviorFingerprint::default(),
            updated_at: Utc::now(),
        }
    }

    /// Graph seeded from the identities stored on an entity.
    #[must_use]
    pub fn from_entity(entity: &Entity) -> Self {
        let mut graph = Self::new(entity.id);
        for identity in entity.platform_identities() {
            graph.upsert_identity(identity);
        }
        graph
    }

    /// Inserts an identity, keeping the higher-confidence side when the
    /// platform is already present.
    pub fn upsert_identity(&mut self, identity: PlatformIdentity) {
        let platform = normalize_platform(&identity.platform);
        let replace = match self.platform_identities.get_mut(&platform) {
            Some(existing) if existing.confidence >= identity.confidence => {
                if identity.verified
                    && normalize_handle(&existing.handle) == normalize_handle(&identity.handle)
                {
                    existing.verified = true;
                }
                false
            }
            _ => true,
        };
        if replace {
            self.platform_identities.insert(platform, identity);
        }
        self.updated_at = Utc::now();
    }

    /// Identity on a platform, if any.
    #[must_use]
    pub fn identity(&self, platform: &str) -> Option<&PlatformIdentity> {
        self.platform_identities.get(&normalize_platform(platform))
    }

    /// Adds a cross reference, merging with an existing link of the same kind.
    pub fn add_cross_reference(&mut self, link: CrossReference) {
        if link.target == self.entity_id {
            return;
        }
        if let Some(existing) = self
            .cross_references
            .iter_mut()
            .find(|c| c.target == link.target && c.linking_factor == link.linking_factor)
        {
            existing.confidence = existing.confidence.max(link.confidence);
            existing.bidirectional |= link.bidirectional;
        } else {
            self.cross_references.push(link);
        }
        self.updated_at = Utc::now();
    }

    /// Adds a trust edge, merging with an existing edge over the same path.
    pub fn add_trust_edge(&mut self, edge: TrustEdge) {
        if edge.target == self.entity_id {
            return;
        }
        if let Some(existing) = self
            .trust_network
            .iter_mut()
            .find(|e| e.target == edge.target && e.path == edge.path)
        {
            existing.score = existing.score.max(edge.score);
        } else {
            self.trust_network.push(edge);
        }
        self.updated_at = Utc::now();
    }

    /// Strongest cross reference to `target`.
    #[must_use]
    pub fn cross_reference_to(&self, target: EntityId) -> Option<&CrossReference> {
        self.cross_references
            .iter()
            .filter(|c| c.target == target)
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }

    /// Strongest trust edge to `target`.
    #[must_use]
    pub fn trust_edge_to(&self, target: EntityId) -> Option<&TrustEdge> {
        self.trust_network
            .iter()
            .filter(|e| e.target == target)
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }

    /// Folds another entity's graph into this one.
    ///
    /// Links that pointed at either side of the merge are dropped, since they
    /// would now be self-references.
    pub fn absorb(&mut self, other: Self, sample_limit: usize) {
        let absorbed = other.entity_id;
        for identity in other.platform_identities.into_values() {
            self.upsert_identity(identity);
        }
        for link in other.cross_references {
            if link.target != absorbed {
                self.add_cross_reference(link);
            }
        }
        self.cross_references.retain(|c| c.target != absorbed);
        for edge in other.trust_network {
            if edge.target != absorbed {
                self.add_trust_edge(edge);
            }
        }
        self.trust_network.retain(|e| e.target != absorbed);
        self.fingerprint.absorb(other.fingerprint, sample_limit);
        self.updated_at = Utc::now();
    }

    /// Re-points links aimed at `from` onto `to`.
    pub(crate) fn retarget(&mut self, from: EntityId, to: EntityId) {
        let moved: Vec<CrossReference> = self
            .cross_references
            .iter()
            .filter(|c| c.target == from)
            .cloned()
            .collect();
        let edges: Vec<TrustEdge> = self
            .trust_network
            .iter()
            .filter(|e| e.target == from)
            .cloned()
            .collect();
        if moved.is_empty() && edges.is_empty() {
            return;
        }
        self.cross_references.retain(|c| c.target != from);
        self.trust_network.retain(|e| e.target != from);
        for mut link in moved {
            link.target = to;
            self.add_cross_reference(link);
        }
        for mut edge in edges {
            edge.target = to;
            self.add_trust_edge(edge);
        }
    }
}
