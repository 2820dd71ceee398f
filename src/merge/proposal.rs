//! Merge proposals and the pending-merge table.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::confidence::clamp_unit;
use crate::entity::{Entity, EntityId, MERGED_FROM_KEY, PLATFORM_IDENTITIES_KEY};
use crate::storage::StorageError;
use crate::verification::BidirectionalEvidence;

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Sorted entity-pair key (`"a:b"`) identifying a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MergeKey(String);

impl MergeKey {
    /// Key for a pair; argument order does not matter.
    #[must_use]
    pub fn new(a: EntityId, b: EntityId) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{lo}:{hi}"))
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MergeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the candidates relate to the primary after a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    /// The primary takes over the candidates completely.
    #[default]
    Absorb,
    /// Both records are combined field by field.
    Merge,
    /// Related but kept apart; only cross references are recorded.
    Link,
}

impl MergeStrategy {
    /// Strategy for a similarity-derived proposal.
    #[must_use]
    pub fn for_confidence(confidence: f32) -> Self {
        if confidence > 0.95 {
            Self::Absorb
        } else if confidence > 0.85 {
            Self::Merge
        } else {
            Self::Link
        }
    }
}

/// Per-field rule for conflicting metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldResolution {
    /// Union arrays and objects.
    MergeAll,
    /// Keep the primary's value and report the field for review.
    ManualReview,
    /// Keep the primary's value silently.
    KeepPrimary,
}

/// Estimated cost of executing a merge. Every score is in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Share of candidate metadata that conflicts with the primary.
    pub data_loss: f32,
    /// Inverse of the proposal confidence.
    pub trust_impact: f32,
    /// How much of the relationship graph would be re-pointed.
    pub relationship_impact: f32,
    /// Mean of the three.
    pub overall: f32,
}

impl RiskAssessment {
    /// Builds an assessment, clamping inputs and deriving `overall`.
    #[must_use]
    pub fn new(data_loss: f32, trust_impact: f32, relationship_impact: f32) -> Self {
        let data_loss = clamp_unit(data_loss);
        let trust_impact = clamp_unit(trust_impact);
        let relationship_impact = clamp_unit(relationship_impact);
        Self {
            data_loss,
            trust_impact,
            relationship_impact,
            overall: (data_loss + trust_impact + relationship_impact) / 3.0,
        }
    }
}

/// Metadata fields that must never be merged generically.
fn is_reserved(field: &str) -> bool {
    field == PLATFORM_IDENTITIES_KEY || field == MERGED_FROM_KEY
}

/// Default rules for the fields where candidates disagree with the primary:
/// collections are unioned, scalars go to review.
#[must_use]
pub fn default_field_rules(
    primary: &Entity,
    candidates: &[Entity],
) -> BTreeMap<String, FieldResolution> {
    let mut rules = BTreeMap::new();
    for candidate in candidates {
        for (field, theirs) in &candidate.metadata {
            if is_reserved(field) {
                continue;
            }
            let Some(ours) = primary.metadata.get(field) else {
                continue;
            };
            if ours == theirs {
                continue;
            }
            let rule = match (ours, theirs) {
                (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
                    FieldResolution::MergeAll
                }
                _ => FieldResolution::ManualReview,
            };
            rules.entry(field.clone()).or_insert(rule);
        }
    }
    rules
}

/// Share of candidate metadata fields that conflict with the primary.
#[must_use]
pub fn data_loss(primary: &Entity, candidates: &[Entity]) -> f32 {
    let mut total = 0usize;
    let mut conflicting = 0usize;
    for candidate in candidates {
        for (field, theirs) in &candidate.metadata {
            if is_reserved(field) {
                continue;
            }
            total += 1;
            if primary.metadata.get(field).is_some_and(|ours| ours != theirs) {
                conflicting += 1;
            }
        }
    }
    if total == 0 {
        0.0
    } else {
        #[allow(clippy::cast_precision_loss)]
        let share = conflicting as f32 / total as f32;
        share
    }
}

/// A proposed merge of `candidate_ids` into `primary_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMergeProposal {
    /// Sorted-pair key.
    pub key: MergeKey,
    /// Survivor.
    pub primary_id: EntityId,
    /// Entities folded into the survivor.
    pub candidate_ids: Vec<EntityId>,
    /// Confidence that the entities are the same actor.
    pub confidence: f32,
    /// Merge strategy.
    pub strategy: MergeStrategy,
    /// Rules for conflicting metadata fields.
    pub conflict_resolution: BTreeMap<String, FieldResolution>,
    /// Snapshots taken when the proposal was made, for audit.
    pub preserved_data: Vec<Entity>,
    /// Estimated cost.
    pub risk_assessment: RiskAssessment,
    /// Ledger evidence, for claim-derived proposals.
    pub bidirectional_evidence: Option<BidirectionalEvidence>,
    /// True while some entity still lacks a confirmation.
    pub requires_confirmation: bool,
    /// Entities still lacking a confirmation.
    pub pending_confirmation: Vec<EntityId>,
    /// Set once a review request was emitted.
    pub review_requested: bool,
    /// Who approved the merge manually, if anyone.
    pub approved_by: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last recomputation.
    pub updated_at: DateTime<Utc>,
}

impl EntityMergeProposal {
    /// Creates a proposal with no evidence attached and no confirmation
    /// requirement.
    #[must_use]
    pub fn new(
        primary_id: EntityId,
        candidate_ids: Vec<EntityId>,
        confidence: f32,
        strategy: MergeStrategy,
    ) -> Self {
        let key = match candidate_ids.first() {
            Some(&first) => MergeKey::new(primary_id, first),
            None => MergeKey::new(primary_id, primary_id),
        };
        let confidence = clamp_unit(confidence);
        let now = Utc::now();
        Self {
            key,
            primary_id,
            candidate_ids,
            confidence,
            strategy,
            conflict_resolution: BTreeMap::new(),
            preserved_data: Vec::new(),
            risk_assessment: RiskAssessment::new(0.0, 1.0 - confidence, 0.0),
            bidirectional_evidence: None,
            requires_confirmation: false,
            pending_confirmation: Vec::new(),
            review_requested: false,
            approved_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Records snapshots and derives field rules and data loss from them.
    ///
    /// `snapshots` must start with the primary when it could be loaded.
    #[must_use]
    pub fn with_snapshots(mut self, snapshots: Vec<Entity>, relationship_impact: f32) -> Self {
        if let Some((primary, rest)) = snapshots.split_first() {
            if primary.id == self.primary_id {
                self.conflict_resolution = default_field_rules(primary, rest);
                self.risk_assessment = RiskAssessment::new(
                    data_loss(primary, rest),
                    1.0 - self.confidence,
                    relationship_impact,
                );
            }
        }
        self.preserved_data = snapshots;
        self
    }

    /// Attaches evidence and derives confidence and confirmation state.
    ///
    /// A manually approved proposal stays unblocked.
    pub fn apply_evidence(&mut self, evidence: BidirectionalEvidence) {
        let involved = self.involved();
        self.confidence = evidence.merge_confidence();
        if self.approved_by.is_none() {
            self.requires_confirmation = evidence.requires_confirmation();
            self.pending_confirmation = evidence.pending(&involved);
        }
        self.risk_assessment = RiskAssessment::new(
            self.risk_assessment.data_loss,
            1.0 - self.confidence,
            self.risk_assessment.relationship_impact,
        );
        self.bidirectional_evidence = Some(evidence);
        self.updated_at = Utc::now();
    }

    /// Primary followed by the candidates.
    #[must_use]
    pub fn involved(&self) -> Vec<EntityId> {
        std::iter::once(self.primary_id)
            .chain(self.candidate_ids.iter().copied())
            .collect()
    }

    /// True if the entity is the primary or a candidate.
    #[must_use]
    pub fn touches(&self, id: EntityId) -> bool {
        self.primary_id == id || self.candidate_ids.contains(&id)
    }

    /// Fields the rules send to manual review.
    #[must_use]
    pub fn review_fields(&self) -> BTreeSet<&str> {
        self.conflict_resolution
            .iter()
            .filter(|(_, rule)| **rule == FieldResolution::ManualReview)
            .map(|(field, _)| field.as_str())
            .collect()
    }
}

/// Proposals awaiting execution, keyed by merge key.
#[derive(Debug, Default)]
pub struct PendingMerges {
    proposals: RwLock<BTreeMap<MergeKey, EntityMergeProposal>>,
}

impl PendingMerges {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one proposal.
    pub fn get(&self, key: &MergeKey) -> Result<Option<EntityMergeProposal>, StorageError> {
        let proposals = self.proposals.read().map_err(|_| lock_err("pending merges"))?;
        Ok(proposals.get(key).cloned())
    }

    /// Inserts unless the key is taken. Returns true if inserted.
    pub fn insert_if_absent(&self, proposal: EntityMergeProposal) -> Result<bool, StorageError> {
        let mut proposals = self.proposals.write().map_err(|_| lock_err("pending merges"))?;
        if proposals.contains_key(&proposal.key) {
            return Ok(false);
        }
        proposals.insert(proposal.key.clone(), proposal);
        Ok(true)
    }

    /// Applies `f` to a stored proposal and returns the updated copy.
    pub fn update<F>(&self, key: &MergeKey, f: F) -> Result<Option<EntityMergeProposal>, StorageError>
    where
        F: FnOnce(&mut EntityMergeProposal),
    {
        let mut proposals = self.proposals.write().map_err(|_| lock_err("pending merges"))?;
        Ok(proposals.get_mut(key).map(|proposal| {
            f(proposal);
            proposal.clone()
        }))
    }

    /// Removes a proposal.
    pub fn remove(&self, key: &MergeKey) -> Result<Option<EntityMergeProposal>, StorageError> {
        let mut proposals = self.proposals.write().map_err(|_| lock_err("pending merges"))?;
        Ok(proposals.remove(key))
    }

    /// All proposals in key order.
    pub fn list(&self) -> Result<Vec<EntityMergeProposal>, StorageError> {
        let proposals = self.proposals.read().map_err(|_| lock_err("pending merges"))?;
        Ok(proposals.values().cloned().collect())
    }

    /// Keys of proposals touching an entity.
    pub fn keys_touching(&self, id: EntityId) -> Result<Vec<MergeKey>, StorageError> {
        let proposals = self.proposals.read().map_err(|_| lock_err("pending merges"))?;
        Ok(proposals
            .values()
            .filter(|p| p.touches(id))
            .map(|p| p.key.clone())
            .collect())
    }
}
