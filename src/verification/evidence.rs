//! Bidirectional evidence derived from the ledger.
//!
//! Evidence is never stored or updated in place: every call rebuilds it from
//! the full set of ledger entries for the key, so interleaved appends cannot
//! leave it stale. Confirmations made by a claimant about its own claim, or
//! by the confirmed entity itself, are not counted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::confidence::clamp_unit;
use crate::entity::EntityId;
use crate::platform::PlatformKey;
use crate::verification::ledger::{ClaimId, ConfirmationId, PlatformClaim, PlatformConfirmation};

/// Strength contributed by an entity with both a claim and a confirmation.
pub const BOTH_SIDES_STRENGTH: f32 = 0.5;

/// Strength contributed by an entity with only one side.
pub const ONE_SIDE_STRENGTH: f32 = 0.2;

/// Claim/confirmation support for a set of entities on one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidirectionalEvidence {
    /// Ledger key.
    pub key: PlatformKey,
    /// Claims about each involved entity.
    pub claims_by_entity: BTreeMap<EntityId, Vec<ClaimId>>,
    /// Confirmations for each involved entity.
    pub confirmations_by_entity: BTreeMap<EntityId, Vec<ConfirmationId>>,
    /// Confirmations needed: one per involved entity.
    pub required_confirmations: usize,
    /// Involved entities holding at least one confirmation.
    pub received_confirmations: usize,
    /// Combined support in [0, 1].
    pub strength: f32,
    /// Mean confidence of the ledger entries counted.
    pub mean_confidence: f32,
}

impl BidirectionalEvidence {
    /// Rebuilds evidence for `involved` from every entry on `key`.
    ///
    /// Entries about entities outside `involved` are ignored.
    #[must_use]
    pub fn compute(
        key: PlatformKey,
        involved: &[EntityId],
        claims: &[PlatformClaim],
        confirmations: &[PlatformConfirmation],
    ) -> Self {
        let mut claims_by_entity: BTreeMap<EntityId, Vec<ClaimId>> = BTreeMap::new();
        let mut confirmations_by_entity: BTreeMap<EntityId, Vec<ConfirmationId>> = BTreeMap::new();
        let mut total = 0.0f32;
        let mut counted = 0u32;

        for claim in claims
            .iter()
            .filter(|c| c.key == key && involved.contains(&c.claimed_about))
        {
            claims_by_entity.entry(claim.claimed_about).or_default().push(claim.id);
            total += claim.confidence;
            counted += 1;
        }
        for confirmation in confirmations.iter().filter(|c| {
            c.key == key && involved.contains(&c.confirms_entity) && c.is_independent_of(claims)
        }) {
            confirmations_by_entity
                .entry(confirmation.confirms_entity)
                .or_default()
                .push(confirmation.id);
            total += confirmation.confidence;
            counted += 1;
        }

        let mut entities: Vec<EntityId> = involved.to_vec();
        entities.sort();
        entities.dedup();

        let strength = entities
            .iter()
            .map(|id| {
                match (
                    claims_by_entity.contains_key(id),
                    confirmations_by_entity.contains_key(id),
                ) {
                    (true, true) => BOTH_SIDES_STRENGTH,
                    (true, false) | (false, true) => ONE_SIDE_STRENGTH,
                    (false, false) => 0.0,
                }
            })
            .sum::<f32>();

        #[allow(clippy::cast_precision_loss)]
        let mean_confidence = if counted == 0 {
            0.0
        } else {
            total / counted as f32
        };

        Self {
            key,
            required_confirmations: entities.len(),
            received_confirmations: entities
                .iter()
                .filter(|id| confirmations_by_entity.contains_key(id))
                .count(),
            claims_by_entity,
            confirmations_by_entity,
            strength: clamp_unit(strength),
            mean_confidence: clamp_unit(mean_confidence),
        }
    }

    /// True while some involved entity still lacks a confirmation.
    #[must_use]
    pub const fn requires_confirmation(&self) -> bool {
        self.received_confirmations < self.required_confirmations
    }

    /// Entities from `involved` with no confirmation yet.
    #[must_use]
    pub fn pending(&self, involved: &[EntityId]) -> Vec<EntityId> {
        involved
            .iter()
            .filter(|id| !self.confirmations_by_entity.contains_key(id))
            .copied()
            .collect()
    }

    /// Merge confidence backed by this evidence.
    #[must_use]
    pub fn merge_confidence(&self) -> f32 {
        clamp_unit(self.strength * self.mean_confidence)
    }

    /// True when nothing on the key concerns the involved entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.claims_by_entity.is_empty() && self.confirmations_by_entity.is_empty()
    }
}
