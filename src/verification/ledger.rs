//! Append-only claim and confirmation ledger.
//!
//! Entries live in two growth-only sequences with a secondary index by
//! `platform:handle`. Nothing is edited or removed once recorded.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::EntityId;
use crate::error::{IdentityResult, ValidationError};
use crate::platform::{normalize_handle, normalize_platform, PlatformKey};
use crate::storage::StorageError;

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Unique identifier for a recorded claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimId(Uuid);

impl ClaimId {
    /// Creates a new random claim ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClaimId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a recorded confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfirmationId(Uuid);

impl ConfirmationId {
    /// Creates a new random confirmation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConfirmationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConfirmationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a claim came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClaimSource {
    /// The entity said so about itself.
    #[default]
    SelfReported,
    /// Another participant said so.
    ThirdParty,
    /// Read from platform data (profile link, message author).
    PlatformData,
    /// Derived by the agent.
    Inferred,
}

/// How a confirmation was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfirmationMethod {
    /// The account answered from the claimed platform.
    #[default]
    DirectMessage,
    /// The platform itself vouches for the account.
    PlatformVerification,
    /// A trusted participant vouched for it.
    MutualContact,
    /// A moderator checked it.
    ManualReview,
}

/// "`claimed_by` says `handle` on `platform` belongs to `claimed_about`."
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformClaim {
    /// Ledger id.
    pub id: ClaimId,
    /// Normalized ledger key.
    pub key: PlatformKey,
    /// Who made the claim.
    pub claimed_by: EntityId,
    /// Room or channel the claim was made in.
    pub claimed_from: String,
    /// Entity the handle is claimed for.
    pub claimed_about: EntityId,
    /// Normalized platform name.
    pub platform: String,
    /// Handle as given.
    pub handle: String,
    /// Claimant's confidence.
    pub confidence: f32,
    /// Provenance.
    pub source: ClaimSource,
    /// Free-form supporting text.
    pub evidence: String,
    /// Append time.
    pub recorded_at: DateTime<Utc>,
}

/// "`confirmed_by` confirms `handle` on `platform` is `confirms_entity`."
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformConfirmation {
    /// Ledger id.
    pub id: ConfirmationId,
    /// Normalized ledger key.
    pub key: PlatformKey,
    /// Who confirmed.
    pub confirmed_by: EntityId,
    /// Entity the handle is confirmed for.
    pub confirms_entity: EntityId,
    /// Normalized platform name.
    pub platform: String,
    /// Handle as given.
    pub handle: String,
    /// Claim being answered, if any.
    pub confirms_claim: Option<ClaimId>,
    /// Confirmer's confidence.
    pub confidence: f32,
    /// How the confirmation was obtained.
    pub method: ConfirmationMethod,
    /// Free-form supporting text.
    pub evidence: String,
    /// Append time.
    pub recorded_at: DateTime<Utc>,
}

impl PlatformConfirmation {
    /// True when the confirmation comes from the other side of `claims`:
    /// the confirmer is neither the confirmed entity nor the author of a
    /// claim about it on the same key.
    #[must_use]
    pub fn is_independent_of<'a, I>(&self, claims: I) -> bool
    where
        I: IntoIterator<Item = &'a PlatformClaim>,
    {
        self.confirmed_by != self.confirms_entity
            && !claims.into_iter().any(|c| {
                c.key == self.key
                    && c.claimed_about == self.confirms_entity
                    && c.claimed_by == self.confirmed_by
            })
    }
}

/// Input for [`VerificationLedger::append_claim`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct NewClaim {
    pub claimed_by: EntityId,
    pub claimed_from: String,
    pub claimed_about: EntityId,
    pub platform: String,
    pub handle: String,
    pub confidence: f32,
    #[serde(default)]
    pub source: ClaimSource,
    #[serde(default)]
    pub evidence: String,
}

impl NewClaim {
    /// A self-reported claim with full confidence.
    #[must_use]
    pub fn new(
        claimed_by: EntityId,
        claimed_about: EntityId,
        platform: impl Into<String>,
        handle: impl Into<String>,
    ) -> Self {
        Self {
            claimed_by,
            claimed_from: String::new(),
            claimed_about,
            platform: platform.into(),
            handle: handle.into(),
            confidence: 1.0,
            source: ClaimSource::SelfReported,
            evidence: String::new(),
        }
    }

    /// Sets the claimant's confidence.
    #[must_use]
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    /// Sets the provenance.
    #[must_use]
    pub fn with_source(mut self, source: ClaimSource) -> Self {
        self.source = source;
        self
    }

    /// Sets the room or channel of the claim.
    #[must_use]
    pub fn in_room(mut self, room: impl Into<String>) -> Self {
        self.claimed_from = room.into();
        self
    }

    /// Attaches supporting text.
    #[must_use]
    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = evidence.into();
        self
    }
}

/// Input for [`VerificationLedger::append_confirmation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct NewConfirmation {
    pub confirmed_by: EntityId,
    pub confirms_entity: EntityId,
    pub platform: String,
    pub handle: String,
    #[serde(default)]
    pub confirms_claim: Option<ClaimId>,
    pub confidence: f32,
    #[serde(default)]
    pub method: ConfirmationMethod,
    #[serde(default)]
    pub evidence: String,
}

impl NewConfirmation {
    /// A direct-message confirmation with full confidence.
    #[must_use]
    pub fn new(
        confirmed_by: EntityId,
        confirms_entity: EntityId,
        platform: impl Into<String>,
        handle: impl Into<String>,
    ) -> Self {
        Self {
            confirmed_by,
            confirms_entity,
            platform: platform.into(),
            handle: handle.into(),
            confirms_claim: None,
            confidence: 1.0,
            method: ConfirmationMethod::DirectMessage,
            evidence: String::new(),
        }
    }

    /// Links the confirmation to the claim it answers.
    #[must_use]
    pub fn for_claim(mut self, claim: ClaimId) -> Self {
        self.confirms_claim = Some(claim);
        self
    }

    /// Sets the confirmer's confidence.
    #[must_use]
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    /// Sets how the confirmation was obtained.
    #[must_use]
    pub fn with_method(mut self, method: ConfirmationMethod) -> Self {
        self.method = method;
        self
    }
}

fn check_entry(platform: &str, handle: &str, confidence: f32) -> Result<(), ValidationError> {
    if normalize_platform(platform).is_empty() {
        return Err(ValidationError::MissingField {
            field: "platform".to_string(),
        });
    }
    if normalize_handle(handle).is_empty() {
        return Err(ValidationError::MissingField {
            field: "handle".to_string(),
        });
    }
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        return Err(ValidationError::ConfidenceOutOfRange { value: confidence });
    }
    Ok(())
}

#[derive(Debug, Default)]
struct LedgerState {
    claims: Vec<PlatformClaim>,
    confirmations: Vec<PlatformConfirmation>,
    claims_by_key: HashMap<PlatformKey, Vec<usize>>,
    confirmations_by_key: HashMap<PlatformKey, Vec<usize>>,
}

/// The claim/confirmation ledger.
#[derive(Debug, Default)]
pub struct VerificationLedger {
    state: RwLock<LedgerState>,
}

impl VerificationLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and appends a claim.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty platform or handle or an
    /// out-of-range confidence.
    pub fn append_claim(&self, claim: NewClaim) -> IdentityResult<PlatformClaim> {
        check_entry(&claim.platform, &claim.handle, claim.confidence)?;
        let entry = PlatformClaim {
            id: ClaimId::new(),
            key: PlatformKey::new(&claim.platform, &claim.handle),
            claimed_by: claim.claimed_by,
            claimed_from: claim.claimed_from,
            claimed_about: claim.claimed_about,
            platform: normalize_platform(&claim.platform),
            handle: claim.handle,
            confidence: claim.confidence,
            source: claim.source,
            evidence: claim.evidence,
            recorded_at: Utc::now(),
        };

        let mut state = self.state.write().map_err(|_| lock_err("verification ledger"))?;
        let index = state.claims.len();
        state.claims.push(entry.clone());
        state.claims_by_key.entry(entry.key.clone()).or_default().push(index);
        Ok(entry)
    }

    /// Validates and appends a confirmation.
    ///
    /// A referenced claim that is unknown or sits on another key is logged
    /// and the reference kept as given.
    ///
    /// # Errors
    ///
    /// Same validation as [`Self::append_claim`].
    pub fn append_confirmation(
        &self,
        confirmation: NewConfirmation,
    ) -> IdentityResult<PlatformConfirmation> {
        check_entry(&confirmation.platform, &confirmation.handle, confirmation.confidence)?;
        let entry = PlatformConfirmation {
            id: ConfirmationId::new(),
            key: PlatformKey::new(&confirmation.platform, &confirmation.handle),
            confirmed_by: confirmation.confirmed_by,
            confirms_entity: confirmation.confirms_entity,
            platform: normalize_platform(&confirmation.platform),
            handle: confirmation.handle,
            confirms_claim: confirmation.confirms_claim,
            confidence: confirmation.confidence,
            method: confirmation.method,
            evidence: confirmation.evidence,
            recorded_at: Utc::now(),
        };

        let mut state = self.state.write().map_err(|_| lock_err("verification ledger"))?;
        if let Some(claim_id) = entry.confirms_claim {
            let on_key = state
                .claims_by_key
                .get(&entry.key)
                .is_some_and(|idx| idx.iter().any(|&i| state.claims[i].id == claim_id));
            if !on_key {
                tracing::warn!(
                    claim = %claim_id,
                    key = %entry.key,
                    "confirmation references a claim not recorded on this key"
                );
            }
        }
        let index = state.confirmations.len();
        state.confirmations.push(entry.clone());
        state
            .confirmations_by_key
            .entry(entry.key.clone())
            .or_default()
            .push(index);
        Ok(entry)
    }

    /// Claims on one key, oldest first.
    pub fn claims_for(&self, key: &PlatformKey) -> Result<Vec<PlatformClaim>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("verification ledger"))?;
        Ok(state
            .claims_by_key
            .get(key)
            .map(|idx| idx.iter().map(|&i| state.claims[i].clone()).collect())
            .unwrap_or_default())
    }

    /// Confirmations on one key, oldest first.
    pub fn confirmations_for(
        &self,
        key: &PlatformKey,
    ) -> Result<Vec<PlatformConfirmation>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("verification ledger"))?;
        Ok(state
            .confirmations_by_key
            .get(key)
            .map(|idx| idx.iter().map(|&i| state.confirmations[i].clone()).collect())
            .unwrap_or_default())
    }

    /// Claims filtered by platform and/or handle, oldest first.
    pub fn claims(
        &self,
        platform: Option<&str>,
        handle: Option<&str>,
    ) -> Result<Vec<PlatformClaim>, StorageError> {
        let filter = KeyFilter::new(platform, handle);
        let state = self.state.read().map_err(|_| lock_err("verification ledger"))?;
        Ok(state
            .claims
            .iter()
            .filter(|c| filter.matches(&c.key))
            .cloned()
            .collect())
    }

    /// Confirmations filtered by platform and/or handle, oldest first.
    pub fn confirmations(
        &self,
        platform: Option<&str>,
        handle: Option<&str>,
    ) -> Result<Vec<PlatformConfirmation>, StorageError> {
        let filter = KeyFilter::new(platform, handle);
        let state = self.state.read().map_err(|_| lock_err("verification ledger"))?;
        Ok(state
            .confirmations
            .iter()
            .filter(|c| filter.matches(&c.key))
            .cloned()
            .collect())
    }

    /// True when the key has at least one claim and one confirmation about
    /// `entity`.
    pub fn is_verified(&self, key: &PlatformKey, entity: EntityId) -> Result<bool, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("verification ledger"))?;
        let claims: Vec<&PlatformClaim> = state
            .claims_by_key
            .get(key)
            .map(|idx| {
                idx.iter()
                    .map(|&i| &state.claims[i])
                    .filter(|c| c.claimed_about == entity)
                    .collect()
            })
            .unwrap_or_default();
        if claims.is_empty() {
            return Ok(false);
        }
        let confirmed = state.confirmations_by_key.get(key).is_some_and(|idx| {
            idx.iter()
                .map(|&i| &state.confirmations[i])
                .any(|c| c.confirms_entity == entity && c.is_independent_of(claims.iter().copied()))
        });
        Ok(confirmed)
    }
}

struct KeyFilter {
    platform: Option<String>,
    handle: Option<String>,
}

impl KeyFilter {
    fn new(platform: Option<&str>, handle: Option<&str>) -> Self {
        Self {
            platform: platform.map(normalize_platform),
            handle: handle.map(normalize_handle),
        }
    }

    fn matches(&self, key: &PlatformKey) -> bool {
        self.platform.as_deref().map_or(true, |p| key.platform() == p)
            && self.handle.as_deref().map_or(true, |h| key.handle() == h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IdentityError;

    #[test]
    fn claims_are_indexed_by_normalized_key() {
        let ledger = VerificationLedger::new();
        let (a, x) = (EntityId::new(), EntityId::new());
        ledger.append_claim(NewClaim::new(a, x, "Discord", "@Bob")).unwrap();
        ledger.append_claim(NewClaim::new(a, x, "discord", "alice")).unwrap();

        let key = PlatformKey::new("discord", "bob");
        let claims = ledger.claims_for(&key).unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].platform, "discord");
        assert_eq!(claims[0].handle, "@Bob");
        assert_eq!(ledger.claims(Some("DISCORD"), None).unwrap().len(), 2);
        assert_eq!(ledger.claims(None, Some("@alice")).unwrap().len(), 1);
    }

    #[test]
    fn invalid_entries_are_rejected() {
        let ledger = VerificationLedger::new();
        let (a, x) = (EntityId::new(), EntityId::new());
        let err = ledger
            .append_claim(NewClaim::new(a, x, "discord", "bob").with_confidence(1.5))
            .unwrap_err();
        assert!(matches!(
            err,
            IdentityError::Validation(ValidationError::ConfidenceOutOfRange { .. })
        ));
        assert!(ledger.append_claim(NewClaim::new(a, x, "discord", "@")).is_err());
        assert!(ledger
            .append_confirmation(NewConfirmation::new(a, x, " ", "bob"))
            .is_err());
        assert!(ledger.claims(None, None).unwrap().is_empty());
    }

    #[test]
    fn verification_needs_both_sides() {
        let ledger = VerificationLedger::new();
        let (a, c, x) = (EntityId::new(), EntityId::new(), EntityId::new());
        let key = PlatformKey::new("discord", "bob");

        let claim = ledger.append_claim(NewClaim::new(a, x, "discord", "bob")).unwrap();
        assert!(!ledger.is_verified(&key, x).unwrap());

        ledger
            .append_confirmation(NewConfirmation::new(c, x, "discord", "@bob").for_claim(claim.id))
            .unwrap();
        assert!(ledger.is_verified(&key, x).unwrap());
        assert_eq!(ledger.confirmations_for(&key).unwrap().len(), 1);
    }

    #[test]
    fn confirmation_of_other_entity_does_not_verify() {
        let ledger = VerificationLedger::new();
        let (a, x, y) = (EntityId::new(), EntityId::new(), EntityId::new());
        let key = PlatformKey::new("discord", "bob");
        ledger.append_claim(NewClaim::new(a, x, "discord", "bob")).unwrap();
        ledger
            .append_confirmation(NewConfirmation::new(a, y, "discord", "bob"))
            .unwrap();
        assert!(!ledger.is_verified(&key, x).unwrap());
        assert!(!ledger.is_verified(&key, y).unwrap());
    }

    #[test]
    fn self_confirmation_does_not_verify() {
        let ledger = VerificationLedger::new();
        let (a, c, x) = (EntityId::new(), EntityId::new(), EntityId::new());
        let key = PlatformKey::new("discord", "bob");

        // Claimant vouching for its own claim.
        ledger.append_claim(NewClaim::new(a, x, "discord", "bob")).unwrap();
        ledger
            .append_confirmation(NewConfirmation::new(a, x, "discord", "bob"))
            .unwrap();
        assert!(!ledger.is_verified(&key, x).unwrap());

        // Entity vouching for itself.
        ledger
            .append_confirmation(NewConfirmation::new(x, x, "discord", "bob"))
            .unwrap();
        assert!(!ledger.is_verified(&key, x).unwrap());

        ledger
            .append_confirmation(NewConfirmation::new(c, x, "discord", "bob"))
            .unwrap();
        assert!(ledger.is_verified(&key, x).unwrap());
    }
}
