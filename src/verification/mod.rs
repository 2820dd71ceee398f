//! Two-sided identity verification.
//!
//! A claim says a platform handle belongs to an entity. A confirmation comes
//! from the other side and corroborates it. Only claim plus confirmation
//! counts as verified; competing claims on one handle become merge
//! proposals whose confidence grows with the evidence.

pub mod evidence;
pub mod ledger;

pub use evidence::BidirectionalEvidence;
pub use ledger::{
    ClaimId, ClaimSource, ConfirmationId, ConfirmationMethod, NewClaim, NewConfirmation,
    PlatformClaim, PlatformConfirmation, VerificationLedger,
};

use crate::entity::EntityId;
use crate::platform::PlatformKey;
use crate::storage::StorageError;

impl VerificationLedger {
    /// Evidence for `involved` on `key`, rebuilt from the full ledger.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the ledger lock is poisoned.
    pub fn evidence(
        &self,
        key: &PlatformKey,
        involved: &[EntityId],
    ) -> Result<BidirectionalEvidence, StorageError> {
        let claims = self.claims_for(key)?;
        let confirmations = self.confirmations_for(key)?;
        Ok(BidirectionalEvidence::compute(
            key.clone(),
            involved,
            &claims,
            &confirmations,
        ))
    }
}
