//! Resolution candidates and their evidence.
//!
//! A candidate bundles one directory entity with the match factors that argue
//! for it, the risk factors that argue against it, and the platform identities
//! it is known by. Candidates are created per resolution call and only live on
//! in the resolution cache.

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityId};

/// Kinds of positive evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchFactorType {
    /// Identifier equals one of the entity's names.
    ExactName,
    /// Oracle judged the identifier similar to a name.
    SimilarName,
    /// Identifier equals a platform handle or user id.
    PlatformIdentity,
    /// Behavior fingerprint resembles the current context.
    BehavioralPattern,
    /// Recent conversation points at the entity.
    ContextualHint,
    /// A trust-network edge links the entity to the speaker.
    TrustCorrelation,
    /// A cross reference links the entity to the speaker.
    NetworkProximity,
}

/// One piece of positive evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchFactor {
    /// Evidence kind.
    #[serde(rename = "type")]
    pub kind: MatchFactorType,
    /// Strength in [0, 1].
    pub confidence: f32,
    /// Human-readable explanation.
    pub evidence: String,
    /// Weight used in the weighted mean.
    pub weight: f32,
}

impl MatchFactor {
    /// Builds a factor, clamping confidence to [0, 1].
    #[must_use]
    pub fn new(kind: MatchFactorType, confidence: f32, weight: f32, evidence: impl Into<String>) -> Self {
        Self {
            kind,
            confidence: confidence.clamp(0.0, 1.0),
            evidence: evidence.into(),
            weight,
        }
    }
}

/// Kinds of negative evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskType {
    /// Another entity looks like the same actor.
    PotentialDuplicate,
    /// Someone may be posing as the entity.
    ImpersonationRisk,
    /// Identity evidence disagrees or is ambiguous.
    IdentityConflict,
    /// Trust signals disagree.
    TrustInconsistency,
    /// Behavior departs from the fingerprint.
    BehavioralAnomaly,
}

/// How much a risk should weigh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskSeverity {
    #[allow(missing_docs)]
    Low,
    #[allow(missing_docs)]
    Medium,
    #[allow(missing_docs)]
    High,
    #[allow(missing_docs)]
    Critical,
}

/// One piece of negative evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    /// Risk kind.
    #[serde(rename = "type")]
    pub kind: RiskType,
    /// Severity bucket.
    pub severity: RiskSeverity,
    /// Likelihood in [0, 1].
    pub confidence: f32,
    /// Short description.
    pub description: String,
    /// Supporting detail.
    pub evidence: String,
}

impl RiskFactor {
    /// Builds a risk factor, clamping confidence to [0, 1].
    #[must_use]
    pub fn new(
        kind: RiskType,
        severity: RiskSeverity,
        confidence: f32,
        description: impl Into<String>,
        evidence: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            severity,
            confidence: confidence.clamp(0.0, 1.0),
            description: description.into(),
            evidence: evidence.into(),
        }
    }
}

/// A platform identity surfaced alongside a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossPlatformIndicator {
    /// Platform tag.
    pub platform: String,
    /// Handle on that platform.
    pub handle: String,
    /// Whether the identity is verified.
    pub verified: bool,
    /// Identity confidence.
    pub confidence: f32,
    /// Whether the resolved identifier names this account.
    pub matches_identifier: bool,
}

/// A scored possible match for an identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityResolutionCandidate {
    /// Candidate entity id.
    pub entity_id: EntityId,
    /// Snapshot of the entity at scoring time.
    pub entity: Entity,
    /// Final confidence in [0, 1].
    pub confidence: f32,
    /// Positive evidence, in evaluation order.
    pub match_factors: Vec<MatchFactor>,
    /// Negative evidence, in detection order.
    pub risk_factors: Vec<RiskFactor>,
    /// Known platform identities.
    pub cross_platform_indicators: Vec<CrossPlatformIndicator>,
}

impl EntityResolutionCandidate {
    /// Returns true if any match factor has the given kind.
    #[must_use]
    pub fn has_match(&self, kind: MatchFactorType) -> bool {
        self.match_factors.iter().any(|f| f.kind == kind)
    }

    /// Returns true if any risk factor has the given kind.
    #[must_use]
    pub fn has_risk(&self, kind: RiskType) -> bool {
        self.risk_factors.iter().any(|r| r.kind == kind)
    }

    /// Returns true if a verified platform identity matched the identifier.
    #[must_use]
    pub fn has_verified_identity_match(&self) -> bool {
        self.cross_platform_indicators
            .iter()
            .any(|i| i.verified && i.matches_identifier)
    }
}
