//! Resolver configuration.
//!
//! Every threshold, weight and limit the resolver uses lives here so that a
//! deployment can tune risk tiers without code changes. Defaults reproduce the
//! reference behavior. Configuration can be loaded from TOML; missing keys fall
//! back to their defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::candidate::{MatchFactorType, RiskSeverity};
use crate::error::{IdentityResult, ValidationError};

/// Static per-type weights used in the weighted mean of match factors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct FactorWeights {
    pub exact_name: f32,
    pub similar_name: f32,
    pub platform_identity: f32,
    pub behavioral_pattern: f32,
    pub contextual_hint: f32,
    pub trust_correlation: f32,
    pub network_proximity: f32,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            exact_name: 1.0,
            similar_name: 0.8,
            platform_identity: 0.95,
            behavioral_pattern: 0.6,
            contextual_hint: 0.5,
            trust_correlation: 0.7,
            network_proximity: 0.6,
        }
    }
}

impl FactorWeights {
    /// Weight for a match-factor type.
    #[must_use]
    pub const fn weight(&self, kind: MatchFactorType) -> f32 {
        match kind {
            MatchFactorType::ExactName => self.exact_name,
            MatchFactorType::SimilarName => self.similar_name,
            MatchFactorType::PlatformIdentity => self.platform_identity,
            MatchFactorType::BehavioralPattern => self.behavioral_pattern,
            MatchFactorType::ContextualHint => self.contextual_hint,
            MatchFactorType::TrustCorrelation => self.trust_correlation,
            MatchFactorType::NetworkProximity => self.network_proximity,
        }
    }

    fn all(&self) -> [f32; 7] {
        [
            self.exact_name,
            self.similar_name,
            self.platform_identity,
            self.behavioral_pattern,
            self.contextual_hint,
            self.trust_correlation,
            self.network_proximity,
        ]
    }
}

/// Confidence penalty per unit of risk confidence, indexed by severity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct SeverityPenalties {
    pub low: f32,
    pub medium: f32,
    pub high: f32,
    pub critical: f32,
}

impl Default for SeverityPenalties {
    fn default() -> Self {
        Self {
            low: 0.05,
            medium: 0.1,
            high: 0.2,
            critical: 0.4,
        }
    }
}

impl SeverityPenalties {
    /// Penalty for a severity.
    #[must_use]
    pub const fn penalty(&self, severity: RiskSeverity) -> f32 {
        match severity {
            RiskSeverity::Low => self.low,
            RiskSeverity::Medium => self.medium,
            RiskSeverity::High => self.high,
            RiskSeverity::Critical => self.critical,
        }
    }
}

/// Tunables for resolution, verification and merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Oracle name-similarity scores must exceed this to count.
    pub similarity_accept_threshold: f32,
    /// Oracle contextual scores must exceed this to count.
    pub contextual_accept_threshold: f32,
    /// Number of recent conversation turns sent to the oracle.
    pub context_window: usize,
    /// Local similarity at which a room member becomes a candidate.
    pub name_prefilter_threshold: f32,
    /// Name similarity at which another candidate is a potential duplicate.
    pub duplicate_similarity_threshold: f32,
    /// Confidence gap between directory and graph identities treated as a conflict.
    pub identity_confidence_tolerance: f32,
    /// Boost applied when resolving inside an active room.
    pub active_room_boost: f32,
    /// Reduction applied to security-sensitive resolutions.
    pub security_sensitive_penalty: f32,
    /// Candidates above this are high confidence.
    pub high_confidence_threshold: f32,
    /// Candidates above this are medium confidence.
    pub medium_confidence_threshold: f32,
    /// Maximum candidates returned per resolution.
    pub max_candidates: usize,
    /// Cache size ceiling before half-eviction.
    pub cache_max_entries: usize,
    /// Cross references are recorded above this confidence.
    pub cross_reference_threshold: f32,
    /// Scale applied to name similarity when deriving cross-reference confidence.
    pub name_link_weight: f32,
    /// Proposals with confidence above this execute without review.
    pub auto_merge_threshold: f32,
    /// Proposals with confidence above this are sent for manual review.
    pub review_threshold: f32,
    /// Minimum confidence for `propose_entity_merges` suggestions.
    pub proposal_threshold: f32,
    /// Bound on behavior-fingerprint sample windows.
    pub fingerprint_sample_limit: usize,
    /// Match-factor weights.
    pub weights: FactorWeights,
    /// Risk penalties.
    pub penalties: SeverityPenalties,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            similarity_accept_threshold: 0.7,
            contextual_accept_threshold: 0.3,
            context_window: 10,
            name_prefilter_threshold: 0.75,
            duplicate_similarity_threshold: 0.6,
            identity_confidence_tolerance: 0.3,
            active_room_boost: 0.1,
            security_sensitive_penalty: 0.1,
            high_confidence_threshold: 0.85,
            medium_confidence_threshold: 0.6,
            max_candidates: 10,
            cache_max_entries: 1000,
            cross_reference_threshold: 0.3,
            name_link_weight: 0.5,
            auto_merge_threshold: 0.95,
            review_threshold: 0.75,
            proposal_threshold: 0.7,
            fingerprint_sample_limit: 100,
            weights: FactorWeights::default(),
            penalties: SeverityPenalties::default(),
        }
    }
}

fn invalid(reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidConfig {
        reason: reason.into(),
    }
}

fn check_unit(name: &str, value: f32) -> Result<(), ValidationError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(format!("{name} must be within [0.0, 1.0], got {value}")))
    }
}

impl ResolverConfig {
    /// Parses a TOML document and validates it.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` on malformed TOML or
    /// out-of-range values.
    pub fn from_toml_str(text: &str) -> IdentityResult<Self> {
        let cfg: Self = toml::from_str(text).map_err(|e| invalid(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Loads and validates a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` if the file cannot be read or
    /// fails validation.
    pub fn load(path: impl AsRef<Path>) -> IdentityResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| invalid(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Checks ranges and threshold ordering.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` describing the first problem.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (name, value) in [
            ("similarity_accept_threshold", self.similarity_accept_threshold),
            ("contextual_accept_threshold", self.contextual_accept_threshold),
            ("name_prefilter_threshold", self.name_prefilter_threshold),
            ("duplicate_similarity_threshold", self.duplicate_similarity_threshold),
            ("identity_confidence_tolerance", self.identity_confidence_tolerance),
            ("active_room_boost", self.active_room_boost),
            ("security_sensitive_penalty", self.security_sensitive_penalty),
            ("high_confidence_threshold", self.high_confidence_threshold),
            ("medium_confidence_threshold", self.medium_confidence_threshold),
            ("cross_reference_threshold", self.cross_reference_threshold),
            ("name_link_weight", self.name_link_weight),
            ("auto_merge_threshold", self.auto_merge_threshold),
            ("review_threshold", self.review_threshold),
            ("proposal_threshold", self.proposal_threshold),
        ] {
            check_unit(name, value)?;
        }

        if self.medium_confidence_threshold > self.high_confidence_threshold {
            return Err(invalid(
                "medium_confidence_threshold must not exceed high_confidence_threshold",
            ));
        }
        if self.review_threshold > self.auto_merge_threshold {
            return Err(invalid("review_threshold must not exceed auto_merge_threshold"));
        }
        if self.max_candidates == 0 {
            return Err(invalid("max_candidates must be at least 1"));
        }
        if self.cache_max_entries < 2 {
            return Err(invalid("cache_max_entries must be at least 2"));
        }
        if self.weights.all().iter().any(|w| !w.is_finite() || *w <= 0.0) {
            return Err(invalid("factor weights must be positive"));
        }
        for (name, value) in [
            ("penalties.low", self.penalties.low),
            ("penalties.medium", self.penalties.medium),
            ("penalties.high", self.penalties.high),
            ("penalties.critical", self.penalties.critical),
        ] {
            check_unit(name, value)?;
        }
        Ok(())
    }
}
