//! Context adjustment and conflict detection over scored candidates.

use crate::candidate::{EntityResolutionCandidate, RiskFactor, RiskSeverity, RiskType};
use crate::config::ResolverConfig;
use crate::confidence::adjust;
use crate::context::{ResolutionContext, TrustRequirements};

/// Confidence band of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfidenceTier {
    /// At or below the medium threshold.
    Low,
    /// Above the medium threshold.
    Medium,
    /// Above the high threshold.
    High,
}

impl ConfidenceTier {
    /// Classifies a confidence value.
    #[must_use]
    pub fn of(confidence: f32, config: &ResolverConfig) -> Self {
        if confidence > config.high_confidence_threshold {
            Self::High
        } else if confidence > config.medium_confidence_threshold {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Scales confidences by room activity and security sensitivity.
pub fn apply_context(
    candidates: &mut [EntityResolutionCandidate],
    context: &ResolutionContext,
    config: &ResolverConfig,
) {
    let in_room = context.is_active_room();
    let sensitive = context.is_security_sensitive();
    for candidate in candidates.iter_mut() {
        if in_room {
            candidate.confidence = adjust(candidate.confidence, config.active_room_boost);
        }
        if sensitive {
            candidate.confidence = adjust(candidate.confidence, -config.security_sensitive_penalty);
        }
    }
}

/// Flags competing high-confidence candidates, then sorts by confidence
/// descending and truncates to `max_candidates`.
///
/// The added risk factors are informational: confidences are not
/// recomputed here.
#[must_use]
pub fn detect_conflicts(
    mut candidates: Vec<EntityResolutionCandidate>,
    config: &ResolverConfig,
) -> Vec<EntityResolutionCandidate> {
    let high = candidates
        .iter()
        .filter(|c| ConfidenceTier::of(c.confidence, config) == ConfidenceTier::High)
        .count();

    if high > 1 {
        tracing::debug!(high, "multiple high-confidence candidates");
        for candidate in &mut candidates {
            if ConfidenceTier::of(candidate.confidence, config) == ConfidenceTier::High {
                candidate.risk_factors.push(RiskFactor::new(
                    RiskType::IdentityConflict,
                    RiskSeverity::High,
                    candidate.confidence,
                    "another candidate is equally plausible",
                    format!("{high} candidates above {:.2}", config.high_confidence_threshold),
                ));
            }
        }
    }

    candidates.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    candidates.truncate(config.max_candidates);
    candidates
}

/// Drops candidates that fail the caller's trust requirements.
#[must_use]
pub fn filter_trusted(
    candidates: Vec<EntityResolutionCandidate>,
    requirements: Option<&TrustRequirements>,
) -> Vec<EntityResolutionCandidate> {
    let Some(req) = requirements else {
        return candidates;
    };
    let before = candidates.len();
    let kept: Vec<_> = candidates
        .into_iter()
        .filter(|c| req.min_confidence.map_or(true, |min| c.confidence >= min))
        .filter(|c| !req.require_verified_identity || c.has_verified_identity_match())
        .collect();
    if kept.len() < before {
        tracing::debug!(dropped = before - kept.len(), "candidates failed trust requirements");
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;

    fn candidate(name: &str, confidence: f32) -> EntityResolutionCandidate {
        let entity = Entity::new(name);
        EntityResolutionCandidate {
            entity_id: entity.id,
            entity,
            confidence,
            match_factors: Vec::new(),
            risk_factors: Vec::new(),
            cross_platform_indicators: Vec::new(),
        }
    }

    #[test]
    fn tiers() {
        let cfg = ResolverConfig::default();
        assert_eq!(ConfidenceTier::of(0.9, &cfg), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::of(0.85, &cfg), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::of(0.6, &cfg), ConfidenceTier::Low);
    }

    #[test]
    fn room_boost_is_clamped() {
        let cfg = ResolverConfig::default();
        let mut cs = vec![candidate("a", 0.95), candidate("b", 0.5)];
        apply_context(&mut cs, &ResolutionContext::in_room("r"), &cfg);
        assert_eq!(cs[0].confidence, 1.0);
        assert!((cs[1].confidence - 0.55).abs() < 1e-6);
    }

    #[test]
    fn security_sensitive_lowers() {
        let cfg = ResolverConfig::default();
        let mut cs = vec![candidate("a", 0.5)];
        apply_context(&mut cs, &ResolutionContext::new().security_sensitive(), &cfg);
        assert!((cs[0].confidence - 0.45).abs() < 1e-6);
    }

    #[test]
    fn no_room_no_change() {
        let cfg = ResolverConfig::default();
        let mut cs = vec![candidate("a", 0.5)];
        apply_context(&mut cs, &ResolutionContext::new(), &cfg);
        assert_eq!(cs[0].confidence, 0.5);
    }

    #[test]
    fn two_high_candidates_both_flagged() {
        let cfg = ResolverConfig::default();
        let out = detect_conflicts(
            vec![candidate("a", 0.88), candidate("b", 0.95), candidate("c", 0.7)],
            &cfg,
        );
        assert_eq!(out[0].confidence, 0.95);
        assert!(out[0].has_risk(RiskType::IdentityConflict));
        assert!(out[1].has_risk(RiskType::IdentityConflict));
        assert!(!out[2].has_risk(RiskType::IdentityConflict));
        // Confidences are not recomputed.
        assert_eq!(out[1].confidence, 0.88);
    }

    #[test]
    fn single_high_candidate_not_flagged() {
        let cfg = ResolverConfig::default();
        let out = detect_conflicts(vec![candidate("a", 0.9), candidate("b", 0.5)], &cfg);
        assert!(out.iter().all(|c| c.risk_factors.is_empty()));
    }

    #[test]
    fn truncates_to_max_candidates() {
        let cfg = ResolverConfig {
            max_candidates: 2,
            ..ResolverConfig::default()
        };
        let out = detect_conflicts(
            vec![candidate("a", 0.1), candidate("b", 0.3), candidate("c", 0.2)],
            &cfg,
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].confidence, 0.3);
        assert_eq!(out[1].confidence, 0.2);
    }

    #[test]
    fn trust_filter() {
        let req = TrustRequirements {
            min_confidence: Some(0.5),
            require_verified_identity: false,
            security_sensitive: false,
        };
        let kept = filter_trusted(vec![candidate("a", 0.6), candidate("b", 0.4)], Some(&req));
        assert_eq!(kept.len(), 1);

        let strict = TrustRequirements {
            require_verified_identity: true,
            ..req
        };
        assert!(filter_trusted(vec![candidate("a", 0.9)], Some(&strict)).is_empty());
        assert_eq!(filter_trusted(vec![candidate("a", 0.1)], None).len(), 1);
    }
}
