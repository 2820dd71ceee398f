//! Confidence arithmetic.
//!
//! Candidate confidence is the weighted mean of match-factor confidences
//! minus severity-weighted risk penalties, clamped to [0, 1]. Kept separate
//! from the scorer so that re-scoring after disambiguation or conflict
//! detection uses exactly the same rules.

use crate::candidate::{MatchFactor, RiskFactor};
use crate::config::SeverityPenalties;

/// Clamps a score to [0, 1], mapping NaN to 0.
#[must_use]
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Weighted mean of factor confidences; 0 when there are no factors.
#[must_use]
pub fn weighted_mean(factors: &[MatchFactor]) -> f32 {
    let (num, den) = factors.iter().fold((0.0f32, 0.0f32), |(n, d), f| {
        (n + f.weight * f.confidence, d + f.weight)
    });
    if den <= 0.0 {
        0.0
    } else {
        clamp_unit(num / den)
    }
}

/// Total penalty contributed by a set of risks.
#[must_use]
pub fn risk_penalty(risks: &[RiskFactor], penalties: &SeverityPenalties) -> f32 {
    risks
        .iter()
        .map(|r| penalties.penalty(r.severity) * r.confidence)
        .sum()
}

/// Final candidate confidence.
#[must_use]
pub fn combine(factors: &[MatchFactor], risks: &[RiskFactor], penalties: &SeverityPenalties) -> f32 {
    clamp_unit(weighted_mean(factors) - risk_penalty(risks, penalties))
}

/// Applies a multiplicative adjustment (e.g. `0.1` for +10%) and re-clamps.
#[must_use]
pub fn adjust(value: f32, delta: f32) -> f32 {
    clamp_unit(value * (1.0 + delta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{MatchFactorType, RiskSeverity, RiskType};

    fn factor(kind: MatchFactorType, confidence: f32, weight: f32) -> MatchFactor {
        MatchFactor::new(kind, confidence, weight, "")
    }

    #[test]
    fn weighted_mean_uses_weights() {
        let factors = vec![
            factor(MatchFactorType::ExactName, 1.0, 1.0),
            factor(MatchFactorType::ContextualHint, 0.5, 0.5),
        ];
        let mean = weighted_mean(&factors);
        assert!((mean - (1.0 + 0.25) / 1.5).abs() < 1e-6);
        assert_eq!(weighted_mean(&[]), 0.0);
    }

    #[test]
    fn combine_floors_at_zero() {
        let risks = vec![RiskFactor::new(
            RiskType::IdentityConflict,
            RiskSeverity::Critical,
            1.0,
            "",
            "",
        ); 5];
        let factors = vec![factor(MatchFactorType::SimilarName, 0.2, 0.8)];
        assert_eq!(combine(&factors, &risks, &SeverityPenalties::default()), 0.0);
    }

    #[test]
    fn adjust_reclamps() {
        assert_eq!(adjust(0.95, 0.1), 1.0);
        assert!((adjust(0.5, -0.1) - 0.45).abs() < 1e-6);
        assert_eq!(clamp_unit(f32::NAN), 0.0);
    }
}
