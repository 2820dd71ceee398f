//! Match and risk scoring.
//!
//! Turns candidate entities into evidence bundles. Positive evidence comes
//! from names, platform identities, the conversation, the identity graph and
//! the behavioral fingerprint;
//! negative evidence from look-alike candidates and inconsistent identities.
//! The oracle is consulted for fuzzy name and context judgements; when it
//! fails, the affected factor is simply absent.

use std::collections::BTreeMap;

use crate::candidate::{
    CrossPlatformIndicator, EntityResolutionCandidate, MatchFactor, MatchFactorType, RiskFactor,
    RiskSeverity, RiskType,
};
use crate::config::ResolverConfig;
use crate::confidence::combine;
use crate::context::ResolutionContext;
use crate::entity::Entity;
use crate::graph::{IdentityGraph, IdentityGraphStore};
use crate::oracle::{ask, OraclePrompt, SimilarityOracle};
use crate::platform::{normalize_handle, normalize_platform, PlatformIdentity};
use crate::similarity::best_name_similarity;

/// Scores candidates for one identifier.
pub struct MatchScorer<'a> {
    oracle: &'a dyn SimilarityOracle,
    graphs: &'a IdentityGraphStore,
    config: &'a ResolverConfig,
}

impl<'a> MatchScorer<'a> {
    /// Creates a scorer.
    #[must_use]
    pub fn new(
        oracle: &'a dyn SimilarityOracle,
        graphs: &'a IdentityGraphStore,
        config: &'a ResolverConfig,
    ) -> Self {
        Self {
            oracle,
            graphs,
            config,
        }
    }

    /// Scores every candidate. Candidates without any positive evidence are
    /// dropped.
    #[must_use]
    pub fn score(
        &self,
        identifier: &str,
        context: &ResolutionContext,
        platform_hint: Option<&str>,
        candidates: &[Entity],
    ) -> Vec<EntityResolutionCandidate> {
        candidates
            .iter()
            .filter_map(|entity| {
                let scored = self.score_one(identifier, context, platform_hint, entity, candidates);
                if scored.match_factors.is_empty() {
                    tracing::debug!(entity_id = %entity.id, "candidate has no supporting evidence");
                    None
                } else {
                    Some(scored)
                }
            })
            .collect()
    }

    /// Scores a single candidate against its peers.
    #[must_use]
    pub fn score_one(
        &self,
        identifier: &str,
        context: &ResolutionContext,
        platform_hint: Option<&str>,
        entity: &Entity,
        peers: &[Entity],
    ) -> EntityResolutionCandidate {
        let graph = self.graph_for(entity);
        let identities = merged_identities(entity, graph.as_ref());

        let mut match_factors = Vec::new();
        self.name_factor(identifier, entity, &mut match_factors);
        self.platform_factor(identifier, platform_hint, &identities, &mut match_factors);
        self.context_factor(identifier, context, entity, &mut match_factors);
        self.network_factors(context, graph.as_ref(), &mut match_factors);
        self.behavior_factor(context, graph.as_ref(), &mut match_factors);

        let mut risk_factors = Vec::new();
        self.duplicate_risk(entity, &identities, peers, &mut risk_factors);
        self.identity_conflict_risks(identifier, entity, graph.as_ref(), &identities, &mut risk_factors);

        let confidence = combine(&match_factors, &risk_factors, &self.config.penalties);

        let cross_platform_indicators = identities
            .values()
            .map(|identity| CrossPlatformIndicator {
                platform: identity.platform.clone(),
                handle: identity.handle.clone(),
                verified: identity.verified,
                confidence: identity.confidence,
                matches_identifier: identity.matches_identifier(identifier),
            })
            .collect();

        EntityResolutionCandidate {
            entity_id: entity.id,
            entity: entity.clone(),
            confidence,
            match_factors,
            risk_factors,
            cross_platform_indicators,
        }
    }

    fn graph_for(&self, entity: &Entity) -> Option<IdentityGraph> {
        self.graphs.get(entity.id).unwrap_or_else(|e| {
            tracing::warn!(entity_id = %entity.id, error = %e, "identity graph unavailable");
            None
        })
    }

    fn factor(&self, kind: MatchFactorType, confidence: f32, evidence: String) -> MatchFactor {
        MatchFactor::new(kind, confidence, self.config.weights.weight(kind), evidence)
    }

    fn name_factor(&self, identifier: &str, entity: &Entity, out: &mut Vec<MatchFactor>) {
        if entity.has_name(identifier) {
            out.push(self.factor(
                MatchFactorType::ExactName,
                1.0,
                format!("\"{identifier}\" is a known name"),
            ));
            return;
        }

        let best = entity
            .names
            .iter()
            .filter_map(|name| {
                let prompt = OraclePrompt::NameSimilarity {
                    left: identifier.to_string(),
                    right: name.clone(),
                };
                ask(self.oracle, &prompt).map(|score| (score, name))
            })
            .max_by(|a, b| a.0.total_cmp(&b.0));

        if let Some((score, name)) = best {
            if score > self.config.similarity_accept_threshold {
                out.push(self.factor(
                    MatchFactorType::SimilarName,
                    score,
                    format!("\"{identifier}\" resembles \"{name}\" ({score:.2})"),
                ));
            }
        }
    }

    fn platform_factor(
        &self,
        identifier: &str,
        platform_hint: Option<&str>,
        identities: &BTreeMap<String, PlatformIdentity>,
        out: &mut Vec<MatchFactor>,
    ) {
        let hint = platform_hint.map(normalize_platform);
        let best = identities
            .values()
            .filter(|identity| hint.as_deref().map_or(true, |h| identity.platform == h))
            .filter(|identity| identity.matches_identifier(identifier))
            .map(|identity| (if identity.verified { 1.0f32 } else { 0.8 }, identity))
            .max_by(|a, b| a.0.total_cmp(&b.0));

        if let Some((confidence, identity)) = best {
            out.push(self.factor(
                MatchFactorType::PlatformIdentity,
                confidence,
                format!(
                    "{} handle {}{}",
                    identity.platform,
                    identity.handle,
                    if identity.verified { " (verified)" } else { "" }
                ),
            ));
        }
    }

    fn context_factor(
        &self,
        identifier: &str,
        context: &ResolutionContext,
        entity: &Entity,
        out: &mut Vec<MatchFactor>,
    ) {
        if context.recent_messages.is_empty() {
            return;
        }
        let prompt = OraclePrompt::ContextualHint {
            identifier: identifier.to_string(),
            candidate_names: entity.names.clone(),
            transcript: context.transcript(self.config.context_window),
        };
        if let Some(score) = ask(self.oracle, &prompt) {
            if score > self.config.contextual_accept_threshold {
                out.push(self.factor(
                    MatchFactorType::ContextualHint,
                    score,
                    format!("recent conversation points at this entity ({score:.2})"),
                ));
            }
        }
    }

    fn network_factors(
        &self,
        context: &ResolutionContext,
        graph: Option<&IdentityGraph>,
        out: &mut Vec<MatchFactor>,
    ) {
        let (Some(source), Some(graph)) = (context.source_entity_id, graph) else {
            return;
        };
        if let Some(link) = graph.cross_reference_to(source) {
            out.push(self.factor(
                MatchFactorType::NetworkProximity,
                link.confidence,
                format!("linked to speaker {source}"),
            ));
        }
        if let Some(edge) = graph.trust_edge_to(source) {
            out.push(self.factor(
                MatchFactorType::TrustCorrelation,
                edge.score,
                format!("trust path of length {} to speaker {source}", edge.length),
            ));
        }
    }

    /// Topics the recent conversation mentions, weighted by the entity's
    /// recorded affinity for them.
    fn behavior_factor(
        &self,
        context: &ResolutionContext,
        graph: Option<&IdentityGraph>,
        out: &mut Vec<MatchFactor>,
    ) {
        let Some(graph) = graph else {
            return;
        };
        let affinities = &graph.fingerprint.topic_affinities;
        if affinities.is_empty() || context.recent_messages.is_empty() {
            return;
        }
        let transcript = context
            .transcript(self.config.context_window)
            .join("\n")
            .to_lowercase();
        let best = affinities
            .iter()
            .filter(|(topic, _)| {
                let topic = topic.trim().to_lowercase();
                !topic.is_empty() && transcript.contains(&topic)
            })
            .max_by(|a, b| a.1.total_cmp(b.1));

        if let Some((topic, &affinity)) = best {
            if affinity > self.config.contextual_accept_threshold {
                out.push(self.factor(
                    MatchFactorType::BehavioralPattern,
                    affinity,
                    format!("conversation is about \"{topic}\" (affinity {affinity:.2})"),
                ));
            }
        }
    }

    fn duplicate_risk(
        &self,
        entity: &Entity,
        identities: &BTreeMap<String, PlatformIdentity>,
        peers: &[Entity],
        out: &mut Vec<RiskFactor>,
    ) {
        let strongest = peers
            .iter()
            .filter(|peer| peer.id != entity.id)
            .filter_map(|peer| {
                let name_sim = best_name_similarity(&entity.names, &peer.names);
                let shares_handle = peer.platform_identities().iter().any(|theirs| {
                    identities
                        .get(&theirs.platform)
                        .is_some_and(|mine| mine.key() == theirs.key())
                });
                let score = if shares_handle { name_sim.max(0.9) } else { name_sim };
                (shares_handle || name_sim >= self.config.duplicate_similarity_threshold)
                    .then_some((score, peer, shares_handle))
            })
            .max_by(|a, b| a.0.total_cmp(&b.0));

        if let Some((score, peer, shares_handle)) = strongest {
            let label = peer.primary_name().unwrap_or("unnamed");
            out.push(RiskFactor::new(
                RiskType::PotentialDuplicate,
                RiskSeverity::Medium,
                score,
                format!("may duplicate \"{label}\""),
                if shares_handle {
                    format!("shares a platform handle with {}", peer.id)
                } else {
                    format!("name similarity {score:.2} with {}", peer.id)
                },
            ));
        }
    }

    fn identity_conflict_risks(
        &self,
        identifier: &str,
        entity: &Entity,
        graph: Option<&IdentityGraph>,
        identities: &BTreeMap<String, PlatformIdentity>,
        out: &mut Vec<RiskFactor>,
    ) {
        if let Some(graph) = graph {
            for stored in entity.platform_identities() {
                let Some(known) = graph.identity(&stored.platform) else {
                    continue;
                };
                // A ledger-verified graph identity supersedes an unverified directory copy.
                if known.key() != stored.key() || (known.verified && !stored.verified) {
                    continue;
                }
                let gap = (known.confidence - stored.confidence).abs();
                if known.verified != stored.verified || gap > self.config.identity_confidence_tolerance {
                    out.push(RiskFactor::new(
                        RiskType::IdentityConflict,
                        RiskSeverity::High,
                        if known.verified == stored.verified { gap } else { gap.max(0.7) },
                        format!("conflicting records for {}", known.key()),
                        format!(
                            "directory verified={} confidence={:.2}; graph verified={} confidence={:.2}",
                            stored.verified, stored.confidence, known.verified, known.confidence
                        ),
                    ));
                }
            }
        }

        let needle = normalize_handle(identifier);
        if needle.is_empty() {
            return;
        }
        for identity in identities.values() {
            let handle = normalize_handle(&identity.handle);
            if handle.is_empty() || handle == needle {
                continue;
            }
            if handle.contains(&needle) || needle.contains(&handle) {
                #[allow(clippy::cast_precision_loss)]
                let overlap = handle.len().min(needle.len()) as f32
                    / handle.len().max(needle.len()) as f32;
                out.push(RiskFactor::new(
                    RiskType::IdentityConflict,
                    RiskSeverity::High,
                    overlap,
                    format!("\"{identifier}\" partially matches handle {}", identity.handle),
                    format!("{} handle overlap {overlap:.2}", identity.platform),
                ));
            }
        }
    }
}

/// Directory identities overlaid with the identity graph's view.
fn merged_identities(
    entity: &Entity,
    graph: Option<&IdentityGraph>,
) -> BTreeMap<String, PlatformIdentity> {
    let mut merged = BTreeMap::new();
    for identity in entity.platform_identities() {
        merged.insert(normalize_platform(&identity.platform), identity);
    }
    if let Some(graph) = graph {
        for (platform, identity) in &graph.platform_identities {
            match merged.get(platform) {
                Some(existing) if existing.confidence > identity.confidence => {}
                _ => {
                    merged.insert(platform.clone(), identity.clone());
                }
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;
    use crate::graph::{BehaviorObservation, CrossReference, LinkingFactor, TrustEdge};
    use crate::oracle::{LexicalOracle, OracleError};

    struct Fixed(&'static str);

    impl SimilarityOracle for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn generate(&self, _prompt: &OraclePrompt) -> Result<String, OracleError> {
            Ok(self.0.to_string())
        }
    }

    struct Down;

    impl SimilarityOracle for Down {
        fn name(&self) -> &str {
            "down"
        }
        fn generate(&self, _prompt: &OraclePrompt) -> Result<String, OracleError> {
            Err(OracleError::Timeout(500))
        }
    }

    fn scorer<'a>(
        oracle: &'a dyn SimilarityOracle,
        graphs: &'a IdentityGraphStore,
        cfg: &'a ResolverConfig,
    ) -> MatchScorer<'a> {
        MatchScorer::new(oracle, graphs, cfg)
    }

    #[test]
    fn exact_beats_similar_for_alice_and_alicia() {
        let graphs = IdentityGraphStore::new();
        let cfg = ResolverConfig::default();
        let s = scorer(&LexicalOracle, &graphs, &cfg);
        let alice = Entity::new("Alice");
        let alicia = Entity::new("Alicia");
        let peers = vec![alice.clone(), alicia.clone()];
        let ctx = ResolutionContext::new();

        let scored = s.score("Alice", &ctx, None, &peers);
        assert_eq!(scored.len(), 2);
        let a = &scored[0];
        let b = &scored[1];
        assert!(a.has_match(MatchFactorType::ExactName));
        assert!(a.confidence >= 0.85, "exact confidence {}", a.confidence);
        assert!(b.has_match(MatchFactorType::SimilarName));
        assert!(!b.has_match(MatchFactorType::ExactName));
        assert!(b.confidence < a.confidence);
        assert!(a.has_risk(RiskType::PotentialDuplicate));
    }

    #[test]
    fn similarity_below_threshold_is_ignored() {
        let graphs = IdentityGraphStore::new();
        let cfg = ResolverConfig::default();
        let s = scorer(&Fixed("0.65"), &graphs, &cfg);
        let e = Entity::new("Alicia");
        let scored = s.score_one("Alice", &ResolutionContext::new(), None, &e, &[]);
        assert!(scored.match_factors.is_empty());
        assert_eq!(scored.confidence, 0.0);
    }

    #[test]
    fn oracle_failure_and_garbage_contribute_nothing() {
        let graphs = IdentityGraphStore::new();
        let cfg = ResolverConfig::default();
        let e = Entity::new("Alicia");
        let ctx = ResolutionContext::new().with_message("bob", "Alicia said hi");

        for oracle in [&Down as &dyn SimilarityOracle, &Fixed("definitely!")] {
            let s = scorer(oracle, &graphs, &cfg);
            let scored = s.score_one("Alice", &ctx, None, &e, &[]);
            assert!(scored.match_factors.is_empty());
            assert_eq!(scored.confidence, 0.0);
        }
    }

    #[test]
    fn verified_platform_identity_scores_full() {
        let graphs = IdentityGraphStore::new();
        let cfg = ResolverConfig::default();
        let s = scorer(&Fixed("0.0"), &graphs, &cfg);

        let mut e = Entity::new("Robert");
        e.set_platform_identity(PlatformIdentity::new("discord", "@bob", 0.9).verified());
        let scored = s.score_one("bob", &ResolutionContext::new(), Some("discord"), &e, &[]);
        let factor = scored
            .match_factors
            .iter()
            .find(|f| f.kind == MatchFactorType::PlatformIdentity)
            .unwrap();
        assert_eq!(factor.confidence, 1.0);
        assert!(scored.has_verified_identity_match());

        // Hint for another platform excludes the identity.
        let other = s.score_one("bob", &ResolutionContext::new(), Some("telegram"), &e, &[]);
        assert!(!other.has_match(MatchFactorType::PlatformIdentity));
    }

    #[test]
    fn unverified_platform_identity_scores_point_eight() {
        let graphs = IdentityGraphStore::new();
        let cfg = ResolverConfig::default();
        let s = scorer(&Fixed("0.0"), &graphs, &cfg);
        let mut e = Entity::new("Robert");
        e.set_platform_identity(PlatformIdentity::new("discord", "bob", 0.9));
        let scored = s.score_one("bob", &ResolutionContext::new(), None, &e, &[]);
        assert!((scored.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn partial_handle_match_is_identity_conflict() {
        let graphs = IdentityGraphStore::new();
        let cfg = ResolverConfig::default();
        let s = scorer(&Fixed("0.0"), &graphs, &cfg);
        let mut e = Entity::new("bob");
        e.set_platform_identity(PlatformIdentity::new("discord", "bobby", 0.9));
        let scored = s.score_one("bob", &ResolutionContext::new(), None, &e, &[]);
        let risk = scored
            .risk_factors
            .iter()
            .find(|r| r.kind == RiskType::IdentityConflict)
            .unwrap();
        assert_eq!(risk.severity, RiskSeverity::High);
        assert!((risk.confidence - 0.6).abs() < 1e-6);
        assert!(scored.confidence < 1.0);
    }

    #[test]
    fn directory_and_graph_disagreement_is_identity_conflict() {
        let graphs = IdentityGraphStore::new();
        let cfg = ResolverConfig::default();
        let s = scorer(&Fixed("0.0"), &graphs, &cfg);

        let mut e = Entity::new("Carol");
        e.set_platform_identity(PlatformIdentity::new("discord", "carol", 0.9).verified());
        let mut graph = IdentityGraph::new(e.id);
        graph.upsert_identity(PlatformIdentity::new("discord", "carol", 0.3));
        graphs.insert(graph).unwrap();

        let scored = s.score_one("Carol", &ResolutionContext::new(), None, &e, &[]);
        assert!(scored.has_risk(RiskType::IdentityConflict));
    }

    #[test]
    fn graph_verification_is_not_a_disagreement() {
        let graphs = IdentityGraphStore::new();
        let cfg = ResolverConfig::default();
        let s = scorer(&Fixed("0.0"), &graphs, &cfg);

        let mut e = Entity::new("Carol");
        e.set_platform_identity(PlatformIdentity::new("discord", "carol", 0.8));
        let mut graph = IdentityGraph::new(e.id);
        graph.upsert_identity(PlatformIdentity::new("discord", "carol", 1.0).verified());
        graphs.insert(graph).unwrap();

        let scored = s.score_one("Carol", &ResolutionContext::new(), None, &e, &[]);
        assert!(!scored.has_risk(RiskType::IdentityConflict));
        assert!(scored.has_match(MatchFactorType::ExactName));
    }

    #[test]
    fn topic_affinity_in_conversation_is_behavioral_evidence() {
        let graphs = IdentityGraphStore::new();
        let cfg = ResolverConfig::default();
        let s = scorer(&Fixed("0.0"), &graphs, &cfg);

        let e = Entity::new("Carol");
        let mut graph = IdentityGraph::new(e.id);
        graph.fingerprint.record(
            BehaviorObservation {
                topics: [("Chess".to_string(), 0.9), ("gardening".to_string(), 0.2)]
                    .into_iter()
                    .collect(),
                ..BehaviorObservation::default()
            },
            8,
        );
        graphs.insert(graph).unwrap();

        let ctx = ResolutionContext::new().with_message("bob", "anyone up for chess tonight?");
        let scored = s.score_one("Carol", &ctx, None, &e, &[]);
        let factor = scored
            .match_factors
            .iter()
            .find(|f| f.kind == MatchFactorType::BehavioralPattern)
            .unwrap();
        assert!((factor.confidence - 0.9).abs() < 1e-6);

        let quiet = ResolutionContext::new().with_message("bob", "gardening, anyone?");
        let scored = s.score_one("Carol", &quiet, None, &e, &[]);
        assert!(!scored.has_match(MatchFactorType::BehavioralPattern));
    }

    #[test]
    fn shared_handle_is_potential_duplicate() {
        let graphs = IdentityGraphStore::new();
        let cfg = ResolverConfig::default();
        let s = scorer(&Fixed("0.0"), &graphs, &cfg);
        let mut a = Entity::new("Zed");
        a.set_platform_identity(PlatformIdentity::new("discord", "zz", 0.9));
        let mut b = Entity::new("Quinn");
        b.set_platform_identity(PlatformIdentity::new("discord", "@ZZ", 0.5));
        let scored = s.score_one("Zed", &ResolutionContext::new(), None, &a, &[a.clone(), b]);
        assert!(scored.has_risk(RiskType::PotentialDuplicate));
    }

    #[test]
    fn context_and_network_factors() {
        let graphs = IdentityGraphStore::new();
        let cfg = ResolverConfig::default();
        let s = scorer(&LexicalOracle, &graphs, &cfg);

        let speaker = EntityId::new();
        let e = Entity::new("Alice");
        let mut graph = IdentityGraph::new(e.id);
        graph.add_cross_reference(CrossReference {
            target: speaker,
            linking_factor: LinkingFactor::NameSimilarity,
            confidence: 0.6,
            bidirectional: true,
        });
        graph.add_trust_edge(TrustEdge::direct(speaker, 0.8));
        graphs.insert(graph).unwrap();

        let ctx = ResolutionContext::in_room("r")
            .with_source(speaker)
            .with_message("bob", "Alice is on her way");
        let scored = s.score_one("Alice", &ctx, None, &e, &[]);
        assert!(scored.has_match(MatchFactorType::ContextualHint));
        assert!(scored.has_match(MatchFactorType::NetworkProximity));
        assert!(scored.has_match(MatchFactorType::TrustCorrelation));
        assert!(scored.confidence > 0.0 && scored.confidence <= 1.0);
    }
}
