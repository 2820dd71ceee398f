//! The entity resolver.
//!
//! [`EntityResolver`] wires the resolution pipeline, the identity graphs, the
//! verification ledger and the merge machinery to the external
//! collaborators. Each instance owns its in-process state; nothing is
//! global.
//!
//! Resolution never fails: directory and oracle faults degrade to fewer
//! candidates or fewer factors. Mutations (entity creation, claims,
//! confirmations, merges) propagate errors.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};

use crate::candidate::EntityResolutionCandidate;
use crate::config::ResolverConfig;
use crate::context::ResolutionContext;
use crate::entity::{Entity, EntityId, NewEntity};
use crate::error::{ExecutionError, IdentityError, IdentityResult, ValidationError};
use crate::events::{EventBus, EventPayload, NullEventBus, ResolverEvent};
use crate::graph::{
    overlap_confidence, BehaviorObservation, IdentityGraph, IdentityGraphStore, LinkPolicy,
    TrustEdge,
};
use crate::merge::{
    EntityMergeProposal, MergeExecutor, MergeKey, MergeOptions, MergeOutcome, MergeStrategy,
    PendingMerges,
};
use crate::oracle::{LexicalOracle, SimilarityOracle};
use crate::platform::{PlatformIdentity, PlatformKey};
use crate::resolution::{
    apply_context, detect_conflicts, filter_trusted, CacheStats, CandidateFinder, MatchScorer,
    ResolutionCache,
};
use crate::similarity::best_name_similarity;
use crate::storage::{EntityDirectory, NoopRedirector, RelationshipRedirector, StorageError};
use crate::verification::{
    ClaimId, NewClaim, NewConfirmation, PlatformClaim, PlatformConfirmation, VerificationLedger,
};

/// In-process stores fail only on poisoned locks.
fn internal(err: StorageError) -> IdentityError {
    IdentityError::internal(err.to_string())
}

/// Builder for [`EntityResolver`].
///
/// Only the directory is required. The oracle defaults to [`LexicalOracle`],
/// the redirector to [`NoopRedirector`], the event bus to [`NullEventBus`]
/// and the configuration to [`ResolverConfig::default`].
#[derive(Default)]
pub struct EntityResolverBuilder {
    directory: Option<Arc<dyn EntityDirectory>>,
    oracle: Option<Arc<dyn SimilarityOracle>>,
    redirector: Option<Arc<dyn RelationshipRedirector>>,
    events: Option<Arc<dyn EventBus>>,
    config: Option<ResolverConfig>,
}

impl EntityResolverBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the entity directory.
    #[must_use]
    pub fn directory(mut self, directory: Arc<dyn EntityDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Sets the similarity oracle.
    #[must_use]
    pub fn oracle(mut self, oracle: Arc<dyn SimilarityOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Sets the relationship redirector.
    #[must_use]
    pub fn redirector(mut self, redirector: Arc<dyn RelationshipRedirector>) -> Self {
        self.redirector = Some(redirector);
        self
    }

    /// Sets the event bus.
    #[must_use]
    pub fn events(mut self, events: Arc<dyn EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: ResolverConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Builds the resolver.
    ///
    /// # Errors
    ///
    /// Returns `MissingField` without a directory and `InvalidConfig` when
    /// the configuration fails validation.
    pub fn build(self) -> Result<EntityResolver, ValidationError> {
        let directory = self.directory.ok_or(ValidationError::MissingField {
            field: "directory".to_string(),
        })?;
        let config = self.config.unwrap_or_default();
        config.validate()?;

        Ok(EntityResolver {
            directory,
            oracle: self.oracle.unwrap_or_else(|| Arc::new(LexicalOracle::new())),
            redirector: self.redirector.unwrap_or_else(|| Arc::new(NoopRedirector)),
            events: self.events.unwrap_or_else(|| Arc::new(NullEventBus)),
            graphs: IdentityGraphStore::new(),
            cache: ResolutionCache::new(config.cache_max_entries),
            ledger: VerificationLedger::new(),
            pending: PendingMerges::new(),
            config,
        })
    }
}

/// Entity resolution and identity reconciliation.
pub struct EntityResolver {
    directory: Arc<dyn EntityDirectory>,
    oracle: Arc<dyn SimilarityOracle>,
    redirector: Arc<dyn RelationshipRedirector>,
    events: Arc<dyn EventBus>,
    config: ResolverConfig,
    graphs: IdentityGraphStore,
    cache: ResolutionCache,
    ledger: VerificationLedger,
    pending: PendingMerges,
}

impl EntityResolver {
    /// Starts building a resolver.
    #[must_use]
    pub fn builder() -> EntityResolverBuilder {
        EntityResolverBuilder::new()
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    /// Ranks the entities `identifier` may refer to.
    ///
    /// Results are cached per context fingerprint, so a repeated call does
    /// not consult the oracle again. Trust requirements are applied on every
    /// call, cached or not.
    #[must_use]
    pub fn resolve_entity(
        &self,
        identifier: &str,
        context: &ResolutionContext,
        platform_hint: Option<&str>,
    ) -> Vec<EntityResolutionCandidate> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Vec::new();
        }

        let key = context.fingerprint(identifier, platform_hint);
        if let Some(cached) = self.cache.get(&key) {
            tracing::debug!(identifier, candidates = cached.len(), "resolution cache hit");
            return filter_trusted(cached, context.trust_requirements.as_ref());
        }

        let found = self.finder().find(identifier, context, platform_hint);
        let mut scored = MatchScorer::new(self.oracle.as_ref(), &self.graphs, &self.config)
            .score(identifier, context, platform_hint, &found);
        apply_context(&mut scored, context, &self.config);
        let ranked = detect_conflicts(scored, &self.config);

        self.cache.put(key, ranked.clone());
        let top = ranked.first();
        self.emit(
            top.map(|c| c.entity_id),
            EventPayload::EntityResolved {
                identifier: identifier.to_string(),
                candidate_count: ranked.len(),
                top_confidence: top.map_or(0.0, |c| c.confidence),
            },
        );
        tracing::debug!(identifier, candidates = ranked.len(), "entity resolved");

        filter_trusted(ranked, context.trust_requirements.as_ref())
    }

    /// Resolution cache counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drops every cached resolution.
    pub fn clear_resolution_cache(&self) {
        self.cache.clear();
    }

    // ------------------------------------------------------------------
    // Entities and identity graphs
    // ------------------------------------------------------------------

    /// Creates an entity with platform identities and builds its identity
    /// graph, linking it to similar known entities.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty name or a malformed identity
    /// and a directory error if the entity cannot be created. Graph failures
    /// after creation are logged.
    pub fn create_entity_with_identity(
        &self,
        name: &str,
        context: &ResolutionContext,
        identities: Vec<PlatformIdentity>,
        metadata: Map<String, Value>,
    ) -> IdentityResult<EntityId> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyEntityName.into());
        }
        for identity in &identities {
            if identity.handle.trim().trim_start_matches('@').is_empty() {
                return Err(ValidationError::MissingField {
                    field: "handle".to_string(),
                }
                .into());
            }
            if !(0.0..=1.0).contains(&identity.confidence) {
                return Err(ValidationError::ConfidenceOutOfRange {
                    value: identity.confidence,
                }
                .into());
            }
        }

        let mut draft = Entity::new(name);
        draft.metadata = metadata;
        for identity in identities {
            draft.set_platform_identity(identity);
        }
        let id = self.directory.create_entity(NewEntity {
            names: draft.names,
            metadata: draft.metadata,
            room_id: context.room_id.clone(),
        })?;
        let entity = self.load(id)?;

        let graph = IdentityGraph::from_entity(&entity);
        let platforms: Vec<String> = graph.platform_identities.keys().cloned().collect();
        if let Err(e) = self.graphs.insert(graph) {
            tracing::warn!(entity_id = %id, error = %e, "identity graph not stored");
        }
        let others = self.finder().all_known();
        match self.graphs.link_cross_references(&entity, &others, self.link_policy()) {
            Ok(linked) => tracing::debug!(entity_id = %id, linked, "identity graph linked"),
            Err(e) => tracing::warn!(entity_id = %id, error = %e, "cross-reference scan failed"),
        }

        self.emit(
            Some(id),
            EventPayload::EntityCreated {
                names: entity.names.clone(),
                platforms,
            },
        );
        tracing::info!(entity_id = %id, name, "entity created");
        Ok(id)
    }

    /// Snapshot of an entity's identity graph.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the graph store is unusable.
    pub fn identity_graph(&self, id: EntityId) -> IdentityResult<Option<IdentityGraph>> {
        self.graphs.get(id).map_err(internal)
    }

    /// Folds a behavior observation into an entity's fingerprint.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the graph store is unusable.
    pub fn record_behavior(&self, id: EntityId, observation: BehaviorObservation) -> IdentityResult<()> {
        self.graphs
            .record_behavior(id, observation, self.config.fingerprint_sample_limit)
            .map_err(internal)
    }

    /// Records a trust-network edge from `id` towards `edge.target`.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the graph store is unusable.
    pub fn record_trust_edge(&self, id: EntityId, edge: TrustEdge) -> IdentityResult<()> {
        self.graphs.add_trust_edge(id, edge).map_err(internal)
    }

    // ------------------------------------------------------------------
    // Merges
    // ------------------------------------------------------------------

    /// Proposes merges between `entity_id` and every known entity that
    /// resembles it by name, shared platform handle or cross reference.
    ///
    /// Existing proposals for a pair are returned as they are, never
    /// overwritten. Proposals at or below the auto-merge threshold wait for
    /// confirmation of every involved entity or for approval.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if the entity does not exist.
    pub fn propose_entity_merges(&self, entity_id: EntityId) -> IdentityResult<Vec<EntityMergeProposal>> {
        let entity = self.load(entity_id)?;
        let graph = self.graphs.get(entity_id).map_err(internal)?;
        let own = entity.platform_identities();

        let mut proposals = Vec::new();
        for other in self.finder().all_known() {
            if other.id == entity_id {
                continue;
            }
            let names = best_name_similarity(&entity.names, &other.names);
            let platforms = other
                .platform_identities()
                .iter()
                .filter_map(|theirs| {
                    own.iter()
                        .find(|mine| mine.key() == theirs.key())
                        .map(|mine| overlap_confidence(mine, theirs))
                })
                .fold(0.0f32, f32::max);
            let linked = graph
                .as_ref()
                .and_then(|g| g.cross_reference_to(other.id))
                .map_or(0.0, |c| c.confidence);
            let score = names.max(platforms).max(linked);
            if score < self.config.proposal_threshold {
                continue;
            }

            let mut proposal = EntityMergeProposal::new(
                entity_id,
                vec![other.id],
                score,
                MergeStrategy::for_confidence(score),
            )
            .with_snapshots(
                vec![entity.clone(), other.clone()],
                self.relationship_impact(&[other.id]),
            );
            // Resemblance alone never clears a merge below the auto-merge bar.
            if score <= self.config.auto_merge_threshold {
                proposal.requires_confirmation = true;
                proposal.pending_confirmation = proposal.involved();
            }

            if self.pending.insert_if_absent(proposal.clone()).map_err(internal)? {
                self.announce_proposal(&proposal);
                self.request_review(&proposal)?;
            }
            if let Some(stored) = self.pending.get(&proposal.key).map_err(internal)? {
                proposals.push(stored);
            }
        }

        proposals.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Ok(proposals)
    }

    /// Executes a proposal. Returns `false` if it still requires
    /// confirmation or if execution failed; failures are logged.
    pub fn execute_merge(&self, proposal: &EntityMergeProposal) -> bool {
        if proposal.requires_confirmation {
            tracing::warn!(
                key = %proposal.key,
                pending = proposal.pending_confirmation.len(),
                "merge blocked until confirmed"
            );
            return false;
        }
        match self.run_merge(proposal) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(key = %proposal.key, error = %e, "merge failed");
                false
            }
        }
    }

    /// Merges `candidates` into `primary` immediately.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMerge` for an empty candidate list or a candidate
    /// equal to the primary, `EntityNotFound` for a missing primary and any
    /// error from the merge itself.
    pub fn merge_entities(
        &self,
        primary: EntityId,
        candidates: &[EntityId],
        options: MergeOptions,
    ) -> IdentityResult<Entity> {
        if candidates.is_empty() {
            return Err(ValidationError::InvalidMerge {
                reason: "no candidates given".to_string(),
            }
            .into());
        }
        if candidates.contains(&primary) {
            return Err(ValidationError::InvalidMerge {
                reason: format!("{primary} cannot be merged into itself"),
            }
            .into());
        }

        let mut snapshots = vec![self.load(primary)?];
        snapshots.extend(self.snapshots(candidates));

        let mut proposal =
            EntityMergeProposal::new(primary, candidates.to_vec(), 1.0, options.strategy)
                .with_snapshots(snapshots, self.relationship_impact(candidates));
        proposal.conflict_resolution.extend(options.field_rules);
        proposal.approved_by = options.requested_by;

        Ok(self.run_merge(&proposal)?.after)
    }

    /// Proposals awaiting execution, in key order.
    #[must_use]
    pub fn get_pending_merges(&self) -> Vec<EntityMergeProposal> {
        self.pending.list().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "pending merges unavailable");
            Vec::new()
        })
    }

    /// Approves a pending proposal on behalf of `approver` and executes it.
    ///
    /// Approval stands in for the missing confirmations. Returns whether the
    /// merge executed; a failed execution leaves the approved proposal
    /// pending.
    ///
    /// # Errors
    ///
    /// Returns `ProposalNotFound` for an unknown key.
    pub fn approve_pending_merge(&self, key: &MergeKey, approver: &str) -> IdentityResult<bool> {
        let approved = self
            .pending
            .update(key, |p| {
                p.requires_confirmation = false;
                p.pending_confirmation.clear();
                p.approved_by = Some(approver.to_string());
                p.updated_at = Utc::now();
            })
            .map_err(internal)?
            .ok_or_else(|| ExecutionError::ProposalNotFound {
                key: key.to_string(),
            })?;
        tracing::info!(key = %key, approver, "merge approved");
        Ok(self.execute_merge(&approved))
    }

    /// Rejects a pending proposal, removing it.
    ///
    /// # Errors
    ///
    /// Returns `ProposalNotFound` for an unknown key.
    pub fn reject_pending_merge(&self, key: &MergeKey) -> IdentityResult<EntityMergeProposal> {
        let removed = self
            .pending
            .remove(key)
            .map_err(internal)?
            .ok_or_else(|| ExecutionError::ProposalNotFound {
                key: key.to_string(),
            })?;
        tracing::info!(key = %key, "merge rejected");
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Verification
    // ------------------------------------------------------------------

    /// Records a claim. Competing claims on the same handle about other
    /// entities create or update merge proposals.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed claim.
    pub fn record_platform_claim(&self, claim: NewClaim) -> IdentityResult<ClaimId> {
        let recorded = self.ledger.append_claim(claim)?;
        tracing::debug!(key = %recorded.key, about = %recorded.claimed_about, "platform claim recorded");

        let claims = self.ledger.claims_for(&recorded.key).map_err(internal)?;
        let mut rivals: Vec<EntityId> = Vec::new();
        for c in &claims {
            if c.claimed_about != recorded.claimed_about && !rivals.contains(&c.claimed_about) {
                rivals.push(c.claimed_about);
            }
        }
        for rival in rivals {
            self.upsert_claim_proposal(&recorded.key, &claims, recorded.claimed_about, rival)?;
        }
        Ok(recorded.id)
    }

    /// Records a confirmation. Returns true when the handle is now verified
    /// for the confirmed entity (at least one claim and one confirmation),
    /// in which case every pending proposal touching the entity is
    /// recomputed and may auto-merge.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed confirmation.
    pub fn record_platform_confirmation(&self, confirmation: NewConfirmation) -> IdentityResult<bool> {
        let recorded = self.ledger.append_confirmation(confirmation)?;
        let entity = recorded.confirms_entity;
        let completed = self.ledger.is_verified(&recorded.key, entity).map_err(internal)?;
        if !completed {
            tracing::debug!(key = %recorded.key, entity_id = %entity, "confirmation recorded, identity not corroborated yet");
            return Ok(false);
        }

        tracing::info!(key = %recorded.key, entity_id = %entity, "platform identity verified");
        let identity = PlatformIdentity::new(
            recorded.platform.clone(),
            recorded.handle.clone(),
            recorded.confidence,
        );
        if let Err(e) = self.graphs.mark_verified(entity, identity) {
            tracing::warn!(entity_id = %entity, error = %e, "verified identity not recorded in graph");
        }
        self.persist_verified(entity, &recorded.key);

        for key in self.pending.keys_touching(entity).map_err(internal)? {
            self.refresh_proposal(&key, &recorded.key)?;
            self.evaluate(&key)?;
        }
        Ok(true)
    }

    /// Claims filtered by platform and/or handle.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the ledger is unusable.
    pub fn get_platform_claims(
        &self,
        platform: Option<&str>,
        handle: Option<&str>,
    ) -> IdentityResult<Vec<PlatformClaim>> {
        self.ledger.claims(platform, handle).map_err(internal)
    }

    /// Confirmations filtered by platform and/or handle.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the ledger is unusable.
    pub fn get_platform_confirmations(
        &self,
        platform: Option<&str>,
        handle: Option<&str>,
    ) -> IdentityResult<Vec<PlatformConfirmation>> {
        self.ledger.confirmations(platform, handle).map_err(internal)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn finder(&self) -> CandidateFinder<'_> {
        CandidateFinder::new(self.directory.as_ref(), self.config.name_prefilter_threshold)
    }

    fn link_policy(&self) -> LinkPolicy {
        LinkPolicy {
            threshold: self.config.cross_reference_threshold,
            name_link_weight: self.config.name_link_weight,
        }
    }

    fn emit(&self, entity_id: Option<EntityId>, payload: EventPayload) {
        self.events.emit(ResolverEvent::now(entity_id, payload));
    }

    fn announce_proposal(&self, proposal: &EntityMergeProposal) {
        tracing::info!(key = %proposal.key, confidence = proposal.confidence, "merge proposed");
        self.emit(
            Some(proposal.primary_id),
            EventPayload::MergeProposalCreated {
                proposal_key: proposal.key.to_string(),
                candidate_ids: proposal.candidate_ids.clone(),
                confidence: proposal.confidence,
            },
        );
    }

    fn load(&self, id: EntityId) -> IdentityResult<Entity> {
        self.directory
            .get_entity_by_id(id)?
            .ok_or_else(|| ExecutionError::EntityNotFound { id }.into())
    }

    /// Entities that could be loaded, in order; failures are logged.
    fn snapshots(&self, ids: &[EntityId]) -> Vec<Entity> {
        ids.iter()
            .filter_map(|&id| match self.directory.get_entity_by_id(id) {
                Ok(found) => found,
                Err(e) => {
                    tracing::warn!(entity_id = %id, error = %e, "snapshot unavailable");
                    None
                }
            })
            .collect()
    }

    /// Copies the graph's verified identity for `key` onto the directory
    /// entity so both records agree. An entity holding another handle on the
    /// platform is left alone; failures are logged.
    fn persist_verified(&self, id: EntityId, key: &PlatformKey) {
        let verified = match self.graphs.get(id) {
            Ok(graph) => graph.and_then(|g| {
                g.identity(key.platform())
                    .filter(|i| i.verified && i.key() == *key)
                    .cloned()
            }),
            Err(e) => {
                tracing::warn!(entity_id = %id, error = %e, "verified identity not persisted");
                None
            }
        };
        let Some(identity) = verified else {
            return;
        };
        let mut stored = match self.directory.get_entity_by_id(id) {
            Ok(Some(found)) => found,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(entity_id = %id, error = %e, "verified identity not persisted");
                return;
            }
        };
        if let Some(existing) = stored.platform_identity(&identity.platform) {
            if existing.key() != identity.key() || existing == identity {
                return;
            }
        }
        stored.set_platform_identity(identity);
        if let Err(e) = self.directory.update_entity(stored) {
            tracing::warn!(entity_id = %id, error = %e, "verified identity not persisted");
        }
    }

    /// Share of the relationship graph a merge would re-point.
    fn relationship_impact(&self, ids: &[EntityId]) -> f32 {
        let edges: usize = ids
            .iter()
            .filter_map(|&id| self.graphs.get(id).ok().flatten())
            .map(|g| g.cross_references.len() + g.trust_network.len())
            .sum();
        #[allow(clippy::cast_precision_loss)]
        let impact = edges as f32 / 10.0;
        impact.min(1.0)
    }

    fn upsert_claim_proposal(
        &self,
        key: &PlatformKey,
        claims: &[PlatformClaim],
        a: EntityId,
        b: EntityId,
    ) -> IdentityResult<()> {
        let merge_key = MergeKey::new(a, b);
        if self.pending.get(&merge_key).map_err(internal)?.is_some() {
            self.refresh_proposal(&merge_key, key)?;
            return self.evaluate(&merge_key);
        }

        // The entity that held the handle first survives.
        let primary = claims
            .iter()
            .find(|c| c.claimed_about == a || c.claimed_about == b)
            .map_or(a, |c| c.claimed_about);
        let candidate = if primary == a { b } else { a };

        let evidence = self.ledger.evidence(key, &[primary, candidate]).map_err(internal)?;
        let mut proposal = EntityMergeProposal::new(primary, vec![candidate], 0.0, MergeStrategy::Absorb)
            .with_snapshots(
                self.snapshots(&[primary, candidate]),
                self.relationship_impact(&[candidate]),
            );
        proposal.apply_evidence(evidence);

        if self.pending.insert_if_absent(proposal.clone()).map_err(internal)? {
            self.announce_proposal(&proposal);
        }
        self.evaluate(&merge_key)
    }

    /// Rebuilds a proposal's evidence from the ledger. Proposals without
    /// evidence pick it up from `fallback` when the ledger has entries about
    /// them there.
    fn refresh_proposal(&self, merge_key: &MergeKey, fallback: &PlatformKey) -> IdentityResult<()> {
        let Some(proposal) = self.pending.get(merge_key).map_err(internal)? else {
            return Ok(());
        };
        let key = proposal
            .bidirectional_evidence
            .as_ref()
            .map_or_else(|| fallback.clone(), |e| e.key.clone());
        let evidence = self.ledger.evidence(&key, &proposal.involved()).map_err(internal)?;
        if evidence.is_empty() {
            return Ok(());
        }
        self.pending
            .update(merge_key, |p| p.apply_evidence(evidence))
            .map_err(internal)?;
        Ok(())
    }

    /// Auto-merges a fully confirmed, high-confidence proposal; otherwise
    /// requests review once when confidence is high enough.
    fn evaluate(&self, merge_key: &MergeKey) -> IdentityResult<()> {
        let Some(proposal) = self.pending.get(merge_key).map_err(internal)? else {
            return Ok(());
        };

        if !proposal.requires_confirmation && proposal.confidence > self.config.auto_merge_threshold {
            tracing::info!(key = %merge_key, confidence = proposal.confidence, "auto-merging");
            if self.execute_merge(&proposal) {
                return Ok(());
            }
        }

        self.request_review(&proposal)
    }

    /// Flags a stored proposal for review once its confidence is high enough.
    fn request_review(&self, proposal: &EntityMergeProposal) -> IdentityResult<()> {
        if proposal.confidence <= self.config.review_threshold || proposal.review_requested {
            return Ok(());
        }
        let key = &proposal.key;
        self.pending
            .update(key, |p| p.review_requested = true)
            .map_err(internal)?;
        self.emit(
            Some(proposal.primary_id),
            EventPayload::MergeReadyForReview {
                proposal_key: key.to_string(),
                confidence: proposal.confidence,
                requires_confirmation: proposal.requires_confirmation,
            },
        );
        tracing::info!(key = %key, confidence = proposal.confidence, "merge ready for review");
        Ok(())
    }

    /// Executes a proposal, then announces it and clears it from the
    /// pending table.
    fn run_merge(&self, proposal: &EntityMergeProposal) -> IdentityResult<MergeOutcome> {
        let outcome = MergeExecutor::new(
            self.directory.as_ref(),
            &self.graphs,
            self.redirector.as_ref(),
            self.config.fingerprint_sample_limit,
        )
        .execute(proposal)?;

        let mut settled = vec![proposal.key.clone()];
        settled.extend(
            outcome
                .merged_ids
                .iter()
                .map(|&id| MergeKey::new(outcome.after.id, id)),
        );
        for key in &settled {
            if let Err(e) = self.pending.remove(key) {
                tracing::warn!(key = %key, error = %e, "settled proposal not cleared");
            }
        }
        // Proposals naming an absorbed entity can no longer execute.
        for &merged in &outcome.merged_ids {
            let stale = match self.pending.keys_touching(merged) {
                Ok(keys) => keys,
                Err(e) => {
                    tracing::warn!(entity_id = %merged, error = %e, "stale proposals not cleared");
                    continue;
                }
            };
            for key in stale {
                match self.pending.remove(&key) {
                    Ok(_) => tracing::debug!(key = %key, entity_id = %merged, "proposal dropped after merge"),
                    Err(e) => tracing::warn!(key = %key, error = %e, "stale proposal not cleared"),
                }
            }
        }

        self.emit(
            Some(outcome.after.id),
            EventPayload::EntityMerged {
                merged_ids: outcome.merged_ids.clone(),
                before: outcome.before.clone(),
                after: Box::new(outcome.after.clone()),
                unresolved_fields: outcome.unresolved_fields.clone(),
            },
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryDirectory;

    #[test]
    fn builder_requires_directory() {
        let err = EntityResolver::builder().build().err().unwrap();
        assert!(matches!(err, ValidationError::MissingField { .. }));
    }

    #[test]
    fn builder_rejects_invalid_config() {
        let cfg = ResolverConfig {
            review_threshold: 0.99,
            ..ResolverConfig::default()
        };
        let built = EntityResolver::builder()
            .directory(Arc::new(InMemoryDirectory::new()))
            .config(cfg)
            .build();
        assert!(matches!(built, Err(ValidationError::InvalidConfig { .. })));
    }

    #[test]
    fn resolver_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EntityResolver>();
    }

    #[test]
    fn empty_identifier_resolves_to_nothing() {
        let resolver = EntityResolver::builder()
            .directory(Arc::new(InMemoryDirectory::new()))
            .build()
            .unwrap();
        assert!(resolver
            .resolve_entity("  ", &ResolutionContext::new(), None)
            .is_empty());
        assert_eq!(resolver.cache_stats().misses, 0);
    }

    #[test]
    fn create_entity_rejects_bad_input() {
        let resolver = EntityResolver::builder()
            .directory(Arc::new(InMemoryDirectory::new()))
            .build()
            .unwrap();
        let ctx = ResolutionContext::in_room("general");
        let err = resolver
            .create_entity_with_identity(" ", &ctx, Vec::new(), Map::new())
            .unwrap_err();
        assert!(err.is_validation());

        let mut bad = PlatformIdentity::new("discord", "bob", 0.5);
        bad.confidence = 1.5;
        let err = resolver
            .create_entity_with_identity("Bob", &ctx, vec![bad], Map::new())
            .unwrap_err();
        assert!(err.is_validation());
    }
}
