//! # kyroid - Identity Reconciliation for AI Agents
//!
//! kyroid decides which known entity a name, handle or mention refers to,
//! and reconciles entities that turn out to be the same person across
//! platforms.
//!
//! ## Core Concepts
//!
//! - **Resolution**: ranked, explained candidates for an identifier, with
//!   match evidence and risk factors
//! - **Identity graph**: per-entity platform identities, cross references,
//!   trust edges and a behavioral fingerprint
//! - **Bidirectional verification**: a platform claim counts only once the
//!   other side confirms it
//! - **Merge proposals**: competing claims and lookalike entities become
//!   proposals that auto-merge, wait for review, or are rejected
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kyroid::{EntityResolver, InMemoryDirectory, ResolutionContext};
//!
//! let resolver = EntityResolver::builder()
//!     .directory(Arc::new(InMemoryDirectory::new()))
//!     .build()?;
//!
//! let ctx = ResolutionContext::in_room("general");
//! for candidate in resolver.resolve_entity("alice", &ctx, Some("discord")) {
//!     println!("{} {:.2}", candidate.entity_id, candidate.confidence);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod candidate;
pub mod confidence;
pub mod config;
pub mod context;
pub mod entity;
pub mod error;
pub mod platform;

// Collaborator seams
pub mod events;
pub mod oracle;
pub mod storage;

// Engine
pub mod graph;
pub mod merge;
pub mod resolution;
pub mod resolver;
pub mod similarity;
pub mod verification;

// Re-export primary types at crate root for convenience
pub use candidate::{
    CrossPlatformIndicator, EntityResolutionCandidate, MatchFactor, MatchFactorType, RiskFactor,
    RiskSeverity, RiskType,
};
pub use config::{FactorWeights, ResolverConfig, SeverityPenalties};
pub use context::{ConversationTurn, PlatformContext, ResolutionContext, TrustRequirements};
pub use entity::{Entity, EntityId, NewEntity};
pub use error::{ExecutionError, IdentityError, IdentityResult, ValidationError};
pub use platform::{PlatformIdentity, PlatformKey};

pub use events::{ChannelEventBus, EventBus, EventPayload, EventStream, NullEventBus, ResolverEvent};
pub use oracle::{LexicalOracle, OracleError, OraclePrompt, SimilarityOracle};
pub use storage::{
    EntityDirectory, InMemoryDirectory, NoopRedirector, RedirectError, RelationshipRedirector,
    StorageError,
};

pub use graph::{
    BehaviorFingerprint, BehaviorObservation, CrossReference, IdentityGraph, LinkingFactor,
    TrustEdge,
};
pub use merge::{
    EntityMergeProposal, FieldResolution, MergeKey, MergeOptions, MergeStrategy, RiskAssessment,
};
pub use resolution::{CacheStats, ConfidenceTier};
pub use resolver::{EntityResolver, EntityResolverBuilder};
pub use verification::{
    BidirectionalEvidence, ClaimId, ClaimSource, ConfirmationId, ConfirmationMethod, NewClaim,
    NewConfirmation, PlatformClaim, PlatformConfirmation,
};
