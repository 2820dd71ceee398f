//! The resolution pipeline.
//!
//! `finder` proposes candidates, `scorer` attaches evidence and confidence,
//! `disambiguate` adjusts for context and flags conflicts, and `cache` holds
//! finished results per context fingerprint.

pub mod cache;
pub mod disambiguate;
pub mod finder;
pub mod scorer;

pub use cache::{CacheStats, ResolutionCache};
pub use disambiguate::{apply_context, detect_conflicts, filter_trusted, ConfidenceTier};
pub use finder::CandidateFinder;
pub use scorer::MatchScorer;
