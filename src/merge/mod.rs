//! Merge proposals and their execution.

pub mod executor;
pub mod proposal;

pub use executor::{MergeExecutor, MergeOutcome};
pub use proposal::{
    default_field_rules, EntityMergeProposal, FieldResolution, MergeKey, MergeStrategy,
    PendingMerges, RiskAssessment,
};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Options for a caller-initiated merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeOptions {
    /// Recorded on the proposal; does not change the merge mechanics.
    #[serde(default)]
    pub strategy: MergeStrategy,
    /// Overrides for the default per-field rules.
    #[serde(default)]
    pub field_rules: BTreeMap<String, FieldResolution>,
    /// Who asked for the merge.
    #[serde(default)]
    pub requested_by: Option<String>,
}

impl MergeOptions {
    /// Sets a rule for one field.
    #[must_use]
    pub fn with_rule(mut self, field: impl Into<String>, rule: FieldResolution) -> Self {
        self.field_rules.insert(field.into(), rule);
        self
    }

    /// Records the requester.
    #[must_use]
    pub fn requested_by(mut self, who: impl Into<String>) -> Self {
        self.requested_by = Some(who.into());
        self
    }
}
