//! Platform identities and ledger keys.
//!
//! A platform identity is a handle (and optionally a stable user id) that an
//! entity is known by on one external platform. Handles are compared in a
//! normalized form so that `@Bob`, `bob` and ` BOB ` address the same account.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalizes a handle or identifier for comparison.
///
/// Trims whitespace, strips a single leading `@` and lower-cases ASCII.
#[must_use]
pub fn normalize_handle(handle: &str) -> String {
    let trimmed = handle.trim();
    let stripped = trimmed.strip_prefix('@').unwrap_or(trimmed);
    stripped.trim().to_ascii_lowercase()
}

/// Normalizes a platform tag (`Discord` and `discord` are the same platform).
#[must_use]
pub fn normalize_platform(platform: &str) -> String {
    platform.trim().to_ascii_lowercase()
}

/// A handle on one external platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformIdentity {
    /// Platform tag (e.g. `discord`, `telegram`).
    pub platform: String,

    /// Handle as displayed on the platform.
    pub handle: String,

    /// Stable platform user id, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Whether the identity has been verified.
    #[serde(default)]
    pub verified: bool,

    /// Confidence that the identity belongs to the owning entity.
    pub confidence: f32,

    /// When the identity was last observed.
    pub last_seen: DateTime<Utc>,
}

impl PlatformIdentity {
    /// Creates an unverified identity observed now.
    ///
    /// Confidence is clamped to [0.0, 1.0].
    #[must_use]
    pub fn new(platform: impl Into<String>, handle: impl Into<String>, confidence: f32) -> Self {
        Self {
            platform: normalize_platform(&platform.into()),
            handle: handle.into(),
            user_id: None,
            verified: false,
            confidence: confidence.clamp(0.0, 1.0),
            last_seen: Utc::now(),
        }
    }

    /// Sets the platform user id.
    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Marks the identity as verified.
    #[must_use]
    pub fn verified(mut self) -> Self {
        self.verified = true;
        self
    }

    /// The ledger key for this identity.
    #[must_use]
    pub fn key(&self) -> PlatformKey {
        PlatformKey::new(&self.platform, &self.handle)
    }

    /// Returns true if `identifier` names this account by handle or user id.
    #[must_use]
    pub fn matches_identifier(&self, identifier: &str) -> bool {
        let needle = normalize_handle(identifier);
        if needle.is_empty() {
            return false;
        }
        normalize_handle(&self.handle) == needle
            || self
                .user_id
                .as_deref()
                .is_some_and(|uid| normalize_handle(uid) == needle)
    }
}

/// `platform:handle` key used to index the verification ledger and graphs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlatformKey(String);

impl PlatformKey {
    /// Builds a normalized key.
    #[must_use]
    pub fn new(platform: &str, handle: &str) -> Self {
        Self(format!(
            "{}:{}",
            normalize_platform(platform),
            normalize_handle(handle)
        ))
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The platform component.
    #[must_use]
    pub fn platform(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(p, _)| p)
    }

    /// The normalized handle component.
    #[must_use]
    pub fn handle(&self) -> &str {
        self.0.split_once(':').map_or("", |(_, h)| h)
    }
}

impl fmt::Display for PlatformKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
