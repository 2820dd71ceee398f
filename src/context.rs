//! Ephemeral resolution context.
//!
//! Describes where and how a name was mentioned. Contexts are never persisted;
//! only their fingerprint survives, as part of the resolution cache key.

use blake3::Hasher;
use serde::{Deserialize, Serialize};

use crate::entity::EntityId;

/// One turn of the recent conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Display name of the speaker.
    pub speaker: String,
    /// Message text.
    pub text: String,
}

impl ConversationTurn {
    /// Creates a turn.
    #[must_use]
    pub fn new(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
        }
    }

    pub(crate) fn render(&self) -> String {
        format!("{}: {}", self.speaker, self.text)
    }
}

/// Platform the conversation is happening on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformContext {
    /// Platform tag.
    pub platform: String,
    /// Channel or server on that platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

/// Caller-imposed requirements on returned candidates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrustRequirements {
    /// Drop candidates below this confidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f32>,
    /// Keep only candidates whose verified platform identity matched.
    #[serde(default)]
    pub require_verified_identity: bool,
    /// The resolution guards a sensitive action.
    #[serde(default)]
    pub security_sensitive: bool,
}

/// Situation in which an identifier is being resolved.
///
/// # Examples
///
/// ```
/// use kyroid::ResolutionContext;
///
/// let ctx = ResolutionContext::in_room("general").with_message("bob", "ask Alice");
/// assert!(ctx.is_active_room());
/// assert_eq!(ctx.recent_messages.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionContext {
    /// Room the identifier was mentioned in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    /// World (server, workspace) containing the room.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world_id: Option<String>,
    /// Entity that mentioned the identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_entity_id: Option<EntityId>,
    /// Recent conversation, oldest first.
    #[serde(default)]
    pub recent_messages: Vec<ConversationTurn>,
    /// Platform the mention came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_context: Option<PlatformContext>,
    /// Requirements on the output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_requirements: Option<TrustRequirements>,
}

impl ResolutionContext {
    /// Empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Context scoped to a room.
    #[must_use]
    pub fn in_room(room_id: impl Into<String>) -> Self {
        Self {
            room_id: Some(room_id.into()),
            ..Self::default()
        }
    }

    /// Sets the world id.
    #[must_use]
    pub fn with_world(mut self, world_id: impl Into<String>) -> Self {
        self.world_id = Some(world_id.into());
        self
    }

    /// Sets the speaking entity.
    #[must_use]
    pub fn with_source(mut self, source: EntityId) -> Self {
        self.source_entity_id = Some(source);
        self
    }

    /// Appends a conversation turn.
    #[must_use]
    pub fn with_message(mut self, speaker: impl Into<String>, text: impl Into<String>) -> Self {
        self.recent_messages.push(ConversationTurn::new(speaker, text));
        self
    }

    /// Sets the platform context.
    #[must_use]
    pub fn on_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform_context = Some(PlatformContext {
            platform: platform.into(),
            channel: None,
        });
        self
    }

    /// Sets trust requirements.
    #[must_use]
    pub fn with_trust_requirements(mut self, requirements: TrustRequirements) -> Self {
        self.trust_requirements = Some(requirements);
        self
    }

    /// Marks the context as security sensitive.
    #[must_use]
    pub fn security_sensitive(mut self) -> Self {
        self.trust_requirements
            .get_or_insert_with(TrustRequirements::default)
            .security_sensitive = true;
        self
    }

    /// True when the resolution happens inside a room.
    #[must_use]
    pub fn is_active_room(&self) -> bool {
        self.room_id.as_deref().is_some_and(|r| !r.trim().is_empty())
    }

    /// True when the caller marked the context security sensitive.
    #[must_use]
    pub fn is_security_sensitive(&self) -> bool {
        self.trust_requirements
            .as_ref()
            .is_some_and(|t| t.security_sensitive)
    }

    /// The last `window` turns, rendered for the oracle.
    pub(crate) fn transcript(&self, window: usize) -> Vec<String> {
        let start = self.recent_messages.len().saturating_sub(window);
        self.recent_messages[start..]
            .iter()
            .map(ConversationTurn::render)
            .collect()
    }

    /// Stable cache key for an identifier resolved in this context.
    ///
    /// Covers the identifier, room, platform context, platform hint and the
    /// security flag. Conversation content and the other trust requirements
    /// are not part of the key.
    #[must_use]
    pub fn fingerprint(&self, identifier: &str, platform_hint: Option<&str>) -> String {
        let mut hasher = Hasher::new();
        for part in [
            Some(identifier.trim().to_lowercase()),
            self.room_id.clone(),
            self.platform_context.as_ref().map(|p| p.platform.to_lowercase()),
            self.platform_context.as_ref().and_then(|p| p.channel.clone()),
            platform_hint.map(str::to_lowercase),
            self.is_security_sensitive().then(|| "sensitive".to_string()),
        ] {
            match part {
                Some(value) => {
                    hasher.update(&[1]);
                    hasher.update(&(value.len() as u64).to_le_bytes());
                    hasher.update(value.as_bytes());
                }
                None => {
                    hasher.update(&[0]);
                }
            }
        }
        hasher.finalize().to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_case_insensitive_for_identifier() {
        let ctx = ResolutionContext::in_room("general");
        assert_eq!(ctx.fingerprint("Alice", None), ctx.fingerprint(" alice ", None));
    }

    #[test]
    fn fingerprint_distinguishes_room_and_hint() {
        let a = ResolutionContext::in_room("r1");
        let b = ResolutionContext::in_room("r2");
        assert_ne!(a.fingerprint("alice", None), b.fingerprint("alice", None));
        assert_ne!(
            a.fingerprint("alice", None),
            a.fingerprint("alice", Some("discord"))
        );
    }

    #[test]
    fn fingerprint_ignores_conversation() {
        let a = ResolutionContext::in_room("r1");
        let b = ResolutionContext::in_room("r1").with_message("bob", "hi");
        assert_eq!(a.fingerprint("alice", None), b.fingerprint("alice", None));
    }

    #[test]
    fn fingerprint_separates_sensitive_lookups() {
        let plain = ResolutionContext::in_room("r1");
        let sensitive = ResolutionContext::in_room("r1").security_sensitive();
        let filtered = ResolutionContext::in_room("r1").with_trust_requirements(TrustRequirements {
            min_confidence: Some(0.9),
            ..TrustRequirements::default()
        });
        assert_ne!(plain.fingerprint("alice", None), sensitive.fingerprint("alice", None));
        assert_eq!(plain.fingerprint("alice", None), filtered.fingerprint("alice", None));
    }

    #[test]
    fn transcript_takes_last_window() {
        let mut ctx = ResolutionContext::new();
        for i in 0..15 {
            ctx = ctx.with_message("s", format!("m{i}"));
        }
        let t = ctx.transcript(10);
        assert_eq!(t.len(), 10);
        assert_eq!(t[0], "s: m5");
        assert_eq!(t[9], "s: m14");
    }

    #[test]
    fn security_flag() {
        let ctx = ResolutionContext::new().security_sensitive();
        assert!(ctx.is_security_sensitive());
        assert!(!ctx.is_active_room());
    }
}
