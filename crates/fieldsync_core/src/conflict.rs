//! Conflict detection between a pending action and the server's state.

use crate::action::{ActionId, PendingAction, Version};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A version divergence found while syncing an action.
///
/// Holds both sides so a person (or a higher-level policy) can decide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// The originating action.
    pub action_id: ActionId,
    /// Version the action was created against.
    pub base_version: Version,
    /// Version the server reported.
    pub server_version: Version,
    /// The pending local payload.
    pub local_value: serde_json::Value,
    /// The server's current value, when the transport reported one.
    pub server_value: Option<serde_json::Value>,
    /// When the divergence was detected.
    pub detected_at: DateTime<Utc>,
}

/// Outcome of a conflict check.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictCheck {
    /// Server version matches the action's base version.
    Clean,
    /// Server version diverged.
    Conflict(Box<ConflictRecord>),
}

impl ConflictCheck {
    /// Returns true for [`ConflictCheck::Conflict`].
    pub fn is_conflict(&self) -> bool {
        matches!(self, ConflictCheck::Conflict(_))
    }
}

/// Compares base and server versions.
///
/// The detector never merges: any mismatch is a conflict, even when the
/// payloads look compatible.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictDetector;

impl ConflictDetector {
    /// Creates a detector.
    pub fn new() -> Self {
        Self
    }

    /// Classifies `action` against the version the server reported.
    pub fn check(
        &self,
        action: &PendingAction,
        server_version: Version,
        server_value: Option<&serde_json::Value>,
        now: DateTime<Utc>,
    ) -> ConflictCheck {
        if server_version == action.base_version {
            return ConflictCheck::Clean;
        }

        ConflictCheck::Conflict(Box::new(ConflictRecord {
            action_id: action.id,
            base_version: action.base_version,
            server_version,
            local_value: action.payload.clone(),
            server_value: server_value.cloned(),
            detected_at: now,
        }))
    }
}

/// Manual decision for a conflicted action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictResolution {
    /// Rebase the local change onto the server version and send it again.
    KeepLocal,
    /// Drop the local change; the server state stands.
    AcceptRemote,
    /// Park the action in the dead-letter sink.
    DeadLetter,
}

/// What the engine does with a freshly detected conflict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Keep the action in the store as conflicted until resolved.
    #[default]
    Manual,
    /// Move the action straight to the dead-letter sink.
    DeadLetter,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::NewAction;
    use serde_json::json;

    fn action_at(base: u64) -> PendingAction {
        PendingAction::from_new(
            ActionId::new(),
            0,
            NewAction::new("tm_ticket.update", json!({"hours": 6}), base),
            Utc::now(),
        )
    }

    #[test]
    fn matching_version_is_clean() {
        let action = action_at(5);
        let check = ConflictDetector::new().check(&action, Version(5), None, Utc::now());
        assert_eq!(check, ConflictCheck::Clean);
        assert!(!check.is_conflict());
    }

    #[test]
    fn diverged_version_carries_both_sides() {
        let action = action_at(5);
        let server = json!({"hours": 8});
        let check =
            ConflictDetector::new().check(&action, Version(7), Some(&server), Utc::now());

        let ConflictCheck::Conflict(record) = check else {
            panic!("expected conflict");
        };
        assert_eq!(record.action_id, action.id);
        assert_eq!(record.base_version, Version(5));
        assert_eq!(record.server_version, Version(7));
        assert_eq!(record.local_value, json!({"hours": 6}));
        assert_eq!(record.server_value, Some(server));
    }

    #[test]
    fn older_server_version_is_still_a_conflict() {
        let action = action_at(9);
        assert!(ConflictDetector::new()
            .check(&action, Version(3), None, Utc::now())
            .is_conflict());
    }

    #[test]
    fn default_policy_is_manual() {
        assert_eq!(ConflictPolicy::default(), ConflictPolicy::Manual);
    }
}
