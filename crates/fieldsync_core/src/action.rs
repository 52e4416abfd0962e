//! Pending action model and its status lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Stable identifier of a pending action, assigned at enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(Uuid);

impl ActionId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ActionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Server-side version an action was created against, or reported by the
/// server after a send.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(pub u64);

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Where an action is in its lifecycle.
///
/// ```text
/// pending -> in-flight -> applied | conflicted | pending (retry) | dead-lettered
/// conflicted -> pending (manual rebase) | dead-lettered
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionStatus {
    /// Waiting to be sent.
    Pending,
    /// Selected by the engine and being sent.
    InFlight,
    /// Server version diverged; awaits manual resolution.
    Conflicted,
    /// Moved to the dead-letter sink.
    DeadLettered,
    /// Confirmed by the server.
    Applied,
}

impl ActionStatus {
    /// Returns true if moving from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: ActionStatus) -> bool {
        use ActionStatus::*;
        matches!(
            (self, next),
            (Pending, InFlight)
                | (InFlight, Applied)
                | (InFlight, Conflicted)
                | (InFlight, Pending)
                | (InFlight, DeadLettered)
                | (Conflicted, Pending)
                | (Conflicted, DeadLettered)
        )
    }

    /// Returns true for statuses with no automatic way out.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ActionStatus::Applied | ActionStatus::DeadLettered | ActionStatus::Conflicted
        )
    }

    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::InFlight => "in-flight",
            ActionStatus::Conflicted => "conflicted",
            ActionStatus::DeadLettered => "dead-lettered",
            ActionStatus::Applied => "applied",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutation a caller wants synchronized.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAction {
    /// Domain tag, e.g. `crew.check_in` or `tm_ticket.update`.
    pub kind: String,
    /// Opaque domain data.
    pub payload: serde_json::Value,
    /// Server version the mutation was made against.
    pub base_version: Version,
}

impl NewAction {
    /// Creates a new action request.
    pub fn new(
        kind: impl Into<String>,
        payload: serde_json::Value,
        base_version: impl Into<Version>,
    ) -> Self {
        Self {
            kind: kind.into(),
            payload,
            base_version: base_version.into(),
        }
    }
}

/// A locally recorded mutation not yet confirmed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Unique id.
    pub id: ActionId,
    /// Position in enqueue order.
    pub sequence: u64,
    /// Domain tag.
    pub kind: String,
    /// Opaque domain data.
    pub payload: serde_json::Value,
    /// Server version the action was created against.
    pub base_version: Version,
    /// Number of failed sends. Never decreases.
    pub attempt_count: u32,
    /// Lifecycle status.
    pub status: ActionStatus,
    /// When the action was enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// Backoff gate: the engine leaves the action alone until then.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Text of the most recent send failure.
    pub last_error: Option<String>,
    /// Dead-letter entry this action was requeued from.
    #[serde(default)]
    pub requeued_from: Option<ActionId>,
}

impl PendingAction {
    /// Builds a fresh pending action from a caller request.
    pub fn from_new(id: ActionId, sequence: u64, new: NewAction, now: DateTime<Utc>) -> Self {
        Self {
            id,
            sequence,
            kind: new.kind,
            payload: new.payload,
            base_version: new.base_version,
            attempt_count: 0,
            status: ActionStatus::Pending,
            enqueued_at: now,
            next_attempt_at: None,
            last_error: None,
            requeued_from: None,
        }
    }

    /// Returns true if the backoff gate has elapsed at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.map_or(true, |at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn lifecycle_transitions() {
        use ActionStatus::*;
        assert!(Pending.can_transition_to(InFlight));
        assert!(InFlight.can_transition_to(Applied));
        assert!(InFlight.can_transition_to(Conflicted));
        assert!(InFlight.can_transition_to(Pending));
        assert!(InFlight.can_transition_to(DeadLettered));
        assert!(Conflicted.can_transition_to(Pending));
        assert!(Conflicted.can_transition_to(DeadLettered));

        assert!(!Pending.can_transition_to(Applied));
        assert!(!Pending.can_transition_to(Pending));
        assert!(!Applied.can_transition_to(Pending));
        assert!(!DeadLettered.can_transition_to(Pending));
        assert!(!Conflicted.can_transition_to(InFlight));
    }

    #[test]
    fn status_names() {
        assert_eq!(ActionStatus::InFlight.to_string(), "in-flight");
        assert_eq!(ActionStatus::DeadLettered.as_str(), "dead-lettered");
        assert_eq!(
            serde_json::to_value(ActionStatus::InFlight).unwrap(),
            json!("in-flight")
        );
        assert!(ActionStatus::Conflicted.is_terminal());
        assert!(!ActionStatus::Pending.is_terminal());
    }

    #[test]
    fn action_id_round_trips_through_text() {
        let id = ActionId::new();
        let parsed: ActionId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<ActionId>().is_err());
    }

    #[test]
    fn backoff_gate() {
        let now = Utc::now();
        let mut action = PendingAction::from_new(
            ActionId::new(),
            0,
            NewAction::new("crew.check_in", json!({"crew": 4}), 5),
            now,
        );
        assert!(action.is_due(now));

        action.next_attempt_at = Some(now + Duration::seconds(30));
        assert!(!action.is_due(now));
        assert!(action.is_due(now + Duration::seconds(30)));
    }

    #[test]
    fn version_display() {
        assert_eq!(Version(7).to_string(), "v7");
        assert_eq!(Version::from(3), Version(3));
    }
}
