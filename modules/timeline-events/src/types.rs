//! Core event types. Domain-agnostic contract plus the concrete combat-log shape.

use serde::{Deserialize, Serialize};

/// Milliseconds on a run's virtual clock.
pub type Timestamp = i64;

/// Log-local actor identifier.
pub type ActorId = i64;

/// Well-known event kind strings.
pub mod kind {
    /// Synthetic marker dispatched before the first real event.
    pub const INIT: &str = "init";
    /// Synthetic marker dispatched after the last real event.
    pub const COMPLETE: &str = "complete";

    pub const ACTION: &str = "action";
    pub const DAMAGE: &str = "damage";
    pub const HEAL: &str = "heal";
    pub const STATUS_APPLY: &str = "statusApply";
    pub const STATUS_REMOVE: &str = "statusRemove";
    pub const DEATH: &str = "death";
}

/// Events carry a kind discriminant and a position on the virtual clock.
///
/// The engine only ever looks at these two properties; everything else is
/// for analysis modules to narrow into.
pub trait TimelineEvent: Clone + 'static {
    /// The tagged-union discriminant (`"damage"`, `"init"`, ...).
    fn kind(&self) -> &str;

    fn timestamp(&self) -> Timestamp;

    /// Build the synthetic marker that opens a run.
    fn init(timestamp: Timestamp) -> Self;

    /// Build the synthetic marker that closes a run.
    fn complete(timestamp: Timestamp) -> Self;
}

// ---------------------------------------------------------------------------
// Combat-log event
// ---------------------------------------------------------------------------

/// A single combat-log event, as produced by the log adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Event {
    Init { timestamp: Timestamp },
    Complete { timestamp: Timestamp },
    Action(ActionEvent),
    Damage(DamageEvent),
    Heal(HealEvent),
    StatusApply(StatusEvent),
    StatusRemove(StatusEvent),
    Death(DeathEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEvent {
    pub timestamp: Timestamp,
    pub source: ActorId,
    pub target: ActorId,
    pub action: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageEvent {
    pub timestamp: Timestamp,
    pub source: ActorId,
    pub target: ActorId,
    pub action: u32,
    pub amount: u64,
    #[serde(default)]
    pub overkill: u64,
    #[serde(default)]
    pub critical: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealEvent {
    pub timestamp: Timestamp,
    pub source: ActorId,
    pub target: ActorId,
    pub action: u32,
    pub amount: u64,
    #[serde(default)]
    pub overheal: u64,
}

/// Status application or removal. `duration` is only meaningful on apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub timestamp: Timestamp,
    pub source: ActorId,
    pub target: ActorId,
    pub status: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeathEvent {
    pub timestamp: Timestamp,
    pub target: ActorId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ActorId>,
}

impl TimelineEvent for Event {
    fn kind(&self) -> &str {
        match self {
            Event::Init { .. } => kind::INIT,
            Event::Complete { .. } => kind::COMPLETE,
            Event::Action(_) => kind::ACTION,
            Event::Damage(_) => kind::DAMAGE,
            Event::Heal(_) => kind::HEAL,
            Event::StatusApply(_) => kind::STATUS_APPLY,
            Event::StatusRemove(_) => kind::STATUS_REMOVE,
            Event::Death(_) => kind::DEATH,
        }
    }

    fn timestamp(&self) -> Timestamp {
        match self {
            Event::Init { timestamp } | Event::Complete { timestamp } => *timestamp,
            Event::Action(e) => e.timestamp,
            Event::Damage(e) => e.timestamp,
            Event::Heal(e) => e.timestamp,
            Event::StatusApply(e) | Event::StatusRemove(e) => e.timestamp,
            Event::Death(e) => e.timestamp,
        }
    }

    fn init(timestamp: Timestamp) -> Self {
        Event::Init { timestamp }
    }

    fn complete(timestamp: Timestamp) -> Self {
        Event::Complete { timestamp }
    }
}

// Field accessors shared across variants. `None` means the variant has no
// such field, which filters treat as a non-match.
impl Event {
    pub fn source(&self) -> Option<ActorId> {
        match self {
            Event::Action(e) => Some(e.source),
            Event::Damage(e) => Some(e.source),
            Event::Heal(e) => Some(e.source),
            Event::StatusApply(e) | Event::StatusRemove(e) => Some(e.source),
            Event::Death(e) => e.source,
            Event::Init { .. } | Event::Complete { .. } => None,
        }
    }

    pub fn target(&self) -> Option<ActorId> {
        match self {
            Event::Action(e) => Some(e.target),
            Event::Damage(e) => Some(e.target),
            Event::Heal(e) => Some(e.target),
            Event::StatusApply(e) | Event::StatusRemove(e) => Some(e.target),
            Event::Death(e) => Some(e.target),
            Event::Init { .. } | Event::Complete { .. } => None,
        }
    }

    pub fn action(&self) -> Option<u32> {
        match self {
            Event::Action(e) => Some(e.action),
            Event::Damage(e) => Some(e.action),
            Event::Heal(e) => Some(e.action),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u32> {
        match self {
            Event::StatusApply(e) | Event::StatusRemove(e) => Some(e.status),
            _ => None,
        }
    }

    pub fn amount(&self) -> Option<u64> {
        match self {
            Event::Damage(e) => Some(e.amount),
            Event::Heal(e) => Some(e.amount),
            _ => None,
        }
    }

    // Narrowing helpers, usable directly with `Filter::narrow`.

    pub fn as_action(&self) -> Option<&ActionEvent> {
        match self {
            Event::Action(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_damage(&self) -> Option<&DamageEvent> {
        match self {
            Event::Damage(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_heal(&self) -> Option<&HealEvent> {
        match self {
            Event::Heal(e) => Some(e),
            _ => None,
        }
    }

    /// Either half of a status application lifecycle.
    pub fn as_status(&self) -> Option<&StatusEvent> {
        match self {
            Event::StatusApply(e) | Event::StatusRemove(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_death(&self) -> Option<&DeathEvent> {
        match self {
            Event::Death(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_tagged_variants() {
        let raw = json!([
            {"type": "damage", "timestamp": 100, "source": 1, "target": 2, "action": 7, "amount": 500},
            {"type": "statusApply", "timestamp": 150, "source": 1, "target": 2, "status": 9, "duration": 3000},
            {"type": "death", "timestamp": 200, "target": 2}
        ]);
        let events: Vec<Event> = serde_json::from_value(raw).unwrap();

        assert_eq!(events[0].kind(), kind::DAMAGE);
        assert_eq!(events[0].amount(), Some(500));
        assert_eq!(events[1].kind(), kind::STATUS_APPLY);
        assert_eq!(events[1].as_status().and_then(|s| s.duration), Some(3000));
        assert_eq!(events[2].source(), None);
        assert_eq!(events[2].timestamp(), 200);
    }

    #[test]
    fn synthetic_markers_carry_timestamp() {
        let init = Event::init(42);
        let complete = Event::complete(99);
        assert_eq!(init.kind(), kind::INIT);
        assert_eq!(init.timestamp(), 42);
        assert_eq!(complete.kind(), kind::COMPLETE);
        assert_eq!(complete.timestamp(), 99);
        assert_eq!(
            serde_json::to_value(&init).unwrap(),
            json!({"type": "init", "timestamp": 42})
        );
    }
}
