use chrono::{DateTime, Utc};

/// Contract every domain event satisfies before it can be stored or
/// published.
///
/// Events are facts: once emitted they are never edited, only superseded by
/// later events. `event_type` is the stable wire name consumers dispatch on;
/// `version` exists so payload schemas can evolve without breaking replay.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable dotted identifier, e.g. `"inventory.stock.movement_recorded"`.
    fn event_type(&self) -> &'static str;

    /// Payload schema version.
    fn version(&self) -> u32;

    /// Business time: when the thing described by the event happened.
    fn occurred_at(&self) -> DateTime<Utc>;
}
