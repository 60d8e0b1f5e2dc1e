use chrono::{DateTime, Utc};

/// A domain fact: something that already happened to a blood unit, a donor
/// record, a donation, or an emergency request.
///
/// Events are the unit of history. Once appended to a stream they are never
/// edited or removed; corrections are new events. Each carries:
///
/// - a stable, dotted type name for routing and storage
///   (`"inventory.unit.volume_deducted"`)
/// - a schema version, bumped when the payload shape changes, so old
///   streams stay readable
/// - the business time at which the fact occurred
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event type identifier, unique across the workspace.
    fn event_type(&self) -> &'static str;

    /// Payload schema version (starts at 1).
    fn schema_version(&self) -> u32;

    /// When the fact occurred (business time, not storage time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
