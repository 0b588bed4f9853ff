// ── Filter predicates for aggregation queries ──
//
// Scope a query to one grouping (e.g. a room) without changing the
// aggregation algorithm itself.

use casa_gateway::RawDevice;

/// Filter predicate applied to raw devices before aggregation.
pub enum EntityFilter {
    All,
    /// Devices assigned to the given room id.
    Room(String),
    Custom(Box<dyn Fn(&RawDevice) -> bool + Send + Sync>),
}

impl EntityFilter {
    pub fn matches(&self, device: &RawDevice) -> bool {
        match self {
            Self::All => true,
            Self::Room(room_id) => device.room.as_ref().is_some_and(|r| r.id == *room_id),
            Self::Custom(f) => f(device),
        }
    }
}
