// ── View-model domain types ──

mod entity;
mod filter;

pub use entity::{AggregatedEntity, DeviceKind, EntityKind, PlaybackCommand};
pub use filter::EntityFilter;
