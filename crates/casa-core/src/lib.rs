//! casa-core: device aggregation, auth gate, and invalidation fan-out.
//!
//! The server half of casa. Raw gateway records come in, ordered
//! control-aware view entities and payload-free invalidation signals
//! go out. Everything here is stateless per call except the hub's
//! connection registry.

pub mod aggregate;
pub mod auth;
pub mod command;
pub mod error;
pub mod hub;
pub mod model;
pub mod service;

pub use aggregate::aggregate;
pub use auth::{AuthError, AuthGate, Claims};
pub use command::{CommandTarget, DeviceCommand};
pub use error::CoreError;
pub use hub::{InvalidationHub, InvalidationSignal, ViewerHandle};
pub use model::{AggregatedEntity, DeviceKind, EntityFilter, EntityKind, PlaybackCommand};
pub use service::{Gateway, Service};
