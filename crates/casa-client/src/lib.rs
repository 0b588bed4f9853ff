//! casa-client: the viewer-session half of casa.
//!
//! Optimistic overlay store, query layer, invalidation listener, and
//! the session type tying them together. One `ViewerSession` per
//! frontend instance (browser tab, TUI, test harness).

pub mod listener;
pub mod overlay;
pub mod query;
pub mod session;

pub use listener::InvalidationListener;
pub use overlay::{AttributeValue, ControlField, OverlayStore};
pub use query::{ClientError, HttpQueryLayer, QueryLayer};
pub use session::ViewerSession;
