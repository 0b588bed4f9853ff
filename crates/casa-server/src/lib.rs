//! casa-server: router, realtime channel, and the casad entry point.

pub mod router;
pub mod ws;

pub use router::{AppState, app};
