// casa-gateway: async client for the casa hardware gateway
// (device enumeration, attribute mutation, change-event stream)

pub mod client;
pub mod error;
pub mod events;
pub mod types;

pub use client::GatewayClient;
pub use error::Error;
pub use events::{EventStreamHandle, GatewayEvent, ReconnectConfig};
pub use types::{AttributeBag, AttributePatch, Capabilities, RawDevice, RawDeviceSet};
