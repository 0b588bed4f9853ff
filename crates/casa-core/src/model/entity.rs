// ── Aggregated view entities ──

use serde::{Deserialize, Serialize};

/// Discriminant for view entities: a standalone physical device, or
/// one synthesized entity representing a whole device set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    Device,
    DeviceSet,
}

/// Canonical device kind — a closed union, so the command boundary can
/// match exhaustively and adding a kind is a compile-time-checked
/// extension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
#[non_exhaustive]
pub enum DeviceKind {
    Light,
    Outlet,
    Speaker,
    Sensor,
}

impl DeviceKind {
    /// Map the gateway's free-form device type string onto the closed
    /// union. Anything that is not a known controllable kind is treated
    /// as a sensor (read-only).
    pub fn from_raw(device_type: &str) -> Self {
        match device_type {
            "light" => Self::Light,
            "outlet" => Self::Outlet,
            "speaker" => Self::Speaker,
            _ => Self::Sensor,
        }
    }
}

/// Playback commands a speaker accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackCommand {
    Play,
    Pause,
    Stop,
    Next,
    Previous,
}

impl PlaybackCommand {
    /// The gateway's wire value for this command.
    pub fn wire_value(self) -> &'static str {
        match self {
            Self::Play => "playbackPlaying",
            Self::Pause => "playbackPaused",
            Self::Stop => "playbackIdle",
            Self::Next => "playbackNext",
            Self::Previous => "playbackPrevious",
        }
    }
}

/// The normalized, control-aware view model exposed to viewers.
///
/// Controllable fields are `Some` only when capability gating lets them
/// through (§ the device declares it can *receive* commands for the
/// field); sensor-only fields are surfaced whenever the hardware
/// reports them. Identity is by `id` only — entities are recomputed
/// fresh on every query, never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedEntity {
    pub kind: EntityKind,
    pub id: String,
    pub name: String,
    pub device_kind: DeviceKind,
    #[serde(default)]
    pub room_id: Option<String>,

    /// For a device set: the logical AND of all members' reachability —
    /// a set is only fully usable if every member responds.
    pub is_reachable: bool,

    // Controllable fields (capability-gated)
    #[serde(default)]
    pub is_on: Option<bool>,
    #[serde(default)]
    pub light_level: Option<u8>,
    #[serde(default)]
    pub color_temperature: Option<u32>,
    #[serde(default)]
    pub color_hue: Option<f64>,
    #[serde(default)]
    pub color_saturation: Option<f64>,
    #[serde(default)]
    pub playback: Option<String>,
    #[serde(default)]
    pub volume: Option<u8>,

    // Sensor-only fields (surfaced unconditionally when reported)
    #[serde(default)]
    pub current_temperature: Option<f64>,
    #[serde(default)]
    pub battery_percentage: Option<u8>,
}

impl AggregatedEntity {
    /// Whether any controllable field is surfaced. Controllable
    /// entities sort before purely observational ones.
    pub fn is_controllable(&self) -> bool {
        self.is_on.is_some()
            || self.light_level.is_some()
            || self.color_temperature.is_some()
            || self.color_hue.is_some()
            || self.color_saturation.is_some()
            || self.playback.is_some()
            || self.volume.is_some()
    }
}
