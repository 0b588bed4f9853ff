//! Wire types for the hardware gateway REST surface.
//!
//! All types match the JSON the gateway serves under `/v1/`. Field names
//! use camelCase via `#[serde(rename_all = "camelCase")]`; unknown fields
//! are captured in `extra` so firmware additions are never silently lost.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Device sets ──────────────────────────────────────────────────────

/// A vendor-defined device grouping — from `GET /v1/device-sets`.
///
/// Carries no attributes of its own; everything observable about a set
/// is derived from its member devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDeviceSet {
    pub id: String,
    pub name: String,
}

/// Set membership reference embedded on a device record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSetRef {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

// ── Rooms ────────────────────────────────────────────────────────────

/// Room assignment reference embedded on a device record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRef {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

// ── Capabilities ─────────────────────────────────────────────────────

/// Capability introspection on a device record.
///
/// `can_receive` lists the attribute names the device accepts commands
/// for; `can_send` lists the attributes it reports spontaneously.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    #[serde(default)]
    pub can_send: Vec<String>,
    #[serde(default)]
    pub can_receive: Vec<String>,
}

impl Capabilities {
    /// Whether the device accepts commands for the named attribute.
    pub fn can_receive(&self, attribute: &str) -> bool {
        self.can_receive.iter().any(|a| a == attribute)
    }
}

// ── Attributes ───────────────────────────────────────────────────────

/// Current attribute values reported by the gateway.
///
/// Every field is optional — which fields a device reports depends on
/// its hardware. Unmodeled attributes land in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeBag {
    #[serde(default)]
    pub custom_name: Option<String>,
    #[serde(default)]
    pub is_on: Option<bool>,
    /// Light level, 1–100.
    #[serde(default)]
    pub light_level: Option<u8>,
    /// Color temperature in Kelvin.
    #[serde(default)]
    pub color_temperature: Option<u32>,
    /// Hue in degrees, 0–360.
    #[serde(default)]
    pub color_hue: Option<f64>,
    /// Saturation, 0.0–1.0.
    #[serde(default)]
    pub color_saturation: Option<f64>,
    /// Playback state, e.g. `"playbackPlaying"`, `"playbackPaused"`.
    #[serde(default)]
    pub playback: Option<String>,
    /// Volume, 0–100.
    #[serde(default)]
    pub volume: Option<u8>,
    /// Sensor reading in degrees Celsius.
    #[serde(default)]
    pub current_temperature: Option<f64>,
    #[serde(default)]
    pub battery_percentage: Option<u8>,

    /// Catch-all for attributes not modeled above.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

// ── Devices ──────────────────────────────────────────────────────────

/// A physical device record — from `GET /v1/devices`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDevice {
    #[serde(default)]
    pub id: String,
    /// Vendor device type, e.g. `"light"`, `"outlet"`, `"speaker"`,
    /// `"environmentSensor"`.
    #[serde(default, rename = "type")]
    pub device_type: String,
    #[serde(default)]
    pub is_reachable: bool,
    #[serde(default)]
    pub room: Option<RoomRef>,
    /// Zero-or-one set membership; the gateway serializes it as a list
    /// but never populates more than one entry.
    #[serde(default)]
    pub device_set: Vec<DeviceSetRef>,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub attributes: AttributeBag,

    /// Catch-all for fields not modeled above.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl RawDevice {
    /// The device's set membership, if any.
    pub fn set_ref(&self) -> Option<&DeviceSetRef> {
        self.device_set.first()
    }

    /// Display name: the user-assigned name, falling back to the id.
    pub fn display_name(&self) -> &str {
        match self.attributes.custom_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.id,
        }
    }
}

// ── Attribute mutation ───────────────────────────────────────────────

/// Attribute patch for `PATCH /v1/devices/{id}` — only the fields to
/// change are serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub light_level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_temperature: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_hue: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_saturation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u8>,
}

impl AttributePatch {
    /// Whether the patch carries no changes at all.
    pub fn is_empty(&self) -> bool {
        self.is_on.is_none()
            && self.light_level.is_none()
            && self.color_temperature.is_none()
            && self.color_hue.is_none()
            && self.color_saturation.is_none()
            && self.playback.is_none()
            && self.volume.is_none()
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_device_with_set_membership() {
        let json = serde_json::json!({
            "id": "dev-1",
            "type": "light",
            "isReachable": true,
            "deviceSet": [{ "id": "set-1", "name": "Living room lights" }],
            "capabilities": { "canSend": [], "canReceive": ["isOn", "lightLevel"] },
            "attributes": { "customName": "Floor lamp", "isOn": true, "lightLevel": 70 }
        });

        let device: RawDevice = serde_json::from_value(json).unwrap();
        assert_eq!(device.id, "dev-1");
        assert!(device.is_reachable);
        assert_eq!(device.set_ref().unwrap().id, "set-1");
        assert!(device.capabilities.can_receive("lightLevel"));
        assert!(!device.capabilities.can_receive("volume"));
        assert_eq!(device.attributes.light_level, Some(70));
        assert_eq!(device.display_name(), "Floor lamp");
    }

    #[test]
    fn display_name_falls_back_to_id() {
        let device = RawDevice {
            id: "dev-2".into(),
            ..RawDevice::default()
        };
        assert_eq!(device.display_name(), "dev-2");
    }

    #[test]
    fn unknown_attributes_are_kept() {
        let json = serde_json::json!({
            "id": "dev-3",
            "type": "environmentSensor",
            "isReachable": true,
            "attributes": { "currentTemperature": 21.5, "currentPM25": 4 }
        });

        let device: RawDevice = serde_json::from_value(json).unwrap();
        assert_eq!(device.attributes.current_temperature, Some(21.5));
        assert_eq!(device.attributes.extra["currentPM25"], 4);
    }

    #[test]
    fn patch_serializes_only_set_fields() {
        let patch = AttributePatch {
            light_level: Some(40),
            ..AttributePatch::default()
        };

        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json, serde_json::json!({ "lightLevel": 40 }));
        assert!(!patch.is_empty());
        assert!(AttributePatch::default().is_empty());
    }
}
