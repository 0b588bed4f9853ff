// ── Device command API ──
//
// All mutations flow through the closed `DeviceCommand` union. The
// single place that turns a command into a gateway attribute patch is
// `attribute_patch`, whose match over `DeviceKind` is exhaustive —
// adding a device kind is a compile-time-checked extension point, not
// a string comparison.

use casa_gateway::AttributePatch;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::{DeviceKind, EntityKind, PlaybackCommand};

/// Addressee of a command: an entity id plus its discriminant, exactly
/// as the control surface receives them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandTarget {
    pub id: String,
    pub kind: EntityKind,
}

/// Every mutation the control surface accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DeviceCommand {
    SetIsOn { is_on: bool },
    SetLightLevel { light_level: u8 },
    SetColorTemperature { color_temperature: u32 },
    SetColorHueSaturation { hue: f64, saturation: f64 },
    SetPlayback { playback: PlaybackCommand },
    SetVolume { volume: u8 },
}

impl DeviceCommand {
    /// Short name for error messages and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetIsOn { .. } => "setIsOn",
            Self::SetLightLevel { .. } => "setLightLevel",
            Self::SetColorTemperature { .. } => "setColorTemperature",
            Self::SetColorHueSaturation { .. } => "setColorHueSaturation",
            Self::SetPlayback { .. } => "setPlayback",
            Self::SetVolume { .. } => "setVolume",
        }
    }

    /// Range-check command values before anything reaches the gateway.
    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            Self::SetLightLevel { light_level } => {
                if !(1..=100).contains(light_level) {
                    return Err(CoreError::ValidationFailed {
                        message: format!("light level must be 1-100, got {light_level}"),
                    });
                }
            }
            Self::SetVolume { volume } => {
                if *volume > 100 {
                    return Err(CoreError::ValidationFailed {
                        message: format!("volume must be 0-100, got {volume}"),
                    });
                }
            }
            Self::SetColorHueSaturation { hue, saturation } => {
                if !(0.0..=360.0).contains(hue) {
                    return Err(CoreError::ValidationFailed {
                        message: format!("hue must be 0-360, got {hue}"),
                    });
                }
                if !(0.0..=1.0).contains(saturation) {
                    return Err(CoreError::ValidationFailed {
                        message: format!("saturation must be 0-1, got {saturation}"),
                    });
                }
            }
            Self::SetIsOn { .. } | Self::SetColorTemperature { .. } | Self::SetPlayback { .. } => {}
        }
        Ok(())
    }

    /// Translate this command into a gateway attribute patch for a
    /// device of the given kind.
    ///
    /// This is the single boundary that issues gateway commands; the
    /// match is exhaustive over `DeviceKind`.
    pub fn attribute_patch(&self, kind: DeviceKind) -> Result<AttributePatch, CoreError> {
        let unsupported = || CoreError::UnsupportedCommand {
            kind: kind.to_string(),
            command: self.name().to_owned(),
        };

        #[allow(clippy::match_same_arms)]
        let patch = match kind {
            DeviceKind::Light => match self {
                Self::SetIsOn { is_on } => AttributePatch {
                    is_on: Some(*is_on),
                    ..AttributePatch::default()
                },
                Self::SetLightLevel { light_level } => AttributePatch {
                    light_level: Some(*light_level),
                    ..AttributePatch::default()
                },
                Self::SetColorTemperature { color_temperature } => AttributePatch {
                    color_temperature: Some(*color_temperature),
                    ..AttributePatch::default()
                },
                Self::SetColorHueSaturation { hue, saturation } => AttributePatch {
                    color_hue: Some(*hue),
                    color_saturation: Some(*saturation),
                    ..AttributePatch::default()
                },
                Self::SetPlayback { .. } | Self::SetVolume { .. } => return Err(unsupported()),
            },
            DeviceKind::Outlet => match self {
                Self::SetIsOn { is_on } => AttributePatch {
                    is_on: Some(*is_on),
                    ..AttributePatch::default()
                },
                _ => return Err(unsupported()),
            },
            DeviceKind::Speaker => match self {
                Self::SetPlayback { playback } => AttributePatch {
                    playback: Some(playback.wire_value().to_owned()),
                    ..AttributePatch::default()
                },
                Self::SetVolume { volume } => AttributePatch {
                    volume: Some(*volume),
                    ..AttributePatch::default()
                },
                _ => return Err(unsupported()),
            },
            // Sensors receive nothing.
            DeviceKind::Sensor => return Err(unsupported()),
        };

        Ok(patch)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn light_level_range_is_validated() {
        assert!(DeviceCommand::SetLightLevel { light_level: 1 }.validate().is_ok());
        assert!(DeviceCommand::SetLightLevel { light_level: 100 }.validate().is_ok());
        assert!(DeviceCommand::SetLightLevel { light_level: 0 }.validate().is_err());
        assert!(DeviceCommand::SetLightLevel { light_level: 101 }.validate().is_err());
    }

    #[test]
    fn hue_saturation_ranges_are_validated() {
        let ok = DeviceCommand::SetColorHueSaturation {
            hue: 120.0,
            saturation: 0.8,
        };
        assert!(ok.validate().is_ok());

        let bad_hue = DeviceCommand::SetColorHueSaturation {
            hue: 400.0,
            saturation: 0.5,
        };
        assert!(bad_hue.validate().is_err());
    }

    #[test]
    fn light_accepts_light_commands() {
        let patch = DeviceCommand::SetLightLevel { light_level: 40 }
            .attribute_patch(DeviceKind::Light)
            .unwrap();
        assert_eq!(patch.light_level, Some(40));
    }

    #[test]
    fn outlet_rejects_light_level() {
        let err = DeviceCommand::SetLightLevel { light_level: 40 }
            .attribute_patch(DeviceKind::Outlet)
            .unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedCommand { .. }));
    }

    #[test]
    fn speaker_playback_uses_wire_value() {
        let patch = DeviceCommand::SetPlayback {
            playback: PlaybackCommand::Pause,
        }
        .attribute_patch(DeviceKind::Speaker)
        .unwrap();
        assert_eq!(patch.playback.as_deref(), Some("playbackPaused"));
    }

    #[test]
    fn sensor_rejects_everything() {
        let err = DeviceCommand::SetIsOn { is_on: true }
            .attribute_patch(DeviceKind::Sensor)
            .unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedCommand { .. }));
    }

    #[test]
    fn command_deserializes_from_tagged_json() {
        let cmd: DeviceCommand = serde_json::from_value(serde_json::json!({
            "type": "setLightLevel",
            "lightLevel": 55
        }))
        .unwrap();
        assert_eq!(cmd, DeviceCommand::SetLightLevel { light_level: 55 });
    }
}
