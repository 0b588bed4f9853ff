//! Device aggregation: raw gateway records → ordered view entities.
//!
//! Pure projection of the gateway's current snapshot. Devices that
//! belong to a vendor-defined device set never appear standalone —
//! each set becomes one synthesized entity whose fields are computed
//! by a fixed reducer per field. No state survives between calls.

use std::collections::HashMap;

use casa_gateway::{RawDevice, RawDeviceSet};

use crate::model::{AggregatedEntity, DeviceKind, EntityFilter, EntityKind};

// ── Capability names (gateway `canReceive` vocabulary) ───────────────

const CAP_IS_ON: &str = "isOn";
const CAP_LIGHT_LEVEL: &str = "lightLevel";
const CAP_COLOR_TEMPERATURE: &str = "colorTemperature";
const CAP_COLOR_HUE: &str = "colorHue";
const CAP_COLOR_SATURATION: &str = "colorSaturation";
const CAP_PLAYBACK: &str = "playback";
const CAP_VOLUME: &str = "volume";

// ── Entry point ──────────────────────────────────────────────────────

/// Aggregate a raw device/device-set snapshot into an ordered list of
/// view entities.
///
/// Malformed records (missing id) are skipped, never fatal — the
/// output degrades by omission. `sets` supplies authoritative set
/// names; a set referenced by a member but absent from `sets` falls
/// back to the name embedded on the membership reference.
pub fn aggregate(
    devices: &[RawDevice],
    sets: &[RawDeviceSet],
    filter: &EntityFilter,
) -> Vec<AggregatedEntity> {
    let set_names: HashMap<&str, &str> = sets
        .iter()
        .map(|s| (s.id.as_str(), s.name.as_str()))
        .collect();

    // Partition into ungrouped devices and set members, dropping
    // malformed records up front.
    let mut ungrouped: Vec<&RawDevice> = Vec::new();
    let mut set_order: Vec<&str> = Vec::new();
    let mut members: HashMap<&str, Vec<&RawDevice>> = HashMap::new();

    for device in devices {
        if device.id.is_empty() {
            tracing::debug!("skipping malformed device record (missing id)");
            continue;
        }
        if !filter.matches(device) {
            continue;
        }

        match device.set_ref() {
            Some(set_ref) if !set_ref.id.is_empty() => {
                let entry = members.entry(set_ref.id.as_str()).or_default();
                if entry.is_empty() {
                    set_order.push(set_ref.id.as_str());
                }
                entry.push(device);
            }
            _ => ungrouped.push(device),
        }
    }

    let mut entities: Vec<AggregatedEntity> = ungrouped
        .into_iter()
        .map(project_device)
        .collect();

    for set_id in set_order {
        let set_members = &members[set_id];
        let name = set_names
            .get(set_id)
            .copied()
            .or_else(|| {
                set_members
                    .iter()
                    .find_map(|d| d.set_ref().and_then(|r| r.name.as_deref()))
            })
            .unwrap_or(set_id);
        entities.push(synthesize_set(set_id, name, set_members));
    }

    sort_entities(&mut entities);
    entities
}

// ── Single-device projection ─────────────────────────────────────────

/// Map one ungrouped device 1:1 onto a view entity, gating every
/// controllable field on the device's receive capabilities.
fn project_device(device: &RawDevice) -> AggregatedEntity {
    let caps = &device.capabilities;
    let attrs = &device.attributes;

    AggregatedEntity {
        kind: EntityKind::Device,
        id: device.id.clone(),
        name: device.display_name().to_owned(),
        device_kind: DeviceKind::from_raw(&device.device_type),
        room_id: device.room.as_ref().map(|r| r.id.clone()),
        is_reachable: device.is_reachable,

        is_on: gated(caps.can_receive(CAP_IS_ON), attrs.is_on),
        light_level: gated(caps.can_receive(CAP_LIGHT_LEVEL), attrs.light_level),
        color_temperature: gated(
            caps.can_receive(CAP_COLOR_TEMPERATURE),
            attrs.color_temperature,
        ),
        color_hue: gated(caps.can_receive(CAP_COLOR_HUE), attrs.color_hue),
        color_saturation: gated(
            caps.can_receive(CAP_COLOR_SATURATION),
            attrs.color_saturation,
        ),
        playback: gated(caps.can_receive(CAP_PLAYBACK), attrs.playback.clone()),
        volume: gated(caps.can_receive(CAP_VOLUME), attrs.volume),

        // Sensor-only (read) fields surface whenever reported.
        current_temperature: attrs.current_temperature,
        battery_percentage: attrs.battery_percentage,
    }
}

fn gated<T>(capable: bool, value: Option<T>) -> Option<T> {
    if capable { value } else { None }
}

// ── Set synthesis ────────────────────────────────────────────────────

/// Synthesize one view entity for a device set from its members.
///
/// Reducers per field: logical OR for `is_on`, value-of-first-
/// responding-member for scalars, logical AND for reachability.
/// A controllable field is surfaced only if *any* member can receive
/// commands for it.
fn synthesize_set(set_id: &str, name: &str, members: &[&RawDevice]) -> AggregatedEntity {
    let any_receives = |cap: &str| members.iter().any(|d| d.capabilities.can_receive(cap));

    AggregatedEntity {
        kind: EntityKind::DeviceSet,
        id: set_id.to_owned(),
        name: name.to_owned(),
        device_kind: members
            .first()
            .map_or(DeviceKind::Sensor, |d| DeviceKind::from_raw(&d.device_type)),
        room_id: members.iter().find_map(|d| d.room.as_ref().map(|r| r.id.clone())),

        is_reachable: members.iter().all(|d| d.is_reachable),

        is_on: gated(
            any_receives(CAP_IS_ON),
            reduce_or(members, |a| a.attributes.is_on),
        ),
        light_level: gated(
            any_receives(CAP_LIGHT_LEVEL),
            first_responding(members, |a| a.attributes.light_level),
        ),
        color_temperature: gated(
            any_receives(CAP_COLOR_TEMPERATURE),
            first_responding(members, |a| a.attributes.color_temperature),
        ),
        color_hue: gated(
            any_receives(CAP_COLOR_HUE),
            first_responding(members, |a| a.attributes.color_hue),
        ),
        color_saturation: gated(
            any_receives(CAP_COLOR_SATURATION),
            first_responding(members, |a| a.attributes.color_saturation),
        ),
        playback: gated(
            any_receives(CAP_PLAYBACK),
            first_responding(members, |a| a.attributes.playback.clone()),
        ),
        volume: gated(
            any_receives(CAP_VOLUME),
            first_responding(members, |a| a.attributes.volume),
        ),

        current_temperature: first_responding(members, |a| a.attributes.current_temperature),
        battery_percentage: first_responding(members, |a| a.attributes.battery_percentage),
    }
}

/// Logical OR across members; `None` if no member reports the field.
fn reduce_or(members: &[&RawDevice], get: impl Fn(&RawDevice) -> Option<bool>) -> Option<bool> {
    members
        .iter()
        .filter_map(|d| get(d))
        .reduce(|acc, v| acc || v)
}

/// Value of the first member that reports the field.
fn first_responding<T>(
    members: &[&RawDevice],
    get: impl Fn(&RawDevice) -> Option<T>,
) -> Option<T> {
    members.iter().find_map(|d| get(d))
}

// ── Ordering ─────────────────────────────────────────────────────────

/// Sort policy: entities with at least one controllable field first,
/// then by display name. Name comparison is Unicode-lowercase, which
/// approximates locale collation without an ICU dependency.
fn sort_entities(entities: &mut [AggregatedEntity]) {
    entities.sort_by(|a, b| {
        b.is_controllable()
            .cmp(&a.is_controllable())
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use casa_gateway::types::{AttributeBag, Capabilities, DeviceSetRef, RoomRef};

    use super::*;

    fn light(id: &str, name: &str) -> RawDevice {
        RawDevice {
            id: id.into(),
            device_type: "light".into(),
            is_reachable: true,
            capabilities: Capabilities {
                can_send: vec![],
                can_receive: vec![CAP_IS_ON.into(), CAP_LIGHT_LEVEL.into()],
            },
            attributes: AttributeBag {
                custom_name: Some(name.into()),
                is_on: Some(false),
                light_level: Some(50),
                ..AttributeBag::default()
            },
            ..RawDevice::default()
        }
    }

    fn sensor(id: &str, name: &str) -> RawDevice {
        RawDevice {
            id: id.into(),
            device_type: "environmentSensor".into(),
            is_reachable: true,
            attributes: AttributeBag {
                custom_name: Some(name.into()),
                current_temperature: Some(21.0),
                battery_percentage: Some(80),
                ..AttributeBag::default()
            },
            ..RawDevice::default()
        }
    }

    fn in_set(mut device: RawDevice, set_id: &str, set_name: &str) -> RawDevice {
        device.device_set = vec![DeviceSetRef {
            id: set_id.into(),
            name: Some(set_name.into()),
        }];
        device
    }

    #[test]
    fn grouped_devices_never_appear_standalone() {
        let devices = vec![
            in_set(light("a", "Lamp A"), "set-1", "Lights"),
            in_set(light("b", "Lamp B"), "set-1", "Lights"),
            light("c", "Lamp C"),
        ];

        let entities = aggregate(&devices, &[], &EntityFilter::All);

        let ids: Vec<&str> = entities.iter().map(|e| e.id.as_str()).collect();
        assert!(!ids.contains(&"a"));
        assert!(!ids.contains(&"b"));
        assert!(ids.contains(&"c"));
        assert!(ids.contains(&"set-1"));
        assert_eq!(entities.len(), 2);
    }

    #[test]
    fn set_is_on_is_or_reduced() {
        let mut on = in_set(light("a", "A"), "set-1", "Lights");
        on.attributes.is_on = Some(true);
        let off = in_set(light("b", "B"), "set-1", "Lights");

        let entities = aggregate(&[on, off], &[], &EntityFilter::All);

        let set = entities.iter().find(|e| e.id == "set-1").unwrap();
        assert_eq!(set.kind, EntityKind::DeviceSet);
        assert_eq!(set.is_on, Some(true));
    }

    #[test]
    fn set_reachability_is_and_reduced() {
        let reachable = in_set(light("a", "A"), "set-1", "Lights");
        let mut unreachable = in_set(light("b", "B"), "set-1", "Lights");
        unreachable.is_reachable = false;

        let entities = aggregate(&[reachable, unreachable], &[], &EntityFilter::All);

        let set = entities.iter().find(|e| e.id == "set-1").unwrap();
        assert!(!set.is_reachable);
    }

    #[test]
    fn set_scalar_takes_first_responding_member() {
        let mut silent = in_set(light("a", "A"), "set-1", "Lights");
        silent.attributes.light_level = None;
        let mut responding = in_set(light("b", "B"), "set-1", "Lights");
        responding.attributes.light_level = Some(35);

        let entities = aggregate(&[silent, responding], &[], &EntityFilter::All);

        let set = entities.iter().find(|e| e.id == "set-1").unwrap();
        assert_eq!(set.light_level, Some(35));
    }

    #[test]
    fn controllable_sorts_before_non_controllable() {
        let devices = vec![light("z", "Zeta"), sensor("a", "Alpha")];

        let entities = aggregate(&devices, &[], &EntityFilter::All);

        assert_eq!(entities[0].name, "Zeta");
        assert!(entities[0].is_controllable());
        assert_eq!(entities[1].name, "Alpha");
        assert!(!entities[1].is_controllable());
    }

    #[test]
    fn controllable_entities_sort_by_name() {
        let devices = vec![light("1", "Beta"), light("2", "Alpha")];

        let entities = aggregate(&devices, &[], &EntityFilter::All);

        assert_eq!(entities[0].name, "Alpha");
        assert_eq!(entities[1].name, "Beta");
    }

    #[test]
    fn capability_gating_hides_unreceivable_fields() {
        // Raw attributes carry a lightLevel the device cannot receive
        // commands for -- it must not surface.
        let mut device = light("a", "A");
        device.capabilities.can_receive = vec![CAP_IS_ON.into()];

        let entities = aggregate(&[device], &[], &EntityFilter::All);

        assert_eq!(entities[0].is_on, Some(false));
        assert_eq!(entities[0].light_level, None);
    }

    #[test]
    fn sensor_fields_surface_without_capabilities() {
        let entities = aggregate(&[sensor("s", "Kitchen")], &[], &EntityFilter::All);

        assert_eq!(entities[0].current_temperature, Some(21.0));
        assert_eq!(entities[0].battery_percentage, Some(80));
        assert!(!entities[0].is_controllable());
    }

    #[test]
    fn malformed_records_are_skipped() {
        let nameless = RawDevice::default(); // empty id
        let devices = vec![nameless, light("ok", "Ok")];

        let entities = aggregate(&devices, &[], &EntityFilter::All);

        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].id, "ok");
    }

    #[test]
    fn set_name_prefers_snapshot_over_membership_ref() {
        let devices = vec![in_set(light("a", "A"), "set-1", "Embedded name")];
        let sets = vec![RawDeviceSet {
            id: "set-1".into(),
            name: "Authoritative name".into(),
        }];

        let entities = aggregate(&devices, &sets, &EntityFilter::All);
        assert_eq!(entities[0].name, "Authoritative name");
    }

    #[test]
    fn room_filter_scopes_devices() {
        let mut in_room = light("a", "A");
        in_room.room = Some(RoomRef {
            id: "room-1".into(),
            name: None,
        });
        let elsewhere = light("b", "B");

        let entities = aggregate(
            &[in_room, elsewhere],
            &[],
            &EntityFilter::Room("room-1".into()),
        );

        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].id, "a");
    }

    #[test]
    fn sets_keep_first_seen_order_before_sorting() {
        // Two sets whose members interleave; both controllable, so the
        // final order is by name -- but synthesis must visit each set once.
        let devices = vec![
            in_set(light("a", "A"), "set-z", "Zebra"),
            in_set(light("b", "B"), "set-a", "Aardvark"),
            in_set(light("c", "C"), "set-z", "Zebra"),
        ];

        let entities = aggregate(&devices, &[], &EntityFilter::All);

        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].name, "Aardvark");
        assert_eq!(entities[1].name, "Zebra");
    }
}
