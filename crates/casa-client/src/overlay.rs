//! Optimistic overlay store.
//!
//! Keyed by entity id, holding at most one pending value per
//! controllable field: the value the viewer just set and is waiting to
//! see confirmed. A newer edit to the same field replaces the older
//! one — edits never queue. Reconciliation writes every non-null field
//! of a fresh server payload into the "last known server value" side
//! unconditionally and drops the matching pending entry: the store
//! keeps no ordering token, so a server read always supersedes pending
//! local state once observed, even if that read predates the edit.
//!
//! This is an explicit state container owned by the viewer session —
//! nothing here is global or ambient.

use std::collections::HashMap;

use casa_core::AggregatedEntity;

// ── Fields and values ────────────────────────────────────────────────

/// The controllable fields a viewer can edit optimistically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlField {
    IsOn,
    LightLevel,
    ColorTemperature,
    ColorHue,
    ColorSaturation,
    Playback,
    Volume,
}

impl ControlField {
    /// All fields, in a fixed order (bounds the per-entity map).
    pub const ALL: [Self; 7] = [
        Self::IsOn,
        Self::LightLevel,
        Self::ColorTemperature,
        Self::ColorHue,
        Self::ColorSaturation,
        Self::Playback,
        Self::Volume,
    ];
}

/// An attribute value carried by the overlay.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Bool(bool),
    UInt(u64),
    Float(f64),
    Text(String),
}

impl AttributeValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> Option<u8> {
        match self {
            Self::UInt(v) => u8::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::UInt(v) => u32::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

// ── Per-entity overlay record ────────────────────────────────────────

#[derive(Debug, Default, Clone)]
struct EntityOverlay {
    /// Fields the viewer has touched and not yet had overwritten.
    pending: HashMap<ControlField, AttributeValue>,
    /// Last server-reported value per field.
    server: HashMap<ControlField, AttributeValue>,
}

// ── OverlayStore ─────────────────────────────────────────────────────

/// Per-viewer optimistic state: entity id → pending + last-known-server
/// field values. Display precedence is `pending ?? server` per field.
#[derive(Debug, Default)]
pub struct OverlayStore {
    entities: HashMap<String, EntityOverlay>,
}

impl OverlayStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Write path ───────────────────────────────────────────────────

    /// Record an optimistic edit. Synchronous — the UI may render the
    /// new value before any network round trip starts. A newer edit to
    /// the same field replaces the older one.
    pub fn apply_edit(&mut self, entity_id: &str, field: ControlField, value: AttributeValue) {
        self.entities
            .entry(entity_id.to_owned())
            .or_default()
            .pending
            .insert(field, value);
    }

    // ── Reconciliation path ──────────────────────────────────────────

    /// Merge a freshly fetched server entity into the store.
    ///
    /// Every field the payload reports as non-null is written into the
    /// server side unconditionally, and any pending entry for that
    /// field is cleared — there is no distinction between "this
    /// confirms my edit" and "this is a stale read that predates it".
    pub fn reconcile(&mut self, entity: &AggregatedEntity) {
        let overlay = self.entities.entry(entity.id.clone()).or_default();

        for (field, value) in server_fields(entity) {
            overlay.server.insert(field, value);
            overlay.pending.remove(&field);
        }
    }

    // ── Read path ────────────────────────────────────────────────────

    /// Display value for one field: the pending edit if present,
    /// otherwise the last known server value.
    pub fn display_value(&self, entity_id: &str, field: ControlField) -> Option<AttributeValue> {
        let overlay = self.entities.get(entity_id)?;
        overlay
            .pending
            .get(&field)
            .or_else(|| overlay.server.get(&field))
            .cloned()
    }

    /// Render a fetched entity with this viewer's pending edits applied
    /// on top of it.
    pub fn render(&self, entity: &AggregatedEntity) -> AggregatedEntity {
        let Some(overlay) = self.entities.get(&entity.id) else {
            return entity.clone();
        };

        let mut out = entity.clone();
        for (field, value) in &overlay.pending {
            match field {
                ControlField::IsOn => out.is_on = value.as_bool().or(out.is_on),
                ControlField::LightLevel => out.light_level = value.as_u8().or(out.light_level),
                ControlField::ColorTemperature => {
                    out.color_temperature = value.as_u32().or(out.color_temperature);
                }
                ControlField::ColorHue => out.color_hue = value.as_f64().or(out.color_hue),
                ControlField::ColorSaturation => {
                    out.color_saturation = value.as_f64().or(out.color_saturation);
                }
                ControlField::Playback => {
                    out.playback = value
                        .as_text()
                        .map(str::to_owned)
                        .or_else(|| out.playback.clone());
                }
                ControlField::Volume => out.volume = value.as_u8().or(out.volume),
            }
        }
        out
    }

    /// Number of outstanding pending edits for an entity.
    pub fn pending_count(&self, entity_id: &str) -> usize {
        self.entities
            .get(entity_id)
            .map_or(0, |o| o.pending.len())
    }

    /// Forget everything about an entity (e.g. its view unmounted).
    pub fn forget(&mut self, entity_id: &str) {
        self.entities.remove(entity_id);
    }
}

/// Extract the non-null controllable fields of a server payload.
fn server_fields(entity: &AggregatedEntity) -> Vec<(ControlField, AttributeValue)> {
    let mut fields = Vec::new();
    if let Some(v) = entity.is_on {
        fields.push((ControlField::IsOn, AttributeValue::Bool(v)));
    }
    if let Some(v) = entity.light_level {
        fields.push((ControlField::LightLevel, AttributeValue::UInt(u64::from(v))));
    }
    if let Some(v) = entity.color_temperature {
        fields.push((
            ControlField::ColorTemperature,
            AttributeValue::UInt(u64::from(v)),
        ));
    }
    if let Some(v) = entity.color_hue {
        fields.push((ControlField::ColorHue, AttributeValue::Float(v)));
    }
    if let Some(v) = entity.color_saturation {
        fields.push((ControlField::ColorSaturation, AttributeValue::Float(v)));
    }
    if let Some(ref v) = entity.playback {
        fields.push((ControlField::Playback, AttributeValue::Text(v.clone())));
    }
    if let Some(v) = entity.volume {
        fields.push((ControlField::Volume, AttributeValue::UInt(u64::from(v))));
    }
    fields
}

// ── Tests ────────────────────────────────────────────────────────────
