//! Viewer session: one per browser tab / frontend instance.
//!
//! Owns the optimistic overlay store and a query layer, and converges
//! the two: user edits land in the overlay synchronously and go out as
//! mutations; invalidation signals, visibility-change refreshes, and
//! resolved mutations each trigger an independent idempotent re-fetch
//! whose result is reconciled into the overlay. The store is plain
//! owned state — injected, never a process-global.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use casa_core::{AggregatedEntity, CommandTarget, DeviceCommand, InvalidationSignal, PlaybackCommand};

use crate::overlay::{AttributeValue, ControlField, OverlayStore};
use crate::query::{ClientError, QueryLayer};

/// One connected viewer's session state.
pub struct ViewerSession<Q> {
    query: Q,
    overlay: OverlayStore,
    /// Last fetched server truth, unmodified by the overlay.
    entities: Vec<AggregatedEntity>,
    /// Optional room scoping for every query this session issues.
    room: Option<String>,
}

impl<Q: QueryLayer> ViewerSession<Q> {
    pub fn new(query: Q) -> Self {
        Self {
            query,
            overlay: OverlayStore::new(),
            entities: Vec::new(),
            room: None,
        }
    }

    /// Scope all of this session's queries to one room.
    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Current view: server truth with this viewer's pending edits
    /// applied on top (`pending ?? server` per field).
    pub fn entities(&self) -> Vec<AggregatedEntity> {
        self.entities.iter().map(|e| self.overlay.render(e)).collect()
    }

    /// One entity by id, overlay applied.
    pub fn entity(&self, id: &str) -> Option<AggregatedEntity> {
        self.entities
            .iter()
            .find(|e| e.id == id)
            .map(|e| self.overlay.render(e))
    }

    pub fn overlay(&self) -> &OverlayStore {
        &self.overlay
    }

    // ── Re-fetch path ────────────────────────────────────────────────

    /// Fetch fresh server truth and reconcile it into the overlay.
    ///
    /// Safe to trigger from overlapping sources (invalidation signal,
    /// tab-visibility change, post-mutation): each call is independent
    /// and resolves against whatever the server reports now.
    pub async fn refresh(&mut self) -> Result<(), ClientError> {
        let entities = self.query.fetch_entities(self.room.as_deref()).await?;
        for entity in &entities {
            self.overlay.reconcile(entity);
        }
        self.entities = entities;
        debug!(count = self.entities.len(), "session refreshed");
        Ok(())
    }

    // ── Write path ───────────────────────────────────────────────────

    /// Apply a user edit optimistically and send the mutation.
    ///
    /// The overlay is updated synchronously before any network I/O, so
    /// the UI can render the new value immediately. A failed mutation
    /// propagates as an error but does NOT roll the overlay back — the
    /// optimistic value stays displayed until server truth is next
    /// observed. A resolved mutation triggers an immediate re-fetch.
    pub async fn execute(
        &mut self,
        target: CommandTarget,
        command: DeviceCommand,
    ) -> Result<(), ClientError> {
        for (field, value) in optimistic_fields(&command) {
            self.overlay.apply_edit(&target.id, field, value);
        }

        self.query.send_command(&target, &command).await?;
        self.refresh().await
    }

    // ── Signal loop ──────────────────────────────────────────────────

    /// Drive the session from an invalidation channel until cancelled.
    ///
    /// Every signal triggers exactly one re-fetch attempt; a burst of N
    /// signals yields at most N attempts. Fetch errors are logged and
    /// the loop continues — except authentication failures, which end
    /// the session so the frontend can prompt for login.
    pub async fn run(
        &mut self,
        mut signals: mpsc::UnboundedReceiver<InvalidationSignal>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                signal = signals.recv() => {
                    match signal {
                        Some(InvalidationSignal) => {
                            if let Err(e) = self.refresh().await {
                                if e.is_authentication() {
                                    warn!(error = %e, "credential rejected, ending session");
                                    break;
                                }
                                warn!(error = %e, "re-fetch failed, awaiting next signal");
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        debug!("viewer session loop exiting");
    }
}

/// The overlay fields a command touches, with their optimistic values.
fn optimistic_fields(command: &DeviceCommand) -> Vec<(ControlField, AttributeValue)> {
    match command {
        DeviceCommand::SetIsOn { is_on } => {
            vec![(ControlField::IsOn, AttributeValue::Bool(*is_on))]
        }
        DeviceCommand::SetLightLevel { light_level } => vec![(
            ControlField::LightLevel,
            AttributeValue::UInt(u64::from(*light_level)),
        )],
        DeviceCommand::SetColorTemperature { color_temperature } => vec![(
            ControlField::ColorTemperature,
            AttributeValue::UInt(u64::from(*color_temperature)),
        )],
        DeviceCommand::SetColorHueSaturation { hue, saturation } => vec![
            (ControlField::ColorHue, AttributeValue::Float(*hue)),
            (ControlField::ColorSaturation, AttributeValue::Float(*saturation)),
        ],
        DeviceCommand::SetPlayback { playback } => vec![(
            ControlField::Playback,
            AttributeValue::Text(playback_wire(*playback)),
        )],
        DeviceCommand::SetVolume { volume } => vec![(
            ControlField::Volume,
            AttributeValue::UInt(u64::from(*volume)),
        )],
    }
}

fn playback_wire(playback: PlaybackCommand) -> String {
    playback.wire_value().to_owned()
}

// ── Tests ────────────────────────────────────────────────────────────
