// ── Server-side service wiring ──
//
// Owns the gateway seam and the invalidation hub. Aggregation queries
// and mutations are independent stateless calls against the gateway's
// current snapshot — no lock spans a mutation and the next read, and
// concurrent queries from many viewers are safe by construction.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use casa_gateway::{AttributePatch, GatewayEvent, RawDevice, RawDeviceSet};

use crate::aggregate::aggregate;
use crate::command::{CommandTarget, DeviceCommand};
use crate::error::CoreError;
use crate::hub::InvalidationHub;
use crate::model::{AggregatedEntity, DeviceKind, EntityFilter, EntityKind};

// ── Gateway seam ─────────────────────────────────────────────────────

/// The narrow hardware-gateway interface the server consumes.
///
/// Mirrors the collaborator surface: enumerate devices and sets, apply
/// attribute mutations. The event stream is consumed separately as a
/// broadcast receiver (see [`Service::spawn_event_bridge`]).
pub trait Gateway: Send + Sync + 'static {
    fn list_devices(
        &self,
    ) -> impl Future<Output = Result<Vec<RawDevice>, casa_gateway::Error>> + Send;

    fn list_device_sets(
        &self,
    ) -> impl Future<Output = Result<Vec<RawDeviceSet>, casa_gateway::Error>> + Send;

    fn set_attributes(
        &self,
        device_id: &str,
        patch: &AttributePatch,
    ) -> impl Future<Output = Result<(), casa_gateway::Error>> + Send;
}

impl Gateway for casa_gateway::GatewayClient {
    fn list_devices(
        &self,
    ) -> impl Future<Output = Result<Vec<RawDevice>, casa_gateway::Error>> + Send {
        casa_gateway::GatewayClient::list_devices(self)
    }

    fn list_device_sets(
        &self,
    ) -> impl Future<Output = Result<Vec<RawDeviceSet>, casa_gateway::Error>> + Send {
        casa_gateway::GatewayClient::list_device_sets(self)
    }

    fn set_attributes(
        &self,
        device_id: &str,
        patch: &AttributePatch,
    ) -> impl Future<Output = Result<(), casa_gateway::Error>> + Send {
        casa_gateway::GatewayClient::set_attributes(self, device_id, patch)
    }
}

// ── Service ──────────────────────────────────────────────────────────

/// The server core: aggregation queries, command routing, and the
/// gateway-event → invalidation bridge.
pub struct Service<G> {
    gateway: Arc<G>,
    hub: Arc<InvalidationHub>,
}

impl<G> Clone for Service<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            hub: Arc::clone(&self.hub),
        }
    }
}

impl<G: Gateway> Service<G> {
    pub fn new(gateway: G) -> Self {
        Self {
            gateway: Arc::new(gateway),
            hub: Arc::new(InvalidationHub::new()),
        }
    }

    pub fn hub(&self) -> &Arc<InvalidationHub> {
        &self.hub
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Fetch the gateway's current snapshot and aggregate it.
    ///
    /// Stateless per call; nothing is cached between queries. Set-name
    /// enumeration failure is cosmetic and degrades to the names
    /// embedded on membership references.
    pub async fn query(&self, filter: &EntityFilter) -> Result<Vec<AggregatedEntity>, CoreError> {
        let (devices, sets) = tokio::join!(
            self.gateway.list_devices(),
            self.gateway.list_device_sets(),
        );

        let devices = devices?;
        let sets = match sets {
            Ok(sets) => sets,
            Err(e) => {
                warn!(error = %e, "device-set enumeration failed (non-fatal)");
                Vec::new()
            }
        };

        Ok(aggregate(&devices, &sets, filter))
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Validate and route a command to the gateway.
    ///
    /// A `DEVICE_SET` target fans the patch out to every member device:
    /// all members are attempted, and the first failure is returned.
    /// A grouped device addressed directly as `DEVICE` is not found —
    /// it is only represented through its set.
    pub async fn execute(
        &self,
        target: &CommandTarget,
        command: &DeviceCommand,
    ) -> Result<(), CoreError> {
        command.validate()?;

        let devices = self.gateway.list_devices().await?;

        match target.kind {
            EntityKind::Device => {
                let device = devices
                    .iter()
                    .find(|d| d.id == target.id && d.set_ref().is_none())
                    .ok_or_else(|| CoreError::EntityNotFound {
                        id: target.id.clone(),
                    })?;

                let patch = command.attribute_patch(DeviceKind::from_raw(&device.device_type))?;
                self.gateway.set_attributes(&device.id, &patch).await?;
            }
            EntityKind::DeviceSet => {
                let members: Vec<&RawDevice> = devices
                    .iter()
                    .filter(|d| d.set_ref().is_some_and(|r| r.id == target.id))
                    .collect();

                if members.is_empty() {
                    return Err(CoreError::EntityNotFound {
                        id: target.id.clone(),
                    });
                }

                let mut first_err: Option<CoreError> = None;
                for member in members {
                    let result = command
                        .attribute_patch(DeviceKind::from_raw(&member.device_type))
                        .map(|patch| (member.id.clone(), patch));

                    match result {
                        Ok((id, patch)) => {
                            if let Err(e) = self.gateway.set_attributes(&id, &patch).await {
                                warn!(device = %id, error = %e, "set member mutation failed");
                                first_err.get_or_insert(e.into());
                            }
                        }
                        Err(e) => {
                            first_err.get_or_insert(e);
                        }
                    }
                }

                if let Some(e) = first_err {
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    // ── Event bridge ─────────────────────────────────────────────────

    /// Spawn the task that turns gateway change events into viewer
    /// wake-ups. Heartbeats are suppressed so viewers are not woken for
    /// no-op pings; everything else triggers one hub broadcast.
    pub fn spawn_event_bridge(
        &self,
        mut events: broadcast::Receiver<Arc<GatewayEvent>>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let hub = Arc::clone(&self.hub);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    result = events.recv() => {
                        match result {
                            Ok(event) => {
                                if event.is_heartbeat() {
                                    trace!("suppressing gateway heartbeat");
                                    continue;
                                }
                                let delivered = hub.broadcast();
                                debug!(
                                    event_type = %event.event_type,
                                    delivered,
                                    "invalidation broadcast"
                                );
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                // Missed events still mean "something
                                // changed" -- wake viewers once.
                                warn!(skipped, "event bridge lagged behind gateway stream");
                                hub.broadcast();
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
            debug!("event bridge exiting");
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use casa_gateway::types::{AttributeBag, Capabilities, DeviceSetRef};

    use super::*;

    struct MockGateway {
        devices: Vec<RawDevice>,
        sets: Vec<RawDeviceSet>,
        patches: Arc<Mutex<Vec<(String, AttributePatch)>>>,
        fail_device: Option<String>,
    }

    impl MockGateway {
        fn new(devices: Vec<RawDevice>) -> Self {
            Self {
                devices,
                sets: Vec::new(),
                patches: Arc::new(Mutex::new(Vec::new())),
                fail_device: None,
            }
        }
    }

    impl Gateway for MockGateway {
        fn list_devices(
            &self,
        ) -> impl Future<Output = Result<Vec<RawDevice>, casa_gateway::Error>> + Send {
            let devices = self.devices.clone();
            async move { Ok(devices) }
        }

        fn list_device_sets(
            &self,
        ) -> impl Future<Output = Result<Vec<RawDeviceSet>, casa_gateway::Error>> + Send {
            let sets = self.sets.clone();
            async move { Ok(sets) }
        }

        fn set_attributes(
            &self,
            device_id: &str,
            patch: &AttributePatch,
        ) -> impl Future<Output = Result<(), casa_gateway::Error>> + Send {
            let fail = self.fail_device.as_deref() == Some(device_id);
            self.patches
                .lock()
                .unwrap()
                .push((device_id.to_owned(), patch.clone()));
            async move {
                if fail {
                    Err(casa_gateway::Error::Command {
                        message: "device unreachable".into(),
                        status: 503,
                    })
                } else {
                    Ok(())
                }
            }
        }
    }

    fn lamp(id: &str) -> RawDevice {
        RawDevice {
            id: id.into(),
            device_type: "light".into(),
            is_reachable: true,
            capabilities: Capabilities {
                can_send: vec![],
                can_receive: vec!["isOn".into(), "lightLevel".into()],
            },
            attributes: AttributeBag {
                custom_name: Some(id.to_uppercase()),
                is_on: Some(true),
                ..AttributeBag::default()
            },
            ..RawDevice::default()
        }
    }

    fn grouped(mut device: RawDevice, set_id: &str) -> RawDevice {
        device.device_set = vec![DeviceSetRef {
            id: set_id.into(),
            name: Some("Set".into()),
        }];
        device
    }

    #[tokio::test]
    async fn query_aggregates_snapshot() {
        let service = Service::new(MockGateway::new(vec![lamp("a"), lamp("b")]));

        let entities = service.query(&EntityFilter::All).await.unwrap();
        assert_eq!(entities.len(), 2);
    }

    #[tokio::test]
    async fn device_command_patches_single_device() {
        let gateway = MockGateway::new(vec![lamp("a")]);
        let patches = Arc::clone(&gateway.patches);
        let service = Service::new(gateway);

        service
            .execute(
                &CommandTarget {
                    id: "a".into(),
                    kind: EntityKind::Device,
                },
                &DeviceCommand::SetLightLevel { light_level: 40 },
            )
            .await
            .unwrap();

        let recorded = patches.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, "a");
        assert_eq!(recorded[0].1.light_level, Some(40));
    }

    #[tokio::test]
    async fn set_command_fans_out_to_members() {
        let gateway = MockGateway::new(vec![
            grouped(lamp("a"), "set-1"),
            grouped(lamp("b"), "set-1"),
            lamp("c"),
        ]);
        let patches = Arc::clone(&gateway.patches);
        let service = Service::new(gateway);

        service
            .execute(
                &CommandTarget {
                    id: "set-1".into(),
                    kind: EntityKind::DeviceSet,
                },
                &DeviceCommand::SetIsOn { is_on: false },
            )
            .await
            .unwrap();

        let recorded = patches.lock().unwrap();
        let ids: Vec<&str> = recorded.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn set_command_attempts_all_members_and_returns_first_error() {
        let mut gateway = MockGateway::new(vec![
            grouped(lamp("a"), "set-1"),
            grouped(lamp("b"), "set-1"),
        ]);
        gateway.fail_device = Some("a".into());
        let patches = Arc::clone(&gateway.patches);
        let service = Service::new(gateway);

        let err = service
            .execute(
                &CommandTarget {
                    id: "set-1".into(),
                    kind: EntityKind::DeviceSet,
                },
                &DeviceCommand::SetIsOn { is_on: true },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::GatewayCommand { .. }));
        // Second member was still attempted.
        assert_eq!(patches.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn grouped_device_is_not_addressable_directly() {
        let service = Service::new(MockGateway::new(vec![grouped(lamp("a"), "set-1")]));

        let err = service
            .execute(
                &CommandTarget {
                    id: "a".into(),
                    kind: EntityKind::Device,
                },
                &DeviceCommand::SetIsOn { is_on: true },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::EntityNotFound { .. }));
    }

    #[tokio::test]
    async fn invalid_command_never_reaches_gateway() {
        let gateway = MockGateway::new(vec![lamp("a")]);
        let patches = Arc::clone(&gateway.patches);
        let service = Service::new(gateway);

        let err = service
            .execute(
                &CommandTarget {
                    id: "a".into(),
                    kind: EntityKind::Device,
                },
                &DeviceCommand::SetLightLevel { light_level: 0 },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::ValidationFailed { .. }));
        assert!(patches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn event_bridge_suppresses_heartbeats() {
        let service = Service::new(MockGateway::new(vec![]));
        let mut viewer = service.hub().register().unwrap();

        let (tx, rx) = broadcast::channel(16);
        let cancel = CancellationToken::new();
        let bridge = service.spawn_event_bridge(rx, cancel.clone());

        tx.send(Arc::new(GatewayEvent {
            id: "e1".into(),
            event_type: "pong".into(),
            time: None,
            data: serde_json::Value::Null,
        }))
        .unwrap();
        tx.send(Arc::new(GatewayEvent {
            id: "e2".into(),
            event_type: "deviceStateChanged".into(),
            time: None,
            data: serde_json::json!({ "id": "dev-1" }),
        }))
        .unwrap();

        // Exactly one signal: the state change, not the pong.
        tokio::time::timeout(Duration::from_secs(1), viewer.signals.recv())
            .await
            .expect("signal within timeout")
            .expect("hub still open");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(viewer.signals.try_recv().is_err());

        cancel.cancel();
        bridge.await.unwrap();
    }
}
