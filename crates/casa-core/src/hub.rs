//! Invalidation hub: viewer connection registry + best-effort fan-out.
//!
//! Every admitted viewer connection registers an unbounded sender here;
//! a broadcast pushes one payload-free signal to each member without
//! blocking on any of them. There is deliberately no per-topic scoping:
//! every viewer is woken by every signal and re-fetches, which is
//! idempotent. If fan-out load ever becomes a concern, the upgrade
//! path is a subscription registry keyed by viewed-entity id.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A payload-free "something changed, re-fetch" notice. Carries no
/// identity beyond its occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidationSignal;

/// One admitted viewer's membership in the hub.
///
/// Dropping the receiver (or the whole struct) makes the next
/// broadcast evict this member; calling [`InvalidationHub::unregister`]
/// removes it eagerly.
pub struct ViewerHandle {
    pub id: Uuid,
    pub signals: mpsc::UnboundedReceiver<InvalidationSignal>,
    /// Cancelled when the hub shuts down — connection tasks must close
    /// their socket when this fires, not merely stop reading.
    pub shutdown: CancellationToken,
}

/// Connection registry with non-blocking broadcast.
pub struct InvalidationHub {
    members: DashMap<Uuid, mpsc::UnboundedSender<InvalidationSignal>>,
    shutdown: CancellationToken,
}

impl InvalidationHub {
    pub fn new() -> Self {
        Self {
            members: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Admit a verified connection into the broadcast set.
    ///
    /// Returns `None` once the hub has shut down — late upgrades race
    /// with process teardown and must not produce half-open members.
    pub fn register(&self) -> Option<ViewerHandle> {
        if self.shutdown.is_cancelled() {
            return None;
        }

        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.members.insert(id, tx);

        tracing::debug!(viewer = %id, members = self.members.len(), "viewer registered");

        Some(ViewerHandle {
            id,
            signals: rx,
            shutdown: self.shutdown.child_token(),
        })
    }

    /// Remove a member on disconnect.
    pub fn unregister(&self, id: &Uuid) {
        if self.members.remove(id).is_some() {
            tracing::debug!(viewer = %id, members = self.members.len(), "viewer unregistered");
        }
    }

    /// Push one signal to every member. Best-effort and non-blocking:
    /// a dead member is evicted, never waited on. Returns the number of
    /// members the signal was delivered to.
    pub fn broadcast(&self) -> usize {
        let mut delivered = 0usize;
        let mut dead: Vec<Uuid> = Vec::new();

        for member in &self.members {
            if member.value().send(InvalidationSignal).is_ok() {
                delivered += 1;
            } else {
                dead.push(*member.key());
            }
        }

        for id in dead {
            self.members.remove(&id);
            tracing::debug!(viewer = %id, "evicted dead viewer during broadcast");
        }

        delivered
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Terminate every open connection and refuse new registrations.
    ///
    /// Cancels the hub token (each connection task closes its socket)
    /// and clears the membership set.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.members.clear();
        tracing::info!("invalidation hub shut down");
    }
}

impl Default for InvalidationHub {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_every_member() {
        let hub = InvalidationHub::new();
        let mut a = hub.register().unwrap();
        let mut b = hub.register().unwrap();

        assert_eq!(hub.broadcast(), 2);

        assert_eq!(a.signals.try_recv().unwrap(), InvalidationSignal);
        assert_eq!(b.signals.try_recv().unwrap(), InvalidationSignal);
    }

    #[tokio::test]
    async fn burst_of_n_signals_delivers_n() {
        let hub = InvalidationHub::new();
        let mut viewer = hub.register().unwrap();

        for _ in 0..5 {
            hub.broadcast();
        }

        let mut received = 0;
        while viewer.signals.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 5);
    }

    #[tokio::test]
    async fn dead_member_is_evicted_without_failing_others() {
        let hub = InvalidationHub::new();
        let dead = hub.register().unwrap();
        let mut alive = hub.register().unwrap();

        drop(dead.signals);

        assert_eq!(hub.broadcast(), 1);
        assert_eq!(hub.member_count(), 1);
        assert_eq!(alive.signals.try_recv().unwrap(), InvalidationSignal);
    }

    #[tokio::test]
    async fn unregister_removes_membership() {
        let hub = InvalidationHub::new();
        let viewer = hub.register().unwrap();
        assert_eq!(hub.member_count(), 1);

        hub.unregister(&viewer.id);
        assert_eq!(hub.member_count(), 0);
        assert_eq!(hub.broadcast(), 0);
    }

    #[tokio::test]
    async fn shutdown_cancels_members_and_refuses_new_ones() {
        let hub = InvalidationHub::new();
        let viewer = hub.register().unwrap();

        hub.shutdown();

        assert!(viewer.shutdown.is_cancelled());
        assert_eq!(hub.member_count(), 0);
        assert!(hub.register().is_none());
    }
}
