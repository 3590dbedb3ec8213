//! TrackDevicesUseCase: the live registry of attached lab devices.
//!
//! # What this does (for beginners)
//!
//! The daemon needs one authoritative answer to "which devices are plugged
//! in right now?". This module holds that answer. A device event source
//! (the ADB tracker in production, a scripted source in tests) feeds a
//! stream of [`DeviceEvent`]s into [`run_event_pump`], which folds them
//! into a [`DeviceRegistry`]:
//!
//! - an arrival of a device adds it to the live set (duplicates are
//!   suppressed) and announces it on a broadcast channel,
//! - a departure removes it *silently* and purges its admission state so a
//!   re-attached device starts from a clean slate,
//! - a status change to connected counts as an arrival, a change to
//!   disconnected as a departure, and every other status change is ignored.
//!
//! The registry also carries a side table of display types (serial to
//! human-readable screen description) that the metadata feed replaces
//! wholesale whenever the lab's metadata service pushes an update. The two
//! data sets are deliberately independent: a device can be live without a
//! display type and a display type can outlive its device's session.
//!
//! All registry methods are synchronous and take `&self`; interior
//! mutability keeps callers free to share one registry behind an `Arc`.
//! The lock is never held across an `await`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use devlab_core::{DeviceEvent, DeviceId, DeviceStatus};

use crate::application::dispatch_intents::IntentDispatcher;

/// Capacity of the arrival broadcast channel. Subscribers that fall more
/// than this far behind start missing notifications.
const NOTIFY_CAPACITY: usize = 64;

// ── Notifications ───────────────────────────────────────────────────────────

/// Notification published by the registry to its subscribers.
///
/// Only arrivals are announced. Departures are intentionally silent;
/// interested callers observe them by polling [`DeviceRegistry::device_ids`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryNotification {
    /// A device joined the live set.
    DeviceAdded(DeviceId),
}

// ── Registry ────────────────────────────────────────────────────────────────

/// In-memory registry of the devices currently attached to the lab host.
///
/// Cheap to share: wrap it in an `Arc` and hand clones to the event pump,
/// the dispatcher and the metadata feed.
pub struct DeviceRegistry {
    inner: RwLock<RegistryInner>,
    notify_tx: broadcast::Sender<RegistryNotification>,
}

#[derive(Default)]
struct RegistryInner {
    /// Live device ids in arrival order.
    devices: Vec<DeviceId>,
    /// Serial to display type, replaced wholesale on each metadata push.
    display_types: HashMap<DeviceId, String>,
}

impl DeviceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        let (notify_tx, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            inner: RwLock::new(RegistryInner::default()),
            notify_tx,
        }
    }

    /// Subscribes to arrival notifications.
    ///
    /// Only events published after this call are delivered; there is no
    /// replay of the current live set.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryNotification> {
        self.notify_tx.subscribe()
    }

    /// Adds a device to the live set.
    ///
    /// Idempotent: adding an id that is already live neither reorders the
    /// set nor re-notifies subscribers.
    pub fn add_device(&self, id: DeviceId) {
        let added = {
            let mut inner = self.inner.write().expect("lock poisoned");
            if inner.devices.contains(&id) {
                false
            } else {
                inner.devices.push(id.clone());
                true
            }
        };

        if added {
            info!("device added: {}", id);
            // Send fails only when nobody is subscribed, which is fine.
            let _ = self.notify_tx.send(RegistryNotification::DeviceAdded(id));
        } else {
            debug!("device already tracked: {}", id);
        }
    }

    /// Removes a device from the live set. No notification is published.
    ///
    /// Removing an id that is not live is a no-op.
    pub fn remove_device(&self, id: &DeviceId) {
        let removed = {
            let mut inner = self.inner.write().expect("lock poisoned");
            let before = inner.devices.len();
            inner.devices.retain(|d| d != id);
            inner.devices.len() != before
        };

        if removed {
            info!("device removed: {}", id);
        } else {
            debug!("ignoring removal of unknown device: {}", id);
        }
    }

    /// Returns a snapshot of the live device ids in arrival order.
    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.inner.read().expect("lock poisoned").devices.clone()
    }

    /// Returns whether `id` is currently in the live set.
    pub fn contains(&self, id: &DeviceId) -> bool {
        self.inner.read().expect("lock poisoned").devices.contains(id)
    }

    /// Returns the most recently synced display type for `id`, if any.
    pub fn display_type(&self, id: &DeviceId) -> Option<String> {
        self.inner
            .read()
            .expect("lock poisoned")
            .display_types
            .get(id)
            .cloned()
    }

    /// Replaces the whole display-type table with `table`.
    ///
    /// The feed pushes complete snapshots, so this is a swap rather than a
    /// merge: entries absent from `table` are forgotten.
    pub fn replace_display_types(&self, table: HashMap<DeviceId, String>) {
        debug!("display-type table replaced ({} entries)", table.len());
        self.inner.write().expect("lock poisoned").display_types = table;
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ── Event pump ──────────────────────────────────────────────────────────────

/// Drains a device event stream into the registry until the stream closes.
///
/// This is the single writer of the live set. Besides updating the
/// registry it purges the dispatcher's admission record whenever a device
/// departs, so a device that comes back is not haunted by the bookkeeping
/// of its previous session.
pub async fn run_event_pump(
    mut events: mpsc::Receiver<DeviceEvent>,
    registry: Arc<DeviceRegistry>,
    dispatcher: Arc<IntentDispatcher>,
) {
    while let Some(event) = events.recv().await {
        match event {
            DeviceEvent::Added { id, .. } => registry.add_device(id),
            DeviceEvent::Removed { id } => {
                registry.remove_device(&id);
                dispatcher.purge_device(&id);
            }
            DeviceEvent::Changed { id, status } => match status {
                DeviceStatus::Connected => registry.add_device(id),
                DeviceStatus::Disconnected => {
                    registry.remove_device(&id);
                    dispatcher.purge_device(&id);
                }
                DeviceStatus::Other => {
                    debug!("ignoring status change for {}", id);
                }
            },
        }
    }
    debug!("device event stream ended");
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dispatch_intents::{DeviceGateway, Intent};
    use crate::infrastructure::gateway::mock::RecordingGateway;
    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    fn id(s: &str) -> DeviceId {
        DeviceId::new(s)
    }

    // ── Live set ────────────────────────────────────────────────────────────

    #[test]
    fn test_new_registry_is_empty() {
        let registry = DeviceRegistry::new();

        assert!(registry.device_ids().is_empty());
        assert!(!registry.contains(&id("serial-1")));
    }

    #[test]
    fn test_add_device_appears_in_arrival_order() {
        let registry = DeviceRegistry::new();

        registry.add_device(id("serial-1"));
        registry.add_device(id("serial-2"));
        registry.add_device(id("serial-3"));

        assert_eq!(
            registry.device_ids(),
            vec![id("serial-1"), id("serial-2"), id("serial-3")]
        );
    }

    #[test]
    fn test_add_device_twice_keeps_single_entry() {
        let registry = DeviceRegistry::new();

        registry.add_device(id("serial-1"));
        registry.add_device(id("serial-2"));
        registry.add_device(id("serial-1"));

        // No duplicate and no reordering.
        assert_eq!(registry.device_ids(), vec![id("serial-1"), id("serial-2")]);
    }

    #[test]
    fn test_add_device_notifies_subscribers_exactly_once() {
        let registry = DeviceRegistry::new();
        let mut notifications = registry.subscribe();

        registry.add_device(id("serial-1"));
        registry.add_device(id("serial-1"));

        assert_eq!(
            notifications.try_recv(),
            Ok(RegistryNotification::DeviceAdded(id("serial-1")))
        );
        assert!(notifications.try_recv().is_err(), "duplicate add must not re-notify");
    }

    #[test]
    fn test_add_device_without_subscribers_is_fine() {
        let registry = DeviceRegistry::new();

        // Nobody listening; the mutation must still land.
        registry.add_device(id("serial-1"));

        assert!(registry.contains(&id("serial-1")));
    }

    #[test]
    fn test_subscribe_does_not_replay_existing_devices() {
        let registry = DeviceRegistry::new();
        registry.add_device(id("serial-1"));

        let mut notifications = registry.subscribe();

        assert!(notifications.try_recv().is_err());
    }

    #[test]
    fn test_remove_device_is_silent() {
        let registry = DeviceRegistry::new();
        registry.add_device(id("serial-1"));
        let mut notifications = registry.subscribe();

        registry.remove_device(&id("serial-1"));

        assert!(!registry.contains(&id("serial-1")));
        assert!(notifications.try_recv().is_err(), "removal must not notify");
    }

    #[test]
    fn test_remove_unknown_device_is_noop() {
        let registry = DeviceRegistry::new();
        registry.add_device(id("serial-1"));

        registry.remove_device(&id("serial-99"));

        assert_eq!(registry.device_ids(), vec![id("serial-1")]);
    }

    #[test]
    fn test_remove_preserves_order_of_remaining_devices() {
        let registry = DeviceRegistry::new();
        registry.add_device(id("serial-1"));
        registry.add_device(id("serial-2"));
        registry.add_device(id("serial-3"));

        registry.remove_device(&id("serial-2"));

        assert_eq!(registry.device_ids(), vec![id("serial-1"), id("serial-3")]);
    }

    #[test]
    fn test_readd_after_remove_notifies_again() {
        let registry = DeviceRegistry::new();
        let mut notifications = registry.subscribe();

        registry.add_device(id("serial-1"));
        registry.remove_device(&id("serial-1"));
        registry.add_device(id("serial-1"));

        assert_eq!(
            notifications.try_recv(),
            Ok(RegistryNotification::DeviceAdded(id("serial-1")))
        );
        assert_eq!(
            notifications.try_recv(),
            Ok(RegistryNotification::DeviceAdded(id("serial-1")))
        );
    }

    // ── Display types ───────────────────────────────────────────────────────

    #[test]
    fn test_display_type_defaults_to_none() {
        let registry = DeviceRegistry::new();

        assert_eq!(registry.display_type(&id("serial-1")), None);
    }

    #[test]
    fn test_replace_display_types_makes_entries_visible() {
        let registry = DeviceRegistry::new();

        let mut table = HashMap::new();
        table.insert(id("serial-1"), "1080p HDMI".to_string());
        registry.replace_display_types(table);

        assert_eq!(
            registry.display_type(&id("serial-1")),
            Some("1080p HDMI".to_string())
        );
    }

    #[test]
    fn test_replace_display_types_swaps_instead_of_merging() {
        let registry = DeviceRegistry::new();

        let mut first = HashMap::new();
        first.insert(id("serial-1"), "1080p HDMI".to_string());
        first.insert(id("serial-2"), "720p composite".to_string());
        registry.replace_display_types(first);

        let mut second = HashMap::new();
        second.insert(id("serial-2"), "4K HDMI".to_string());
        registry.replace_display_types(second);

        // serial-1 was absent from the new snapshot, so it is forgotten.
        assert_eq!(registry.display_type(&id("serial-1")), None);
        assert_eq!(
            registry.display_type(&id("serial-2")),
            Some("4K HDMI".to_string())
        );
    }

    #[test]
    fn test_display_types_survive_device_removal() {
        let registry = DeviceRegistry::new();
        registry.add_device(id("serial-1"));

        let mut table = HashMap::new();
        table.insert(id("serial-1"), "1080p HDMI".to_string());
        registry.replace_display_types(table);

        registry.remove_device(&id("serial-1"));

        // Metadata and the live set are independent.
        assert_eq!(
            registry.display_type(&id("serial-1")),
            Some("1080p HDMI".to_string())
        );
    }

    // ── Event pump ──────────────────────────────────────────────────────────

    /// Intent that parks on a semaphore so the device stays busy until the
    /// test decides otherwise.
    struct ParkedIntent {
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl Intent for ParkedIntent {
        async fn run(
            &self,
            _gateway: Arc<dyn DeviceGateway>,
            _device_id: &DeviceId,
        ) -> anyhow::Result<()> {
            let permit = self.gate.acquire().await?;
            permit.forget();
            Ok(())
        }
    }

    fn test_fixture() -> (Arc<DeviceRegistry>, Arc<IntentDispatcher>) {
        let registry = Arc::new(DeviceRegistry::new());
        let gateway = Arc::new(RecordingGateway::new());
        let dispatcher = Arc::new(IntentDispatcher::new(Arc::clone(&registry), gateway));
        (registry, dispatcher)
    }

    #[tokio::test]
    async fn test_pump_applies_added_events() {
        let (registry, dispatcher) = test_fixture();
        let (tx, rx) = mpsc::channel(8);

        tx.send(DeviceEvent::Added {
            id: id("serial-1"),
            status: DeviceStatus::Connected,
        })
        .await
        .unwrap();
        drop(tx);
        run_event_pump(rx, Arc::clone(&registry), dispatcher).await;

        assert_eq!(registry.device_ids(), vec![id("serial-1")]);
    }

    #[tokio::test]
    async fn test_pump_maps_connected_change_to_add() {
        let (registry, dispatcher) = test_fixture();
        let (tx, rx) = mpsc::channel(8);

        tx.send(DeviceEvent::Changed {
            id: id("serial-1"),
            status: DeviceStatus::Connected,
        })
        .await
        .unwrap();
        drop(tx);
        run_event_pump(rx, Arc::clone(&registry), dispatcher).await;

        assert_eq!(registry.device_ids(), vec![id("serial-1")]);
    }

    #[tokio::test]
    async fn test_pump_maps_disconnected_change_to_remove() {
        let (registry, dispatcher) = test_fixture();
        let (tx, rx) = mpsc::channel(8);

        tx.send(DeviceEvent::Added {
            id: id("serial-1"),
            status: DeviceStatus::Connected,
        })
        .await
        .unwrap();
        tx.send(DeviceEvent::Changed {
            id: id("serial-1"),
            status: DeviceStatus::Disconnected,
        })
        .await
        .unwrap();
        drop(tx);
        run_event_pump(rx, Arc::clone(&registry), dispatcher).await;

        assert!(registry.device_ids().is_empty());
    }

    #[tokio::test]
    async fn test_pump_ignores_other_status_changes() {
        let (registry, dispatcher) = test_fixture();
        let (tx, rx) = mpsc::channel(8);

        tx.send(DeviceEvent::Added {
            id: id("serial-1"),
            status: DeviceStatus::Connected,
        })
        .await
        .unwrap();
        // Unauthorized, bootloader and friends map to Other; the live set
        // must not move.
        tx.send(DeviceEvent::Changed {
            id: id("serial-1"),
            status: DeviceStatus::Other,
        })
        .await
        .unwrap();
        tx.send(DeviceEvent::Changed {
            id: id("serial-2"),
            status: DeviceStatus::Other,
        })
        .await
        .unwrap();
        drop(tx);
        run_event_pump(rx, Arc::clone(&registry), dispatcher).await;

        assert_eq!(registry.device_ids(), vec![id("serial-1")]);
    }

    #[tokio::test]
    async fn test_pump_purges_admission_state_on_removal() {
        let (registry, dispatcher) = test_fixture();
        registry.add_device(id("serial-1"));

        // Park an intent so the device is busy with a follow-up queued.
        let gate = Arc::new(Semaphore::new(0));
        dispatcher.dispatch_one(
            Arc::new(ParkedIntent {
                gate: Arc::clone(&gate),
            }),
            &id("serial-1"),
        );
        dispatcher.dispatch_one(
            Arc::new(ParkedIntent {
                gate: Arc::clone(&gate),
            }),
            &id("serial-1"),
        );
        assert!(dispatcher.is_device_busy(&id("serial-1")));

        let (tx, rx) = mpsc::channel(8);
        tx.send(DeviceEvent::Removed { id: id("serial-1") })
            .await
            .unwrap();
        drop(tx);
        run_event_pump(rx, Arc::clone(&registry), Arc::clone(&dispatcher)).await;

        // Both the live set and the admission record are gone.
        assert!(registry.device_ids().is_empty());
        assert!(!dispatcher.is_device_busy(&id("serial-1")));
    }

    #[tokio::test]
    async fn test_pump_ends_when_source_closes() {
        let (registry, dispatcher) = test_fixture();
        let (tx, rx) = mpsc::channel::<DeviceEvent>(8);

        drop(tx);

        // Completes rather than hanging.
        run_event_pump(rx, registry, dispatcher).await;
    }
}
