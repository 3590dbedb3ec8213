//! DispatchIntentsUseCase: per-device admission control for intents.
//!
//! # What this does (for beginners)
//!
//! An *intent* is one asynchronous operation aimed at one device, such as
//! "launch the test app" or "read the device model". Lab devices fall over
//! when several operations hit them at once, so the dispatcher enforces a
//! simple admission rule per device:
//!
//! - a free device runs a dispatched intent immediately and becomes busy,
//! - a busy device parks the intent in a single *pending* slot instead,
//! - a newer dispatch overwrites the parked intent, so only the most
//!   recent follow-up ever runs (rapid-fire UI clicks collapse into one),
//! - when the running intent finishes, success or failure alike, the
//!   parked intent is promoted and runs next; with nothing parked the
//!   device simply becomes free again.
//!
//! Different devices never wait on each other: each runs its intents on
//! its own task. Dispatch itself never blocks and never reports the
//! intent's outcome; fire and forget.
//!
//! There is no cancellation and no timeout. An intent that never
//! completes leaves its device busy for the rest of the session, which in
//! practice means a hung device command keeps that one device parked
//! while the rest of the lab carries on.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use devlab_core::{DeviceId, ProtocolError};

use crate::application::track_devices::DeviceRegistry;

// ── Device gateway port ─────────────────────────────────────────────────────

/// Error type for device gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// TCP connection to the device service could not be established.
    #[error("failed to connect to device service at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The reply broke the wire protocol, or the service reported failure.
    #[error("device service protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The connection failed mid-exchange.
    #[error("i/o error during device command: {0}")]
    Io(#[from] std::io::Error),

    /// The service hung up before finishing the handshake.
    #[error("device service closed the connection mid-handshake")]
    ClosedEarly,
}

/// The device-access handle an intent receives when it runs.
///
/// Production wires in the ADB-backed implementation from
/// `infrastructure::gateway`; tests substitute recording fakes. Keeping
/// this a trait means intents never know or care how commands reach the
/// device.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceGateway: Send + Sync {
    /// Runs `command` in the device's shell and returns its raw output,
    /// everything the command wrote until it exited.
    async fn shell(&self, device_id: &DeviceId, command: &str) -> Result<Vec<u8>, GatewayError>;
}

// ── Intents ─────────────────────────────────────────────────────────────────

/// One asynchronous operation to run against one device.
///
/// Implementations receive the shared gateway and the id of the device
/// they were dispatched to. The dispatcher logs a failed result at debug
/// level and otherwise ignores it; success and failure both release the
/// device.
#[async_trait]
pub trait Intent: Send + Sync {
    async fn run(
        &self,
        gateway: Arc<dyn DeviceGateway>,
        device_id: &DeviceId,
    ) -> anyhow::Result<()>;
}

/// [`Intent`] implemented by a plain async closure; see [`intent_fn`].
pub struct IntentFn<F> {
    f: F,
}

/// Wraps an async closure as an [`Intent`], so callers can dispatch
/// one-off operations without defining a type:
///
/// ```ignore
/// dispatcher.dispatch_one(
///     Arc::new(intent_fn(|gateway, device_id| async move {
///         gateway.shell(&device_id, "input keyevent KEYCODE_WAKEUP").await?;
///         Ok(())
///     })),
///     &device_id,
/// );
/// ```
pub fn intent_fn<F, Fut>(f: F) -> IntentFn<F>
where
    F: Fn(Arc<dyn DeviceGateway>, DeviceId) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    IntentFn { f }
}

#[async_trait]
impl<F, Fut> Intent for IntentFn<F>
where
    F: Fn(Arc<dyn DeviceGateway>, DeviceId) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn run(
        &self,
        gateway: Arc<dyn DeviceGateway>,
        device_id: &DeviceId,
    ) -> anyhow::Result<()> {
        (self.f)(gateway, device_id.clone()).await
    }
}

// ── Dispatcher ──────────────────────────────────────────────────────────────

/// One busy device's bookkeeping. A record exists exactly while its
/// device is busy; a device with no record is free.
struct AdmissionRecord {
    /// Stamp tying the running task to this record. A task whose stamp no
    /// longer matches completed a run from before a purge and must not
    /// touch the record.
    generation: u64,
    /// The single parked follow-up; a newer dispatch overwrites it.
    pending: Option<Arc<dyn Intent>>,
}

/// Serializes intents per device while letting devices run concurrently.
pub struct IntentDispatcher {
    registry: Arc<DeviceRegistry>,
    gateway: Arc<dyn DeviceGateway>,
    records: Arc<Mutex<HashMap<DeviceId, AdmissionRecord>>>,
    /// Source of generation stamps, monotonically increasing.
    next_generation: AtomicU64,
}

impl IntentDispatcher {
    pub fn new(registry: Arc<DeviceRegistry>, gateway: Arc<dyn DeviceGateway>) -> Self {
        Self {
            registry,
            gateway,
            records: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Dispatches `intent` to one device and returns immediately.
    ///
    /// On a free device the intent starts on its own task and the device
    /// becomes busy before this method returns. On a busy device the
    /// intent is parked, replacing whatever was parked before; it runs
    /// when the current intent finishes. The admission record is created
    /// lazily, so dispatching to a device the dispatcher has never seen
    /// simply works.
    pub fn dispatch_one(&self, intent: Arc<dyn Intent>, device_id: &DeviceId) {
        let generation = {
            let mut records = self.records.lock().expect("lock poisoned");
            if let Some(record) = records.get_mut(device_id) {
                // Latest wins; an older parked intent is dropped unrun.
                if record.pending.replace(intent).is_some() {
                    debug!("replacing parked intent for busy device {}", device_id);
                } else {
                    debug!("parking intent for busy device {}", device_id);
                }
                return;
            }
            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
            records.insert(
                device_id.clone(),
                AdmissionRecord {
                    generation,
                    pending: None,
                },
            );
            generation
        };
        self.spawn_runner(intent, device_id.clone(), generation);
    }

    /// Dispatches the same intent to every device currently live in the
    /// registry.
    ///
    /// The device list is a snapshot; each device is admitted
    /// independently, so one busy device never delays another.
    pub fn dispatch_all(&self, intent: Arc<dyn Intent>) {
        for device_id in self.registry.device_ids() {
            self.dispatch_one(Arc::clone(&intent), &device_id);
        }
    }

    /// Reports whether a device currently has an intent running.
    ///
    /// A device the dispatcher has never dispatched to is simply free.
    pub fn is_device_busy(&self, device_id: &DeviceId) -> bool {
        self.records
            .lock()
            .expect("lock poisoned")
            .contains_key(device_id)
    }

    /// Forgets a device's admission bookkeeping entirely.
    ///
    /// Called when a device leaves the lab. A still-running intent is not
    /// cancelled (there is no cancellation), but its completion will find
    /// its record gone and the parked follow-up, if any, is dropped
    /// unrun. If the device comes back it starts from a clean slate.
    pub fn purge_device(&self, device_id: &DeviceId) {
        let purged = self
            .records
            .lock()
            .expect("lock poisoned")
            .remove(device_id)
            .is_some();
        if purged {
            debug!("purged admission record for {}", device_id);
        }
    }

    /// Runs `intent` on its own task, then promotes parked follow-ups one
    /// after another until the device has nothing left to do.
    fn spawn_runner(&self, intent: Arc<dyn Intent>, device_id: DeviceId, generation: u64) {
        let records = Arc::clone(&self.records);
        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move {
            let mut current = intent;
            loop {
                debug!("intent starting on {}", device_id);
                if let Err(e) = current.run(Arc::clone(&gateway), &device_id).await {
                    // Failures release the device exactly like success;
                    // the detail is only worth a log line.
                    warn!("intent on {} failed: {:#}", device_id, e);
                }

                let next = {
                    let mut records = records.lock().expect("lock poisoned");
                    match records.get_mut(&device_id) {
                        // Purged while running (device unplugged).
                        None => None,
                        // The device was purged and re-dispatched while we
                        // ran; the record belongs to a newer task now.
                        Some(record) if record.generation != generation => {
                            debug!("ignoring stale completion for {}", device_id);
                            None
                        }
                        Some(record) => match record.pending.take() {
                            Some(parked) => Some(parked),
                            None => {
                                records.remove(&device_id);
                                None
                            }
                        },
                    }
                };

                match next {
                    Some(parked) => {
                        debug!("promoting parked intent on {}", device_id);
                        current = parked;
                    }
                    None => return,
                }
            }
        });
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
