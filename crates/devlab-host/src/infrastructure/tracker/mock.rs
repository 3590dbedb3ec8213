//! Scripted device event source for tests and offline development.
//!
//! Plays back a fixed list of events after `start` and then stays open
//! for injected follow-ups, mimicking a tracker whose devices come and
//! go on cue. Call [`ScriptedEventSource::stop`] to close the event
//! channel the way a lost tracking connection would.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use devlab_core::DeviceEvent;

use super::{DeviceEventSource, TrackerError};

pub struct ScriptedEventSource {
    script: Mutex<Vec<DeviceEvent>>,
    live_tx: Mutex<Option<mpsc::Sender<DeviceEvent>>>,
}

impl ScriptedEventSource {
    /// Source that emits nothing until events are injected.
    pub fn new() -> Self {
        Self::with_script(Vec::new())
    }

    /// Source that plays `script` back, in order, once started.
    pub fn with_script(script: Vec<DeviceEvent>) -> Self {
        Self {
            script: Mutex::new(script),
            live_tx: Mutex::new(None),
        }
    }

    /// Feeds one more event, as if the tracker had just observed it.
    ///
    /// # Panics
    ///
    /// Panics when called before `start`; that is a test bug.
    pub async fn inject(&self, event: DeviceEvent) {
        let tx = self
            .live_tx
            .lock()
            .expect("lock poisoned")
            .clone()
            .expect("scripted source not started");
        tx.send(event).await.expect("event receiver dropped");
    }

    /// Closes the event channel, like the tracking connection dropping.
    pub fn stop(&self) {
        self.live_tx.lock().expect("lock poisoned").take();
    }
}

impl Default for ScriptedEventSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceEventSource for ScriptedEventSource {
    async fn start(&self) -> Result<mpsc::Receiver<DeviceEvent>, TrackerError> {
        let (tx, rx) = mpsc::channel(64);
        let script: Vec<DeviceEvent> = self
            .script
            .lock()
            .expect("lock poisoned")
            .drain(..)
            .collect();
        *self.live_tx.lock().expect("lock poisoned") = Some(tx.clone());
        tokio::spawn(async move {
            for event in script {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}
