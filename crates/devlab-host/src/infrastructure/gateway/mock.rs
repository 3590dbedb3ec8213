//! Recording gateway for tests.
//!
//! Remembers every shell call and answers with a canned reply, so tests
//! can assert what would have reached the devices without a real ADB
//! server anywhere in sight.

use std::sync::Mutex;

use async_trait::async_trait;

use devlab_core::DeviceId;

use crate::application::dispatch_intents::{DeviceGateway, GatewayError};

/// Gateway double that records calls instead of talking to ADB.
pub struct RecordingGateway {
    calls: Mutex<Vec<(DeviceId, String)>>,
    reply: Vec<u8>,
    should_fail: bool,
}

impl RecordingGateway {
    /// Gateway that answers every command with empty output.
    pub fn new() -> Self {
        Self::replying(Vec::new())
    }

    /// Gateway that answers every command with `reply`.
    pub fn replying(reply: Vec<u8>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            reply,
            should_fail: false,
        }
    }

    /// Gateway whose every command fails.
    pub fn failing() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            reply: Vec::new(),
            should_fail: true,
        }
    }

    /// Everything that was asked of the devices, in call order.
    pub fn calls(&self) -> Vec<(DeviceId, String)> {
        self.calls.lock().expect("lock poisoned").clone()
    }
}

impl Default for RecordingGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceGateway for RecordingGateway {
    async fn shell(&self, device_id: &DeviceId, command: &str) -> Result<Vec<u8>, GatewayError> {
        self.calls
            .lock()
            .expect("lock poisoned")
            .push((device_id.clone(), command.to_string()));
        if self.should_fail {
            return Err(GatewayError::ClosedEarly);
        }
        Ok(self.reply.clone())
    }
}
