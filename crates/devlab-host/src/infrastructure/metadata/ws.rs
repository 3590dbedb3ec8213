//! WebSocket client for the display-type push feed.
//!
//! Every text frame carries the complete table as one JSON object, for
//! example `{"emulator-5554": "1080p HDMI", "R58M123ABC": "720p"}`. A
//! JSON `null` means the service has no data at all and clears the
//! table. The feed never merges: each frame replaces everything the
//! previous one said.
//!
//! The feed is deliberately forgiving. A malformed frame is logged and
//! skipped, a dropped connection is retried after a fixed delay, and
//! none of it is ever fatal to the daemon.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use devlab_core::DeviceId;

use crate::application::track_devices::DeviceRegistry;

use super::MetadataError;

/// Delay between reconnection attempts after the feed drops.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Keeps a registry's display-type table in sync with the push feed.
pub struct MetadataFeed {
    url: String,
    registry: Arc<DeviceRegistry>,
}

impl MetadataFeed {
    pub fn new(url: String, registry: Arc<DeviceRegistry>) -> Self {
        Self { url, registry }
    }

    /// Connects and applies frames, reconnecting forever.
    ///
    /// Never returns under normal operation; run it on its own task.
    pub async fn run(self) {
        loop {
            match self.run_once().await {
                Ok(()) => info!("metadata feed closed; reconnecting"),
                Err(e) => warn!("{}; retrying", e),
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    /// One connection lifecycle: connect, then apply frames until the
    /// stream ends.
    pub async fn run_once(&self) -> Result<(), MetadataError> {
        let (ws_stream, _response) =
            connect_async(self.url.as_str())
                .await
                .map_err(|source| MetadataError::Connect {
                    url: self.url.clone(),
                    source,
                })?;
        info!("metadata feed connected: {}", self.url);

        let (_write, mut read) = ws_stream.split();
        while let Some(frame) = read.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => self.apply_frame(&text),
                Ok(WsMessage::Close(_)) => {
                    debug!("metadata feed sent close");
                    break;
                }
                // Ping/pong and binary frames are not part of the feed.
                Ok(_) => {}
                Err(e) => {
                    warn!("metadata feed stream error: {}", e);
                    break;
                }
            }
        }
        Ok(())
    }

    /// Decodes one frame and swaps the registry's display-type table.
    fn apply_frame(&self, text: &str) {
        match serde_json::from_str::<Option<HashMap<DeviceId, String>>>(text) {
            Ok(Some(table)) => self.registry.replace_display_types(table),
            Ok(None) => {
                debug!("metadata service reports no data");
                self.registry.replace_display_types(HashMap::new());
            }
            Err(e) => warn!("skipping malformed metadata frame: {}", e),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
