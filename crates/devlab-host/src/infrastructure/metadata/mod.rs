//! Display-type metadata: what screen is each device driving?
//!
//! The lab's metadata service pushes the complete serial-to-display-type
//! table over a WebSocket whenever anything changes. [`ws::MetadataFeed`]
//! subscribes, keeps the registry's table in sync and reconnects on its
//! own when the service drops. The daemon runs fine without it; devices
//! then simply have no display type.

use thiserror::Error;

pub mod ws;

/// Error type for one metadata feed connection attempt.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The WebSocket connection could not be established.
    #[error("failed to connect to metadata feed at {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
}
