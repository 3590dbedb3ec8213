//! Device tracking: who is plugged into the lab right now?
//!
//! The production implementation ([`adb::AdbTracker`]) holds a long-lived
//! connection to the local ADB server and converts its pushed device-list
//! snapshots into granular [`DeviceEvent`]s. Tests and offline development
//! use [`mock::ScriptedEventSource`] instead.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use devlab_core::{DeviceEvent, ProtocolError};

pub mod adb;
pub mod mock;

/// Error type for starting a device event source.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// TCP connection to the ADB server could not be established.
    #[error("failed to connect to ADB server at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The server rejected or garbled the tracking subscription.
    #[error("ADB server refused device tracking: {0}")]
    Subscribe(#[from] ProtocolError),

    /// The connection failed during the subscription handshake.
    #[error("i/o error during tracking handshake: {0}")]
    Io(#[from] std::io::Error),

    /// The server hung up before accepting the subscription.
    #[error("ADB server closed the connection during the handshake")]
    ClosedEarly,
}

/// A source of device arrival/departure/status events.
///
/// `start` performs whatever handshake the source needs and hands back
/// the receiving end of an event channel. The channel closing means the
/// source is gone for good; callers decide whether that is fatal.
#[async_trait]
pub trait DeviceEventSource: Send + Sync {
    /// Starts the source and returns the event stream.
    ///
    /// # Errors
    ///
    /// Fails when the source cannot be brought up at all, for the ADB
    /// tracker that means the server is unreachable or refused the
    /// subscription. The daemon treats this as fatal: without tracking
    /// it would be flying blind.
    async fn start(&self) -> Result<mpsc::Receiver<DeviceEvent>, TrackerError>;
}
