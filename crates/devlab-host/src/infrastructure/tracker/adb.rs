//! ADB server device tracker.
//!
//! Speaks the ADB *smart socket* protocol to the local server (usually
//! `127.0.0.1:5037`): one framed request, a 4-byte `OKAY`/`FAIL` verdict,
//! and then, for `host:track-devices`, an endless stream of framed device
//! list snapshots. The server pushes one snapshot immediately on
//! subscribe and another on every change.
//!
//! Each snapshot is the complete current list, so the tracker keeps the
//! previous one and emits the difference: a new serial comes out as an
//! arrival and a vanished serial as a departure, while a serial whose
//! state moved becomes a status change. The very first snapshot therefore
//! produces one arrival per already-attached device.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use devlab_core::{
    decode_block, decode_status, encode_request, parse_device_list, AdbDeviceState, DeviceEvent,
    DeviceId, ProtocolError,
};

use super::{DeviceEventSource, TrackerError};

/// The tracking service name on the ADB smart socket.
const TRACK_SERVICE: &str = "host:track-devices";

/// Capacity of the event channel handed to the consumer.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Read chunk size for the tracking connection.
const READ_CHUNK: usize = 4096;

/// Tracks devices through a local ADB server.
pub struct AdbTracker {
    addr: SocketAddr,
}

impl AdbTracker {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

#[async_trait]
impl DeviceEventSource for AdbTracker {
    async fn start(&self) -> Result<mpsc::Receiver<DeviceEvent>, TrackerError> {
        let mut stream =
            TcpStream::connect(self.addr)
                .await
                .map_err(|source| TrackerError::Connect {
                    addr: self.addr.to_string(),
                    source,
                })?;

        let request = encode_request(TRACK_SERVICE)?;
        stream.write_all(&request).await?;

        // Accumulate until the server's verdict is complete. Bytes beyond
        // it are the start of the first snapshot and must be kept.
        let mut recv_buf: Vec<u8> = Vec::with_capacity(READ_CHUNK);
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            match decode_status(&recv_buf) {
                Ok(consumed) => {
                    recv_buf.drain(..consumed);
                    break;
                }
                Err(ProtocolError::InsufficientData { .. }) => {
                    let n = stream.read(&mut chunk).await?;
                    if n == 0 {
                        return Err(TrackerError::ClosedEarly);
                    }
                    recv_buf.extend_from_slice(&chunk[..n]);
                }
                Err(e) => return Err(TrackerError::Subscribe(e)),
            }
        }
        debug!("ADB server accepted device tracking");

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(run_tracking_loop(stream, recv_buf, tx));
        Ok(rx)
    }
}

/// Reads framed snapshots and forwards diffed events until either side
/// goes away.
///
/// The loop ends, with a warning, when the server closes the connection
/// or the feed turns to garbage; dropping the sender then closes the
/// event channel, which the consumer observes as end of stream.
async fn run_tracking_loop(
    mut stream: TcpStream,
    mut recv_buf: Vec<u8>,
    tx: mpsc::Sender<DeviceEvent>,
) {
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut previous: Vec<(DeviceId, AdbDeviceState)> = Vec::new();

    loop {
        // Drain every complete snapshot already buffered.
        loop {
            match decode_block(&recv_buf) {
                Ok((block, consumed)) => {
                    recv_buf.drain(..consumed);
                    let current = parse_device_list(&block);
                    for event in diff_snapshots(&previous, &current) {
                        if tx.send(event).await.is_err() {
                            debug!("event receiver dropped; stopping device tracking");
                            return;
                        }
                    }
                    previous = current;
                }
                Err(ProtocolError::InsufficientData { .. }) => break,
                Err(e) => {
                    warn!("device tracking feed corrupted: {}", e);
                    return;
                }
            }
        }

        match stream.read(&mut chunk).await {
            Ok(0) => {
                warn!("ADB server closed the device tracking connection");
                return;
            }
            Ok(n) => recv_buf.extend_from_slice(&chunk[..n]),
            Err(e) => {
                warn!("device tracking read failed: {}", e);
                return;
            }
        }
    }
}

/// Computes granular events between consecutive snapshots.
///
/// Arrivals and status changes come out in the order the new snapshot
/// lists them; departures follow, in the order the old snapshot listed
/// them. An arrival carries the mapped status of whatever state the
/// device showed up in.
fn diff_snapshots(
    previous: &[(DeviceId, AdbDeviceState)],
    current: &[(DeviceId, AdbDeviceState)],
) -> Vec<DeviceEvent> {
    let mut events = Vec::new();

    for (id, state) in current {
        match previous.iter().find(|(prev_id, _)| prev_id == id) {
            None => events.push(DeviceEvent::Added {
                id: id.clone(),
                status: state.status(),
            }),
            Some((_, prev_state)) if prev_state != state => {
                events.push(DeviceEvent::Changed {
                    id: id.clone(),
                    status: state.status(),
                });
            }
            Some(_) => {}
        }
    }

    for (id, _) in previous {
        if !current.iter().any(|(cur_id, _)| cur_id == id) {
            events.push(DeviceEvent::Removed { id: id.clone() });
        }
    }

    events
}

// ── Tests ───────────────────────────────────────────────────────────────────
