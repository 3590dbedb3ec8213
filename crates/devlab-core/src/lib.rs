//! # devlab-core
//!
//! Shared library for DevLab containing the device domain entities and the
//! codec for the ADB server's host-side "smart socket" protocol.
//!
//! This crate is used by the host daemon and by any tooling that speaks to the
//! ADB server directly.  It has zero dependencies on OS APIs, network sockets,
//! or an async runtime.
//!
//! # Architecture overview (for beginners)
//!
//! DevLab is a device-lab controller: it watches the set of Android devices
//! attached to a host machine and serializes "intent" actions dispatched to
//! each device, so that at most one action runs per device at a time.
//!
//! This crate (`devlab-core`) is the shared foundation.  It defines:
//!
//! - **`domain`** – Pure business vocabulary with no OS dependencies: device
//!   identifiers, connection statuses, and the lifecycle events that flow from
//!   a device tracker into the registry.
//!
//! - **`protocol`** – How bytes travel to and from the local ADB server.
//!   Every request and reply is framed with a 4-digit lowercase-hex length
//!   prefix; this module encodes requests, decodes reply statuses, and parses
//!   the device-list payloads pushed by `host:track-devices`.

// Declare the two top-level modules.  Rust will look for each in a
// subdirectory with the same name (e.g., src/protocol/mod.rs).
pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `devlab_core::DeviceId` instead of `devlab_core::domain::device::DeviceId`.
pub use domain::device::{AdbDeviceState, DeviceEvent, DeviceId, DeviceStatus};
pub use protocol::codec::{
    decode_block, decode_status, encode_request, parse_device_list, ProtocolError,
};
