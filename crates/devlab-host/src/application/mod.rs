//! Application layer: use cases that orchestrate the domain model.
//!
//! Each sub-module here is one *use case*, a single coherent piece of
//! behaviour the daemon performs:
//!
//! - [`track_devices`]: maintains the live registry of attached devices and
//!   their display-type metadata, fed by a device event source.
//! - [`dispatch_intents`]: runs intents against devices under per-device
//!   admission control (one at a time per device, latest follow-up queued).
//!
//! Use cases depend only on `devlab-core` domain types and on the port
//! traits they define themselves; the concrete ADB / WebSocket plumbing
//! lives in [`crate::infrastructure`] and is injected at startup.

pub mod dispatch_intents;
pub mod track_devices;
