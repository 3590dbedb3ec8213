//! Infrastructure layer: everything that touches the outside world.
//!
//! - [`tracker`]: subscribes to the local ADB server's device tracking
//!   feed and turns its snapshots into device events.
//! - [`gateway`]: runs shell commands on devices through the ADB server,
//!   implementing the application layer's `DeviceGateway` port.
//! - [`metadata`]: WebSocket client for the display-type push feed.
//! - [`storage`]: TOML configuration persisted in the platform config
//!   directory.
//!
//! Dependency rule: infrastructure may depend on the application layer
//! (it implements the ports defined there), but the application layer
//! never reaches into infrastructure for anything but wiring in tests.

pub mod gateway;
pub mod metadata;
pub mod storage;
pub mod tracker;
