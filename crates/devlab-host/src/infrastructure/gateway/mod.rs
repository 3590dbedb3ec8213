//! Device gateway implementations.
//!
//! The `DeviceGateway` port lives next to its consumer in
//! [`crate::application::dispatch_intents`]; this module provides the
//! ADB-backed production implementation and a recording fake for tests.

pub mod adb;
pub mod mock;
